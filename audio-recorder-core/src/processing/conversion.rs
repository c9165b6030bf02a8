//! Per-source format conversion: native capture format to the session's
//! 16-bit PCM target.
//!
//! A chain is an ordered list of stages (channel adapt, resample, channel
//! re-check) built once for a `(native, target)` pair. Hotplug
//! recovery builds a fresh chain for the new device and swaps it in as a
//! single value; a chain is never edited in place.

use rubato::{FftFixedIn, Resampler};

use crate::models::audio_models::AudioFormat;
use crate::models::error::RecorderError;
use crate::processing::pcm;

/// A block of interleaved f32 samples with its layout.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBlock {
    pub fn new(samples: Vec<f32>, format: AudioFormat) -> Self {
        Self {
            samples,
            sample_rate: format.sample_rate,
            channels: format.channels,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }
}

/// One transform in a conversion chain.
pub trait ConversionStage: Send {
    fn name(&self) -> &'static str;

    fn process(&mut self, block: AudioBlock) -> AudioBlock;

    /// Emit anything held back, at end of stream.
    fn flush(&mut self) -> Option<AudioBlock> {
        None
    }
}

/// Channel up/down-mix.
///
/// - 2 → 1: average of left and right.
/// - N → M (N > M): keep the first M channels.
/// - 1 → M: duplicate the mono sample into every channel.
#[derive(Debug, Clone)]
pub struct ChannelAdapter {
    target_channels: u16,
}

impl ChannelAdapter {
    pub fn new(target_channels: u16) -> Self {
        Self {
            target_channels: target_channels.max(1),
        }
    }
}

impl ConversionStage for ChannelAdapter {
    fn name(&self) -> &'static str {
        "channel-adapt"
    }

    fn process(&mut self, block: AudioBlock) -> AudioBlock {
        let samples = adapt_channels(&block.samples, block.channels, self.target_channels);
        AudioBlock {
            samples,
            sample_rate: block.sample_rate,
            channels: self.target_channels,
        }
    }
}

/// Channel-count guard run after resampling.
///
/// Resamplers may hand back a different layout than they were given; this
/// stage adapts whatever arrives to the target channel count.
#[derive(Debug, Clone)]
pub struct ChannelRecheck {
    adapter: ChannelAdapter,
}

impl ChannelRecheck {
    pub fn new(target_channels: u16) -> Self {
        Self {
            adapter: ChannelAdapter::new(target_channels),
        }
    }
}

impl ConversionStage for ChannelRecheck {
    fn name(&self) -> &'static str {
        "channel-recheck"
    }

    fn process(&mut self, block: AudioBlock) -> AudioBlock {
        if block.channels == self.adapter.target_channels {
            block
        } else {
            log::debug!(
                "channel recheck adapting {} → {} channels",
                block.channels,
                self.adapter.target_channels
            );
            self.adapter.process(block)
        }
    }
}

fn adapt_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    if from == to {
        return samples.to_vec();
    }

    let frame_count = samples.len() / from;
    let mut out = Vec::with_capacity(frame_count * to);
    for frame in samples.chunks_exact(from) {
        if from == 2 && to == 1 {
            out.push((frame[0] + frame[1]) * 0.5);
        } else if from > to {
            out.extend_from_slice(&frame[..to]);
        } else if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            // e.g. stereo into more channels: keep what exists, pad silence
            out.extend_from_slice(frame);
            out.extend(std::iter::repeat(0.0).take(to - from));
        }
    }
    out
}

/// Requested input frames per FFT pass; rubato rounds it to a multiple of
/// the rate ratio.
const RESAMPLE_CHUNK: usize = 1024;

/// Band-limited streaming resampler on rubato's FFT engine.
///
/// Input is buffered until a full chunk is available; the remainder is
/// carried into the next block, so any split of a stream resamples the same
/// as the stream in one piece. The filter delay is trimmed from the start
/// and `flush` emits the tail, so the total output length is the input
/// length scaled by the rate ratio.
pub struct FftResampler {
    source_rate: u32,
    target_rate: u32,
    channels: u16,
    inner: FftFixedIn<f32>,
    carry: Vec<Vec<f32>>,
    skip: usize,
    frames_in: u64,
    frames_out: u64,
}

impl FftResampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: u16) -> Result<Self, RecorderError> {
        let channels = channels.max(1);
        if source_rate == 0 || target_rate == 0 {
            return Err(RecorderError::ConfigurationFailed(format!(
                "cannot resample {} Hz to {} Hz",
                source_rate, target_rate
            )));
        }
        let inner = FftFixedIn::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            RESAMPLE_CHUNK,
            1,
            channels as usize,
        )
        .map_err(|e| {
            RecorderError::ConfigurationFailed(format!(
                "cannot resample {} Hz to {} Hz: {}",
                source_rate, target_rate, e
            ))
        })?;
        let skip = inner.output_delay();
        Ok(Self {
            source_rate,
            target_rate,
            channels,
            inner,
            carry: vec![Vec::with_capacity(RESAMPLE_CHUNK * 2); channels as usize],
            skip,
            frames_in: 0,
            frames_out: 0,
        })
    }

    fn output_block(&self, samples: Vec<f32>) -> AudioBlock {
        AudioBlock {
            samples,
            sample_rate: self.target_rate,
            channels: self.channels,
        }
    }

    /// Frames the whole input so far should resample to.
    fn expected_frames(&self) -> u64 {
        let source = self.source_rate as u64;
        (self.frames_in * self.target_rate as u64 + source / 2) / source
    }

    /// Interleave planar output into `out`, dropping the leading delay.
    fn emit(&mut self, planar: &[Vec<f32>], out: &mut Vec<f32>) {
        let frames = planar.first().map_or(0, Vec::len);
        let skipped = self.skip.min(frames);
        self.skip -= skipped;
        out.reserve((frames - skipped) * planar.len());
        for i in skipped..frames {
            out.extend(planar.iter().map(|channel| channel[i]));
        }
        self.frames_out += (frames - skipped) as u64;
    }

    fn reset(&mut self) {
        self.inner.reset();
        self.skip = self.inner.output_delay();
        self.carry.iter_mut().for_each(Vec::clear);
        self.frames_in = 0;
        self.frames_out = 0;
    }
}

impl ConversionStage for FftResampler {
    fn name(&self) -> &'static str {
        "resample"
    }

    fn process(&mut self, block: AudioBlock) -> AudioBlock {
        let samples = if block.channels == self.channels {
            block.samples
        } else {
            adapt_channels(&block.samples, block.channels, self.channels)
        };

        let channels = self.channels as usize;
        for frame in samples.chunks_exact(channels) {
            for (lane, &sample) in self.carry.iter_mut().zip(frame) {
                lane.push(sample);
            }
        }
        self.frames_in += (samples.len() / channels) as u64;

        let needed = self.inner.input_frames_next();
        let mut out = Vec::new();
        let mut consumed = 0;
        while self.carry[0].len() - consumed >= needed {
            let chunk: Vec<&[f32]> = self
                .carry
                .iter()
                .map(|lane| &lane[consumed..consumed + needed])
                .collect();
            let result = self.inner.process(chunk.as_slice(), None);
            consumed += needed;
            match result {
                Ok(planar) => self.emit(&planar, &mut out),
                Err(e) => log::warn!("resampler dropped a chunk: {}", e),
            }
        }
        if consumed > 0 {
            for lane in self.carry.iter_mut() {
                lane.drain(..consumed);
            }
        }
        self.output_block(out)
    }

    /// Run the carried remainder and the filter tail through, then start
    /// over for the next stream.
    fn flush(&mut self) -> Option<AudioBlock> {
        if self.frames_in == 0 {
            return None;
        }
        let expected = self.expected_frames();
        let mut out = Vec::new();

        if !self.carry[0].is_empty() {
            let carry = std::mem::take(&mut self.carry);
            match self.inner.process_partial(Some(carry.as_slice()), None) {
                Ok(planar) => self.emit(&planar, &mut out),
                Err(e) => log::warn!("resampler dropped its remainder: {}", e),
            }
            self.carry = carry;
        }
        // The delay is under one chunk; a few empty passes cover it.
        for _ in 0..4 {
            if self.frames_out >= expected {
                break;
            }
            match self.inner.process_partial::<Vec<f32>>(None, None) {
                Ok(planar) if planar.first().is_some_and(|c| !c.is_empty()) => {
                    self.emit(&planar, &mut out)
                }
                Ok(_) => break,
                Err(e) => {
                    log::warn!("resampler tail dropped: {}", e);
                    break;
                }
            }
        }

        let excess = self.frames_out.saturating_sub(expected) as usize;
        let keep = out.len().saturating_sub(excess * self.channels as usize);
        out.truncate(keep);
        self.reset();
        Some(self.output_block(out))
    }
}

/// Final stage: float to 16-bit PCM bytes.
fn to_pcm16(block: &AudioBlock) -> Vec<u8> {
    pcm::f32_to_pcm16(&block.samples)
}

/// Ordered conversion pipeline for one capture source.
pub struct ConversionChain {
    native: AudioFormat,
    target: AudioFormat,
    stages: Vec<Box<dyn ConversionStage>>,
}

impl ConversionChain {
    /// Build the stages needed to turn `native` into `target`.
    ///
    /// Matching formats produce a chain with no stages that only converts
    /// samples to 16-bit PCM.
    pub fn build(native: AudioFormat, target: AudioFormat) -> Result<Self, RecorderError> {
        let mut stages: Vec<Box<dyn ConversionStage>> = Vec::new();
        if native != target {
            if native.channels != target.channels {
                stages.push(Box::new(ChannelAdapter::new(target.channels)));
            }
            if native.sample_rate != target.sample_rate {
                stages.push(Box::new(FftResampler::new(
                    native.sample_rate,
                    target.sample_rate,
                    target.channels,
                )?));
            }
            stages.push(Box::new(ChannelRecheck::new(target.channels)));
        }
        Ok(Self { native, target, stages })
    }

    pub fn native_format(&self) -> AudioFormat {
        self.native
    }

    pub fn target_format(&self) -> AudioFormat {
        self.target
    }

    pub fn is_passthrough(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Convert native interleaved f32 samples into target-format PCM16 bytes.
    pub fn process(&mut self, samples: Vec<f32>) -> Vec<u8> {
        if samples.is_empty() {
            return Vec::new();
        }
        let mut block = AudioBlock::new(samples, self.native);
        for stage in self.stages.iter_mut() {
            block = stage.process(block);
        }
        to_pcm16(&block)
    }

    /// End of stream: whatever a stage held back is pushed through the
    /// stages after it.
    pub fn flush(&mut self) -> Vec<u8> {
        let mut tail: Option<AudioBlock> = None;
        for stage in self.stages.iter_mut() {
            let processed = tail.take().map(|block| stage.process(block));
            tail = match (processed, stage.flush()) {
                (Some(mut head), Some(rest)) => {
                    head.samples.extend_from_slice(&rest.samples);
                    Some(head)
                }
                (head, rest) => head.or(rest),
            };
        }
        tail.map(|block| to_pcm16(&block)).unwrap_or_default()
    }
}

impl std::fmt::Debug for ConversionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionChain")
            .field("native", &self.native)
            .field("target", &self.target)
            .field("stages", &self.stage_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::pcm::pcm16_to_samples;
    use approx::assert_relative_eq;

    fn block(samples: Vec<f32>, rate: u32, channels: u16) -> AudioBlock {
        AudioBlock::new(samples, AudioFormat::new(rate, channels))
    }

    #[test]
    fn stereo_to_mono_averages() {
        let mut stage = ChannelAdapter::new(1);
        let out = stage.process(block(vec![0.2, 0.8, 0.4, 0.6], 48000, 2));
        assert_eq!(out.channels, 1);
        assert_eq!(out.samples.len(), 2);
        assert_relative_eq!(out.samples[0], 0.5);
        assert_relative_eq!(out.samples[1], 0.5);
    }

    #[test]
    fn multichannel_downmix_keeps_leading_channels() {
        let mut stage = ChannelAdapter::new(2);
        let out = stage.process(block(
            vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8],
            48000,
            4,
        ));
        assert_eq!(out.samples, vec![0.1, 0.2, 0.5, 0.6]);

        let mut to_mono = ChannelAdapter::new(1);
        let out = to_mono.process(block(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 48000, 6));
        assert_eq!(out.samples, vec![0.1]);
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let mut stage = ChannelAdapter::new(2);
        let out = stage.process(block(vec![0.25, -0.5], 16000, 1));
        assert_eq!(out.samples, vec![0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn recheck_passes_matching_layout_untouched() {
        let mut stage = ChannelRecheck::new(2);
        let input = block(vec![0.1, 0.2], 16000, 2);
        assert_eq!(stage.process(input.clone()), input);

        let out = stage.process(block(vec![0.3], 16000, 1));
        assert_eq!(out.channels, 2);
        assert_eq!(out.samples, vec![0.3, 0.3]);
    }

    fn sine(freq: f32, rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        let energy: f32 = samples.iter().map(|s| s * s).sum();
        (energy / samples.len() as f32).sqrt()
    }

    /// Feed `input` in blocks of `block_frames`, then flush.
    fn resample_all(
        stage: &mut FftResampler,
        input: &[f32],
        rate: u32,
        channels: u16,
        block_frames: usize,
    ) -> Vec<f32> {
        let mut out = Vec::new();
        for chunk in input.chunks(block_frames * channels as usize) {
            out.extend(stage.process(block(chunk.to_vec(), rate, channels)).samples);
        }
        if let Some(tail) = stage.flush() {
            out.extend(tail.samples);
        }
        out
    }

    #[test]
    fn resampler_output_length_follows_ratio() {
        let mut stage = FftResampler::new(48000, 16000, 1).unwrap();
        let out = resample_all(&mut stage, &sine(440.0, 48000, 4800), 48000, 1, 480);
        assert_eq!(out.len(), 1600);

        let mut odd = FftResampler::new(44100, 16000, 1).unwrap();
        let out = resample_all(&mut odd, &sine(440.0, 44100, 44100), 44100, 1, 441);
        assert_eq!(out.len(), 16000);
    }

    #[test]
    fn out_of_band_tone_is_attenuated() {
        let mut stage = FftResampler::new(48000, 16000, 1).unwrap();
        let input = sine(10_000.0, 48000, 48000);
        assert_relative_eq!(rms(&input), 0.354, epsilon = 0.01);

        let out = resample_all(&mut stage, &input, 48000, 1, 480);
        assert_eq!(out.len(), 16000);
        let settled = &out[1024..out.len() - 1024];
        assert!(rms(settled) < 0.05, "10 kHz leaked through at rms {}", rms(settled));
    }

    #[test]
    fn in_band_tone_keeps_its_level() {
        let mut stage = FftResampler::new(48000, 16000, 1).unwrap();
        let out = resample_all(&mut stage, &sine(1000.0, 48000, 48000), 48000, 1, 480);
        let settled = &out[1024..out.len() - 1024];
        assert_relative_eq!(rms(settled), 0.354, epsilon = 0.02);
    }

    #[test]
    fn resampler_is_continuous_across_blocks() {
        let input = sine(300.0, 44100, 8000);

        let mut whole = FftResampler::new(44100, 16000, 1).unwrap();
        let expected = resample_all(&mut whole, &input, 44100, 1, input.len());

        let mut split = FftResampler::new(44100, 16000, 1).unwrap();
        let actual = resample_all(&mut split, &input, 44100, 1, 317);

        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(&expected) {
            assert_relative_eq!(*a, *e, epsilon = 1e-5);
        }
    }

    #[test]
    fn resampler_keeps_stereo_frames_interleaved() {
        let mut stage = FftResampler::new(16000, 32000, 2).unwrap();
        let input: Vec<f32> = std::iter::repeat([0.5, -0.25])
            .take(8000)
            .flatten()
            .collect();
        let out = resample_all(&mut stage, &input, 16000, 2, 160);
        assert_eq!(out.len(), 16000 * 2);
        for frame in out[4000..12000].chunks_exact(2) {
            assert_relative_eq!(frame[0], 0.5, epsilon = 0.02);
            assert_relative_eq!(frame[1], -0.25, epsilon = 0.02);
        }
    }

    #[test]
    fn flush_without_input_emits_nothing() {
        let mut stage = FftResampler::new(48000, 16000, 1).unwrap();
        assert!(stage.flush().is_none());
        assert!(stage.process(block(vec![0.1; 100], 48000, 1)).samples.is_empty());
        assert!(stage.flush().is_some());
        assert!(stage.flush().is_none());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            ConversionChain::build(AudioFormat::new(0, 1), AudioFormat::new(16000, 1)),
            Err(RecorderError::ConfigurationFailed(_))
        ));
    }

    #[test]
    fn matching_formats_build_a_passthrough_chain() {
        let format = AudioFormat::new(16000, 1);
        let mut chain = ConversionChain::build(format, format).unwrap();
        assert!(chain.is_passthrough());
        let pcm = chain.process(vec![0.5, -0.5]);
        assert_eq!(pcm16_to_samples(&pcm), vec![16383, -16383]);
        assert!(chain.flush().is_empty());
    }

    #[test]
    fn chain_orders_adapt_resample_recheck() {
        let chain =
            ConversionChain::build(AudioFormat::new(48000, 2), AudioFormat::new(16000, 1)).unwrap();
        assert_eq!(chain.stage_names(), vec!["channel-adapt", "resample", "channel-recheck"]);

        let rate_only =
            ConversionChain::build(AudioFormat::new(48000, 1), AudioFormat::new(16000, 1)).unwrap();
        assert_eq!(rate_only.stage_names(), vec!["resample", "channel-recheck"]);
    }

    #[test]
    fn chain_output_is_target_pcm16() {
        let mut chain =
            ConversionChain::build(AudioFormat::new(48000, 2), AudioFormat::new(16000, 1)).unwrap();
        let mut pcm = Vec::new();
        for second in vec![0.5f32; 48000 * 2].chunks(4800 * 2) {
            pcm.extend(chain.process(second.to_vec()));
        }
        pcm.extend(chain.flush());

        let samples = pcm16_to_samples(&pcm);
        assert_eq!(samples.len(), 16000);
        assert!(samples[2000..14000].iter().all(|&s| (s as i32 - 16383).abs() < 300));
    }
}
