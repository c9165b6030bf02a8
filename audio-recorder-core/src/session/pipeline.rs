use std::time::Duration;

use crate::models::audio_models::{AudioFormat, SessionCounters, SourceKind};
use crate::models::error::RecorderError;
use crate::processing::conversion::ConversionChain;
use crate::processing::mixer;
use crate::processing::ring_buffer::RingBuffer;
use crate::traits::stream_encoder::StreamEncoder;

/// One source's converted backlog may not grow past this before it is
/// written padded with silence.
pub const BACKLOG_THRESHOLD: Duration = Duration::from_millis(500);

const DRAIN_ROUNDS: usize = 8;

/// Per-source buffering: raw native samples, the chain that converts them,
/// and converted PCM16 waiting for its counterpart.
struct Lane {
    generation: u64,
    raw: RingBuffer<f32>,
    chain: ConversionChain,
    pending: Vec<u8>,
}

impl Lane {
    fn new(
        generation: u64,
        native: AudioFormat,
        target: AudioFormat,
        buffer_seconds: u32,
    ) -> Result<Self, RecorderError> {
        let frames = native.sample_rate as usize * buffer_seconds as usize;
        Ok(Self {
            generation,
            raw: RingBuffer::with_frames(frames, native.channels as usize),
            chain: ConversionChain::build(native, target)?,
            pending: Vec::new(),
        })
    }

    fn convert(&mut self) -> usize {
        if self.raw.is_empty() {
            return 0;
        }
        let pcm = self.chain.process(self.raw.drain_all());
        self.pending.extend_from_slice(&pcm);
        pcm.len()
    }

    /// Convert everything left, including what the chain holds back.
    fn finish(&mut self) -> usize {
        let converted = self.convert();
        let tail = self.chain.flush();
        self.pending.extend_from_slice(&tail);
        converted + tail.len()
    }
}

/// Everything behind the session write lock: both source lanes and the
/// encoder. Producers, the processing worker, timers and hotplug swaps all
/// go through one `Mutex<Pipeline>`.
pub struct Pipeline {
    target: AudioFormat,
    buffer_seconds: u32,
    backlog_limit: usize,
    mic: Option<Lane>,
    speaker: Option<Lane>,
    encoder: Option<Box<dyn StreamEncoder>>,
    counters: SessionCounters,
}

impl Pipeline {
    pub fn new(
        target: AudioFormat,
        buffer_seconds: u32,
        encoder: Option<Box<dyn StreamEncoder>>,
    ) -> Self {
        Self {
            target,
            buffer_seconds: buffer_seconds.max(1),
            backlog_limit: target.pcm16_bytes_for(BACKLOG_THRESHOLD),
            mic: None,
            speaker: None,
            encoder,
            counters: SessionCounters::default(),
        }
    }

    fn slot(&mut self, kind: SourceKind) -> &mut Option<Lane> {
        match kind {
            SourceKind::Mic => &mut self.mic,
            SourceKind::Speaker => &mut self.speaker,
        }
    }

    fn lane(&self, kind: SourceKind) -> Option<&Lane> {
        match kind {
            SourceKind::Mic => self.mic.as_ref(),
            SourceKind::Speaker => self.speaker.as_ref(),
        }
    }

    pub fn has_lane(&self, kind: SourceKind) -> bool {
        self.lane(kind).is_some()
    }

    pub fn lane_generation(&self, kind: SourceKind) -> Option<u64> {
        self.lane(kind).map(|l| l.generation)
    }

    /// Converted bytes of `kind` not yet handed to the encoder.
    pub fn pending_bytes(&self, kind: SourceKind) -> usize {
        self.lane(kind).map_or(0, |l| l.pending.len())
    }

    /// Install a fresh lane for `kind`, replacing any existing one.
    ///
    /// The old lane's raw samples go through the old chain first and its
    /// converted backlog moves to the new lane, so a rebuild loses nothing
    /// that was already captured. On error the existing lane is untouched.
    pub fn install_lane(
        &mut self,
        kind: SourceKind,
        generation: u64,
        native: AudioFormat,
    ) -> Result<(), RecorderError> {
        let mut lane = Lane::new(generation, native, self.target, self.buffer_seconds)?;
        let mut converted = 0;
        if let Some(old) = self.slot(kind).as_mut() {
            converted = old.finish();
            lane.pending = std::mem::take(&mut old.pending);
        }
        self.counters.add_captured(kind, converted);
        log::debug!("{} lane gen {}: {:?}", kind, generation, lane.chain);
        *self.slot(kind) = Some(lane);
        Ok(())
    }

    /// Write out everything buffered and drop the `kind` lane.
    pub fn remove_lane(&mut self, kind: SourceKind) {
        if let Some(lane) = self.slot(kind).as_mut() {
            let converted = lane.finish();
            self.counters.add_captured(kind, converted);
            self.process(true);
            *self.slot(kind) = None;
        }
    }

    /// Replace the encoder the mixed output goes to.
    pub fn set_encoder(&mut self, encoder: Box<dyn StreamEncoder>) {
        self.encoder = Some(encoder);
    }

    /// Buffer raw samples from a provider.
    ///
    /// Returns the number of frames dropped to make room, or `None` when the
    /// samples came from a handle that has since been replaced.
    pub fn push(&mut self, kind: SourceKind, generation: u64, samples: &[f32]) -> Option<usize> {
        let dropped = match self.slot(kind) {
            Some(lane) if lane.generation == generation => lane.raw.write(samples),
            _ => return None,
        };
        if dropped > 0 {
            self.counters.add_dropped(kind, dropped);
        }
        Some(dropped)
    }

    /// Convert what is buffered and write whatever is ready.
    ///
    /// With two lanes only the overlapping span is mixed, unless one side's
    /// leftover exceeds the backlog threshold or `force` is set; then the
    /// leftover is written against silence. Returns PCM bytes written.
    pub fn process(&mut self, force: bool) -> usize {
        for kind in SourceKind::ALL {
            let converted = self.slot(kind).as_mut().map_or(0, Lane::convert);
            self.counters.add_captured(kind, converted);
        }

        let mut backlog = false;
        let pcm = match (self.mic.as_mut(), self.speaker.as_mut()) {
            (Some(mic), Some(speaker)) => {
                let aligned = mic.pending.len().min(speaker.pending.len());
                let mut out = mixer::mix(&mic.pending[..aligned], &speaker.pending[..aligned]);
                mic.pending.drain(..aligned);
                speaker.pending.drain(..aligned);

                let leftover = mic.pending.len() + speaker.pending.len();
                if leftover > 0 && (force || leftover > self.backlog_limit) {
                    backlog = !force;
                    out.extend_from_slice(&mixer::mix(&mic.pending, &speaker.pending));
                    mic.pending.clear();
                    speaker.pending.clear();
                }
                out
            }
            (Some(lane), None) | (None, Some(lane)) => std::mem::take(&mut lane.pending),
            (None, None) => return 0,
        };

        let written = self.write(&pcm);
        if backlog {
            self.counters.backlog_drains += 1;
            log::debug!("backlog drain: wrote {} bytes against silence", pcm.len());
            let _ = self.flush();
        }
        written
    }

    /// Bounded drain followed by a forced one. Nothing already captured is
    /// left behind.
    pub fn drain(&mut self) {
        for _ in 0..DRAIN_ROUNDS {
            if self.process(false) == 0 {
                break;
            }
        }
        self.finish_lanes();
        self.process(true);
    }

    fn finish_lanes(&mut self) {
        for kind in SourceKind::ALL {
            let converted = self.slot(kind).as_mut().map_or(0, Lane::finish);
            self.counters.add_captured(kind, converted);
        }
    }

    fn write(&mut self, pcm: &[u8]) -> usize {
        if pcm.is_empty() {
            return 0;
        }
        let Some(encoder) = self.encoder.as_mut() else {
            return 0;
        };
        match encoder.write(pcm) {
            Ok(()) => {
                self.counters.bytes_written += pcm.len() as u64;
                pcm.len()
            }
            Err(e) => {
                self.counters.write_failures += 1;
                log::error!("skipping {} bytes, encoder write failed: {}", pcm.len(), e);
                0
            }
        }
    }

    /// Push encoded data to disk without touching encoder state.
    pub fn flush(&mut self) -> Result<(), RecorderError> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };
        encoder.flush().inspect_err(|e| log::warn!("flush failed: {}", e))
    }

    pub fn take_encoder(&mut self) -> Option<Box<dyn StreamEncoder>> {
        self.encoder.take()
    }

    /// Compressed bytes on disk so far.
    pub fn encoded_bytes(&self) -> u64 {
        self.encoder.as_ref().map_or(0, |e| e.bytes_written())
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub fn record_recovery(&mut self) {
        self.counters.recoveries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::pcm::pcm16_to_samples;
    use parking_lot::Mutex;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorded {
        pcm: Vec<u8>,
        flushes: usize,
        fail_next: usize,
    }

    struct MemoryEncoder {
        shared: Arc<Mutex<Recorded>>,
        path: PathBuf,
    }

    impl StreamEncoder for MemoryEncoder {
        fn write(&mut self, pcm: &[u8]) -> Result<(), RecorderError> {
            let mut s = self.shared.lock();
            if s.fail_next > 0 {
                s.fail_next -= 1;
                return Err(RecorderError::EncodingFailed("injected".into()));
            }
            s.pcm.extend_from_slice(pcm);
            Ok(())
        }
        fn flush(&mut self) -> Result<(), RecorderError> {
            self.shared.lock().flushes += 1;
            Ok(())
        }
        fn finalize(&mut self) -> Result<(), RecorderError> {
            Ok(())
        }
        fn is_finalized(&self) -> bool {
            false
        }
        fn bytes_written(&self) -> u64 {
            self.shared.lock().pcm.len() as u64
        }
        fn path(&self) -> &Path {
            &self.path
        }
    }

    const MONO_16K: AudioFormat = AudioFormat {
        sample_rate: 16000,
        channels: 1,
    };

    fn pipeline() -> (Pipeline, Arc<Mutex<Recorded>>) {
        let shared = Arc::new(Mutex::new(Recorded::default()));
        let encoder = MemoryEncoder {
            shared: shared.clone(),
            path: PathBuf::from("mem.mp3"),
        };
        (Pipeline::new(MONO_16K, 5, Some(Box::new(encoder))), shared)
    }

    fn dual() -> (Pipeline, Arc<Mutex<Recorded>>) {
        let (mut p, shared) = pipeline();
        p.install_lane(SourceKind::Mic, 1, MONO_16K).unwrap();
        p.install_lane(SourceKind::Speaker, 2, MONO_16K).unwrap();
        (p, shared)
    }

    #[test]
    fn single_source_is_written_directly() {
        let (mut p, shared) = pipeline();
        p.install_lane(SourceKind::Mic, 1, MONO_16K).unwrap();
        p.push(SourceKind::Mic, 1, &[0.25; 160]);
        assert_eq!(p.process(false), 320);
        assert_eq!(pcm16_to_samples(&shared.lock().pcm), vec![8191; 160]);
        assert_eq!(p.counters().bytes_written, 320);
        assert_eq!(p.counters().mic_bytes_captured, 320);
    }

    #[test]
    fn dual_sources_mix_the_overlap_only() {
        let (mut p, shared) = dual();
        p.push(SourceKind::Mic, 1, &[0.25; 100]);
        p.push(SourceKind::Speaker, 2, &[0.25; 60]);
        assert_eq!(p.process(false), 120);
        assert_eq!(pcm16_to_samples(&shared.lock().pcm), vec![16382; 60]);
        assert_eq!(p.pending_bytes(SourceKind::Mic), 80);
        assert_eq!(p.pending_bytes(SourceKind::Speaker), 0);
    }

    #[test]
    fn silent_counterpart_triggers_backlog_drain() {
        let (mut p, shared) = dual();
        // 0.4 s of mic: under the threshold, held back.
        p.push(SourceKind::Mic, 1, &[0.25; 6400]);
        assert_eq!(p.process(false), 0);
        assert_eq!(shared.lock().flushes, 0);

        // Past 0.5 s: written against silence and flushed.
        p.push(SourceKind::Mic, 1, &[0.25; 3200]);
        assert_eq!(p.process(false), 9600 * 2);
        assert_eq!(p.counters().backlog_drains, 1);
        assert_eq!(shared.lock().flushes, 1);
        assert!(pcm16_to_samples(&shared.lock().pcm).iter().all(|&s| s == 8191));
    }

    #[test]
    fn forced_process_writes_leftovers_without_counting_a_drain() {
        let (mut p, shared) = dual();
        p.push(SourceKind::Speaker, 2, &[0.25; 50]);
        assert_eq!(p.process(true), 100);
        assert_eq!(p.counters().backlog_drains, 0);
        assert_eq!(shared.lock().flushes, 0);
    }

    #[test]
    fn stale_generation_is_rejected() {
        let (mut p, _) = dual();
        assert_eq!(p.push(SourceKind::Mic, 7, &[0.5; 10]), None);
        p.install_lane(SourceKind::Mic, 7, MONO_16K).unwrap();
        assert_eq!(p.push(SourceKind::Mic, 1, &[0.5; 10]), None);
        assert_eq!(p.push(SourceKind::Mic, 7, &[0.5; 10]), Some(0));
    }

    #[test]
    fn rebuild_keeps_captured_audio() {
        let (mut p, shared) = pipeline();
        p.install_lane(SourceKind::Mic, 1, MONO_16K).unwrap();
        p.push(SourceKind::Mic, 1, &[0.25; 10]);
        p.install_lane(SourceKind::Mic, 2, AudioFormat::new(16000, 2)).unwrap();
        p.push(SourceKind::Mic, 2, &[0.25; 20]);
        p.process(false);
        assert_eq!(pcm16_to_samples(&shared.lock().pcm).len(), 20);
        assert_eq!(p.lane_generation(SourceKind::Mic), Some(2));
    }

    #[test]
    fn removing_a_lane_flushes_and_falls_back_to_single_source() {
        let (mut p, shared) = dual();
        p.push(SourceKind::Mic, 1, &[0.25; 40]);
        p.remove_lane(SourceKind::Speaker);
        assert!(!p.has_lane(SourceKind::Speaker));
        assert_eq!(shared.lock().pcm.len(), 80);

        p.push(SourceKind::Mic, 1, &[0.25; 10]);
        assert_eq!(p.process(false), 20);
    }

    #[test]
    fn failed_write_is_skipped_and_counted() {
        let (mut p, shared) = pipeline();
        p.install_lane(SourceKind::Mic, 1, MONO_16K).unwrap();
        shared.lock().fail_next = 1;
        p.push(SourceKind::Mic, 1, &[0.25; 10]);
        assert_eq!(p.process(false), 0);
        p.push(SourceKind::Mic, 1, &[0.25; 10]);
        assert_eq!(p.process(false), 20);
        assert_eq!(p.counters().write_failures, 1);
        assert_eq!(shared.lock().pcm.len(), 20);
    }

    #[test]
    fn overflow_drops_oldest_frames_and_counts_them() {
        let mut p = Pipeline::new(MONO_16K, 1, None);
        p.install_lane(SourceKind::Speaker, 1, AudioFormat::new(8000, 2)).unwrap();
        assert_eq!(p.push(SourceKind::Speaker, 1, &vec![0.0; 8000 * 2]), Some(0));
        assert_eq!(p.push(SourceKind::Speaker, 1, &[0.0; 200]), Some(100));
        assert_eq!(p.counters().speaker_frames_dropped, 100);
    }

    #[test]
    fn drain_empties_everything() {
        let (mut p, _) = dual();
        p.push(SourceKind::Mic, 1, &[0.1; 30]);
        p.push(SourceKind::Speaker, 2, &[0.1; 10]);
        p.drain();
        assert_eq!(p.pending_bytes(SourceKind::Mic), 0);
        assert_eq!(p.pending_bytes(SourceKind::Speaker), 0);
        assert_eq!(p.counters().bytes_written, 60);
    }

    #[test]
    fn drain_writes_the_resampler_tail() {
        let (mut p, shared) = pipeline();
        p.install_lane(SourceKind::Mic, 1, AudioFormat::new(48000, 1)).unwrap();
        p.push(SourceKind::Mic, 1, &[0.25; 4800]);
        p.process(false);
        assert!(shared.lock().pcm.len() < 3200, "part of the input is still carried");
        p.drain();
        assert_eq!(shared.lock().pcm.len(), 3200);
    }

    #[test]
    fn replacing_a_resampled_lane_keeps_its_tail() {
        let (mut p, _) = pipeline();
        p.install_lane(SourceKind::Speaker, 1, AudioFormat::new(48000, 1)).unwrap();
        p.push(SourceKind::Speaker, 1, &[0.25; 4800]);
        p.install_lane(SourceKind::Speaker, 2, MONO_16K).unwrap();
        assert_eq!(p.pending_bytes(SourceKind::Speaker), 3200);
        assert_eq!(p.counters().speaker_bytes_captured, 3200);
    }

    #[test]
    fn rejected_lane_leaves_the_current_one_in_place() {
        let (mut p, _) = pipeline();
        p.install_lane(SourceKind::Mic, 1, MONO_16K).unwrap();
        let err = p.install_lane(SourceKind::Mic, 2, AudioFormat::new(0, 1));
        assert!(matches!(err, Err(RecorderError::ConfigurationFailed(_))));
        assert_eq!(p.lane_generation(SourceKind::Mic), Some(1));
    }
}
