use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use mp3lame_encoder::{Bitrate, Builder, Encoder, FlushNoGap, InterleavedPcm, MonoPcm};

use crate::models::audio_models::AudioFormat;
use crate::models::error::RecorderError;
use crate::models::settings::RecordingSettings;
use crate::processing::pcm;
use crate::traits::stream_encoder::StreamEncoder;

/// Streaming MP3 writer backed by LAME.
///
/// Encoded frames are appended to the file as PCM arrives, so a crash
/// mid-session still leaves a playable file up to the last flush.
///
/// ## File Format
/// ```text
/// [MPEG audio frame] [MPEG audio frame] ... [frames drained at finalize]
/// ```
/// Constant bitrate, so no trailing VBR summary is needed.
pub struct Mp3StreamEncoder {
    path: PathBuf,
    lame: Option<Encoder>,
    file: Option<BufWriter<File>>,
    channels: u16,
    scratch: Vec<u8>,
    bytes_written: u64,
}

impl Mp3StreamEncoder {
    /// Create the output file and configure LAME for `format` at
    /// `bitrate_kbps` (rounded down to the nearest MP3 bitrate).
    pub fn create(
        path: PathBuf,
        format: AudioFormat,
        bitrate_kbps: u32,
    ) -> Result<Self, RecorderError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RecorderError::from_io("create output directory", &e))?;
        }

        let lame = build_lame(format, bitrate_kbps)?;
        let file =
            File::create(&path).map_err(|e| RecorderError::from_io("create output file", &e))?;
        log::debug!(
            "MP3 encoder opened: {} ({}, {} kbps)",
            path.display(),
            format,
            bitrate_kbps
        );

        Ok(Self {
            path,
            lame: Some(lame),
            file: Some(BufWriter::new(file)),
            channels: format.channels,
            scratch: Vec::new(),
            bytes_written: 0,
        })
    }

    /// `EncoderFactory`-compatible constructor.
    pub fn for_settings(
        path: &Path,
        settings: &RecordingSettings,
    ) -> Result<Box<dyn StreamEncoder>, RecorderError> {
        let encoder =
            Self::create(path.to_path_buf(), settings.target_format(), settings.bitrate_kbps)?;
        Ok(Box::new(encoder))
    }

    fn write_scratch(&mut self) -> Result<(), RecorderError> {
        if self.scratch.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or(RecorderError::EncoderFinalized)?;
        file.write_all(&self.scratch)
            .map_err(|e| RecorderError::from_io("write encoded audio", &e))?;
        self.bytes_written += self.scratch.len() as u64;
        self.scratch.clear();
        Ok(())
    }
}

impl StreamEncoder for Mp3StreamEncoder {
    fn write(&mut self, data: &[u8]) -> Result<(), RecorderError> {
        let lame = self.lame.as_mut().ok_or(RecorderError::EncoderFinalized)?;
        let samples = pcm::pcm16_to_samples(data);
        if samples.is_empty() {
            return Ok(());
        }

        self.scratch.clear();
        self.scratch
            .reserve(mp3lame_encoder::max_required_buffer_size(samples.len()));
        let result = if self.channels == 1 {
            lame.encode_to_vec(MonoPcm(&samples), &mut self.scratch)
        } else {
            lame.encode_to_vec(InterleavedPcm(&samples), &mut self.scratch)
        };
        result.map_err(|e| RecorderError::EncodingFailed(format!("{:?}", e)))?;

        self.write_scratch()
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        if self.lame.is_none() {
            return Err(RecorderError::EncoderFinalized);
        }
        let file = self.file.as_mut().ok_or(RecorderError::EncoderFinalized)?;
        file.flush().map_err(|e| RecorderError::from_io("flush output file", &e))?;
        file.get_ref()
            .sync_data()
            .map_err(|e| RecorderError::from_io("sync output file", &e))?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), RecorderError> {
        let mut lame = self.lame.take().ok_or(RecorderError::EncoderFinalized)?;

        self.scratch.clear();
        self.scratch.reserve(7200);
        let drained = lame
            .flush_to_vec::<FlushNoGap>(&mut self.scratch)
            .map_err(|e| RecorderError::EncodingFailed(format!("{:?}", e)));
        drop(lame);

        let written = drained.and_then(|_| self.write_scratch());
        // the file handle is released even when draining failed
        let mut file = self.file.take().ok_or(RecorderError::EncoderFinalized)?;
        written?;
        file.flush().map_err(|e| RecorderError::from_io("flush output file", &e))?;
        file.get_ref()
            .sync_all()
            .map_err(|e| RecorderError::from_io("sync output file", &e))?;

        log::debug!(
            "MP3 encoder finalized: {} ({} bytes)",
            self.path.display(),
            self.bytes_written
        );
        Ok(())
    }

    fn is_finalized(&self) -> bool {
        self.lame.is_none()
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn build_lame(format: AudioFormat, bitrate_kbps: u32) -> Result<Encoder, RecorderError> {
    let config_err = |what: &str, e: &dyn std::fmt::Debug| {
        RecorderError::ConfigurationFailed(format!("MP3 encoder {}: {:?}", what, e))
    };

    let mut builder = Builder::new()
        .ok_or_else(|| RecorderError::EncodingFailed("failed to allocate LAME encoder".into()))?;
    let channels = u8::try_from(format.channels).map_err(|_| {
        RecorderError::ConfigurationFailed(format!(
            "unsupported channel count: {}",
            format.channels
        ))
    })?;
    builder
        .set_num_channels(channels)
        .map_err(|e| config_err("channels", &e))?;
    builder
        .set_sample_rate(format.sample_rate)
        .map_err(|e| config_err("sample rate", &e))?;
    builder
        .set_brate(lame_bitrate(bitrate_kbps))
        .map_err(|e| config_err("bitrate", &e))?;
    builder.build().map_err(|e| config_err("init", &e))
}

/// Largest standard MP3 bitrate not above `kbps`.
fn lame_bitrate(kbps: u32) -> Bitrate {
    const TABLE: [(u32, Bitrate); 16] = [
        (320, Bitrate::Kbps320),
        (256, Bitrate::Kbps256),
        (224, Bitrate::Kbps224),
        (192, Bitrate::Kbps192),
        (160, Bitrate::Kbps160),
        (128, Bitrate::Kbps128),
        (112, Bitrate::Kbps112),
        (96, Bitrate::Kbps96),
        (80, Bitrate::Kbps80),
        (64, Bitrate::Kbps64),
        (48, Bitrate::Kbps48),
        (40, Bitrate::Kbps40),
        (32, Bitrate::Kbps32),
        (24, Bitrate::Kbps24),
        (16, Bitrate::Kbps16),
        (8, Bitrate::Kbps8),
    ];
    TABLE
        .iter()
        .find(|(rate, _)| *rate <= kbps)
        .map(|(_, bitrate)| *bitrate)
        .unwrap_or(Bitrate::Kbps8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::pcm::samples_to_pcm16;

    fn tone(seconds: f32, format: AudioFormat) -> Vec<u8> {
        let frames = (format.sample_rate as f32 * seconds) as usize;
        let mut samples = Vec::with_capacity(frames * format.channels as usize);
        for i in 0..frames {
            let t = i as f32 / format.sample_rate as f32;
            let value = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
            for _ in 0..format.channels {
                samples.push(value);
            }
        }
        samples_to_pcm16(&samples)
    }

    #[test]
    fn flush_does_not_affect_later_writes() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat::new(16000, 1);
        let mut encoder = Mp3StreamEncoder::create(dir.path().join("flush.mp3"), format, 32)
            .unwrap();

        encoder.write(&tone(0.5, format)).unwrap();
        encoder.flush().unwrap();
        encoder.flush().unwrap();
        encoder.write(&tone(0.5, format)).unwrap();
        encoder.flush().unwrap();

        assert!(!encoder.is_finalized());
        assert!(encoder.bytes_written() > 0);
        let on_disk = fs::metadata(encoder.path()).unwrap().len();
        assert_eq!(on_disk, encoder.bytes_written());
    }

    #[test]
    fn writes_after_finalize_fail_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat::new(44100, 2);
        let mut encoder = Mp3StreamEncoder::create(dir.path().join("final.mp3"), format, 128)
            .unwrap();

        encoder.write(&tone(0.25, format)).unwrap();
        encoder.finalize().unwrap();

        assert!(encoder.is_finalized());
        assert_eq!(encoder.write(&tone(0.1, format)), Err(RecorderError::EncoderFinalized));
        assert_eq!(encoder.flush(), Err(RecorderError::EncoderFinalized));
        assert_eq!(encoder.finalize(), Err(RecorderError::EncoderFinalized));
    }

    #[test]
    fn finalize_drains_pending_frames() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat::new(16000, 1);
        let mut encoder = Mp3StreamEncoder::create(dir.path().join("drain.mp3"), format, 32)
            .unwrap();

        encoder.write(&tone(1.0, format)).unwrap();
        let before = encoder.bytes_written();
        encoder.finalize().unwrap();

        assert!(encoder.bytes_written() > before);
        let on_disk = fs::metadata(dir.path().join("drain.mp3")).unwrap().len();
        assert_eq!(on_disk, encoder.bytes_written());
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let format = AudioFormat::new(16000, 1);
        let mut encoder = Mp3StreamEncoder::create(dir.path().join("empty.mp3"), format, 32)
            .unwrap();
        encoder.write(&[]).unwrap();
        assert_eq!(encoder.bytes_written(), 0);
    }

    #[test]
    fn bitrate_rounds_down_to_standard_rate() {
        assert!(matches!(lame_bitrate(130), Bitrate::Kbps128));
        assert!(matches!(lame_bitrate(320), Bitrate::Kbps320));
        assert!(matches!(lame_bitrate(1000), Bitrate::Kbps320));
        assert!(matches!(lame_bitrate(1), Bitrate::Kbps8));
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("out.mp3");
        let encoder = Mp3StreamEncoder::create(path.clone(), AudioFormat::new(16000, 1), 32)
            .unwrap();
        assert!(path.exists());
        assert_eq!(encoder.path(), path.as_path());
    }
}
