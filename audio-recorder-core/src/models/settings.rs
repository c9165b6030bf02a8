use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::{AudioFormat, SourceKind};
use super::error::RecorderError;

/// Which capture paths a session records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSelection {
    Mic,
    Speaker,
    MicAndSpeaker,
}

impl SourceSelection {
    pub fn includes(&self, kind: SourceKind) -> bool {
        match self {
            Self::Mic => kind == SourceKind::Mic,
            Self::Speaker => kind == SourceKind::Speaker,
            Self::MicAndSpeaker => true,
        }
    }

    pub fn sources(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|k| self.includes(*k))
            .collect()
    }

    pub fn is_dual(&self) -> bool {
        matches!(self, Self::MicAndSpeaker)
    }
}

/// Container/codec of a published recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp3,
    Wav,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
        }
    }
}

/// Every session encodes to this first; other formats are produced by a
/// post-stop transcode.
pub const INTERMEDIATE_FORMAT: OutputFormat = OutputFormat::Mp3;

/// Immutable per-session recording settings.
///
/// Deserializes with defaults for every missing field, so configuration
/// storage only needs to persist what the user changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub source: SourceSelection,

    /// Target sample rate in Hz (default: 44100).
    pub sample_rate: u32,

    /// Target channel count, clamped to 1 or 2 (default: 2).
    pub channels: u16,

    /// Target bitrate in kbit/s (default: 128).
    pub bitrate_kbps: u32,

    pub format: OutputFormat,

    pub output_directory: PathBuf,

    /// File name prefix (default: "recording").
    pub file_prefix: String,

    /// Period of the crash-safety flush (default: 30).
    pub flush_interval_secs: u64,

    /// Period of progress notifications (default: 1000).
    pub progress_interval_ms: u64,

    /// Settle time before rebuilding a lost device (default: 500).
    pub recovery_delay_ms: u64,

    /// Depth of each per-source capture buffer (default: 5).
    pub buffer_seconds: u32,

    /// Start is refused below this much free space (default: 100).
    pub min_free_space_mb: u64,

    /// Write a `.metadata.json` sidecar next to the published file.
    pub write_metadata: bool,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            source: SourceSelection::Mic,
            sample_rate: 44100,
            channels: 2,
            bitrate_kbps: 128,
            format: OutputFormat::Mp3,
            output_directory: PathBuf::from("."),
            file_prefix: "recording".into(),
            flush_interval_secs: 30,
            progress_interval_ms: 1000,
            recovery_delay_ms: 500,
            buffer_seconds: 5,
            min_free_space_mb: 100,
            write_metadata: true,
        }
    }
}

impl RecordingSettings {
    pub fn from_json_str(json: &str) -> Result<Self, RecorderError> {
        serde_json::from_str(json)
            .map_err(|e| RecorderError::ConfigurationFailed(format!("invalid settings: {}", e)))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, RecorderError> {
        let json =
            fs::read_to_string(path).map_err(|e| RecorderError::from_io("read settings", &e))?;
        Self::from_json_str(&json)
    }

    /// Copy with the channel count clamped into 1..=2.
    pub fn normalized(&self) -> Self {
        let mut settings = self.clone();
        settings.channels = settings.channels.clamp(1, 2);
        settings
    }

    pub fn validate(&self) -> Result<(), RecorderError> {
        if !(8000..=192_000).contains(&self.sample_rate) {
            return Err(RecorderError::ConfigurationFailed(format!(
                "unsupported sample rate: {}",
                self.sample_rate
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(RecorderError::ConfigurationFailed(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        if !(8..=320).contains(&self.bitrate_kbps) {
            return Err(RecorderError::ConfigurationFailed(format!(
                "unsupported bitrate: {} kbps",
                self.bitrate_kbps
            )));
        }
        if self.buffer_seconds == 0 {
            return Err(RecorderError::ConfigurationFailed("buffer depth must be positive".into()));
        }
        if self.file_prefix.is_empty() || self.file_prefix.contains(['/', '\\']) {
            return Err(RecorderError::ConfigurationFailed(format!(
                "invalid file prefix: {:?}",
                self.file_prefix
            )));
        }
        Ok(())
    }

    pub fn target_format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    pub fn needs_transcode(&self) -> bool {
        self.format != INTERMEDIATE_FORMAT
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(10))
    }

    pub fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_delay_ms)
    }
}
