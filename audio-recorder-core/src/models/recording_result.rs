use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::{DeviceNames, SourceKind};
use super::settings::{OutputFormat, RecordingSettings};

/// Result returned (and announced) when a session is saved.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    /// The published file: the transcoded output, or the intermediate MP3
    /// when no transcode was needed or it failed.
    pub file_path: PathBuf,
    pub format: OutputFormat,
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub checksum: String,
    pub devices: DeviceNames,
    pub transcoded: bool,
    pub metadata: RecordingMetadata,
}

/// Metadata stored alongside a recording.
///
/// Serializable for the JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub created_at: String,
    pub duration_secs: f64,
    pub file_path: String,
    pub format: OutputFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
    pub sources: Vec<SourceKind>,
    pub mic_device: Option<String>,
    pub speaker_device: Option<String>,
    pub checksum: String,
}

impl RecordingMetadata {
    pub fn new(
        settings: &RecordingSettings,
        duration_secs: f64,
        file_path: &str,
        format: OutputFormat,
        devices: &DeviceNames,
        checksum: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            duration_secs,
            file_path: file_path.to_string(),
            format,
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            bitrate_kbps: settings.bitrate_kbps,
            sources: settings.source.sources(),
            mic_device: devices.mic.clone(),
            speaker_device: devices.speaker.clone(),
            checksum: checksum.to_string(),
        }
    }
}
