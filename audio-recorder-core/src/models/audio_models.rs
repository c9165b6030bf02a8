use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which capture path a stream belongs to.
///
/// Sources are told apart by capability, never by handle identity: a source
/// keeps its kind across every hotplug rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Microphone input endpoint. The primary source of a session.
    Mic,
    /// Render-endpoint loopback (what the speakers are playing).
    Speaker,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Mic, SourceKind::Speaker];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mic => "mic",
            Self::Speaker => "speaker",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sample rate and channel layout of an interleaved stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }

    /// Bytes per interleaved frame once converted to 16-bit PCM.
    pub fn pcm16_block_align(&self) -> usize {
        self.channels as usize * 2
    }

    /// Bytes of 16-bit PCM covering `duration` in this format.
    pub fn pcm16_bytes_for(&self, duration: Duration) -> usize {
        let frames = (self.sample_rate as f64 * duration.as_secs_f64()) as usize;
        frames * self.pcm16_block_align()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz / {} ch", self.sample_rate, self.channels)
    }
}

/// Human-readable names of the active capture devices.
///
/// `None` means that path is not part of the session (or was degraded away).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceNames {
    pub mic: Option<String>,
    pub speaker: Option<String>,
}

impl DeviceNames {
    pub fn get(&self, kind: SourceKind) -> Option<&str> {
        match kind {
            SourceKind::Mic => self.mic.as_deref(),
            SourceKind::Speaker => self.speaker.as_deref(),
        }
    }

    pub fn set(&mut self, kind: SourceKind, name: Option<String>) {
        match kind {
            SourceKind::Mic => self.mic = name,
            SourceKind::Speaker => self.speaker = name,
        }
    }
}

/// Periodic progress report sent to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingProgress {
    /// Recording time, excluding time spent paused.
    pub elapsed: Duration,
    /// Bytes of the intermediate file currently on disk.
    pub file_size_bytes: u64,
    /// `elapsed * bitrate / 8`: what the file should weigh at this point.
    pub estimated_size_bytes: u64,
}

impl RecordingProgress {
    pub fn new(elapsed: Duration, file_size_bytes: u64, bitrate_kbps: u32) -> Self {
        let estimated = elapsed.as_secs_f64() * bitrate_kbps as f64 * 1000.0 / 8.0;
        Self {
            elapsed,
            file_size_bytes,
            estimated_size_bytes: estimated as u64,
        }
    }
}

/// Running counters for one session, for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub mic_bytes_captured: u64,
    pub speaker_bytes_captured: u64,
    /// 16-bit PCM bytes handed to the encoder.
    pub bytes_written: u64,
    pub mic_frames_dropped: u64,
    pub speaker_frames_dropped: u64,
    pub write_failures: u64,
    pub backlog_drains: u64,
    pub recoveries: u64,
}

impl SessionCounters {
    pub fn bytes_captured(&self, kind: SourceKind) -> u64 {
        match kind {
            SourceKind::Mic => self.mic_bytes_captured,
            SourceKind::Speaker => self.speaker_bytes_captured,
        }
    }

    pub fn frames_dropped(&self, kind: SourceKind) -> u64 {
        match kind {
            SourceKind::Mic => self.mic_frames_dropped,
            SourceKind::Speaker => self.speaker_frames_dropped,
        }
    }

    pub(crate) fn add_captured(&mut self, kind: SourceKind, bytes: usize) {
        match kind {
            SourceKind::Mic => self.mic_bytes_captured += bytes as u64,
            SourceKind::Speaker => self.speaker_bytes_captured += bytes as u64,
        }
    }

    pub(crate) fn add_dropped(&mut self, kind: SourceKind, frames: usize) {
        match kind {
            SourceKind::Mic => self.mic_frames_dropped += frames as u64,
            SourceKind::Speaker => self.speaker_frames_dropped += frames as u64,
        }
    }
}
