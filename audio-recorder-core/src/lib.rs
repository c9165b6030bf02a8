//! # audio-recorder-core
//!
//! Platform-agnostic recording core: capture buffering, format conversion,
//! PCM16 mixing, streaming MP3 encode, hotplug recovery and the recording
//! state machine. Platform backends implement `CaptureProvider` /
//! `ProviderFactory` and plug into `RecordingSession`.
//!
//! ## Architecture
//!
//! ```text
//! audio-recorder-core (this crate)
//! ├── traits/       ← CaptureProvider, ProviderFactory, StreamEncoder, Transcoder, RecorderDelegate
//! ├── models/       ← RecorderError, RecordingState, RecordingSettings, RecordingResult, etc.
//! ├── processing/   ← RingBuffer, ConversionChain, mix, PCM helpers
//! ├── session/      ← RecordingSession, Recorder, pipeline, hotplug recovery
//! └── storage/      ← Mp3StreamEncoder, transcoding, output checks, metadata
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{
    AudioFormat, DeviceNames, RecordingProgress, SessionCounters, SourceKind,
};
pub use models::error::{ErrorCategory, RecorderError};
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::settings::{OutputFormat, RecordingSettings, SourceSelection};
pub use models::state::{RecordingState, Transition};
pub use processing::conversion::ConversionChain;
pub use processing::mixer::mix;
pub use processing::ring_buffer::RingBuffer;
pub use session::recorder::{Pending, Recorder};
pub use session::recording::{RecordingSession, RecordingSessionBuilder};
pub use session::sink::CaptureSink;
pub use storage::mp3_writer::Mp3StreamEncoder;
pub use storage::transcode::SymphoniaTranscoder;
pub use traits::capture_provider::{CaptureProvider, ProviderFactory, StopReason};
pub use traits::recorder_delegate::RecorderDelegate;
pub use traits::stream_encoder::{EncoderFactory, StreamEncoder};
pub use traits::transcoder::Transcoder;
