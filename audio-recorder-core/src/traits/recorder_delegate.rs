use crate::models::audio_models::{DeviceNames, RecordingProgress, SourceKind};
use crate::models::error::RecorderError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::RecordingState;

/// Event delegate for recording session notifications.
///
/// All methods are called from session worker threads, never the caller's
/// thread. Implementations should marshal to the UI thread if needed.
pub trait RecorderDelegate: Send + Sync {
    fn on_state_changed(&self, state: RecordingState);

    /// Called on the progress cadence while recording.
    fn on_progress(&self, progress: &RecordingProgress);

    /// Called on start and after every device rebuild or degrade.
    fn on_device_changed(&self, devices: &DeviceNames);

    /// Called once the published file is complete.
    fn on_saved(&self, result: &RecordingResult);

    /// Called for errors the user should hear about, including a `start`
    /// that failed and returned the same error. Use
    /// `RecorderError::category()` to pick the message.
    fn on_error(&self, error: &RecorderError);

    /// Called when a source's buffer overflowed and its oldest frames were
    /// discarded since the last progress tick.
    fn on_buffer_overflow(&self, _source: SourceKind, _dropped_frames: u64) {}
}
