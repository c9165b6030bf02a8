use std::path::Path;

use crate::models::error::RecorderError;
use crate::models::settings::RecordingSettings;

/// One-shot conversion of a finalized intermediate file into the
/// session's requested container.
pub trait Transcoder: Send + Sync {
    /// Write `output` in `settings.format` from the intermediate `input`.
    ///
    /// Must leave `input` untouched; on failure, any partial `output` should
    /// be removed.
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        settings: &RecordingSettings,
    ) -> Result<(), RecorderError>;
}
