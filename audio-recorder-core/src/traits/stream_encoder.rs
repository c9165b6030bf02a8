use std::path::Path;
use std::sync::Arc;

use crate::models::error::RecorderError;
use crate::models::settings::RecordingSettings;

/// Incremental encoder writing to its own backing file.
///
/// `flush` and `finalize` have different lifetime guarantees and must not
/// be confused:
/// - `flush` pushes buffered file data to disk. It never touches encoder
///   state and may be called any number of times.
/// - `finalize` drains the encoder, writes trailing container data and
///   closes everything. It succeeds once; every later `write`, `flush` or
///   `finalize` returns `RecorderError::EncoderFinalized`.
///
/// Dropping an encoder releases the file handle without finalizing.
pub trait StreamEncoder: Send {
    /// Encode interleaved 16-bit little-endian PCM in the session format.
    fn write(&mut self, pcm: &[u8]) -> Result<(), RecorderError>;

    fn flush(&mut self) -> Result<(), RecorderError>;

    fn finalize(&mut self) -> Result<(), RecorderError>;

    fn is_finalized(&self) -> bool;

    /// Compressed bytes handed to the file so far.
    fn bytes_written(&self) -> u64;

    fn path(&self) -> &Path;
}

/// Creates the session encoder for an output path.
pub type EncoderFactory = Arc<
    dyn Fn(&Path, &RecordingSettings) -> Result<Box<dyn StreamEncoder>, RecorderError>
        + Send
        + Sync,
>;
