use std::fmt;

use crate::models::audio_models::{AudioFormat, SourceKind};
use crate::models::error::RecorderError;
use crate::session::sink::CaptureSink;

/// Why a capture source stopped without being asked to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The endpoint was unplugged, disabled, or replaced as the default.
    DeviceLost,
    /// The backend hit an error it could not continue from.
    Error(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceLost => f.write_str("device lost"),
            Self::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// A live OS audio endpoint delivering interleaved f32 blocks.
///
/// Implemented by:
/// - `WasapiCapture` (Windows, microphone and render loopback)
/// - scripted fakes in the integration tests
pub trait CaptureProvider: Send {
    /// Capability of this source. Stable for the provider's lifetime.
    fn kind(&self) -> SourceKind;

    /// Device name snapshotted when the provider was created.
    ///
    /// Providers must not re-query the OS here: by the time a caller asks,
    /// the default device may already have switched.
    fn device_name(&self) -> &str;

    /// The format blocks will arrive in.
    fn native_format(&self) -> AudioFormat;

    /// Start delivering audio to `sink`.
    ///
    /// Blocks arrive on a backend-owned thread. If capture later ends on its
    /// own the provider reports it once through `CaptureSink::stopped`.
    fn start(&mut self, sink: CaptureSink) -> Result<(), RecorderError>;

    /// Stop capturing and release the endpoint. Idempotent.
    ///
    /// An intentional stop should not be reported through the sink;
    /// the session tolerates providers that do.
    fn stop(&mut self);
}

/// Opens capture providers bound to the current default endpoints.
///
/// Called once per source at session start and again on every hotplug
/// rebuild, so each call must look up the default device afresh.
pub trait ProviderFactory: Send + Sync {
    fn open(&self, kind: SourceKind) -> Result<Box<dyn CaptureProvider>, RecorderError>;
}
