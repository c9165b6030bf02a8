use audio_recorder_core::models::audio_models::SourceKind;
use audio_recorder_core::models::error::RecorderError;
use audio_recorder_core::traits::capture_provider::{CaptureProvider, ProviderFactory};

use crate::wasapi_capture::WasapiCapture;

/// Opens WASAPI providers on whatever the default endpoints are right now.
///
/// Every call re-resolves the default device, so a rebuild after a hotplug
/// event follows the user's new default.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasapiProviderFactory;

impl WasapiProviderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderFactory for WasapiProviderFactory {
    fn open(&self, kind: SourceKind) -> Result<Box<dyn CaptureProvider>, RecorderError> {
        let capture = WasapiCapture::open_default(kind)?;
        Ok(Box::new(capture))
    }
}
