use std::sync::Arc;

use crate::models::audio_models::{AudioFormat, DeviceNames, SourceKind};
use crate::models::error::RecorderError;
use crate::session::recording::SessionInner;
use crate::session::sink::CaptureSink;
use crate::traits::capture_provider::{CaptureProvider, ProviderFactory};

/// One live source: the provider plus what was learned about it when it
/// was opened. Dropping the handle stops the provider.
pub struct CaptureHandle {
    kind: SourceKind,
    device_name: String,
    native_format: AudioFormat,
    generation: u64,
    provider: Box<dyn CaptureProvider>,
}

impl CaptureHandle {
    /// Open the current default endpoint for `kind`.
    ///
    /// The device name is read once here; a later query could already see
    /// the next default device.
    pub fn open(
        factory: &dyn ProviderFactory,
        kind: SourceKind,
        generation: u64,
    ) -> Result<Self, RecorderError> {
        let provider = factory.open(kind)?;
        let device_name = provider.device_name().to_string();
        let native_format = provider.native_format();
        log::info!("opened {} device {:?} ({})", kind, device_name, native_format);
        Ok(Self {
            kind,
            device_name,
            native_format,
            generation,
            provider,
        })
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn native_format(&self) -> AudioFormat {
        self.native_format
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn start(&mut self, session: &Arc<SessionInner>) -> Result<(), RecorderError> {
        self.provider
            .start(CaptureSink::new(self.kind, self.generation, session))
    }

    pub fn stop(&mut self) {
        self.provider.stop();
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.provider.stop();
    }
}

/// At most one handle per source kind.
#[derive(Default)]
pub struct HandleSet {
    mic: Option<CaptureHandle>,
    speaker: Option<CaptureHandle>,
}

impl HandleSet {
    fn slot(&mut self, kind: SourceKind) -> &mut Option<CaptureHandle> {
        match kind {
            SourceKind::Mic => &mut self.mic,
            SourceKind::Speaker => &mut self.speaker,
        }
    }

    pub fn get_mut(&mut self, kind: SourceKind) -> Option<&mut CaptureHandle> {
        self.slot(kind).as_mut()
    }

    /// Store `handle`, returning the one it replaces.
    pub fn insert(&mut self, handle: CaptureHandle) -> Option<CaptureHandle> {
        self.slot(handle.kind()).replace(handle)
    }

    pub fn take(&mut self, kind: SourceKind) -> Option<CaptureHandle> {
        self.slot(kind).take()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CaptureHandle> {
        self.mic.iter_mut().chain(self.speaker.iter_mut())
    }

    pub fn device_names(&self) -> DeviceNames {
        DeviceNames {
            mic: self.mic.as_ref().map(|h| h.device_name.clone()),
            speaker: self.speaker.as_ref().map(|h| h.device_name.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mic.is_none() && self.speaker.is_none()
    }
}
