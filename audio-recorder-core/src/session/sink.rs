use std::sync::{Arc, Weak};

use crate::models::audio_models::SourceKind;
use crate::session::recording::SessionInner;
use crate::session::recovery;
use crate::traits::capture_provider::StopReason;

/// Where a provider delivers its audio.
///
/// Cheap to clone and safe to call from any thread. A sink outliving its
/// session, or belonging to a handle that has been replaced, silently
/// discards what it is given.
#[derive(Clone)]
pub struct CaptureSink {
    kind: SourceKind,
    generation: u64,
    session: Weak<SessionInner>,
}

impl CaptureSink {
    pub(crate) fn new(kind: SourceKind, generation: u64, session: &Arc<SessionInner>) -> Self {
        Self {
            kind,
            generation,
            session: Arc::downgrade(session),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Hand over interleaved f32 samples in the provider's native format.
    ///
    /// Never blocks on the consumer: when the source's buffer is full the
    /// oldest frames are dropped.
    pub fn push(&self, samples: &[f32]) {
        if let Some(session) = self.session.upgrade() {
            session.accept(self.kind, self.generation, samples);
        }
    }

    /// Report that capture ended without being asked to.
    pub fn stopped(&self, reason: StopReason) {
        if let Some(session) = self.session.upgrade() {
            recovery::source_stopped(&session, self.kind, self.generation, reason);
        }
    }
}

impl std::fmt::Debug for CaptureSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSink")
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .finish()
    }
}
