use std::time::{Duration, Instant};

use serde::Serialize;

/// Recording session state machine.
///
/// State transitions:
/// ```text
/// idle → recording ⇄ paused
///            ↓         ↓
///         stopping ────┘→ idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
    Stopping,
}

impl RecordingState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Recording or paused: a session with live resources.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Recording | Self::Paused)
    }
}

/// Whether a lifecycle operation took effect.
///
/// Operations requested from a state that does not allow them are
/// `Ignored` after logging a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Ignored,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Wall-clock bookkeeping for elapsed recording time.
///
/// Takes `now` explicitly so pause/resume accounting can be driven by
/// synthetic instants.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionClock {
    started_at: Option<Instant>,
    paused_total: Duration,
    paused_at: Option<Instant>,
}

impl SessionClock {
    pub fn start(&mut self, now: Instant) {
        *self = Self {
            started_at: Some(now),
            paused_total: Duration::ZERO,
            paused_at: None,
        };
    }

    pub fn pause(&mut self, now: Instant) {
        if self.started_at.is_some() && self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(paused_at);
        }
    }

    pub fn paused_total(&self) -> Duration {
        self.paused_total
    }

    /// Time spent recording up to `now`, excluding every pause so far
    /// (including one still in progress).
    pub fn elapsed(&self, now: Instant) -> Duration {
        let Some(start) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.paused_at.unwrap_or(now);
        end.saturating_duration_since(start).saturating_sub(self.paused_total)
    }
}
