use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::models::audio_models::SourceKind;
use crate::models::error::RecorderError;
use crate::models::settings::SourceSelection;
use crate::session::capture_handle::CaptureHandle;
use crate::session::recording::SessionInner;
use crate::traits::capture_provider::StopReason;

const IDLE: u64 = 0;

/// Per-source `Idle | Recovering(generation)` flag.
///
/// A claim is tagged with the handle generation being replaced and only
/// that claim can release it, so a recovery left over from an earlier
/// session cannot clear a claim made by the current one.
#[derive(Debug, Default)]
pub struct RecoveryFlag(AtomicU64);

impl RecoveryFlag {
    pub const fn new() -> Self {
        Self(AtomicU64::new(IDLE))
    }

    /// Claim the flag for `generation`. Only one caller wins until the
    /// claim is finished or cleared.
    pub fn try_begin(&self, generation: u64) -> bool {
        self.0
            .compare_exchange(IDLE, generation, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the claim for `generation`; any other claim is left alone.
    pub fn finish(&self, generation: u64) {
        let _ = self
            .0
            .compare_exchange(generation, IDLE, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Drop whatever claim is held. Used when a new session starts.
    pub fn clear(&self) {
        self.0.store(IDLE, Ordering::Release);
    }

    pub fn is_recovering(&self) -> bool {
        self.0.load(Ordering::Acquire) != IDLE
    }
}

/// The `kind` handle of `generation` reported an unexpected stop.
///
/// Reports from a handle whose lane has since been replaced are ignored.
/// Outside the Recording state the stop was intentional and nothing
/// happens.
pub(crate) fn source_stopped(
    session: &Arc<SessionInner>,
    kind: SourceKind,
    generation: u64,
    reason: StopReason,
) {
    let state = session.state();
    if !state.is_recording() {
        log::debug!("{} stopped ({}) while {:?}; not recovering", kind, reason, state);
        return;
    }
    if session.pipeline.lock().lane_generation(kind) != Some(generation) {
        log::debug!("{} gen {} stopped ({}) after being replaced", kind, generation, reason);
        return;
    }

    let flag = session.recovery_flag(kind);
    if !flag.try_begin(generation) {
        log::debug!("{} stopped ({}); recovery already in flight", kind, reason);
        return;
    }

    let delay = session.settings().recovery_delay();
    log::warn!(
        "{} capture stopped unexpectedly ({}); rebuilding in {:?}",
        kind,
        reason,
        delay
    );

    let weak = Arc::downgrade(session);
    let spawned = thread::Builder::new()
        .name(format!("hotplug-recovery-{}", kind))
        .spawn(move || {
            thread::sleep(delay);
            if let Some(session) = weak.upgrade() {
                rebuild(&session, kind, generation);
            }
        });
    if let Err(e) = spawned {
        // May be running under the handles lock; report only.
        flag.finish(generation);
        let err = RecorderError::Unknown(format!("failed to spawn recovery thread: {}", e));
        log::error!("{} not recovered: {}", kind, err);
        session.notify(|d| d.on_error(&err));
    }
}

/// Replace the `kind` handle of generation `replaced` with a fresh one.
///
/// Gives up without side effects once that lane is gone, which is the case
/// when the session was stopped (and maybe restarted) during the delay.
fn rebuild(session: &Arc<SessionInner>, kind: SourceKind, replaced: u64) {
    let flag = session.recovery_flag(kind);
    if !session.state().is_recording() {
        log::debug!("{} recovery cancelled; session no longer recording", kind);
        flag.finish(replaced);
        return;
    }

    // Stop events from the old provider are ignored once its lane is gone
    // and swallowed by the flag until then.
    let old = {
        let mut handles = session.handles.lock();
        if session.pipeline.lock().lane_generation(kind) != Some(replaced) {
            log::debug!("{} recovery abandoned; gen {} is no longer live", kind, replaced);
            flag.finish(replaced);
            return;
        }
        handles.take(kind)
    };
    drop(old);

    let generation = session.next_generation();
    let mut handle = match CaptureHandle::open(session.factory.as_ref(), kind, generation) {
        Ok(handle) => handle,
        Err(e) => {
            flag.finish(replaced);
            recovery_failed(session, kind, e);
            return;
        }
    };

    let device_name = handle.device_name().to_string();
    {
        let mut handles = session.handles.lock();
        let state = session.state();
        let mut pipeline = session.pipeline.lock();
        if !state.is_active() || pipeline.lane_generation(kind) != Some(replaced) {
            log::debug!("{} recovery discarded; session is {:?}", kind, state);
            flag.finish(replaced);
            return;
        }

        let installed = pipeline.install_lane(kind, generation, handle.native_format());
        drop(pipeline);
        // Cleared before start so an immediate re-failure can schedule
        // another rebuild.
        flag.finish(replaced);
        if let Err(e) = installed {
            drop(handles);
            recovery_failed(session, kind, e);
            return;
        }

        if state.is_recording() {
            if let Err(e) = handle.start(session) {
                drop(handles);
                recovery_failed(session, kind, e);
                return;
            }
        }
        handles.insert(handle);
    }

    session.pipeline.lock().record_recovery();
    let devices = session.set_device_name(kind, Some(device_name.clone()));
    log::info!("{} rebuilt on {:?}", kind, device_name);
    session.notify(|d| d.on_device_changed(&devices));
}

/// Loopback degrades to mic-only; losing the microphone, or the only
/// source, ends the session.
fn recovery_failed(session: &Arc<SessionInner>, kind: SourceKind, err: RecorderError) {
    let fatal = kind == SourceKind::Mic || session.settings().source == SourceSelection::Speaker;
    if fatal {
        log::error!("{} recovery failed: {}; stopping session", kind, err);
        session.notify(|d| d.on_error(&err));
        if let Err(e) = session.stop() {
            log::error!("stop after failed recovery: {}", e);
        }
        return;
    }

    log::warn!("{} recovery failed: {}; continuing without it", kind, err);
    let old = session.handles.lock().take(kind);
    drop(old);
    session.pipeline.lock().remove_lane(kind);
    let devices = session.set_device_name(kind, None);
    session.notify(|d| d.on_device_changed(&devices));
}
