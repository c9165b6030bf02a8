use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::models::audio_models::{DeviceNames, RecordingProgress, SessionCounters, SourceKind};
use crate::models::error::RecorderError;
use crate::models::recording_result::{RecordingMetadata, RecordingResult};
use crate::models::settings::{RecordingSettings, INTERMEDIATE_FORMAT};
use crate::models::state::{RecordingState, SessionClock, Transition};
use crate::session::capture_handle::{CaptureHandle, HandleSet};
use crate::session::pipeline::Pipeline;
use crate::session::recovery::{self, RecoveryFlag};
use crate::session::ticker::BackgroundThread;
use crate::storage::metadata::{sha256_file, write_metadata};
use crate::storage::mp3_writer::Mp3StreamEncoder;
use crate::storage::output_checks::{ensure_output_directory, OutputPaths};
use crate::storage::transcode::SymphoniaTranscoder;
use crate::traits::capture_provider::{ProviderFactory, StopReason};
use crate::traits::recorder_delegate::RecorderDelegate;
use crate::traits::stream_encoder::{EncoderFactory, StreamEncoder};
use crate::traits::transcoder::Transcoder;

/// Lifecycle state, behind the state lock. Held only for
/// compare-and-transition.
struct SessionState {
    state: RecordingState,
    clock: SessionClock,
    settings: RecordingSettings,
    paths: Option<OutputPaths>,
    devices: DeviceNames,
}

struct Workers {
    processing: BackgroundThread,
    progress: BackgroundThread,
    flush: BackgroundThread,
}

impl Workers {
    fn shutdown(self) {
        self.processing.shutdown();
        self.progress.shutdown();
        self.flush.shutdown();
    }
}

/// Shared session core.
///
/// Lock order: `ops` → `handles` → `state` / `pipeline`. The state lock and
/// the pipeline lock are never held together, and no delegate is called
/// while any of them is held.
pub(crate) struct SessionInner {
    pub(crate) factory: Arc<dyn ProviderFactory>,
    delegate: Option<Arc<dyn RecorderDelegate>>,
    encoder_factory: EncoderFactory,
    transcoder: Arc<dyn Transcoder>,
    state: Mutex<SessionState>,
    pub(crate) pipeline: Mutex<Pipeline>,
    pub(crate) handles: Mutex<HandleSet>,
    mic_recovery: RecoveryFlag,
    speaker_recovery: RecoveryFlag,
    generation: AtomicU64,
    ops: Mutex<()>,
    workers: Mutex<Option<Workers>>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl SessionInner {
    pub(crate) fn state(&self) -> RecordingState {
        self.state.lock().state
    }

    pub(crate) fn settings(&self) -> RecordingSettings {
        self.state.lock().settings.clone()
    }

    pub(crate) fn recovery_flag(&self, kind: SourceKind) -> &RecoveryFlag {
        match kind {
            SourceKind::Mic => &self.mic_recovery,
            SourceKind::Speaker => &self.speaker_recovery,
        }
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Update one device name and return the full set.
    pub(crate) fn set_device_name(&self, kind: SourceKind, name: Option<String>) -> DeviceNames {
        let mut s = self.state.lock();
        s.devices.set(kind, name);
        s.devices.clone()
    }

    pub(crate) fn notify(&self, f: impl FnOnce(&dyn RecorderDelegate)) {
        if let Some(delegate) = self.delegate.as_deref() {
            f(delegate);
        }
    }

    fn set_state(&self, state: RecordingState) {
        self.state.lock().state = state;
        self.notify(|d| d.on_state_changed(state));
    }

    /// Provider data path: buffer under the write lock, then wake the worker.
    pub(crate) fn accept(&self, kind: SourceKind, generation: u64, samples: &[f32]) {
        let dropped = self.pipeline.lock().push(kind, generation, samples);
        if dropped.is_some() {
            // Full means a wake-up is already queued.
            let _ = self.wake_tx.try_send(());
        }
    }

    pub(crate) fn start(
        self: &Arc<Self>,
        settings: RecordingSettings,
    ) -> Result<Transition, RecorderError> {
        let _op = self.ops.lock();
        let current = self.state();
        if !current.is_idle() {
            log::warn!("start ignored while {:?}", current);
            return Ok(Transition::Ignored);
        }

        let settings = settings.normalized();
        let (handles, pipeline, paths) = match self.prepare(&settings) {
            Ok(prepared) => prepared,
            Err(e) => {
                log::error!("start failed: {}", e);
                self.notify(|d| d.on_error(&e));
                return Err(e);
            }
        };
        *self.pipeline.lock() = pipeline;

        let devices = handles.device_names();
        {
            let mut s = self.state.lock();
            s.state = RecordingState::Recording;
            s.clock.start(Instant::now());
            s.settings = settings.clone();
            s.paths = Some(paths.clone());
            s.devices = devices.clone();
        }
        for kind in SourceKind::ALL {
            self.recovery_flag(kind).clear();
        }

        if let Err(e) = self.launch(handles, &settings) {
            log::error!("start failed: {}", e);
            self.abort_start(&paths);
            self.notify(|d| d.on_error(&e));
            return Err(e);
        }

        log::info!(
            "recording to {} ({}, {} kbps, mic={:?}, speaker={:?})",
            paths.intermediate.display(),
            settings.target_format(),
            settings.bitrate_kbps,
            devices.mic,
            devices.speaker
        );
        self.notify(|d| d.on_state_changed(RecordingState::Recording));
        self.notify(|d| d.on_device_changed(&devices));
        Ok(Transition::Applied)
    }

    /// Everything `start` needs before any state changes: validated
    /// settings, opened handles with their lanes, and the encoder. The
    /// encoder comes last so a failure before it leaves no file behind.
    fn prepare(
        &self,
        settings: &RecordingSettings,
    ) -> Result<(HandleSet, Pipeline, OutputPaths), RecorderError> {
        settings.validate()?;
        ensure_output_directory(&settings.output_directory, settings.min_free_space_mb)?;
        let paths = OutputPaths::for_settings(settings);

        let mut handles = HandleSet::default();
        for kind in settings.source.sources() {
            let handle = CaptureHandle::open(self.factory.as_ref(), kind, self.next_generation())?;
            handles.insert(handle);
        }

        let mut pipeline = Pipeline::new(settings.target_format(), settings.buffer_seconds, None);
        for handle in handles.iter_mut() {
            pipeline.install_lane(
                handle.kind(),
                handle.generation(),
                handle.native_format(),
            )?;
        }
        pipeline.set_encoder((self.encoder_factory)(&paths.intermediate, settings)?);
        Ok((handles, pipeline, paths))
    }

    fn launch(
        self: &Arc<Self>,
        handles: HandleSet,
        settings: &RecordingSettings,
    ) -> Result<(), RecorderError> {
        *self.workers.lock() = Some(self.spawn_workers(settings)?);
        let mut live = self.handles.lock();
        *live = handles;
        for handle in live.iter_mut() {
            handle.start(self)?;
        }
        Ok(())
    }

    /// Undo a partial start: nothing stays live and no file is left behind.
    fn abort_start(&self, paths: &OutputPaths) {
        {
            let mut s = self.state.lock();
            s.state = RecordingState::Idle;
            s.paths = None;
            s.devices = DeviceNames::default();
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        drop(handles);
        if let Some(workers) = self.workers.lock().take() {
            workers.shutdown();
        }
        drop(self.pipeline.lock().take_encoder());
        remove_if_exists(&paths.intermediate);
    }

    pub(crate) fn pause(&self) -> Result<Transition, RecorderError> {
        let _op = self.ops.lock();
        {
            let mut s = self.state.lock();
            if !s.state.is_recording() {
                log::warn!("pause ignored while {:?}", s.state);
                return Ok(Transition::Ignored);
            }
            // Paused before the providers stop, so their stop reports are
            // not taken for device loss.
            s.state = RecordingState::Paused;
            s.clock.pause(Instant::now());
        }

        for handle in self.handles.lock().iter_mut() {
            handle.stop();
        }
        {
            let mut pipeline = self.pipeline.lock();
            pipeline.process(true);
            let _ = pipeline.flush();
        }

        log::info!("recording paused");
        self.notify(|d| d.on_state_changed(RecordingState::Paused));
        Ok(Transition::Applied)
    }

    pub(crate) fn resume(self: &Arc<Self>) -> Result<Transition, RecorderError> {
        let _op = self.ops.lock();
        {
            let mut s = self.state.lock();
            if !s.state.is_paused() {
                log::warn!("resume ignored while {:?}", s.state);
                return Ok(Transition::Ignored);
            }
            s.state = RecordingState::Recording;
            s.clock.resume(Instant::now());
        }

        let mut failed = Vec::new();
        {
            let mut handles = self.handles.lock();
            let expected: Vec<(SourceKind, u64)> = {
                let pipeline = self.pipeline.lock();
                SourceKind::ALL
                    .into_iter()
                    .filter_map(|k| pipeline.lane_generation(k).map(|g| (k, g)))
                    .collect()
            };
            for (kind, generation) in expected {
                match handles.get_mut(kind) {
                    Some(handle) => {
                        if let Err(e) = handle.start(self) {
                            failed.push((kind, generation, StopReason::Error(e.to_string())));
                        }
                    }
                    None => failed.push((kind, generation, StopReason::DeviceLost)),
                }
            }
        }

        log::info!("recording resumed");
        self.notify(|d| d.on_state_changed(RecordingState::Recording));
        for (kind, generation, reason) in failed {
            log::warn!("{} did not restart: {}", kind, reason);
            recovery::source_stopped(self, kind, generation, reason);
        }
        Ok(Transition::Applied)
    }

    pub(crate) fn stop(self: &Arc<Self>) -> Result<Option<RecordingResult>, RecorderError> {
        let _op = self.ops.lock();
        let (settings, paths, elapsed, devices) = {
            let mut s = self.state.lock();
            if !s.state.is_active() {
                log::debug!("stop ignored while {:?}", s.state);
                return Ok(None);
            }
            let paths = s.paths.clone().ok_or_else(|| {
                RecorderError::Unknown("active session without output paths".into())
            })?;
            s.state = RecordingState::Stopping;
            (
                s.settings.clone(),
                paths,
                s.clock.elapsed(Instant::now()),
                s.devices.clone(),
            )
        };
        self.notify(|d| d.on_state_changed(RecordingState::Stopping));
        log::info!("stopping after {:.1}s", elapsed.as_secs_f64());

        let finalized = match self.teardown(true) {
            Some(mut encoder) => encoder.finalize(),
            None => Err(RecorderError::EncoderFinalized),
        };
        if let Err(e) = finalized {
            log::error!("finalize failed: {}", e);
            self.notify(|d| d.on_error(&e));
            self.finish_idle();
            return Err(e);
        }

        let result = self.publish(&settings, &paths, elapsed, devices);
        self.finish_idle();
        log::info!(
            "saved {} ({:.1}s, {} bytes)",
            result.file_path.display(),
            result.duration_secs,
            result.size_bytes
        );
        self.notify(|d| d.on_saved(&result));
        Ok(Some(result))
    }

    pub(crate) fn discard(&self) -> Result<Transition, RecorderError> {
        let _op = self.ops.lock();
        let paths = {
            let mut s = self.state.lock();
            if !s.state.is_active() {
                log::warn!("discard ignored while {:?}", s.state);
                return Ok(Transition::Ignored);
            }
            s.state = RecordingState::Stopping;
            s.paths.clone()
        };
        self.notify(|d| d.on_state_changed(RecordingState::Stopping));

        drop(self.teardown(false));
        if let Some(paths) = paths {
            remove_if_exists(&paths.intermediate);
            if paths.published != paths.intermediate {
                remove_if_exists(&paths.published);
            }
        }

        self.finish_idle();
        log::info!("recording discarded");
        Ok(Transition::Applied)
    }

    /// Release providers and timers, optionally drain, and hand back the
    /// encoder.
    fn teardown(&self, drain: bool) -> Option<Box<dyn StreamEncoder>> {
        // Taken out first; providers are stopped without the handles lock.
        let handles = std::mem::take(&mut *self.handles.lock());
        drop(handles);
        if let Some(workers) = self.workers.lock().take() {
            workers.shutdown();
        }

        let mut pipeline = self.pipeline.lock();
        if drain {
            pipeline.drain();
        }
        pipeline.take_encoder()
    }

    fn finish_idle(&self) {
        {
            let mut s = self.state.lock();
            s.paths = None;
            s.devices = DeviceNames::default();
        }
        self.set_state(RecordingState::Idle);
    }

    /// Transcode if requested, then describe the published file.
    fn publish(
        &self,
        settings: &RecordingSettings,
        paths: &OutputPaths,
        elapsed: Duration,
        devices: DeviceNames,
    ) -> RecordingResult {
        let (file_path, format, transcoded) = if settings.needs_transcode() {
            match self.transcoder.transcode(&paths.intermediate, &paths.published, settings) {
                Ok(()) => {
                    remove_if_exists(&paths.intermediate);
                    (paths.published.clone(), settings.format, true)
                }
                Err(e) => {
                    log::warn!(
                        "transcode to {:?} failed: {}; keeping {}",
                        settings.format,
                        e,
                        paths.intermediate.display()
                    );
                    self.notify(|d| d.on_error(&e));
                    (paths.intermediate.clone(), INTERMEDIATE_FORMAT, false)
                }
            }
        } else {
            (paths.intermediate.clone(), INTERMEDIATE_FORMAT, false)
        };

        let checksum = sha256_file(&file_path).unwrap_or_else(|e| {
            log::warn!("checksum of {} failed: {}", file_path.display(), e);
            String::new()
        });
        let size_bytes = fs::metadata(&file_path).map(|m| m.len()).unwrap_or(0);
        let duration_secs = elapsed.as_secs_f64();
        let metadata = RecordingMetadata::new(
            settings,
            duration_secs,
            &file_path.to_string_lossy(),
            format,
            &devices,
            &checksum,
        );
        if settings.write_metadata {
            if let Err(e) = write_metadata(&metadata, &file_path) {
                log::warn!("metadata sidecar not written: {}", e);
            }
        }

        RecordingResult {
            file_path,
            format,
            duration_secs,
            size_bytes,
            checksum,
            devices,
            transcoded,
            metadata,
        }
    }

    fn spawn_workers(
        self: &Arc<Self>,
        settings: &RecordingSettings,
    ) -> Result<Workers, RecorderError> {
        let spawn_err =
            |e: io::Error| RecorderError::Unknown(format!("failed to spawn session thread: {}", e));

        let weak = Arc::downgrade(self);
        let processing =
            BackgroundThread::on_wake("audio-processing", self.wake_rx.clone(), move || {
                if let Some(session) = weak.upgrade() {
                    session.pipeline.lock().process(false);
                }
            })
            .map_err(spawn_err)?;

        let weak = Arc::downgrade(self);
        let mut last_dropped = [0u64; 2];
        let progress_interval = settings.progress_interval();
        let progress = BackgroundThread::periodic("recording-progress", progress_interval, move || {
            if let Some(session) = weak.upgrade() {
                session.progress_tick(&mut last_dropped);
            }
        })
        .map_err(spawn_err)?;

        let weak = Arc::downgrade(self);
        let flush_interval = settings.flush_interval();
        let flush = BackgroundThread::periodic("recording-flush", flush_interval, move || {
            if let Some(session) = weak.upgrade() {
                if session.state().is_active() {
                    let _ = session.pipeline.lock().flush();
                }
            }
        })
        .map_err(spawn_err)?;

        Ok(Workers {
            processing,
            progress,
            flush,
        })
    }

    fn progress_tick(&self, last_dropped: &mut [u64; 2]) {
        let (state, elapsed, bitrate) = {
            let s = self.state.lock();
            (s.state, s.clock.elapsed(Instant::now()), s.settings.bitrate_kbps)
        };
        if !state.is_recording() {
            return;
        }

        let (file_size, counters) = {
            let pipeline = self.pipeline.lock();
            (pipeline.encoded_bytes(), pipeline.counters().clone())
        };
        let progress = RecordingProgress::new(elapsed, file_size, bitrate);
        self.notify(|d| d.on_progress(&progress));

        for (seen, kind) in last_dropped.iter_mut().zip(SourceKind::ALL) {
            let dropped = counters.frames_dropped(kind);
            if dropped > *seen {
                let fresh = dropped - *seen;
                log::warn!("{} buffer overflow: dropped {} oldest frames", kind, fresh);
                self.notify(|d| d.on_buffer_overflow(kind, fresh));
            }
            *seen = dropped;
        }
    }
}

fn remove_if_exists(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("failed to remove {}: {}", path.display(), e),
    }
}

/// Builder for [`RecordingSession`].
pub struct RecordingSessionBuilder {
    factory: Arc<dyn ProviderFactory>,
    delegate: Option<Arc<dyn RecorderDelegate>>,
    encoder_factory: Option<EncoderFactory>,
    transcoder: Option<Arc<dyn Transcoder>>,
}

impl RecordingSessionBuilder {
    pub fn delegate(mut self, delegate: Arc<dyn RecorderDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Replace the LAME encoder.
    pub fn encoder_factory(mut self, factory: EncoderFactory) -> Self {
        self.encoder_factory = Some(factory);
        self
    }

    /// Replace the symphonia/hound transcoder.
    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    pub fn build(self) -> RecordingSession {
        let encoder_factory: EncoderFactory = match self.encoder_factory {
            Some(factory) => factory,
            None => Arc::new(Mp3StreamEncoder::for_settings),
        };
        let transcoder: Arc<dyn Transcoder> = match self.transcoder {
            Some(transcoder) => transcoder,
            None => Arc::new(SymphoniaTranscoder),
        };
        let settings = RecordingSettings::default();
        let (wake_tx, wake_rx) = bounded(1);
        let inner = SessionInner {
            factory: self.factory,
            delegate: self.delegate,
            encoder_factory,
            transcoder,
            pipeline: Mutex::new(Pipeline::new(
                settings.target_format(),
                settings.buffer_seconds,
                None,
            )),
            state: Mutex::new(SessionState {
                state: RecordingState::Idle,
                clock: SessionClock::default(),
                settings,
                paths: None,
                devices: DeviceNames::default(),
            }),
            handles: Mutex::new(HandleSet::default()),
            mic_recovery: RecoveryFlag::new(),
            speaker_recovery: RecoveryFlag::new(),
            generation: AtomicU64::new(0),
            ops: Mutex::new(()),
            workers: Mutex::new(None),
            wake_tx,
            wake_rx,
        };
        RecordingSession { inner: Arc::new(inner) }
    }
}

/// A recording session: mic and/or loopback capture, conversion, mixing and
/// streaming MP3 encode, with hotplug recovery.
///
/// Every lifecycle method is synchronous and serialized against the others.
/// Requests from a state that does not allow them log a warning and return
/// [`Transition::Ignored`]. Use [`Recorder`](crate::session::recorder::Recorder)
/// to keep them off the caller's thread.
///
/// Delegate callbacks run on session threads and must not call lifecycle
/// methods on the same session synchronously.
///
/// ```text
/// [provider] → sink → [raw ring] → chain ─┐
///                                          ├→ mix → [StreamEncoder] → .mp3 → (transcode)
/// [provider] → sink → [raw ring] → chain ─┘
/// ```
pub struct RecordingSession {
    inner: Arc<SessionInner>,
}

impl RecordingSession {
    pub fn builder(factory: Arc<dyn ProviderFactory>) -> RecordingSessionBuilder {
        RecordingSessionBuilder {
            factory,
            delegate: None,
            encoder_factory: None,
            transcoder: None,
        }
    }

    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self::builder(factory).build()
    }

    /// Idle → Recording.
    ///
    /// Fails without leaving anything live when a device is missing or busy,
    /// or the output directory is unusable.
    pub fn start(&self, settings: RecordingSettings) -> Result<Transition, RecorderError> {
        self.inner.start(settings)
    }

    /// Recording → Paused. Audio captured so far is written before returning.
    pub fn pause(&self) -> Result<Transition, RecorderError> {
        self.inner.pause()
    }

    /// Paused → Recording.
    pub fn resume(&self) -> Result<Transition, RecorderError> {
        self.inner.resume()
    }

    /// Recording/Paused → Stopping → Idle, publishing the recording.
    ///
    /// `Ok(None)` when there was nothing to stop.
    pub fn stop(&self) -> Result<Option<RecordingResult>, RecorderError> {
        self.inner.stop()
    }

    /// Like `stop`, but deletes the output instead of publishing it.
    pub fn discard(&self) -> Result<Transition, RecorderError> {
        self.inner.discard()
    }

    pub fn state(&self) -> RecordingState {
        self.inner.state()
    }

    /// Recorded time, excluding pauses.
    pub fn elapsed(&self) -> Duration {
        self.inner.state.lock().clock.elapsed(Instant::now())
    }

    /// Counters of the current (or last) session.
    pub fn counters(&self) -> SessionCounters {
        self.inner.pipeline.lock().counters().clone()
    }

    pub fn device_names(&self) -> DeviceNames {
        self.inner.state.lock().devices.clone()
    }

    pub fn settings(&self) -> RecordingSettings {
        self.inner.settings()
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.inner.state().is_active() {
            if let Err(e) = self.inner.stop() {
                log::error!("stop on drop failed: {}", e);
            }
        }
    }
}
