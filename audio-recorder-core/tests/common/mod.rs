#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use audio_recorder_core::{
    AudioFormat, CaptureProvider, CaptureSink, DeviceNames, ProviderFactory, RecorderDelegate,
    RecorderError, RecordingProgress, RecordingResult, RecordingSettings, RecordingState,
    SourceKind, SourceSelection, StopReason,
};

#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub name: String,
    pub format: AudioFormat,
}

#[derive(Default)]
struct FactoryState {
    devices: HashMap<SourceKind, FakeDevice>,
    open_errors: HashMap<SourceKind, VecDeque<RecorderError>>,
    start_errors: HashMap<SourceKind, VecDeque<RecorderError>>,
    opens: HashMap<SourceKind, usize>,
    sinks: HashMap<SourceKind, CaptureSink>,
    report_intentional_stops: bool,
}

/// Scripted endpoints. Tests push audio into, and pull the plug on, the
/// provider most recently started for a kind.
#[derive(Clone, Default)]
pub struct FakeFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, kind: SourceKind, name: &str, format: AudioFormat) -> Self {
        self.set_device(kind, name, format);
        self
    }

    /// Mic at 48 kHz stereo and loopback at 44.1 kHz stereo.
    pub fn standard() -> Self {
        Self::new()
            .with_device(SourceKind::Mic, "Fake Mic", AudioFormat::new(48000, 2))
            .with_device(SourceKind::Speaker, "Fake Speakers", AudioFormat::new(44100, 2))
    }

    pub fn set_device(&self, kind: SourceKind, name: &str, format: AudioFormat) {
        self.state.lock().devices.insert(
            kind,
            FakeDevice {
                name: name.to_string(),
                format,
            },
        );
    }

    /// Remove the endpoint: later opens fail with `NoDevice`.
    pub fn unplug(&self, kind: SourceKind) {
        self.state.lock().devices.remove(&kind);
    }

    pub fn fail_next_open(&self, kind: SourceKind, err: RecorderError) {
        self.state
            .lock()
            .open_errors
            .entry(kind)
            .or_default()
            .push_back(err);
    }

    pub fn fail_next_start(&self, kind: SourceKind, err: RecorderError) {
        self.state
            .lock()
            .start_errors
            .entry(kind)
            .or_default()
            .push_back(err);
    }

    /// Providers also report intentional stops through the sink.
    pub fn report_intentional_stops(&self, on: bool) {
        self.state.lock().report_intentional_stops = on;
    }

    pub fn opens(&self, kind: SourceKind) -> usize {
        self.state.lock().opens.get(&kind).copied().unwrap_or(0)
    }

    pub fn sink(&self, kind: SourceKind) -> Option<CaptureSink> {
        self.state.lock().sinks.get(&kind).cloned()
    }

    pub fn is_live(&self, kind: SourceKind) -> bool {
        self.state.lock().sinks.contains_key(&kind)
    }

    pub fn format(&self, kind: SourceKind) -> Option<AudioFormat> {
        self.state.lock().devices.get(&kind).map(|d| d.format)
    }

    /// Push `seconds` of a tone into the live `kind` provider. False if none.
    pub fn push_tone(&self, kind: SourceKind, seconds: f32) -> bool {
        let (Some(sink), Some(format)) = (self.sink(kind), self.format(kind)) else {
            return false;
        };
        sink.push(&tone(format, seconds));
        true
    }

    /// Simulate device loss on the live `kind` provider.
    pub fn lose(&self, kind: SourceKind) {
        let sink = self.state.lock().sinks.remove(&kind);
        if let Some(sink) = sink {
            sink.stopped(StopReason::DeviceLost);
        }
    }
}

impl ProviderFactory for FakeFactory {
    fn open(&self, kind: SourceKind) -> Result<Box<dyn CaptureProvider>, RecorderError> {
        let mut state = self.state.lock();
        *state.opens.entry(kind).or_default() += 1;
        if let Some(err) = state.open_errors.get_mut(&kind).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        let device = state
            .devices
            .get(&kind)
            .cloned()
            .ok_or(RecorderError::NoDevice(kind))?;
        Ok(Box::new(FakeProvider {
            kind,
            device,
            factory: self.clone(),
            sink: None,
        }))
    }
}

struct FakeProvider {
    kind: SourceKind,
    device: FakeDevice,
    factory: FakeFactory,
    sink: Option<CaptureSink>,
}

impl CaptureProvider for FakeProvider {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn device_name(&self) -> &str {
        &self.device.name
    }

    fn native_format(&self) -> AudioFormat {
        self.device.format
    }

    fn start(&mut self, sink: CaptureSink) -> Result<(), RecorderError> {
        let mut state = self.factory.state.lock();
        if let Some(err) = state
            .start_errors
            .get_mut(&self.kind)
            .and_then(|q| q.pop_front())
        {
            return Err(err);
        }
        state.sinks.insert(self.kind, sink.clone());
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        let report = {
            let mut state = self.factory.state.lock();
            state.sinks.remove(&self.kind);
            state.report_intentional_stops
        };
        if report {
            sink.stopped(StopReason::Error("stopped".into()));
        }
    }
}

/// Interleaved sine at 440 Hz, amplitude 0.3.
pub fn tone(format: AudioFormat, seconds: f32) -> Vec<f32> {
    let frames = (format.sample_rate as f32 * seconds) as usize;
    let mut samples = Vec::with_capacity(frames * format.channels as usize);
    for i in 0..frames {
        let t = i as f32 / format.sample_rate as f32;
        let value = (t * 440.0 * std::f32::consts::TAU).sin() * 0.3;
        for _ in 0..format.channels {
            samples.push(value);
        }
    }
    samples
}

/// Feed every live source in 50 ms chunks at roughly real-time pace.
pub fn feed(factory: &FakeFactory, kinds: &[SourceKind], seconds: f32) {
    let chunks = (seconds / 0.05).round() as usize;
    for _ in 0..chunks {
        for &kind in kinds {
            factory.push_tone(kind, 0.05);
        }
        thread::sleep(Duration::from_millis(50));
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    State(RecordingState),
    Progress(RecordingProgress),
    Devices(DeviceNames),
    Saved(RecordingResult),
    Error(RecorderError),
    Overflow(SourceKind, u64),
}

#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn states(&self) -> Vec<RecordingState> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::State(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn devices(&self) -> Vec<DeviceNames> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Devices(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<RecorderError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(err) => Some(err),
                _ => None,
            })
            .collect()
    }

    pub fn saved(&self) -> Vec<RecordingResult> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Saved(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<RecordingProgress> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Poll until `check` holds or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, check: impl Fn(&[Event]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if check(&self.events.lock()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

impl RecorderDelegate for EventLog {
    fn on_state_changed(&self, state: RecordingState) {
        self.record(Event::State(state));
    }

    fn on_progress(&self, progress: &RecordingProgress) {
        self.record(Event::Progress(*progress));
    }

    fn on_device_changed(&self, devices: &DeviceNames) {
        self.record(Event::Devices(devices.clone()));
    }

    fn on_saved(&self, result: &RecordingResult) {
        self.record(Event::Saved(result.clone()));
    }

    fn on_error(&self, error: &RecorderError) {
        self.record(Event::Error(error.clone()));
    }

    fn on_buffer_overflow(&self, source: SourceKind, dropped_frames: u64) {
        self.record(Event::Overflow(source, dropped_frames));
    }
}

/// Test settings: scratch output directory, no free-space floor, short
/// recovery delay and progress period.
pub fn settings(dir: &Path, source: SourceSelection) -> RecordingSettings {
    RecordingSettings {
        source,
        output_directory: dir.to_path_buf(),
        min_free_space_mb: 0,
        recovery_delay_ms: 50,
        progress_interval_ms: 100,
        ..Default::default()
    }
}

/// Files in `dir`, excluding metadata sidecars.
pub fn audio_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.retain(|p| !p.to_string_lossy().ends_with(".metadata.json"));
    files.sort();
    files
}
