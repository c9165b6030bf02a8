//! WASAPI capture provider for microphones and system audio.
//!
//! Microphones are read from the default capture endpoint. System audio is
//! the mix going to the default render endpoint, opened with
//! `AUDCLNT_STREAMFLAGS_LOOPBACK`.
//!
//! The endpoint is resolved when the provider is created, so its name and
//! mix format are known before capture starts. All COM objects used for the
//! stream live on the capture thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use windows::core::PCWSTR;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, AUDCLNT_BUFFERFLAGS_SILENT, AUDCLNT_E_DEVICE_INVALIDATED,
    AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_LOOPBACK, AUDCLNT_STREAMFLAGS_NOPERSIST,
};
use windows::Win32::System::Com::{CoTaskMemFree, CLSCTX_ALL};
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW,
};

use audio_recorder_core::models::audio_models::{AudioFormat, SourceKind};
use audio_recorder_core::models::error::RecorderError;
use audio_recorder_core::session::sink::CaptureSink;
use audio_recorder_core::traits::capture_provider::{CaptureProvider, StopReason};

use crate::device_enumerator::{mix_format, ComGuard, DeviceEnumerator, Endpoint};
use crate::permissions::classify;
use crate::sample_format::decode_samples;

/// 100ms shared-mode buffer, in 100ns units.
const BUFFER_DURATION: i64 = 1_000_000;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const START_TIMEOUT: Duration = Duration::from_secs(3);

/// WASAPI shared-mode capture of one default endpoint.
pub struct WasapiCapture {
    kind: SourceKind,
    endpoint: Endpoint,
    running: Arc<AtomicBool>,
    capture_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WasapiCapture {
    /// Bind to the current default endpoint for `kind`.
    pub fn open_default(kind: SourceKind) -> Result<Self, RecorderError> {
        let _com = ComGuard::init()?;
        let endpoint = DeviceEnumerator::new()?.describe_default(kind)?;
        log::info!(
            "WASAPI {} endpoint: {} ({}, {:?})",
            kind,
            endpoint.name,
            endpoint.format,
            endpoint.sample_format
        );
        Ok(Self {
            kind,
            endpoint,
            running: Arc::new(AtomicBool::new(false)),
            capture_handle: Mutex::new(None),
        })
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint.id
    }
}

impl CaptureProvider for WasapiCapture {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn device_name(&self) -> &str {
        &self.endpoint.name
    }

    fn native_format(&self) -> AudioFormat {
        self.endpoint.format
    }

    fn start(&mut self, sink: CaptureSink) -> Result<(), RecorderError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RecorderError::ConfigurationFailed(format!(
                "{} capture already running",
                self.kind
            )));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let endpoint = self.endpoint.clone();
        let kind = self.kind;
        let (ready_tx, ready_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name(format!("wasapi-{}-capture", kind))
            .spawn(move || capture_thread(kind, endpoint, running, sink, ready_tx))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                RecorderError::CaptureFailed(format!(
                    "failed to spawn {} capture thread: {}",
                    kind, e
                ))
            })?;

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                *self.capture_handle.lock() = Some(handle);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                self.running.store(false, Ordering::SeqCst);
                *self.capture_handle.lock() = Some(handle);
                Err(RecorderError::CaptureFailed(format!("{} capture did not start in time", kind)))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(RecorderError::CaptureFailed(format!("{} capture thread exited", kind)))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.capture_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WasapiCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the capture thread.
///
/// Reports setup through `ready`, then pumps packets until stopped. A pump
/// failure while still running is reported once through the sink.
fn capture_thread(
    kind: SourceKind,
    endpoint: Endpoint,
    running: Arc<AtomicBool>,
    sink: CaptureSink,
    ready: Sender<Result<(), RecorderError>>,
) {
    let _com = match ComGuard::init() {
        Ok(guard) => guard,
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            let _ = ready.send(Err(e));
            return;
        }
    };

    let stream = match CaptureStream::open(kind, &endpoint) {
        Ok(stream) => stream,
        Err(e) => {
            running.store(false, Ordering::SeqCst);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    if let Err(e) = stream.pump(&running, &sink) {
        // A failure racing an intentional stop is not reported.
        if running.swap(false, Ordering::SeqCst) {
            let reason = if e.code() == AUDCLNT_E_DEVICE_INVALIDATED {
                StopReason::DeviceLost
            } else {
                StopReason::Error(e.to_string())
            };
            log::warn!("{} capture ended: {}", kind, reason);
            sink.stopped(reason);
        }
    }
    log::debug!("{} capture thread finished", kind);
}

/// An initialized and started shared-mode stream.
///
/// Must be dropped on the thread that opened it, before its COM guard.
struct CaptureStream {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    mmcss: Option<HANDLE>,
    endpoint: Endpoint,
}

impl CaptureStream {
    /// Sequence:
    /// 1. Reopen the endpoint by id
    /// 2. Activate IAudioClient and re-check the mix format
    /// 3. Initialize in shared mode (LOOPBACK for system audio)
    /// 4. Get IAudioCaptureClient
    /// 5. Register with MMCSS
    /// 6. Start
    fn open(kind: SourceKind, endpoint: &Endpoint) -> Result<Self, RecorderError> {
        let enumerator = DeviceEnumerator::new()?;
        let device = enumerator.device(kind, &endpoint.id)?;

        unsafe {
            let client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| classify(kind, &e, "Activate"))?;

            let (format, sample_format, _) = mix_format(kind, &client)?;
            if format != endpoint.format || sample_format != endpoint.sample_format {
                return Err(RecorderError::CaptureFailed(format!(
                    "{} mix format changed from {} to {}",
                    kind, endpoint.format, format
                )));
            }

            let flags = match kind {
                SourceKind::Mic => AUDCLNT_STREAMFLAGS_NOPERSIST,
                SourceKind::Speaker => AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
            };
            let mix_ptr = client
                .GetMixFormat()
                .map_err(|e| classify(kind, &e, "GetMixFormat"))?;
            let initialized = client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                flags,
                BUFFER_DURATION,
                0,
                mix_ptr,
                None,
            );
            CoTaskMemFree(Some(mix_ptr as *const _));
            initialized.map_err(|e| classify(kind, &e, "IAudioClient::Initialize"))?;

            let capture: IAudioCaptureClient = client
                .GetService()
                .map_err(|e| classify(kind, &e, "GetService"))?;

            let mut task_index: u32 = 0;
            let task_name: Vec<u16> = "Pro Audio\0".encode_utf16().collect();
            let mmcss =
                AvSetMmThreadCharacteristicsW(PCWSTR(task_name.as_ptr()), &mut task_index).ok();
            if mmcss.is_none() {
                log::debug!("{} capture thread runs without MMCSS", kind);
            }

            let stream = Self {
                client,
                capture,
                mmcss,
                endpoint: endpoint.clone(),
            };
            stream
                .client
                .Start()
                .map_err(|e| classify(kind, &e, "IAudioClient::Start"))?;
            Ok(stream)
        }
    }

    /// Poll for packets and hand them to the sink until `running` clears.
    fn pump(&self, running: &AtomicBool, sink: &CaptureSink) -> windows::core::Result<()> {
        let channels = self.endpoint.format.channels as usize;
        while running.load(Ordering::SeqCst) {
            thread::sleep(POLL_INTERVAL);

            let mut packet_length = unsafe { self.capture.GetNextPacketSize()? };
            while packet_length > 0 {
                let mut buffer_ptr: *mut u8 = std::ptr::null_mut();
                let mut num_frames: u32 = 0;
                let mut flags: u32 = 0;

                unsafe {
                    self.capture
                        .GetBuffer(&mut buffer_ptr, &mut num_frames, &mut flags, None, None)?;
                }

                let frames = num_frames as usize;
                let samples = if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 {
                    vec![0.0f32; frames * channels]
                } else if buffer_ptr.is_null() {
                    Vec::new()
                } else {
                    let len = frames * self.endpoint.block_align;
                    let bytes = unsafe { std::slice::from_raw_parts(buffer_ptr, len) };
                    decode_samples(bytes, self.endpoint.sample_format)
                };

                unsafe {
                    self.capture.ReleaseBuffer(num_frames)?;
                }

                if !samples.is_empty() {
                    sink.push(&samples);
                }
                packet_length = unsafe { self.capture.GetNextPacketSize()? };
            }
        }
        Ok(())
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        unsafe {
            let _ = self.client.Stop();
            if let Some(handle) = self.mmcss.take() {
                let _ = AvRevertMmThreadCharacteristics(handle);
            }
        }
    }
}
