//! Default-endpoint lookup via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to resolve the current default capture or
//! render endpoint, its friendly name and its shared-mode mix format.

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, EDataFlow, IAudioClient, IMMDevice, IMMDeviceEnumerator,
    MMDeviceEnumerator, WAVEFORMATEX, WAVEFORMATEXTENSIBLE,
};
use windows::Win32::Media::KernelStreaming::WAVE_FORMAT_EXTENSIBLE;
use windows::Win32::Media::Multimedia::{KSDATAFORMAT_SUBTYPE_IEEE_FLOAT, WAVE_FORMAT_IEEE_FLOAT};
use windows::Win32::System::Com::StructuredStorage::PropVariantToStringAlloc;
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED, STGM_READ,
};
use windows::Win32::UI::Shell::PropertiesSystem::IPropertyStore;

use audio_recorder_core::models::audio_models::{AudioFormat, SourceKind};
use audio_recorder_core::models::error::RecorderError;

use crate::permissions::classify;
use crate::sample_format::SampleFormat;

/// Per-thread COM initialization (MTA), undone on drop.
///
/// A thread already initialized in another apartment is used as is and left
/// alone on drop.
pub(crate) struct ComGuard {
    should_uninit: bool,
}

impl ComGuard {
    pub(crate) fn init() -> Result<Self, RecorderError> {
        let result = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        match result.ok() {
            Ok(()) => Ok(Self { should_uninit: true }),
            Err(e) if e.code() == RPC_E_CHANGED_MODE => Ok(Self { should_uninit: false }),
            Err(e) => Err(RecorderError::CaptureFailed(format!("CoInitializeEx failed: {}", e))),
        }
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.should_uninit {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// A resolved endpoint, snapshotted at lookup time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub name: String,
    pub format: AudioFormat,
    pub sample_format: SampleFormat,
    /// Bytes per interleaved frame in the mix format.
    pub block_align: usize,
}

/// Audio device enumerator using the Windows MMDevice API.
///
/// Requires COM to be initialized on the calling thread and must stay on
/// that thread.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    pub fn new() -> Result<Self, RecorderError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(|e| {
                    RecorderError::CaptureFailed(format!("failed to create enumerator: {}", e))
                })?;
            Ok(Self { enumerator })
        }
    }

    /// The current default console endpoint for `kind`.
    ///
    /// Microphones come from the capture flow, loopback from the render flow.
    pub fn default_device(&self, kind: SourceKind) -> Result<IMMDevice, RecorderError> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(data_flow(kind), eConsole)
                .map_err(|_| RecorderError::NoDevice(kind))
        }
    }

    /// Reopen an endpoint by the id an earlier lookup returned.
    pub fn device(&self, kind: SourceKind, id: &str) -> Result<IMMDevice, RecorderError> {
        let wide: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR(wide.as_ptr()))
                .map_err(|_| RecorderError::NoDevice(kind))
        }
    }

    /// Resolve the default endpoint for `kind` with its name and mix format.
    pub fn describe_default(&self, kind: SourceKind) -> Result<Endpoint, RecorderError> {
        let device = self.default_device(kind)?;
        let id = device_id(&device).ok_or(RecorderError::NoDevice(kind))?;
        let name = friendly_name(&device).unwrap_or_else(|| id.clone());

        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| classify(kind, &e, "Activate"))?;
        let (format, sample_format, block_align) = mix_format(kind, &client)?;

        Ok(Endpoint {
            id,
            name,
            format,
            sample_format,
            block_align,
        })
    }
}

fn data_flow(kind: SourceKind) -> EDataFlow {
    match kind {
        SourceKind::Mic => eCapture,
        SourceKind::Speaker => eRender,
    }
}

/// Query and parse the shared-mode mix format of an activated client.
pub(crate) fn mix_format(
    kind: SourceKind,
    client: &IAudioClient,
) -> Result<(AudioFormat, SampleFormat, usize), RecorderError> {
    unsafe {
        let ptr = client
            .GetMixFormat()
            .map_err(|e| classify(kind, &e, "GetMixFormat"))?;
        let parsed = parse_format(&*ptr);
        CoTaskMemFree(Some(ptr as *const _));
        parsed
    }
}

fn parse_format(fmt: &WAVEFORMATEX) -> Result<(AudioFormat, SampleFormat, usize), RecorderError> {
    let tag = fmt.wFormatTag as u32;
    let bits = fmt.wBitsPerSample;
    let is_float = if tag == WAVE_FORMAT_EXTENSIBLE {
        let ext = unsafe { &*(fmt as *const WAVEFORMATEX as *const WAVEFORMATEXTENSIBLE) };
        let subformat = unsafe { std::ptr::read_unaligned(std::ptr::addr_of!(ext.SubFormat)) };
        subformat == KSDATAFORMAT_SUBTYPE_IEEE_FLOAT
    } else {
        tag == WAVE_FORMAT_IEEE_FLOAT
    };

    let sample_format = SampleFormat::from_bits(is_float, bits).ok_or_else(|| {
        RecorderError::ConfigurationFailed(format!(
            "unsupported mix format: tag {:#x}, {} bits",
            tag, bits
        ))
    })?;
    let format = AudioFormat::new(fmt.nSamplesPerSec, fmt.nChannels);
    Ok((format, sample_format, fmt.nBlockAlign as usize))
}

fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let id = device.GetId().ok()?;
        take_string(id)
    }
}

fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store: IPropertyStore = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = PropVariantToStringAlloc(&value).ok()?;
        take_string(name)
    }
}

/// Copy out and free a COM-allocated wide string.
unsafe fn take_string(ptr: PWSTR) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let value = ptr.to_string().ok();
    CoTaskMemFree(Some(ptr.0 as *const _));
    value.filter(|s| !s.is_empty())
}
