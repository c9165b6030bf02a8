//! Windows microphone privacy check and WASAPI failure classification.
//!
//! On Windows 10 1803+, microphone access is controlled by the privacy
//! settings at Settings > Privacy > Microphone. Unpackaged desktop apps get
//! no consent prompt: a disabled toggle shows up as `E_ACCESSDENIED` when the
//! endpoint is activated. Render loopback needs no permission.

use windows::Win32::Foundation::{E_ACCESSDENIED, ERROR_NOT_FOUND};
use windows::Win32::Media::Audio::{
    IAudioClient, AUDCLNT_E_DEVICE_INVALIDATED, AUDCLNT_E_DEVICE_IN_USE,
};
use windows::Win32::System::Com::CLSCTX_ALL;

use audio_recorder_core::models::audio_models::SourceKind;
use audio_recorder_core::models::error::RecorderError;

use crate::device_enumerator::{ComGuard, DeviceEnumerator};

/// Map a WASAPI / MMDevice failure to the recorder's error classes.
///
/// `context` names the call that failed and ends up in generic messages.
pub(crate) fn classify(
    kind: SourceKind,
    err: &windows::core::Error,
    context: &str,
) -> RecorderError {
    let code = err.code();
    if code == AUDCLNT_E_DEVICE_IN_USE {
        RecorderError::DeviceBusy(kind)
    } else if code == E_ACCESSDENIED {
        RecorderError::PermissionDenied(format!("{} access is disabled in privacy settings", kind))
    } else if code == AUDCLNT_E_DEVICE_INVALIDATED || code == ERROR_NOT_FOUND.to_hresult() {
        RecorderError::NoDevice(kind)
    } else {
        RecorderError::CaptureFailed(format!("{} {} failed: {}", kind, context, err))
    }
}

/// Check that the default microphone can be opened.
///
/// Activates an `IAudioClient` on the default capture endpoint and releases
/// it again. Returns `NoDevice`, `DeviceBusy` or `PermissionDenied` when the
/// microphone is not usable.
pub fn check_microphone_access() -> Result<(), RecorderError> {
    let _com = ComGuard::init()?;
    let enumerator = DeviceEnumerator::new()?;
    let device = enumerator.default_device(SourceKind::Mic)?;
    unsafe {
        device
            .Activate::<IAudioClient>(CLSCTX_ALL, None)
            .map_err(|e| classify(SourceKind::Mic, &e, "Activate"))?;
    }
    Ok(())
}
