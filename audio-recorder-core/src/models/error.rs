use std::io;

use serde::Serialize;
use thiserror::Error;

use super::audio_models::SourceKind;

/// Stable error classes the UI maps to localized messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NoDevice,
    DeviceBusy,
    DiskFull,
    NoPermission,
    Generic,
}

/// Errors that can occur while recording.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("no {0} device available")]
    NoDevice(SourceKind),

    #[error("{0} device is in use by another application")]
    DeviceBusy(SourceKind),

    #[error("not enough disk space: {available_mb} MB free, {required_mb} MB required")]
    DiskFull { available_mb: u64, required_mb: u64 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("encoder already finalized")]
    EncoderFinalized,

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl RecorderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoDevice(_) => ErrorCategory::NoDevice,
            Self::DeviceBusy(_) => ErrorCategory::DeviceBusy,
            Self::DiskFull { .. } => ErrorCategory::DiskFull,
            Self::PermissionDenied(_) => ErrorCategory::NoPermission,
            _ => ErrorCategory::Generic,
        }
    }

    /// Classify an I/O failure. `context` says what was being attempted.
    pub fn from_io(context: &str, err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied(format!("{}: {}", context, err));
        }
        if is_disk_full(err) {
            return Self::DiskFull {
                available_mb: 0,
                required_mb: 0,
            };
        }
        Self::StorageError(format!("{}: {}", context, err))
    }
}

fn is_disk_full(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::StorageFull {
        return true;
    }
    // ENOSPC, EDQUOT on unix; ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL on windows
    let codes: &[i32] = if cfg!(windows) { &[39, 112] } else { &[28, 122] };
    err.raw_os_error().is_some_and(|code| codes.contains(&code))
}
