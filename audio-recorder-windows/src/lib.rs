//! # audio-recorder-windows
//!
//! Windows WASAPI backend for audio-recorder-core.
//!
//! Provides:
//! - `WasapiCapture`: shared-mode capture of the default microphone, or
//!   loopback of the default render endpoint
//! - `WasapiProviderFactory`: the `ProviderFactory` a session opens (and
//!   reopens after hotplug) its sources through
//! - `DeviceEnumerator`: default endpoint, friendly name and mix format via
//!   the MMDevice API
//! - `permissions`: microphone privacy check
//!
//! ## Platform Requirements
//! - Windows 10 1703+ for loopback on the default render endpoint
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use audio_recorder_core::{RecordingSession, RecordingSettings};
//! use audio_recorder_windows::WasapiProviderFactory;
//!
//! let session = RecordingSession::new(Arc::new(WasapiProviderFactory::new()));
//! session.start(RecordingSettings::default())?;
//! ```

pub mod sample_format;

#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod factory;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
pub mod wasapi_capture;

pub use sample_format::SampleFormat;

#[cfg(target_os = "windows")]
pub use device_enumerator::{DeviceEnumerator, Endpoint};
#[cfg(target_os = "windows")]
pub use factory::WasapiProviderFactory;
#[cfg(target_os = "windows")]
pub use permissions::check_microphone_access;
#[cfg(target_os = "windows")]
pub use wasapi_capture::WasapiCapture;
