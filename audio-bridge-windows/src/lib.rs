//! # audio-bridge-windows
//!
//! Windows WASAPI collaborators for audio-bridge-core.
//!
//! Provides:
//! - `WasapiDeviceHost`: render endpoint listing and shared-mode duplex streams
//! - `ProcessLoopbackActivator`: per-process loopback capture
//! - `WasapiSessionDirectory`: audio sessions and their owning windows
//! - `diagnostics`: privilege and OS version probes for activation errors
//!
//! ## Platform Requirements
//! - Windows 10 1803+ (build 17134) for process loopback
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use audio_bridge_core::{StreamConfig, StreamController};
//! use audio_bridge_windows::ProcessLoopbackActivator;
//!
//! let mut controller = StreamController::with_loopback(Arc::new(ProcessLoopbackActivator::new()));
//! let handle = controller.open(StreamConfig::loopback(pid))?;
//! controller.start()?;
//! let samples = handle.drain_buffered();
//! ```

pub mod diagnostics;
pub mod hresult;
pub mod wave_format;

#[cfg(any(target_os = "windows", test))]
mod staging;

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_host;
#[cfg(target_os = "windows")]
pub mod duplex_stream;
#[cfg(target_os = "windows")]
pub mod process_loopback;
#[cfg(target_os = "windows")]
pub mod session_directory;

#[cfg(target_os = "windows")]
pub use device_host::WasapiDeviceHost;
#[cfg(target_os = "windows")]
pub use duplex_stream::WasapiDuplexStream;
#[cfg(target_os = "windows")]
pub use process_loopback::{ProcessCaptureClient, ProcessLoopbackActivator};
#[cfg(target_os = "windows")]
pub use session_directory::{TargetSessionProbe, WasapiSessionDirectory};
