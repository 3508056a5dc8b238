use std::time::Duration;

use crate::models::audio_models::{DeviceInfo, DeviceLatencies, DeviceSelector};
use crate::models::error::{ActivationError, DeviceError};
use crate::models::format::SampleEncoding;
use crate::session::duplex::DuplexProcessor;

/// Negotiated parameters for a duplex device stream. Channel counts are
/// already clamped to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplexParams {
    pub device: DeviceInfo,
    pub sample_rate: f64,
    pub period_frames: u32,
    pub input_channels: u16,
    pub output_channels: u16,
}

/// Raw input handed to the processor by the backend for one callback.
#[derive(Debug, Clone, Copy)]
pub struct InputBlock<'a> {
    pub data: &'a [u8],
    pub encoding: SampleEncoding,
    pub bits_per_sample: u16,
}

/// Per-callback flags and measurements reported by the driver.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallbackInfo {
    pub frames: usize,
    pub input_underflow: bool,
    pub output_underflow: bool,
    /// Driver CPU load fraction, 0 when the driver does not report one.
    pub cpu_load: f64,
}

/// Host audio API able to enumerate devices and run duplex streams.
///
/// Implemented by:
/// - `WasapiDeviceHost` (Windows)
pub trait DeviceHost: Send + Sync {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Look a device up by index or name. `Ok(None)` when nothing matches.
    fn device_info(&self, selector: &DeviceSelector) -> Result<Option<DeviceInfo>, DeviceError> {
        let devices = self.list_devices()?;
        Ok(devices.into_iter().find(|d| d.matches(selector)))
    }

    /// Open (but do not start) a device stream that calls `processor` once
    /// per period on the backend's real-time thread.
    fn open_duplex(
        &self,
        params: &DuplexParams,
        processor: DuplexProcessor,
    ) -> Result<Box<dyn DuplexStream>, ActivationError>;
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Joined,
    /// The real-time thread did not exit in time and was detached.
    TimedOut,
}

/// An opened device stream. Dropping it releases the device.
pub trait DuplexStream: Send {
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Stop the real-time thread, waiting at most `timeout` for it to exit.
    /// A detached stream cannot be started again.
    fn stop(&mut self, timeout: Duration) -> Result<StopOutcome, DeviceError>;

    /// Latencies the device actually negotiated.
    fn latencies(&self) -> DeviceLatencies;
}
