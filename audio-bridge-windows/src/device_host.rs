//! WASAPI device host.
//!
//! Lists active render endpoints through the MMDevice API and opens
//! shared-mode duplex streams on them. Input comes from the default capture
//! endpoint; WASAPI has no single endpoint carrying both directions.

use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, IAudioClient, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator,
    DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_ALL, STGM_READ};

use audio_bridge_core::{
    ActivationError, ActivationFailure, DeviceError, DeviceHost, DeviceInfo, DeviceLatencies,
    DeviceSelector, DuplexParams, DuplexProcessor, DuplexStream,
};

use crate::com::{device_error, ComScope};
use crate::duplex_stream::WasapiDuplexStream;
use crate::hresult;

pub(crate) const HOST_API: &str = "WASAPI";

/// 100-nanosecond units per millisecond.
const HNS_PER_MS: f64 = 10_000.0;

/// Device host backed by WASAPI shared mode.
///
/// Holds no COM state; every call joins the MTA for its own duration.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiDeviceHost;

impl WasapiDeviceHost {
    pub fn new() -> Self {
        Self
    }
}

/// Mix shape of one endpoint.
struct MixShape {
    channels: u16,
    sample_rate: f64,
    latencies: (f64, f64),
}

pub(crate) fn enumerator() -> Result<IMMDeviceEnumerator, DeviceError> {
    unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL) }
        .map_err(|e| device_error("creating device enumerator", e))
}

fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ).ok()?;
        let value = store.GetValue(&PKEY_Device_FriendlyName).ok()?;
        let name = value.to_string();
        (!name.is_empty()).then_some(name)
    }
}

fn device_id(device: &IMMDevice) -> Option<String> {
    unsafe {
        let id = device.GetId().ok()?;
        Some(crate::com::take_co_string(id))
    }
}

fn mix_shape(device: &IMMDevice) -> Result<MixShape, windows::core::Error> {
    unsafe {
        let client: IAudioClient = device.Activate(CLSCTX_ALL, None)?;
        let format = client.GetMixFormat()?;
        let channels = (*format).nChannels;
        let sample_rate = (*format).nSamplesPerSec as f64;
        CoTaskMemFree(Some(format as *const _));

        let mut default_period = 0i64;
        let mut min_period = 0i64;
        client.GetDevicePeriod(Some(&mut default_period), Some(&mut min_period))?;
        Ok(MixShape {
            channels,
            sample_rate,
            latencies: (min_period as f64 / HNS_PER_MS, default_period as f64 / HNS_PER_MS),
        })
    }
}

/// The default capture endpoint and its mix shape, when one exists.
fn default_capture(enumerator: &IMMDeviceEnumerator) -> Option<(IMMDevice, MixShape)> {
    let device = unsafe { enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) }.ok()?;
    match mix_shape(&device) {
        Ok(shape) => Some((device, shape)),
        Err(e) => {
            log::debug!("default capture endpoint unusable: {}", e);
            None
        }
    }
}

/// Active render endpoints in enumeration order, paired with their info.
fn render_endpoints(
    enumerator: &IMMDeviceEnumerator,
) -> Result<Vec<(IMMDevice, DeviceInfo)>, DeviceError> {
    let capture = default_capture(enumerator).map(|(_, shape)| shape);
    unsafe {
        let collection = enumerator
            .EnumAudioEndpoints(eRender, DEVICE_STATE_ACTIVE)
            .map_err(|e| device_error("EnumAudioEndpoints", e))?;
        let count = collection.GetCount().map_err(|e| device_error("GetCount", e))?;

        let mut endpoints = Vec::with_capacity(count as usize);
        for index in 0..count {
            let Ok(device) = collection.Item(index) else {
                continue;
            };
            let shape = match mix_shape(&device) {
                Ok(shape) => shape,
                Err(e) => {
                    log::debug!("skipping render endpoint {}: {}", index, e);
                    continue;
                }
            };
            let (low_input_ms, high_input_ms) =
                capture.as_ref().map_or((0.0, 0.0), |c| c.latencies);
            let info = DeviceInfo {
                index,
                name: friendly_name(&device).unwrap_or_else(|| format!("Device {}", index)),
                host_api: HOST_API.to_string(),
                max_input_channels: capture.as_ref().map_or(0, |c| c.channels),
                max_output_channels: shape.channels,
                default_sample_rate: shape.sample_rate,
                latencies: DeviceLatencies {
                    low_input_ms,
                    low_output_ms: shape.latencies.0,
                    high_input_ms,
                    high_output_ms: shape.latencies.1,
                },
            };
            endpoints.push((device, info));
        }
        Ok(endpoints)
    }
}

pub(crate) fn activation_error(context: &str, e: windows::core::Error) -> ActivationError {
    let code = e.code().0;
    let kind = hresult::classify(code);
    log::error!(
        "{} failed (0x{:08X}): {}; {}",
        context,
        code as u32,
        e.message(),
        hresult::hint(kind)
    );
    ActivationError::new(kind, format!("{} failed: {}", context, e.message())).with_code(code)
}

impl DeviceHost for WasapiDeviceHost {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        let _com = ComScope::enter()?;
        let enumerator = enumerator()?;
        Ok(render_endpoints(&enumerator)?.into_iter().map(|(_, info)| info).collect())
    }

    fn device_info(&self, selector: &DeviceSelector) -> Result<Option<DeviceInfo>, DeviceError> {
        let _com = ComScope::enter()?;
        let enumerator = enumerator()?;
        let endpoints = render_endpoints(&enumerator)?;

        if *selector == DeviceSelector::Default {
            let default_id = unsafe { enumerator.GetDefaultAudioEndpoint(eRender, eConsole) }
                .ok()
                .and_then(|d| device_id(&d));
            if let Some(default_id) = default_id {
                let found = endpoints
                    .iter()
                    .find(|(device, _)| device_id(device).as_deref() == Some(default_id.as_str()));
                if let Some((_, info)) = found {
                    return Ok(Some(info.clone()));
                }
            }
        }
        Ok(endpoints.into_iter().map(|(_, info)| info).find(|info| info.matches(selector)))
    }

    fn open_duplex(
        &self,
        params: &DuplexParams,
        processor: DuplexProcessor,
    ) -> Result<Box<dyn DuplexStream>, ActivationError> {
        let backend = |e: DeviceError| {
            let mut err = ActivationError::new(ActivationFailure::Backend, e.message);
            err.diagnostics.code = e.code;
            err
        };
        let _com = ComScope::enter().map_err(backend)?;
        let enumerator = enumerator().map_err(backend)?;

        let render = if params.output_channels > 0 {
            let endpoints = render_endpoints(&enumerator).map_err(backend)?;
            let device = endpoints
                .into_iter()
                .find(|(_, info)| {
                    info.index == params.device.index && info.name == params.device.name
                })
                .map(|(device, _)| device)
                .ok_or_else(|| {
                    ActivationError::new(
                        ActivationFailure::Backend,
                        format!("render endpoint '{}' is no longer present", params.device.name),
                    )
                })?;
            Some(device)
        } else {
            None
        };

        let capture = if params.input_channels > 0 {
            let (device, _) = default_capture(&enumerator).ok_or_else(|| {
                ActivationError::new(ActivationFailure::Backend, "no default capture endpoint")
            })?;
            Some(device)
        } else {
            None
        };

        let stream =
            WasapiDuplexStream::open(render.as_ref(), capture.as_ref(), params, processor)?;
        log::info!(
            "opened WASAPI duplex on '{}': {} in / {} out at {} Hz",
            params.device.name,
            params.input_channels,
            params.output_channels,
            params.sample_rate
        );
        Ok(Box::new(stream))
    }
}
