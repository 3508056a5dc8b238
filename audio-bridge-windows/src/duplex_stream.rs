//! Shared-mode WASAPI duplex stream.
//!
//! Render and capture clients are initialized for 32-bit float at the
//! stream's channel counts and rate; the engine converts to its mix format
//! (`AUTOCONVERTPCM`). One client is event driven and paces the real-time
//! thread: render when the stream has outputs, capture otherwise. The other
//! is polled on each wake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Media::Audio::{
    IAudioCaptureClient, IAudioClient, IAudioRenderClient, IMMDevice, AUDCLNT_BUFFERFLAGS_SILENT,
    AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM, AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
    AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
};
use windows::Win32::System::Com::CLSCTX_ALL;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

use audio_bridge_core::{
    ActivationError, ActivationFailure, CallbackInfo, DeviceError, DeviceLatencies, DuplexParams,
    DuplexProcessor, DuplexStream, InputBlock, SampleEncoding, StopOutcome,
};

use crate::com::{device_error, ComScope, MmcssRegistration, MtaUsage};
use crate::device_host::activation_error;
use crate::staging::InputStaging;
use crate::wave_format::float_format;

const HNS_PER_SECOND: f64 = 10_000_000.0;
const WAKE_TIMEOUT_MS: u32 = 200;
const START_TIMEOUT: Duration = Duration::from_secs(2);
const BYTES_PER_SAMPLE: usize = 4;

struct RenderEndpoint {
    client: IAudioClient,
    render: IAudioRenderClient,
    buffer_frames: u32,
}

struct CaptureEndpoint {
    client: IAudioClient,
    capture: IAudioCaptureClient,
}

struct WakeEvent(HANDLE);

impl Drop for WakeEvent {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.0) };
    }
}

/// Everything the real-time thread owns. Moves onto the thread at start and
/// back when it is joined.
struct DuplexLoop {
    render: Option<RenderEndpoint>,
    capture: Option<CaptureEndpoint>,
    wake: WakeEvent,
    staging: InputStaging,
    processor: DuplexProcessor,
    period_frames: usize,
    _mta: MtaUsage,
}

// SAFETY: the clients are created in the MTA, which `_mta` keeps alive, and
// are only touched by one thread at a time: the control thread at open, the
// real-time thread between start and stop.
unsafe impl Send for DuplexLoop {}

fn buffer_duration(frames: u32, sample_rate: f64) -> i64 {
    (frames as f64 * HNS_PER_SECOND / sample_rate).round() as i64
}

unsafe fn init_client(
    device: &IMMDevice,
    channels: u16,
    params: &DuplexParams,
    event_driven: bool,
) -> Result<IAudioClient, ActivationError> {
    let client: IAudioClient = device
        .Activate(CLSCTX_ALL, None)
        .map_err(|e| activation_error("IMMDevice::Activate", e))?;
    let format = float_format(channels, params.sample_rate.round() as u32);
    let mut flags = AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY;
    if event_driven {
        flags |= AUDCLNT_STREAMFLAGS_EVENTCALLBACK;
    }
    client
        .Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            flags,
            buffer_duration(params.period_frames * 2, params.sample_rate),
            0,
            &format,
            None,
        )
        .map_err(|e| activation_error("IAudioClient::Initialize", e))?;
    Ok(client)
}

fn latency_ms(client: &IAudioClient) -> f64 {
    unsafe { client.GetStreamLatency() }.map_or(0.0, |hns| hns as f64 / 10_000.0)
}

impl DuplexLoop {
    fn start_clients(&mut self) -> Result<(), DeviceError> {
        unsafe {
            if let Some(render) = &self.render {
                // Prime with one buffer of silence so the first period does
                // not glitch.
                let frames = render.buffer_frames;
                render.render.GetBuffer(frames).map_err(|e| device_error("GetBuffer", e))?;
                render
                    .render
                    .ReleaseBuffer(frames, AUDCLNT_BUFFERFLAGS_SILENT.0 as u32)
                    .map_err(|e| device_error("ReleaseBuffer", e))?;
                render.client.Start().map_err(|e| device_error("render Start", e))?;
            }
            if let Some(capture) = &self.capture {
                if let Err(e) = capture.client.Start() {
                    if let Some(render) = &self.render {
                        let _ = render.client.Stop();
                    }
                    return Err(device_error("capture Start", e));
                }
            }
        }
        Ok(())
    }

    fn stop_clients(&mut self) {
        unsafe {
            if let Some(render) = &self.render {
                if let Err(e) = render.client.Stop() {
                    log::warn!("render client stop failed: {}", e);
                }
                let _ = render.client.Reset();
            }
            if let Some(capture) = &self.capture {
                if let Err(e) = capture.client.Stop() {
                    log::warn!("capture client stop failed: {}", e);
                }
                let _ = capture.client.Reset();
            }
        }
        self.staging.clear();
    }

    /// Move every pending capture packet into staging.
    unsafe fn collect_input(&mut self) -> Result<(), windows::core::Error> {
        let Some(capture) = &self.capture else {
            return Ok(());
        };
        while capture.capture.GetNextPacketSize()? > 0 {
            let mut data: *mut u8 = std::ptr::null_mut();
            let mut frames = 0u32;
            let mut flags = 0u32;
            capture.capture.GetBuffer(&mut data, &mut frames, &mut flags, None, None)?;

            let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;
            if silent || data.is_null() {
                self.staging.push(None, frames as usize);
            } else {
                let len =
                    frames as usize * self.processor.input_channels() as usize * BYTES_PER_SAMPLE;
                self.staging.push(Some(std::slice::from_raw_parts(data, len)), 0);
            }
            capture.capture.ReleaseBuffer(frames)?;
        }
        Ok(())
    }

    fn process(&mut self, frames: usize, output: &mut [f32]) {
        let has_input = self.capture.is_some();
        let (data, input_underflow) = if has_input {
            self.staging.take(frames)
        } else {
            (&[][..], false)
        };
        let input = has_input.then_some(InputBlock {
            data,
            encoding: SampleEncoding::IeeeFloat,
            bits_per_sample: 32,
        });
        self.processor.process(
            input,
            output,
            CallbackInfo {
                frames,
                input_underflow,
                output_underflow: false,
                cpu_load: 0.0,
            },
        );
    }

    /// One wake of a render-paced stream.
    unsafe fn render_period(&mut self) -> Result<(), windows::core::Error> {
        self.collect_input()?;
        let Some(render) = &self.render else {
            return Ok(());
        };
        let padding = render.client.GetCurrentPadding()?;
        let frames =
            (render.buffer_frames.saturating_sub(padding) as usize).min(self.period_frames * 2);
        if frames == 0 {
            return Ok(());
        }
        let channels = self.processor.output_channels() as usize;
        let data = render.render.GetBuffer(frames as u32)?;
        let output = std::slice::from_raw_parts_mut(data as *mut f32, frames * channels);
        let render_client = render.render.clone();
        self.process(frames, output);
        render_client.ReleaseBuffer(frames as u32, 0)
    }

    /// One wake of a capture-only stream.
    unsafe fn capture_period(&mut self) -> Result<(), windows::core::Error> {
        self.collect_input()?;
        let frames = self.staging.buffered_frames();
        if frames > 0 {
            self.process(frames.min(self.period_frames * 2), &mut []);
        }
        Ok(())
    }

    fn run(&mut self, stop: &AtomicBool) {
        let render_paced = self.render.is_some();
        while !stop.load(Ordering::Acquire) {
            let woke = unsafe { WaitForSingleObject(self.wake.0, WAKE_TIMEOUT_MS) };
            if woke != WAIT_OBJECT_0 {
                continue;
            }
            let result = unsafe {
                if render_paced {
                    self.render_period()
                } else {
                    self.capture_period()
                }
            };
            if let Err(e) = result {
                log::error!("WASAPI duplex loop failed: {}", e);
                return;
            }
        }
    }
}

struct RunningDuplex {
    stop: Arc<AtomicBool>,
    exit_rx: Receiver<DuplexLoop>,
    handle: thread::JoinHandle<()>,
}

/// Duplex stream on one render endpoint and the default capture endpoint.
pub struct WasapiDuplexStream {
    idle: Option<DuplexLoop>,
    running: Option<RunningDuplex>,
    latencies: DeviceLatencies,
}

impl WasapiDuplexStream {
    pub(crate) fn open(
        render_device: Option<&IMMDevice>,
        capture_device: Option<&IMMDevice>,
        params: &DuplexParams,
        processor: DuplexProcessor,
    ) -> Result<Self, ActivationError> {
        let mta = MtaUsage::acquire()
            .map_err(|e| ActivationError::new(ActivationFailure::Backend, e.message))?;
        let wake = unsafe { CreateEventW(None, false, false, None) }
            .map(WakeEvent)
            .map_err(|e| activation_error("CreateEventW", e))?;

        let mut latencies = DeviceLatencies::default();
        unsafe {
            let render = match render_device {
                Some(device) => {
                    let client = init_client(device, params.output_channels, params, true)?;
                    client
                        .SetEventHandle(wake.0)
                        .map_err(|e| activation_error("SetEventHandle", e))?;
                    let buffer_frames = client
                        .GetBufferSize()
                        .map_err(|e| activation_error("GetBufferSize", e))?;
                    let render: IAudioRenderClient = client
                        .GetService()
                        .map_err(|e| activation_error("GetService(render)", e))?;
                    latencies.low_output_ms = latency_ms(&client);
                    latencies.high_output_ms = latencies.low_output_ms;
                    Some(RenderEndpoint {
                        client,
                        render,
                        buffer_frames,
                    })
                }
                None => None,
            };

            let capture = match capture_device {
                Some(device) => {
                    let event_driven = render.is_none();
                    let client = init_client(device, params.input_channels, params, event_driven)?;
                    if event_driven {
                        client
                            .SetEventHandle(wake.0)
                            .map_err(|e| activation_error("SetEventHandle", e))?;
                    }
                    let capture: IAudioCaptureClient = client
                        .GetService()
                        .map_err(|e| activation_error("GetService(capture)", e))?;
                    latencies.low_input_ms = latency_ms(&client);
                    latencies.high_input_ms = latencies.low_input_ms;
                    Some(CaptureEndpoint { client, capture })
                }
                None => None,
            };

            let frame_bytes = params.input_channels as usize * BYTES_PER_SAMPLE;
            let capacity_frames = render.as_ref().map_or(params.period_frames as usize * 4, |r| {
                (r.buffer_frames as usize).max(params.period_frames as usize) * 2
            });

            Ok(Self {
                idle: Some(DuplexLoop {
                    render,
                    capture,
                    wake,
                    staging: InputStaging::new(frame_bytes, capacity_frames),
                    processor,
                    period_frames: params.period_frames as usize,
                    _mta: mta,
                }),
                running: None,
                latencies,
            })
        }
    }
}

impl DuplexStream for WasapiDuplexStream {
    fn start(&mut self) -> Result<(), DeviceError> {
        if self.running.is_some() {
            return Ok(());
        }
        let mut duplex = self
            .idle
            .take()
            .ok_or_else(|| DeviceError::new("clients are still held by a detached duplex thread"))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let (exit_tx, exit_rx) = bounded::<DuplexLoop>(1);

        let handle = thread::Builder::new()
            .name("audio-bridge-wasapi".into())
            .spawn(move || {
                let _com = match ComScope::enter() {
                    Ok(scope) => scope,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        let _ = exit_tx.send(duplex);
                        return;
                    }
                };
                let _mmcss = MmcssRegistration::pro_audio();
                if let Err(e) = duplex.start_clients() {
                    let _ = ready_tx.send(Err(e));
                    let _ = exit_tx.send(duplex);
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                duplex.run(&thread_stop);
                duplex.stop_clients();
                let _ = exit_tx.send(duplex);
            })
            .map_err(|e| DeviceError::new(format!("failed to spawn duplex thread: {}", e)))?;

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                self.running = Some(RunningDuplex { stop, exit_rx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                self.reclaim(exit_rx, handle, START_TIMEOUT);
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::Release);
                self.reclaim(exit_rx, handle, START_TIMEOUT);
                Err(DeviceError::new("duplex thread did not start in time"))
            }
        }
    }

    fn stop(&mut self, timeout: Duration) -> Result<StopOutcome, DeviceError> {
        let Some(running) = self.running.take() else {
            return Ok(StopOutcome::NotRunning);
        };
        running.stop.store(true, Ordering::Release);
        if !self.reclaim(running.exit_rx, running.handle, timeout) {
            return Ok(StopOutcome::TimedOut);
        }
        if self.idle.is_none() {
            return Err(DeviceError::new("duplex thread exited without its clients"));
        }
        Ok(StopOutcome::Joined)
    }

    fn latencies(&self) -> DeviceLatencies {
        self.latencies
    }
}

impl WasapiDuplexStream {
    /// Returns false when the thread had to be detached.
    fn reclaim(
        &mut self,
        exit_rx: Receiver<DuplexLoop>,
        handle: thread::JoinHandle<()>,
        timeout: Duration,
    ) -> bool {
        match exit_rx.recv_timeout(timeout) {
            Ok(duplex) => {
                let _ = handle.join();
                self.idle = Some(duplex);
                true
            }
            Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("WASAPI duplex thread panicked");
                }
                true
            }
            // The detached thread stops and releases the clients once it
            // sees the stop flag.
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

impl Drop for WasapiDuplexStream {
    fn drop(&mut self) {
        if let Err(e) = DuplexStream::stop(self, START_TIMEOUT) {
            log::warn!("closing WASAPI duplex stream: {}", e);
        }
    }
}
