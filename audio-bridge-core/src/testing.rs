//! In-memory collaborators for unit tests. Nothing here touches hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::audio_models::{DeviceInfo, DeviceLatencies, SessionInfo, WindowInfo};
use crate::models::error::{ActivationError, DeviceError};
use crate::models::format::{FormatDescriptor, SampleEncoding};
use crate::models::state::{SessionState, StreamState};
use crate::session::controller::{BufferPlan, StreamShared};
use crate::session::duplex::DuplexProcessor;
use crate::traits::delegate::{StreamDelegate, StreamEvent};
use crate::traits::device_host::{
    CallbackInfo, DeviceHost, DuplexParams, DuplexStream, InputBlock, StopOutcome,
};
use crate::traits::loopback::{
    CaptureClient, CapturedPacket, LoopbackActivation, LoopbackActivator, SessionProbe,
};
use crate::traits::session_directory::SessionDirectory;

pub(crate) fn f32_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Opened stream state with both rings at `capacity` samples.
pub(crate) fn shared_stream(
    input_channels: u16,
    output_channels: u16,
    capacity: usize,
) -> Arc<StreamShared> {
    let plan = BufferPlan {
        sample_rate: 48000.0,
        period_frames: 32,
        input_channels,
        output_channels,
        playback_capacity: capacity,
        capture_capacity: capacity,
        frame_samples: 64,
    };
    Arc::new(StreamShared::new(Uuid::new_v4(), plan, None))
}

/// Poll `condition` until it holds or `timeout` passes.
pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

// --- Session probe ---

/// Probe whose answer the test sets. Clones share state.
#[derive(Clone)]
pub(crate) struct ScriptedProbe {
    state: Arc<Mutex<Option<SessionState>>>,
}

pub(crate) struct ProbeHandle {
    state: Arc<Mutex<Option<SessionState>>>,
}

impl ScriptedProbe {
    pub(crate) fn new(initial: SessionState) -> (Self, ProbeHandle) {
        let state = Arc::new(Mutex::new(Some(initial)));
        (
            Self {
                state: Arc::clone(&state),
            },
            ProbeHandle { state },
        )
    }
}

impl ProbeHandle {
    pub(crate) fn set(&self, state: SessionState) {
        *self.state.lock() = Some(state);
    }

    /// Make the session unfindable.
    pub(crate) fn lose(&self) {
        *self.state.lock() = None;
    }
}

impl SessionProbe for ScriptedProbe {
    fn state(&mut self) -> Option<SessionState> {
        *self.state.lock()
    }
}

// --- Duplex device host ---

pub(crate) struct MockDeviceHost {
    devices: Vec<DeviceInfo>,
    failure: Option<ActivationError>,
    processor: Arc<Mutex<Option<DuplexProcessor>>>,
    running: Arc<AtomicBool>,
    params: Mutex<Option<DuplexParams>>,
    stop_stall_ms: Arc<AtomicU64>,
}

impl MockDeviceHost {
    pub(crate) fn with_device(max_input_channels: u16, max_output_channels: u16) -> Self {
        Self {
            devices: vec![DeviceInfo {
                index: 0,
                name: "Mock Duplex".into(),
                host_api: "Mock".into(),
                max_input_channels,
                max_output_channels,
                default_sample_rate: 48000.0,
                latencies: DeviceLatencies {
                    low_input_ms: 5.3,
                    low_output_ms: 5.3,
                    high_input_ms: 21.3,
                    high_output_ms: 21.3,
                },
            }],
            failure: None,
            processor: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            params: Mutex::new(None),
            stop_stall_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Make the device thread take `stall` to exit after a stop request.
    pub(crate) fn stall_stop(&self, stall: Duration) {
        self.stop_stall_ms.store(stall.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn failing(mut self, error: ActivationError) -> Self {
        self.failure = Some(error);
        self
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.processor.lock().is_some()
    }

    pub(crate) fn last_params(&self) -> Option<DuplexParams> {
        self.params.lock().clone()
    }

    /// Drive one period as the device thread would. Returns false when the
    /// stream is not running.
    pub(crate) fn tick(&self, input: Option<&[f32]>, output: &mut [f32], frames: usize) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut processor = self.processor.lock();
        let Some(processor) = processor.as_mut() else {
            return false;
        };
        let bytes = input.map(f32_bytes);
        let block = bytes.as_deref().map(|data| InputBlock {
            data,
            encoding: SampleEncoding::IeeeFloat,
            bits_per_sample: 32,
        });
        processor.process(
            block,
            output,
            CallbackInfo {
                frames,
                ..Default::default()
            },
        );
        true
    }
}

impl DeviceHost for MockDeviceHost {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self.devices.clone())
    }

    fn open_duplex(
        &self,
        params: &DuplexParams,
        processor: DuplexProcessor,
    ) -> Result<Box<dyn DuplexStream>, ActivationError> {
        if let Some(ref error) = self.failure {
            return Err(error.clone());
        }
        *self.processor.lock() = Some(processor);
        *self.params.lock() = Some(params.clone());
        Ok(Box::new(MockDuplexStream {
            processor: Arc::clone(&self.processor),
            running: Arc::clone(&self.running),
            latencies: params.device.latencies,
            stop_stall_ms: Arc::clone(&self.stop_stall_ms),
            detached: false,
        }))
    }
}

struct MockDuplexStream {
    processor: Arc<Mutex<Option<DuplexProcessor>>>,
    running: Arc<AtomicBool>,
    latencies: DeviceLatencies,
    stop_stall_ms: Arc<AtomicU64>,
    detached: bool,
}

impl DuplexStream for MockDuplexStream {
    fn start(&mut self) -> Result<(), DeviceError> {
        if self.detached {
            return Err(DeviceError::new("device thread was detached"));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Emulates a device thread that needs the configured stall to exit.
    fn stop(&mut self, timeout: Duration) -> Result<StopOutcome, DeviceError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(StopOutcome::NotRunning);
        }
        let stall = Duration::from_millis(self.stop_stall_ms.load(Ordering::SeqCst));
        let (exit_tx, exit_rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            thread::sleep(stall);
            let _ = exit_tx.send(());
        });
        match exit_rx.recv_timeout(timeout) {
            Ok(()) => Ok(StopOutcome::Joined),
            Err(_) => {
                self.detached = true;
                Ok(StopOutcome::TimedOut)
            }
        }
    }

    fn latencies(&self) -> DeviceLatencies {
        self.latencies
    }
}

impl Drop for MockDuplexStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        *self.processor.lock() = None;
    }
}

// --- Loopback capture ---

pub(crate) struct MockPacket {
    data: Vec<u8>,
    frames: usize,
    silent: bool,
}

impl MockPacket {
    pub(crate) fn float(samples: &[f32], channels: u16) -> Self {
        Self {
            data: f32_bytes(samples),
            frames: samples.len() / channels as usize,
            silent: false,
        }
    }

    /// A device-flagged silent packet whose buffer holds garbage.
    pub(crate) fn silent(frames: usize, channels: u16) -> Self {
        Self {
            data: f32_bytes(&vec![0.9; frames * channels as usize]),
            frames,
            silent: true,
        }
    }
}

/// Test-side remote control for a [`MockCaptureClient`].
#[derive(Clone, Default)]
pub(crate) struct CaptureControl {
    packets: Arc<Mutex<VecDeque<MockPacket>>>,
    started: Arc<AtomicBool>,
    attached: Arc<AtomicBool>,
    fail_start: Arc<AtomicBool>,
    fail_read: Arc<AtomicBool>,
    stall_ms: Arc<AtomicU64>,
    dropped: Arc<AtomicBool>,
}

impl CaptureControl {
    pub(crate) fn push(&self, packet: MockPacket) {
        self.packets.lock().push_back(packet);
    }

    pub(crate) fn pending(&self) -> usize {
        self.packets.lock().len()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_read(&self) {
        self.fail_read.store(true, Ordering::SeqCst);
    }

    /// Make every read block for `stall`.
    pub(crate) fn stall(&self, stall: Duration) {
        self.stall_ms.store(stall.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn client_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

pub(crate) struct MockCaptureClient {
    control: CaptureControl,
}

impl CaptureClient for MockCaptureClient {
    fn attach_thread(&mut self) -> Result<(), DeviceError> {
        self.control.attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn detach_thread(&mut self) {
        self.control.attached.store(false, Ordering::SeqCst);
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.control.fail_start.load(Ordering::SeqCst) {
            return Err(DeviceError::new("mock start failure"));
        }
        self.control.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.control.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read_packet(
        &mut self,
        sink: &mut dyn FnMut(CapturedPacket<'_>),
    ) -> Result<bool, DeviceError> {
        let stall = self.control.stall_ms.load(Ordering::SeqCst);
        if stall > 0 {
            thread::sleep(Duration::from_millis(stall));
        }
        if self.control.fail_read.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::new("mock read failure"));
        }
        let Some(packet) = self.control.packets.lock().pop_front() else {
            return Ok(false);
        };
        sink(CapturedPacket {
            data: &packet.data,
            frames: packet.frames,
            silent: packet.silent,
        });
        Ok(true)
    }
}

impl Drop for MockCaptureClient {
    fn drop(&mut self) {
        self.control.dropped.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct MockActivator {
    control: CaptureControl,
    format: FormatDescriptor,
    probe: Option<ScriptedProbe>,
    failure: Option<ActivationError>,
    activations: AtomicUsize,
}

impl MockActivator {
    pub(crate) fn new(format: FormatDescriptor) -> (Self, CaptureControl) {
        let control = CaptureControl::default();
        (
            Self {
                control: control.clone(),
                format,
                probe: None,
                failure: None,
                activations: AtomicUsize::new(0),
            },
            control,
        )
    }

    pub(crate) fn with_probe(mut self, probe: ScriptedProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub(crate) fn failing(mut self, error: ActivationError) -> Self {
        self.failure = Some(error);
        self
    }

    pub(crate) fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

impl LoopbackActivator for MockActivator {
    fn activate(
        &self,
        _process_id: u32,
        _timeout: Duration,
    ) -> Result<LoopbackActivation, ActivationError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = self.failure {
            return Err(error.clone());
        }
        Ok(LoopbackActivation {
            client: Box::new(MockCaptureClient {
                control: self.control.clone(),
            }),
            format: self.format,
            session: self
                .probe
                .clone()
                .map(|p| Box::new(p) as Box<dyn SessionProbe>),
        })
    }
}

// --- Delegate ---

#[derive(Default)]
pub(crate) struct RecordingDelegate {
    states: Mutex<Vec<StreamState>>,
    events: Mutex<Vec<StreamEvent>>,
}

impl RecordingDelegate {
    pub(crate) fn states(&self) -> Vec<StreamState> {
        self.states.lock().clone()
    }

    pub(crate) fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().clone()
    }
}

impl StreamDelegate for RecordingDelegate {
    fn on_state_changed(&self, _stream_id: Uuid, state: StreamState) {
        self.states.lock().push(state);
    }

    fn on_event(&self, _stream_id: Uuid, event: &StreamEvent) {
        self.events.lock().push(event.clone());
    }
}

// --- Session directory ---

#[derive(Default)]
pub(crate) struct MockSessionDirectory {
    pub sessions: Vec<SessionInfo>,
    pub windows: Vec<WindowInfo>,
}

impl MockSessionDirectory {
    pub(crate) fn session(
        process_id: u32,
        executable_name: &str,
        state: SessionState,
    ) -> SessionInfo {
        SessionInfo {
            process_id,
            display_name: String::new(),
            executable_name: executable_name.to_string(),
            state,
        }
    }

    pub(crate) fn window(
        handle: u64,
        title: &str,
        process_id: u32,
        executable_name: &str,
    ) -> WindowInfo {
        WindowInfo {
            handle,
            title: title.to_string(),
            process_id,
            executable_name: executable_name.to_string(),
        }
    }
}

impl SessionDirectory for MockSessionDirectory {
    fn list_sessions(&self) -> Result<Vec<SessionInfo>, DeviceError> {
        Ok(self.sessions.clone())
    }

    fn list_windows(&self) -> Result<Vec<WindowInfo>, DeviceError> {
        Ok(self.windows.clone())
    }
}
