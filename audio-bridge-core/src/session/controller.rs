use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::audio_models::{AudioFrame, DeviceLatencies};
use crate::models::config::{StreamConfig, StreamMode};
use crate::models::error::{ActivationError, ActivationFailure, BridgeError, ConfigError};
use crate::models::state::StreamState;
use crate::processing::capture_buffer::CaptureBuffer;
use crate::processing::interleave;
use crate::processing::playback_buffer::PlaybackBuffer;
use crate::session::consumer_bridge::ConsumerBridge;
use crate::session::duplex::DuplexProcessor;
use crate::session::loopback::{self, LoopbackEngine};
use crate::session::stats::{StatsCollector, StatsSnapshot};
use crate::traits::delegate::{StreamDelegate, StreamEvent};
use crate::traits::device_host::{DeviceHost, DuplexParams, DuplexStream, StopOutcome};
use crate::traits::loopback::LoopbackActivator;

/// Ring sizes and stream shape fixed at open.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BufferPlan {
    pub sample_rate: f64,
    /// Frames per real-time callback (duplex) or per decode block (loopback).
    pub period_frames: u32,
    pub input_channels: u16,
    pub output_channels: u16,
    pub playback_capacity: usize,
    pub capture_capacity: usize,
    /// Expected samples per delivered block, used to presize pooled frames.
    pub frame_samples: usize,
}

/// State shared between the control thread, the real-time side and every
/// [`StreamHandle`] clone.
pub(crate) struct StreamShared {
    pub id: Uuid,
    pub sample_rate: f64,
    pub period_frames: u32,
    pub input_channels: u16,
    pub output_channels: u16,
    pub playback: PlaybackBuffer,
    pub capture: CaptureBuffer,
    pub bridge: ConsumerBridge,
    pub stats: Arc<StatsCollector>,
    state: Mutex<StreamState>,
    delegate: Option<Arc<dyn StreamDelegate>>,
}

impl StreamShared {
    pub(crate) fn new(
        id: Uuid,
        plan: BufferPlan,
        delegate: Option<Arc<dyn StreamDelegate>>,
    ) -> Self {
        let stats = Arc::new(StatsCollector::new());
        Self {
            id,
            sample_rate: plan.sample_rate,
            period_frames: plan.period_frames,
            input_channels: plan.input_channels,
            output_channels: plan.output_channels,
            playback: PlaybackBuffer::new(plan.playback_capacity, plan.output_channels),
            capture: CaptureBuffer::new(plan.capture_capacity),
            bridge: ConsumerBridge::new(Arc::clone(&stats), plan.frame_samples),
            stats,
            state: Mutex::new(StreamState::Opened),
            delegate,
        }
    }

    /// Route one decoded block: to the subscriber when one is attached,
    /// otherwise into the capture ring for polling.
    pub(crate) fn deliver(&self, samples: &[f32], channels: u16) {
        if channels == 0 || samples.is_empty() {
            return;
        }
        if self.bridge.is_attached() {
            self.bridge.publish(samples, self.sample_rate, channels);
        } else if self.capture.push(samples).overflowed() {
            self.stats.record_capture_overflow();
        }
        self.stats
            .record_frames_captured((samples.len() / channels as usize) as u64);
    }

    pub(crate) fn notify(&self, event: StreamEvent) {
        if let Some(ref delegate) = self.delegate {
            delegate.on_event(self.id, &event);
        }
    }

    fn state(&self) -> StreamState {
        *self.state.lock()
    }
}

/// Cheap, cloneable access to an opened stream's data path.
///
/// Lifecycle stays with the [`StreamController`]; a handle outliving a closed
/// stream reads as closed: `write` accepts nothing and `drain_buffered`
/// returns nothing.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<StreamShared>,
    latencies: DeviceLatencies,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}

impl StreamHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state().is_running()
    }

    pub fn sample_rate(&self) -> f64 {
        self.shared.sample_rate
    }

    /// Frames per device callback. For loopback, frames per decode block.
    pub fn period_frames(&self) -> u32 {
        self.shared.period_frames
    }

    /// Latencies negotiated with the device. Zero for loopback streams.
    pub fn latencies(&self) -> DeviceLatencies {
        self.latencies
    }

    /// Channels delivered to subscribers and `drain_buffered`.
    pub fn input_channels(&self) -> u16 {
        self.shared.input_channels
    }

    /// Channels expected by `write`.
    pub fn output_channels(&self) -> u16 {
        self.shared.output_channels
    }

    /// Queue audio for playback, one array per output channel.
    ///
    /// Returns the number of frames accepted; fewer than offered when the
    /// playback ring is full (partial write, not an error).
    pub fn write<C: AsRef<[f32]>>(&self, channels: &[C]) -> Result<usize, BridgeError> {
        if self.shared.state().is_closed() {
            return Ok(0);
        }
        if channels.len() != self.shared.output_channels as usize {
            return Err(ConfigError::ChannelCountMismatch {
                expected: self.shared.output_channels,
                actual: channels.len(),
            }
            .into());
        }
        let interleaved = interleave::interleave(channels)?;
        Ok(self.shared.playback.write(&interleaved))
    }

    /// Stream captured frames to `subscriber` on the bridge's dispatcher
    /// thread. Replaces any previous subscriber and switches capture from
    /// polling to streaming.
    pub fn subscribe<F>(&self, subscriber: F) -> Result<(), BridgeError>
    where
        F: Fn(&AudioFrame) + Send + Sync + 'static,
    {
        let state = self.shared.state();
        if state.is_closed() {
            return Err(BridgeError::invalid_state("subscribe", state));
        }
        self.shared.bridge.subscribe(Arc::new(subscriber))
    }

    /// Take every captured sample buffered since the last drain.
    pub fn drain_buffered(&self) -> Vec<f32> {
        if self.shared.state().is_closed() {
            return Vec::new();
        }
        self.shared.capture.drain()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

enum Backend {
    Device(Arc<dyn DeviceHost>),
    Loopback(Arc<dyn LoopbackActivator>),
}

enum Engine {
    Duplex(Box<dyn DuplexStream>),
    Loopback(LoopbackEngine),
}

/// Lifecycle owner of one stream.
///
/// ```text
/// open → Opened → start → Running → stop → Opened
/// close from any state → Closed (terminal)
/// ```
///
/// One controller drives one stream; it cannot be reopened after close.
/// Dropping the controller closes the stream.
pub struct StreamController {
    backend: Backend,
    delegate: Option<Arc<dyn StreamDelegate>>,
    id: Uuid,
    state: StreamState,
    config: Option<StreamConfig>,
    stream: Option<StreamHandle>,
    engine: Option<Engine>,
}

impl StreamController {
    /// Controller for duplex device streams.
    pub fn with_device_host(host: Arc<dyn DeviceHost>) -> Self {
        Self::new(Backend::Device(host))
    }

    /// Controller for process-loopback capture.
    pub fn with_loopback(activator: Arc<dyn LoopbackActivator>) -> Self {
        Self::new(Backend::Loopback(activator))
    }

    fn new(backend: Backend) -> Self {
        Self {
            backend,
            delegate: None,
            id: Uuid::new_v4(),
            state: StreamState::Idle,
            config: None,
            stream: None,
            engine: None,
        }
    }

    /// Install the delegate. Takes effect for streams opened afterwards.
    pub fn set_delegate(&mut self, delegate: Arc<dyn StreamDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn handle(&self) -> Option<StreamHandle> {
        self.stream.clone()
    }

    /// Idle → Opened. On failure the controller stays Idle.
    pub fn open(&mut self, config: StreamConfig) -> Result<StreamHandle, BridgeError> {
        if self.state != StreamState::Idle {
            return Err(BridgeError::invalid_state("open", self.state));
        }
        config.validate()?;

        let (shared, engine) = match (&self.backend, config.mode) {
            (Backend::Device(host), StreamMode::Duplex) => {
                self.open_duplex(host.as_ref(), &config)?
            }
            (Backend::Loopback(activator), StreamMode::Loopback { process_id }) => {
                self.open_loopback(activator.as_ref(), process_id, &config)?
            }
            (Backend::Device(_), StreamMode::Loopback { .. }) => {
                return Err(
                    ConfigError::ModeMismatch("loopback stream on a device host".into()).into(),
                )
            }
            (Backend::Loopback(_), StreamMode::Duplex) => {
                return Err(
                    ConfigError::ModeMismatch("duplex stream on a loopback activator".into())
                        .into(),
                )
            }
        };

        let latencies = match &engine {
            Engine::Duplex(stream) => stream.latencies(),
            Engine::Loopback(_) => DeviceLatencies::default(),
        };
        let handle = StreamHandle { shared, latencies };
        self.stream = Some(handle.clone());
        self.engine = Some(engine);
        self.config = Some(config);
        self.set_state(StreamState::Opened);
        Ok(handle)
    }

    /// Opened → Running. Idempotent while Running.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        match self.state {
            StreamState::Running => return Ok(()),
            StreamState::Opened => {}
            state => return Err(BridgeError::invalid_state("start", state)),
        }

        match self.engine.as_mut() {
            Some(Engine::Duplex(stream)) => stream
                .start()
                .map_err(|e| BridgeError::Thread(e.to_string()))?,
            Some(Engine::Loopback(engine)) => engine.start()?,
            None => return Err(BridgeError::invalid_state("start", self.state)),
        }

        log::info!("stream {} started", self.id);
        self.set_state(StreamState::Running);
        Ok(())
    }

    /// Running → Stopping → Opened. A no-op in every other state.
    ///
    /// Waits at most the configured stop timeout for the real-time thread;
    /// past that the thread is detached and keeps its device or client until
    /// it notices the stop flag. A detached stream cannot be started again.
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        if self.state != StreamState::Running {
            return Ok(());
        }
        self.set_state(StreamState::Stopping);

        let timeout = self.config.as_ref().map(StreamConfig::stop_timeout).unwrap_or_default();
        let outcome = match self.engine.as_mut() {
            Some(Engine::Duplex(stream)) => match stream.stop(timeout) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!("stream {}: device stop failed: {}", self.id, e);
                    StopOutcome::Joined
                }
            },
            Some(Engine::Loopback(engine)) => engine.stop(timeout),
            None => StopOutcome::NotRunning,
        };
        if outcome == StopOutcome::TimedOut {
            log::warn!(
                "stream {}: real-time thread did not exit within {:?}, detached",
                self.id,
                timeout
            );
            self.notify(StreamEvent::StopTimedOut { waited: timeout });
        }

        log::info!("stream {} stopped", self.id);
        self.set_state(StreamState::Opened);
        Ok(())
    }

    /// Any state → Closed. Idempotent and irreversible; cleanup is
    /// best-effort and never fails.
    pub fn close(&mut self) -> Result<(), BridgeError> {
        if self.state.is_closed() {
            return Ok(());
        }
        if let Err(e) = self.stop() {
            log::warn!("stream {}: stop during close failed: {}", self.id, e);
        }

        // Dropping the engine releases the device stream or capture client.
        self.engine = None;
        if let Some(ref stream) = self.stream {
            stream.shared.bridge.shutdown();
            stream.shared.playback.release();
            stream.shared.capture.release();
        }

        log::info!("stream {} closed", self.id);
        self.set_state(StreamState::Closed);
        Ok(())
    }

    fn open_duplex(
        &self,
        host: &dyn DeviceHost,
        config: &StreamConfig,
    ) -> Result<(Arc<StreamShared>, Engine), BridgeError> {
        let device = host
            .device_info(&config.device)
            .map_err(|e| ConfigError::UnknownDevice(format!("{}: {}", config.device, e)))?
            .ok_or_else(|| ConfigError::UnknownDevice(config.device.to_string()))?;

        let input_channels = clamp_channels(
            "input",
            config.input_channels,
            device.max_input_channels,
            &device.name,
        );
        let output_channels = clamp_channels(
            "output",
            config.output_channels,
            device.max_output_channels,
            &device.name,
        );
        if input_channels == 0 && output_channels == 0 {
            return Err(ConfigError::NoChannels.into());
        }

        let plan = BufferPlan {
            sample_rate: config.sample_rate,
            period_frames: config.period_frames,
            input_channels,
            output_channels,
            playback_capacity: config.ring_capacity(output_channels)?,
            capture_capacity: config.ring_capacity(input_channels)?,
            // Matches the processor's headroom for oversized periods.
            frame_samples: config.period_frames as usize * 2 * input_channels as usize,
        };
        let shared = Arc::new(StreamShared::new(self.id, plan, self.delegate.clone()));

        let params = DuplexParams {
            device,
            sample_rate: config.sample_rate,
            period_frames: config.period_frames,
            input_channels,
            output_channels,
        };
        let processor = DuplexProcessor::new(Arc::clone(&shared), config.period_frames);
        let stream = host.open_duplex(&params, processor)?;

        let latencies = stream.latencies();
        log::info!(
            "stream {} opened on '{}': {} Hz, {} frames/period, {} in / {} out, \
             latency {:.1}/{:.1} ms",
            self.id,
            params.device.name,
            params.sample_rate,
            params.period_frames,
            input_channels,
            output_channels,
            latencies.low_input_ms,
            latencies.low_output_ms
        );
        Ok((shared, Engine::Duplex(stream)))
    }

    fn open_loopback(
        &self,
        activator: &dyn LoopbackActivator,
        process_id: u32,
        config: &StreamConfig,
    ) -> Result<(Arc<StreamShared>, Engine), BridgeError> {
        let activation = activator.activate(process_id, config.activation_timeout())?;
        let format = activation.format;
        if format.channels == 0 || !(format.sample_rate > 0.0) {
            return Err(ActivationError::new(
                ActivationFailure::UnsupportedFormat,
                format!(
                    "capture format has {} channels at {} Hz",
                    format.channels, format.sample_rate
                ),
            )
            .into());
        }

        let plan = BufferPlan {
            sample_rate: format.sample_rate,
            period_frames: (loopback::block_samples(&format) / format.channels as usize) as u32,
            input_channels: format.channels,
            output_channels: 0,
            playback_capacity: 0,
            capture_capacity: config.loopback_buffer_samples,
            frame_samples: loopback::block_samples(&format),
        };
        let shared = Arc::new(StreamShared::new(self.id, plan, self.delegate.clone()));
        let engine = LoopbackEngine::new(activation, Arc::clone(&shared), config);

        log::info!(
            "stream {} opened loopback capture of pid {}: {} Hz, {} ch, {:?} {}-bit",
            self.id,
            process_id,
            format.sample_rate,
            format.channels,
            format.encoding,
            format.bits_per_sample
        );
        Ok((shared, Engine::Loopback(engine)))
    }

    fn set_state(&mut self, new_state: StreamState) {
        self.state = new_state;
        if let Some(ref stream) = self.stream {
            *stream.shared.state.lock() = new_state;
        }
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(self.id, new_state);
        }
    }

    fn notify(&self, event: StreamEvent) {
        if let Some(ref delegate) = self.delegate {
            delegate.on_event(self.id, &event);
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn clamp_channels(direction: &str, requested: u16, available: u16, device: &str) -> u16 {
    if requested > available {
        log::warn!(
            "requested {} {} channels but '{}' has {}; clamping",
            requested,
            direction,
            device,
            available
        );
        available
    } else {
        requested
    }
}
