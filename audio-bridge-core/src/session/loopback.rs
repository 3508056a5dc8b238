use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use crate::models::config::StreamConfig;
use crate::models::error::{BridgeError, DeviceError};
use crate::models::format::FormatDescriptor;
use crate::processing::format_normalizer::{peak_level, FormatNormalizer, NormalizeStatus};
use crate::session::controller::StreamShared;
use crate::session::monitor::CaptureSessionMonitor;
use crate::traits::delegate::StreamEvent;
use crate::traits::device_host::StopOutcome;
use crate::traits::loopback::{CaptureClient, CapturedPacket, LoopbackActivation};

const PEAK_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Decodes packets and routes them to the stream.
struct PacketSink {
    shared: Arc<StreamShared>,
    format: FormatDescriptor,
    normalizer: FormatNormalizer,
    scratch: Vec<f32>,
    peak: f32,
    last_peak_log: Instant,
}

/// Samples per decoded block: 100 ms, the buffer length capture clients are
/// initialized with, so a packet normally fits in one block.
pub(crate) fn block_samples(format: &FormatDescriptor) -> usize {
    ((format.sample_rate / 10.0) as usize).max(1) * format.channels as usize
}

impl PacketSink {
    /// Decode and deliver one packet in scratch-sized blocks. Never allocates.
    fn handle(&mut self, packet: CapturedPacket<'_>) {
        let channels = self.format.channels as usize;
        let block_align = self.format.block_align();
        let block_frames = (self.scratch.len() / channels.max(1)).max(1);

        let mut format_error = None;
        let mut offset = 0;
        while offset < packet.frames {
            let frames = (packet.frames - offset).min(block_frames);
            let block = &mut self.scratch[..frames * channels];

            if packet.silent {
                block.fill(0.0);
            } else {
                let start = (offset * block_align).min(packet.data.len());
                let end = ((offset + frames) * block_align).min(packet.data.len());
                let status = self.normalizer.normalize_into(
                    &packet.data[start..end],
                    self.format.encoding,
                    self.format.bits_per_sample,
                    block,
                );
                if let NormalizeStatus::Silenced { error, first } = status {
                    format_error = Some((error, first || format_error.is_some_and(|(_, f)| f)));
                }
            }

            self.peak = self.peak.max(peak_level(block));
            self.shared.deliver(block, self.format.channels);
            offset += frames;
        }

        if let Some((error, first)) = format_error {
            self.shared.stats.record_format_error();
            if first {
                self.shared.notify(StreamEvent::FormatUnsupported(error));
            }
        }
        self.shared.stats.record_callback();

        if self.last_peak_log.elapsed() >= PEAK_LOG_INTERVAL {
            log::debug!("loopback peak level: {:.3}", self.peak);
            self.peak = 0.0;
            self.last_peak_log = Instant::now();
        }
    }
}

/// Everything the capture thread owns. Moves onto the thread at start and
/// back to the control thread when the thread exits.
pub(crate) struct CaptureLoop {
    client: Box<dyn CaptureClient>,
    sink: PacketSink,
    monitor: CaptureSessionMonitor,
    poll_interval: Duration,
}

impl CaptureLoop {
    fn new(
        activation: LoopbackActivation,
        shared: Arc<StreamShared>,
        config: &StreamConfig,
    ) -> Self {
        let LoopbackActivation {
            client,
            format,
            session,
        } = activation;
        let scratch = vec![0.0; block_samples(&format)];
        Self {
            client,
            sink: PacketSink {
                shared,
                format,
                normalizer: FormatNormalizer::new(),
                scratch,
                peak: 0.0,
                last_peak_log: Instant::now(),
            },
            monitor: CaptureSessionMonitor::new(session, config.session_poll_interval()),
            poll_interval: config.packet_poll_interval(),
        }
    }

    /// Thread-side setup. On error the client is left stopped and detached.
    fn begin(&mut self) -> Result<(), DeviceError> {
        self.client.attach_thread()?;
        if let Err(e) = self.client.start() {
            self.client.detach_thread();
            return Err(e);
        }

        let format = &self.sink.format;
        log::debug!(
            "loopback capture format: {:?} {}-bit, {} ch, {} Hz, block align {}",
            format.encoding,
            format.bits_per_sample,
            format.channels,
            format.sample_rate,
            format.block_align()
        );
        if let Some(state) = self.monitor.prime(Instant::now()) {
            log::debug!("target session is {}", state);
        }
        Ok(())
    }

    /// Drain pending packets, poll the session, sleep; until `stop` is set
    /// or the client fails. The flag is checked at every packet boundary.
    fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Acquire) {
            loop {
                let sink = &mut self.sink;
                let read = self.client.read_packet(&mut |packet| sink.handle(packet));
                match read {
                    Ok(true) if stop.load(Ordering::Acquire) => return,
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        log::error!("loopback capture failed: {}", e);
                        self.sink.shared.notify(StreamEvent::CaptureFailed(e.to_string()));
                        return;
                    }
                }
            }

            if let Some(transition) = self.monitor.poll(Instant::now()) {
                match transition.from {
                    Some(from) => log::info!("target session {} -> {}", from, transition.to),
                    None => log::info!("target session is {}", transition.to),
                }
                if !transition.to.contributes_audio() {
                    log::info!("target session expired; decoding continues until stopped");
                }
                self.sink.shared.notify(StreamEvent::SessionChanged(transition));
            }

            thread::sleep(self.poll_interval);
        }
    }

    fn finish(&mut self) {
        if let Err(e) = self.client.stop() {
            log::warn!("loopback client stop failed: {}", e);
        }
        self.client.detach_thread();
    }
}

struct RunningCapture {
    stop: Arc<AtomicBool>,
    exit_rx: Receiver<CaptureLoop>,
    handle: thread::JoinHandle<()>,
}

/// Owns the loopback capture thread across start/stop cycles.
pub(crate) struct LoopbackEngine {
    idle: Option<CaptureLoop>,
    running: Option<RunningCapture>,
    start_timeout: Duration,
}

impl LoopbackEngine {
    pub(crate) fn new(
        activation: LoopbackActivation,
        shared: Arc<StreamShared>,
        config: &StreamConfig,
    ) -> Self {
        Self {
            idle: Some(CaptureLoop::new(activation, shared, config)),
            running: None,
            start_timeout: config.activation_timeout(),
        }
    }

    /// Spawn the capture thread and wait for it to start the client.
    pub(crate) fn start(&mut self) -> Result<(), BridgeError> {
        if self.running.is_some() {
            return Ok(());
        }
        let mut capture = self.idle.take().ok_or_else(|| {
            BridgeError::Thread("capture client is still held by a detached capture thread".into())
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);
        let (exit_tx, exit_rx) = bounded::<CaptureLoop>(1);
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("audio-bridge-capture".into())
            .spawn(move || {
                if let Err(e) = capture.begin() {
                    let _ = ready_tx.send(Err(e));
                    let _ = exit_tx.send(capture);
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                capture.run(&thread_stop);
                capture.finish();
                let _ = exit_tx.send(capture);
            })
            .map_err(|e| BridgeError::Thread(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(self.start_timeout) {
            Ok(Ok(())) => {
                self.running = Some(RunningCapture { stop, exit_rx, handle });
                Ok(())
            }
            Ok(Err(e)) => {
                self.reclaim(exit_rx, handle, self.start_timeout);
                Err(BridgeError::Thread(format!("capture client failed to start: {}", e)))
            }
            Err(_) => {
                stop.store(true, Ordering::Release);
                self.reclaim(exit_rx, handle, self.start_timeout);
                Err(BridgeError::Thread(format!(
                    "capture thread did not start within {:?}",
                    self.start_timeout
                )))
            }
        }
    }

    /// Signal the capture thread and wait up to `timeout` for it to return
    /// the client.
    pub(crate) fn stop(&mut self, timeout: Duration) -> StopOutcome {
        let Some(running) = self.running.take() else {
            return StopOutcome::NotRunning;
        };
        running.stop.store(true, Ordering::Release);
        if self.reclaim(running.exit_rx, running.handle, timeout) {
            StopOutcome::Joined
        } else {
            StopOutcome::TimedOut
        }
    }

    /// Returns false when the thread had to be detached.
    fn reclaim(
        &mut self,
        exit_rx: Receiver<CaptureLoop>,
        handle: thread::JoinHandle<()>,
        timeout: Duration,
    ) -> bool {
        match exit_rx.recv_timeout(timeout) {
            Ok(capture) => {
                if handle.join().is_err() {
                    log::error!("capture thread panicked after returning its client");
                }
                self.idle = Some(capture);
                true
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                log::error!("capture thread exited without returning its client");
                true
            }
            // Dropping the handle detaches the thread; it releases the
            // client itself once it observes the stop flag.
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

impl Drop for LoopbackEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.stop.store(true, Ordering::Release);
        }
    }
}
