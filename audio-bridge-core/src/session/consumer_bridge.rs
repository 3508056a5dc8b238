use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::models::audio_models::AudioFrame;
use crate::models::error::BridgeError;
use crate::session::stats::StatsCollector;

/// Callback invoked with each delivered frame.
///
/// Runs on the bridge's dispatcher thread, never on the real-time thread.
pub type FrameSubscriber = Arc<dyn Fn(&AudioFrame) + Send + Sync + 'static>;

/// Frames in circulation: one with the subscriber, one pending, one being
/// filled by the producer.
const POOL_SIZE: usize = 3;

/// Result of handing one block to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Queued for the subscriber.
    Queued,
    /// Queued, and an undelivered older frame was discarded for it.
    Replaced,
    /// No frame was available or the dispatcher is gone.
    Dropped,
}

struct Dispatcher {
    shutdown_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Latest-wins hand-off from the real-time thread to an application
/// subscriber.
///
/// At most one frame is pending. When the subscriber falls behind, the
/// pending frame is recycled and replaced by the newest one. Frames come from
/// a fixed pool so `publish` does not allocate once frames have grown to the
/// block size.
pub struct ConsumerBridge {
    frame_tx: Sender<AudioFrame>,
    frame_rx: Receiver<AudioFrame>,
    recycle_tx: Sender<AudioFrame>,
    recycle_rx: Receiver<AudioFrame>,
    subscriber: Arc<Mutex<Option<FrameSubscriber>>>,
    attached: AtomicBool,
    sequence: AtomicU64,
    stats: Arc<StatsCollector>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl ConsumerBridge {
    /// `frame_samples` sizes the pooled frames up front.
    pub fn new(stats: Arc<StatsCollector>, frame_samples: usize) -> Self {
        let (frame_tx, frame_rx) = bounded(1);
        let (recycle_tx, recycle_rx) = bounded(POOL_SIZE);
        for _ in 0..POOL_SIZE {
            let _ = recycle_tx.try_send(AudioFrame::with_capacity(frame_samples));
        }
        Self {
            frame_tx,
            frame_rx,
            recycle_tx,
            recycle_rx,
            subscriber: Arc::new(Mutex::new(None)),
            attached: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            stats,
            dispatcher: Mutex::new(None),
        }
    }

    /// Whether captured audio should be routed here instead of buffered.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Install `subscriber`, replacing any previous one, and start the
    /// dispatcher thread if it is not running.
    pub fn subscribe(&self, subscriber: FrameSubscriber) -> Result<(), BridgeError> {
        *self.subscriber.lock() = Some(subscriber);

        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_none() {
            *dispatcher = Some(self.spawn_dispatcher()?);
        }
        self.attached.store(true, Ordering::Release);
        Ok(())
    }

    /// Hand a block to the subscriber. Real-time safe: never blocks.
    pub fn publish(&self, samples: &[f32], sample_rate: f64, channels: u16) -> PublishOutcome {
        let mut replaced = false;
        let mut frame = match self.recycle_rx.try_recv() {
            Ok(frame) => frame,
            // Pool exhausted: take back the pending frame.
            Err(_) => match self.frame_rx.try_recv() {
                Ok(frame) => {
                    replaced = true;
                    frame
                }
                Err(_) => return PublishOutcome::Dropped,
            },
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        frame.fill_from(samples, sample_rate, channels, sequence);

        let outcome = match self.frame_tx.try_send(frame) {
            Ok(()) => PublishOutcome::Queued,
            Err(TrySendError::Full(frame)) => {
                if let Ok(stale) = self.frame_rx.try_recv() {
                    replaced = true;
                    let _ = self.recycle_tx.try_send(stale);
                }
                match self.frame_tx.try_send(frame) {
                    Ok(()) => PublishOutcome::Queued,
                    Err(err) => {
                        let _ = self.recycle_tx.try_send(err.into_inner());
                        PublishOutcome::Dropped
                    }
                }
            }
            Err(TrySendError::Disconnected(frame)) => {
                let _ = self.recycle_tx.try_send(frame);
                PublishOutcome::Dropped
            }
        };

        match outcome {
            PublishOutcome::Queued if replaced => {
                self.stats.record_frame_replaced();
                PublishOutcome::Replaced
            }
            other => other,
        }
    }

    /// Stop the dispatcher and detach the subscriber. Idempotent.
    pub fn shutdown(&self) {
        self.attached.store(false, Ordering::Release);
        let dispatcher = self.dispatcher.lock().take();
        if let Some(Dispatcher { shutdown_tx, handle }) = dispatcher {
            drop(shutdown_tx);
            if handle.join().is_err() {
                log::error!("consumer bridge dispatcher panicked");
            }
        }
        *self.subscriber.lock() = None;
    }

    fn spawn_dispatcher(&self) -> Result<Dispatcher, BridgeError> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let frame_rx = self.frame_rx.clone();
        let recycle_tx = self.recycle_tx.clone();
        let subscriber = Arc::clone(&self.subscriber);
        let stats = Arc::clone(&self.stats);

        let handle = thread::Builder::new()
            .name("audio-bridge-dispatch".into())
            .spawn(move || loop {
                select! {
                    recv(frame_rx) -> frame => {
                        let Ok(frame) = frame else { break };
                        let current = subscriber.lock().clone();
                        if let Some(callback) = current {
                            callback(&frame);
                            stats.record_frame_delivered();
                        }
                        let _ = recycle_tx.try_send(frame);
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            })
            .map_err(|e| BridgeError::Thread(format!("consumer bridge dispatcher: {}", e)))?;

        Ok(Dispatcher { shutdown_tx, handle })
    }
}

impl Drop for ConsumerBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::unbounded;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn delivers_frames_to_subscriber() {
        let stats = Arc::new(StatsCollector::new());
        let bridge = ConsumerBridge::new(Arc::clone(&stats), 8);
        let (tx, rx) = unbounded();
        bridge
            .subscribe(Arc::new(move |frame: &AudioFrame| {
                let _ = tx.send(frame.clone());
            }))
            .unwrap();
        assert!(bridge.is_attached());

        assert_eq!(bridge.publish(&[0.1, 0.2, 0.3, 0.4], 48000.0, 2), PublishOutcome::Queued);
        let frame = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(frame.samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frame.frame_count, 2);
        assert_eq!(frame.sequence, 0);

        bridge.shutdown();
        assert_eq!(stats.snapshot().frames_delivered, 1);
    }

    #[test]
    fn slow_subscriber_sees_latest_frame() {
        let stats = Arc::new(StatsCollector::new());
        let bridge = ConsumerBridge::new(Arc::clone(&stats), 4);
        let (seen_tx, seen_rx) = unbounded();
        let (gate_tx, gate_rx) = unbounded::<()>();
        bridge
            .subscribe(Arc::new(move |frame: &AudioFrame| {
                let _ = seen_tx.send(frame.sequence);
                let _ = gate_rx.recv_timeout(WAIT);
            }))
            .unwrap();

        bridge.publish(&[0.0], 48000.0, 1);
        // Dispatcher is now parked inside the callback.
        assert_eq!(seen_rx.recv_timeout(WAIT).unwrap(), 0);

        assert_eq!(bridge.publish(&[1.0], 48000.0, 1), PublishOutcome::Queued);
        for value in 2..=5 {
            assert_eq!(
                bridge.publish(&[value as f32], 48000.0, 1),
                PublishOutcome::Replaced
            );
        }

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        assert_eq!(seen_rx.recv_timeout(WAIT).unwrap(), 5);

        bridge.shutdown();
        assert_eq!(stats.snapshot().frames_replaced, 4);
    }

    #[test]
    fn resubscribe_replaces_subscriber() {
        let bridge = ConsumerBridge::new(Arc::new(StatsCollector::new()), 4);
        let (first_tx, first_rx) = unbounded();
        let (second_tx, second_rx) = unbounded();

        bridge
            .subscribe(Arc::new(move |frame: &AudioFrame| {
                let _ = first_tx.send(frame.sequence);
            }))
            .unwrap();
        bridge.publish(&[0.5], 48000.0, 1);
        assert_eq!(first_rx.recv_timeout(WAIT).unwrap(), 0);

        bridge
            .subscribe(Arc::new(move |frame: &AudioFrame| {
                let _ = second_tx.send(frame.sequence);
            }))
            .unwrap();
        bridge.publish(&[0.5], 48000.0, 1);
        assert_eq!(second_rx.recv_timeout(WAIT).unwrap(), 1);
        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let bridge = ConsumerBridge::new(Arc::new(StatsCollector::new()), 4);
        bridge.subscribe(Arc::new(|_: &AudioFrame| {})).unwrap();
        bridge.shutdown();
        bridge.shutdown();
        assert!(!bridge.is_attached());
    }
}
