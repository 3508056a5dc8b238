use parking_lot::Mutex;

use super::backpressure::{OverflowPolicy, WriteOutcome};
use super::ring_buffer::RingBuffer;

/// What happened to one real-time push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Stored(WriteOutcome),
    /// The consumer held the lock mid-drain; the packet was dropped.
    Contended { dropped: usize },
}

impl PushOutcome {
    pub fn overflowed(&self) -> bool {
        match self {
            Self::Stored(outcome) => outcome.overflowed(),
            Self::Contended { dropped } => *dropped > 0,
        }
    }
}

/// Capture-direction ring: the real-time input callback pushes, the
/// application drains.
///
/// Overflow: drop-oldest. The producer is never blocked or refused because
/// of a full buffer.
#[derive(Debug)]
pub struct CaptureBuffer {
    ring: Mutex<RingBuffer>,
}

impl CaptureBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    /// Push samples from the real-time thread. No allocation, no waiting.
    pub fn push(&self, samples: &[f32]) -> PushOutcome {
        if samples.is_empty() {
            return PushOutcome::Stored(WriteOutcome::default());
        }
        match self.ring.try_lock() {
            Some(mut ring) => {
                PushOutcome::Stored(ring.write(samples, OverflowPolicy::DropOldest, 1))
            }
            None => PushOutcome::Contended { dropped: samples.len() },
        }
    }

    /// Take every buffered sample, leaving the buffer empty.
    pub fn drain(&self) -> Vec<f32> {
        // Size the result before taking the lock so the real-time side is
        // not held out while we allocate.
        let hint = self.ring.lock().count();
        let mut out = Vec::with_capacity(hint);
        self.ring.lock().drain_into(&mut out);
        out
    }

    pub fn buffered(&self) -> usize {
        self.ring.lock().count()
    }

    pub(crate) fn release(&self) {
        self.ring.lock().release();
    }

    #[cfg(test)]
    pub(crate) fn hold_lock(&self) -> parking_lot::MutexGuard<'_, RingBuffer> {
        self.ring.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain() {
        let buf = CaptureBuffer::new(8);
        buf.push(&[1.0, 2.0]);
        buf.push(&[3.0]);

        assert_eq!(buf.drain(), vec![1.0, 2.0, 3.0]);
        assert_eq!(buf.buffered(), 0);
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn overflow_keeps_most_recent_tail() {
        let buf = CaptureBuffer::new(4);
        buf.push(&[1.0, 2.0, 3.0]);
        let outcome = buf.push(&[4.0, 5.0, 6.0]);

        assert!(outcome.overflowed());
        assert_eq!(buf.buffered(), 4);
        assert_eq!(buf.drain(), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn sustained_overflow_stays_at_capacity() {
        let buf = CaptureBuffer::new(100);
        for block in 0..50 {
            let samples: Vec<f32> = (0..7).map(|i| (block * 7 + i) as f32).collect();
            buf.push(&samples);
            assert!(buf.buffered() <= 100);
        }
        let drained = buf.drain();
        assert_eq!(drained.len(), 100);
        assert_eq!(*drained.last().unwrap(), 349.0);
        assert_eq!(drained[0], 250.0);
    }

    #[test]
    fn contended_push_drops_packet() {
        let buf = CaptureBuffer::new(8);
        let guard = buf.hold_lock();
        let outcome = buf.push(&[1.0, 2.0]);
        drop(guard);

        assert_eq!(outcome, PushOutcome::Contended { dropped: 2 });
        assert!(outcome.overflowed());
        assert_eq!(buf.buffered(), 0);
    }
}
