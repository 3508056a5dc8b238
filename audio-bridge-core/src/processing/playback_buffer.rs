use parking_lot::Mutex;

use super::backpressure::{OverflowPolicy, ReadOutcome, UnderflowPolicy};
use super::ring_buffer::RingBuffer;

/// Playback-direction ring: the control thread writes, the real-time output
/// callback pulls.
///
/// Overflow: reject-new (partial write, prefix of whole frames accepted).
/// Underflow: silence fill. The real-time side never waits for the lock; if
/// the writer holds it, the callback outputs silence for that period.
#[derive(Debug)]
pub struct PlaybackBuffer {
    ring: Mutex<RingBuffer>,
    channels: u16,
}

impl PlaybackBuffer {
    pub fn new(capacity: usize, channels: u16) -> Self {
        Self {
            ring: Mutex::new(RingBuffer::new(capacity)),
            channels,
        }
    }

    /// Append interleaved samples. Returns the number of whole frames stored.
    ///
    /// Never blocks on the real-time side; at most contends with a pull that
    /// is copying one period.
    pub fn write(&self, samples: &[f32]) -> usize {
        let granule = self.channels.max(1) as usize;
        let outcome = self.ring.lock().write(samples, OverflowPolicy::RejectNew, granule);
        if outcome.rejected > 0 {
            log::debug!(
                "playback buffer full: accepted {} of {} samples",
                outcome.accepted,
                samples.len()
            );
        }
        outcome.accepted / granule
    }

    /// Fill `out` with the next buffered samples. Real-time safe: no
    /// allocation, no waiting.
    pub fn pull_into(&self, out: &mut [f32]) -> ReadOutcome {
        match self.ring.try_lock() {
            Some(mut ring) => ring.read_into(out, UnderflowPolicy::FillSilence),
            None => {
                out.fill(0.0);
                ReadOutcome {
                    read: 0,
                    filled: out.len(),
                }
            }
        }
    }

    /// Allocating form of [`pull_into`](Self::pull_into). Returns exactly
    /// `sample_count` samples.
    pub fn pull(&self, sample_count: usize) -> Vec<f32> {
        let mut out = vec![0.0; sample_count];
        self.pull_into(&mut out);
        out
    }

    /// Samples waiting to be played.
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
