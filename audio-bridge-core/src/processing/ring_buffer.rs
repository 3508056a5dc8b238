use super::backpressure::{plan_write, OverflowPolicy, ReadOutcome, UnderflowPolicy, WriteOutcome};

/// Fixed-capacity circular buffer of `f32` samples.
///
/// Cursors are monotonic sample counts; the storage index is the cursor
/// modulo capacity. Invariant: `write_cursor - read_cursor <= capacity`.
///
/// Not synchronized itself. Each direction wraps it in a
/// `parking_lot::Mutex` and the real-time side only ever `try_lock`s.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Vec<f32>,
    write_cursor: u64,
    read_cursor: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            write_cursor: 0,
            read_cursor: 0,
        }
    }

    /// Write samples under `policy`, storing only whole `granule`-sized
    /// frames when rejecting.
    pub fn write(
        &mut self,
        samples: &[f32],
        policy: OverflowPolicy,
        granule: usize,
    ) -> WriteOutcome {
        let plan = plan_write(policy, self.capacity(), self.count(), samples.len(), granule);
        if plan.accepted == 0 {
            return plan;
        }

        self.read_cursor += plan.evicted as u64;

        // DropOldest keeps the newest tail; RejectNew keeps the prefix.
        let stored = match policy {
            OverflowPolicy::DropOldest => &samples[samples.len() - plan.accepted..],
            OverflowPolicy::RejectNew => &samples[..plan.accepted],
        };
        self.copy_in(stored);
        self.write_cursor += stored.len() as u64;
        plan
    }

    /// Fill `out` from the buffer, applying `policy` to any shortfall.
    pub fn read_into(&mut self, out: &mut [f32], policy: UnderflowPolicy) -> ReadOutcome {
        let read = out.len().min(self.count());
        self.copy_out(&mut out[..read]);
        self.read_cursor += read as u64;

        let filled = out.len() - read;
        match policy {
            UnderflowPolicy::FillSilence => out[read..].fill(0.0),
        }
        ReadOutcome { read, filled }
    }

    /// Move every buffered sample to the end of `out` and empty the buffer.
    pub fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
        let count = self.count();
        let start = out.len();
        out.resize(start + count, 0.0);
        self.copy_out(&mut out[start..]);
        self.read_cursor = self.write_cursor;
        count
    }

    /// Number of samples currently available for reading.
    pub fn count(&self) -> usize {
        (self.write_cursor - self.read_cursor) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The total capacity of the buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Reset the buffer to empty state, keeping its storage.
    pub fn reset(&mut self) {
        self.write_cursor = 0;
        self.read_cursor = 0;
    }

    /// Drop the storage entirely. The buffer behaves as zero-capacity after.
    pub fn release(&mut self) {
        self.buffer = Vec::new();
        self.reset();
    }

    fn index(&self, cursor: u64) -> usize {
        (cursor % self.buffer.len() as u64) as usize
    }

    fn copy_in(&mut self, samples: &[f32]) {
        let start = self.index(self.write_cursor);
        let first = samples.len().min(self.buffer.len() - start);
        self.buffer[start..start + first].copy_from_slice(&samples[..first]);
        self.buffer[..samples.len() - first].copy_from_slice(&samples[first..]);
    }

    fn copy_out(&self, out: &mut [f32]) {
        if out.is_empty() {
            return;
        }
        let start = self.index(self.read_cursor);
        let first = out.len().min(self.buffer.len() - start);
        out[..first].copy_from_slice(&self.buffer[start..start + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.buffer[..rest]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(buf: &mut RingBuffer, count: usize) -> Vec<f32> {
        let mut out = vec![0.0; count];
        buf.read_into(&mut out, UnderflowPolicy::FillSilence);
        out
    }

    #[test]
    fn basic_write_read() {
        let mut buf = RingBuffer::new(10);
        buf.write(&[1.0, 2.0, 3.0], OverflowPolicy::RejectNew, 1);

        assert_eq!(buf.count(), 3);
        assert_eq!(read(&mut buf, 3), vec![1.0, 2.0, 3.0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn read_past_end_fills_silence() {
        let mut buf = RingBuffer::new(10);
        buf.write(&[1.0, 2.0, 3.0, 4.0, 5.0], OverflowPolicy::RejectNew, 1);

        assert_eq!(read(&mut buf, 3), vec![1.0, 2.0, 3.0]);
        let mut out = vec![9.0; 4];
        let outcome = buf.read_into(&mut out, UnderflowPolicy::FillSilence);
        assert_eq!(out, vec![4.0, 5.0, 0.0, 0.0]);
        assert_eq!(outcome, ReadOutcome { read: 2, filled: 2 });
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut buf = RingBuffer::new(4);
        buf.write(&[1.0, 2.0, 3.0, 4.0], OverflowPolicy::DropOldest, 1);
        let outcome = buf.write(&[5.0, 6.0], OverflowPolicy::DropOldest, 1);

        assert_eq!(outcome.evicted, 2);
        assert_eq!(buf.count(), 4);
        assert_eq!(read(&mut buf, 4), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn overflow_rejects_new() {
        let mut buf = RingBuffer::new(4);
        buf.write(&[1.0, 2.0, 3.0], OverflowPolicy::RejectNew, 1);
        let outcome = buf.write(&[4.0, 5.0, 6.0], OverflowPolicy::RejectNew, 1);

        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.rejected, 2);
        assert_eq!(read(&mut buf, 4), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn write_larger_than_capacity() {
        let mut buf = RingBuffer::new(3);
        buf.write(&[1.0, 2.0, 3.0, 4.0, 5.0], OverflowPolicy::DropOldest, 1); // only last 3 kept

        assert_eq!(buf.count(), 3);
        assert_eq!(read(&mut buf, 3), vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn wraparound() {
        let mut buf = RingBuffer::new(4);

        buf.write(&[1.0, 2.0, 3.0], OverflowPolicy::DropOldest, 1);
        read(&mut buf, 2); // discard 1.0, 2.0

        buf.write(&[4.0, 5.0, 6.0], OverflowPolicy::DropOldest, 1); // wraps around

        assert_eq!(buf.count(), 4);
        assert_eq!(read(&mut buf, 4), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn drain_across_wrap() {
        let mut buf = RingBuffer::new(5);
        buf.write(&[1.0, 2.0, 3.0, 4.0], OverflowPolicy::DropOldest, 1);
        read(&mut buf, 3);
        buf.write(&[5.0, 6.0, 7.0], OverflowPolicy::DropOldest, 1);

        let mut out = vec![0.5];
        assert_eq!(buf.drain_into(&mut out), 4);
        assert_eq!(out, vec![0.5, 4.0, 5.0, 6.0, 7.0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn reset_and_release() {
        let mut buf = RingBuffer::new(10);
        buf.write(&[1.0, 2.0, 3.0], OverflowPolicy::DropOldest, 1);
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 10);

        buf.release();
        assert_eq!(buf.capacity(), 0);
        let outcome = buf.write(&[1.0], OverflowPolicy::DropOldest, 1);
        assert_eq!(outcome.accepted, 0);
        assert_eq!(read(&mut buf, 2), vec![0.0, 0.0]);
    }

    #[test]
    fn empty_operations() {
        let mut buf = RingBuffer::new(10);

        assert!(buf.is_empty());
        assert_eq!(read(&mut buf, 5), vec![0.0; 5]);

        buf.write(&[], OverflowPolicy::DropOldest, 1);
        assert!(buf.is_empty());
    }
}
