//! Byte staging between capture packets and render periods.
//!
//! Capture packets and render periods rarely line up, so captured bytes are
//! collected here and handed to the processor one render period at a time.
//! Sized once at open; when full, the oldest bytes are dropped.

pub(crate) struct InputStaging {
    bytes: Vec<u8>,
    len: usize,
    block: Vec<u8>,
    frame_bytes: usize,
}

impl InputStaging {
    pub(crate) fn new(frame_bytes: usize, capacity_frames: usize) -> Self {
        let capacity = frame_bytes * capacity_frames;
        Self {
            bytes: vec![0; capacity],
            len: 0,
            block: vec![0; capacity],
            frame_bytes,
        }
    }

    pub(crate) fn buffered_frames(&self) -> usize {
        if self.frame_bytes == 0 {
            return 0;
        }
        self.len / self.frame_bytes
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    /// Append captured bytes, or `silent_frames` of silence when `data` is
    /// `None`.
    pub(crate) fn push(&mut self, data: Option<&[u8]>, silent_frames: usize) {
        let incoming = data.map_or(silent_frames * self.frame_bytes, <[u8]>::len);
        let capacity = self.bytes.len();
        if incoming >= capacity {
            match data {
                Some(data) => self.bytes.copy_from_slice(&data[incoming - capacity..]),
                None => self.bytes.fill(0),
            }
            self.len = capacity;
            return;
        }

        let overflow = (self.len + incoming).saturating_sub(capacity);
        if overflow > 0 {
            self.bytes.copy_within(overflow..self.len, 0);
            self.len -= overflow;
        }
        let dst = &mut self.bytes[self.len..self.len + incoming];
        match data {
            Some(data) => dst.copy_from_slice(data),
            None => dst.fill(0),
        }
        self.len += incoming;
    }

    /// Take exactly `frames` frames, zero-padded when short. The flag is
    /// true when padding was needed.
    pub(crate) fn take(&mut self, frames: usize) -> (&[u8], bool) {
        let wanted = (frames * self.frame_bytes).min(self.block.len());
        let available = wanted.min(self.len);

        self.block[..available].copy_from_slice(&self.bytes[..available]);
        self.block[available..wanted].fill(0);
        self.bytes.copy_within(available..self.len, 0);
        self.len -= available;

        (&self.block[..wanted], available < wanted)
    }
}
