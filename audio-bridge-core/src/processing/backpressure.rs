/// What a ring buffer does when a write does not fit.
///
/// The two directions resolve overflow differently on purpose:
/// - capture keeps up with hardware timing, so the newest audio wins and
///   the oldest buffered samples are evicted;
/// - playback keeps what the application already queued, so excess input is
///   rejected and the caller learns how much was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverflowPolicy {
    DropOldest,
    RejectNew,
}

/// What a ring buffer does when a read asks for more than is buffered.
///
/// Only silence fill exists: the real-time consumer always receives the
/// full block it asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnderflowPolicy {
    #[default]
    FillSilence,
}

/// Outcome of one write under an [`OverflowPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    /// Samples stored from this write.
    pub accepted: usize,
    /// Previously buffered samples discarded to make room.
    pub evicted: usize,
    /// Samples from this write that were not stored.
    pub rejected: usize,
}

impl WriteOutcome {
    pub fn overflowed(&self) -> bool {
        self.evicted > 0 || self.rejected > 0
    }
}

/// Outcome of one read under an [`UnderflowPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOutcome {
    /// Samples copied from the buffer.
    pub read: usize,
    /// Samples synthesized as silence.
    pub filled: usize,
}

impl ReadOutcome {
    pub fn underflowed(&self) -> bool {
        self.filled > 0
    }
}

/// Decide how many of `incoming` samples to store and how many buffered
/// samples to evict, given `occupied` of `capacity` slots in use.
///
/// `granule` restricts accepted counts to whole frames for `RejectNew`.
pub fn plan_write(
    policy: OverflowPolicy,
    capacity: usize,
    occupied: usize,
    incoming: usize,
    granule: usize,
) -> WriteOutcome {
    let free = capacity.saturating_sub(occupied);
    match policy {
        OverflowPolicy::RejectNew => {
            let granule = granule.max(1);
            let accepted = incoming.min(free) / granule * granule;
            WriteOutcome {
                accepted,
                evicted: 0,
                rejected: incoming - accepted,
            }
        }
        OverflowPolicy::DropOldest => {
            let accepted = incoming.min(capacity);
            let evicted = accepted.saturating_sub(free);
            WriteOutcome {
                accepted,
                evicted,
                rejected: incoming - accepted,
            }
        }
    }
}
