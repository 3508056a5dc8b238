use std::time::Duration;

use uuid::Uuid;

use crate::models::error::FormatError;
use crate::models::state::StreamState;
use crate::session::monitor::SessionTransition;

/// Observability events raised by a stream. None of these are errors for the
/// caller; the stream keeps running.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// First undecodable block of this stream; later blocks are only counted.
    FormatUnsupported(FormatError),
    SessionChanged(SessionTransition),
    /// The capture thread did not acknowledge stop in time and was detached.
    StopTimedOut { waited: Duration },
    /// The capture thread ended on a backend error.
    CaptureFailed(String),
}

/// Event delegate for stream notifications.
///
/// Called from the control thread for state changes and from the capture
/// thread for loopback events. Implementations should marshal to their own
/// thread if needed and must not block.
pub trait StreamDelegate: Send + Sync {
    fn on_state_changed(&self, stream_id: Uuid, state: StreamState);

    fn on_event(&self, stream_id: Uuid, event: &StreamEvent) {
        let _ = (stream_id, event);
    }
}
