use std::time::Duration;

use crate::models::error::{ActivationError, DeviceError};
use crate::models::format::FormatDescriptor;
use crate::models::state::SessionState;

/// One packet read from a capture client. Borrowed from the backend's
/// buffer for the duration of the sink call only.
#[derive(Debug, Clone, Copy)]
pub struct CapturedPacket<'a> {
    pub data: &'a [u8],
    pub frames: usize,
    /// The device flagged this packet as silence; `data` must be ignored.
    pub silent: bool,
}

/// Packet source behind an activated loopback capture.
///
/// Owned by the capture thread while running and handed back to the
/// control thread when the thread exits.
pub trait CaptureClient: Send {
    /// Called first on the capture thread (per-thread runtime setup).
    fn attach_thread(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Called last on the capture thread.
    fn detach_thread(&mut self) {}

    fn start(&mut self) -> Result<(), DeviceError>;

    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Read at most one pending packet into `sink`. Returns `Ok(false)` when
    /// nothing is pending.
    fn read_packet(
        &mut self,
        sink: &mut dyn FnMut(CapturedPacket<'_>),
    ) -> Result<bool, DeviceError>;
}

/// Reads the activity state of the capture target's audio session.
pub trait SessionProbe: Send {
    /// `None` when the session cannot currently be found.
    fn state(&mut self) -> Option<SessionState>;
}

/// Everything an activated loopback capture owns.
pub struct LoopbackActivation {
    pub client: Box<dyn CaptureClient>,
    pub format: FormatDescriptor,
    pub session: Option<Box<dyn SessionProbe>>,
}

impl std::fmt::Debug for LoopbackActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackActivation")
            .field("format", &self.format)
            .field("session", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

/// Activates process-scoped loopback capture.
///
/// Implemented by:
/// - `ProcessLoopbackActivator` (Windows)
pub trait LoopbackActivator: Send + Sync {
    /// Activate capture of `process_id`'s audio, waiting at most `timeout`
    /// for the subsystem to complete activation.
    fn activate(
        &self,
        process_id: u32,
        timeout: Duration,
    ) -> Result<LoopbackActivation, ActivationError>;
}
