use crate::models::audio_models::{SessionInfo, WindowInfo};
use crate::models::error::DeviceError;

/// Enumerates capture targets: audio sessions and the windows that own them.
pub trait SessionDirectory: Send + Sync {
    fn list_sessions(&self) -> Result<Vec<SessionInfo>, DeviceError>;

    fn list_windows(&self) -> Result<Vec<WindowInfo>, DeviceError>;

    /// Sessions whose process also owns a visible window, paired up.
    fn sessions_with_windows(&self) -> Result<Vec<(SessionInfo, WindowInfo)>, DeviceError> {
        let windows = self.list_windows()?;
        let sessions = self.list_sessions()?;
        Ok(sessions
            .into_iter()
            .filter_map(|session| {
                windows
                    .iter()
                    .find(|w| w.process_id == session.process_id)
                    .map(|w| (session, w.clone()))
            })
            .collect())
    }
}
