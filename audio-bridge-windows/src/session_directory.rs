//! Audio sessions on the default render endpoint and the top-level windows
//! that own them.

use windows::core::{Interface, BOOL};
use windows::Win32::Foundation::{HWND, LPARAM};
use windows::Win32::Media::Audio::{
    eConsole, eRender, AudioSessionState, AudioSessionStateActive, AudioSessionStateExpired,
    AudioSessionStateInactive, IAudioSessionControl2, IAudioSessionManager2, IMMDeviceEnumerator,
};
use windows::Win32::System::Com::CLSCTX_ALL;
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowTextW, GetWindowThreadProcessId, IsWindowVisible,
};

use audio_bridge_core::{
    DeviceError, SessionDirectory, SessionInfo, SessionProbe, SessionState, WindowInfo,
};

use crate::com::{device_error, process_image_name, take_co_string, ComScope};
use crate::device_host::enumerator;

fn session_state(state: AudioSessionState) -> Option<SessionState> {
    match state {
        s if s == AudioSessionStateActive => Some(SessionState::Active),
        s if s == AudioSessionStateInactive => Some(SessionState::Inactive),
        s if s == AudioSessionStateExpired => Some(SessionState::Expired),
        _ => None,
    }
}

/// Session controls on the default render endpoint, skipping the system
/// mixer session (pid 0).
fn session_controls(
    enumerator: &IMMDeviceEnumerator,
) -> Result<Vec<(u32, IAudioSessionControl2)>, DeviceError> {
    unsafe {
        let device = enumerator
            .GetDefaultAudioEndpoint(eRender, eConsole)
            .map_err(|e| device_error("GetDefaultAudioEndpoint", e))?;
        let manager: IAudioSessionManager2 = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| device_error("activating session manager", e))?;
        let sessions = manager
            .GetSessionEnumerator()
            .map_err(|e| device_error("GetSessionEnumerator", e))?;
        let count = sessions.GetCount().map_err(|e| device_error("GetCount", e))?;

        let mut controls = Vec::new();
        for index in 0..count {
            let Ok(control) = sessions.GetSession(index) else {
                continue;
            };
            let Ok(control) = control.cast::<IAudioSessionControl2>() else {
                continue;
            };
            match control.GetProcessId() {
                Ok(0) | Err(_) => continue,
                Ok(pid) => controls.push((pid, control)),
            }
        }
        Ok(controls)
    }
}

/// Enumerates capture targets through WASAPI and Win32.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasapiSessionDirectory;

impl WasapiSessionDirectory {
    pub fn new() -> Self {
        Self
    }
}

impl SessionDirectory for WasapiSessionDirectory {
    fn list_sessions(&self) -> Result<Vec<SessionInfo>, DeviceError> {
        let _com = ComScope::enter()?;
        let enumerator = enumerator()?;

        let mut infos = Vec::new();
        for (process_id, control) in session_controls(&enumerator)? {
            // Sessions of processes we cannot open are not capturable either.
            let Some(executable_name) = process_image_name(process_id) else {
                continue;
            };
            let (display_name, state) = unsafe {
                let display_name = control
                    .GetDisplayName()
                    .map(|n| take_co_string(n))
                    .unwrap_or_default();
                let state = control.GetState().ok().and_then(session_state);
                (display_name, state)
            };
            let Some(state) = state else {
                continue;
            };
            infos.push(SessionInfo {
                process_id,
                display_name,
                executable_name,
                state,
            });
        }
        Ok(infos)
    }

    fn list_windows(&self) -> Result<Vec<WindowInfo>, DeviceError> {
        let mut windows: Vec<WindowInfo> = Vec::new();
        unsafe {
            EnumWindows(Some(collect_window), LPARAM(&mut windows as *mut Vec<WindowInfo> as isize))
                .map_err(|e| device_error("EnumWindows", e))?;
        }
        Ok(windows)
    }
}

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);
    if !IsWindowVisible(hwnd).as_bool() {
        return true.into();
    }

    let mut title = [0u16; 256];
    let len = GetWindowTextW(hwnd, &mut title);
    if len <= 0 {
        return true.into();
    }

    let mut process_id = 0u32;
    GetWindowThreadProcessId(hwnd, Some(&mut process_id));
    windows.push(WindowInfo {
        handle: hwnd.0 as usize as u64,
        title: String::from_utf16_lossy(&title[..len as usize]),
        process_id,
        executable_name: process_image_name(process_id).unwrap_or_default(),
    });
    true.into()
}

/// Polls the state of one process's session on the default render endpoint.
///
/// The control is looked up again whenever it is missing, so a session that
/// appears after activation is picked up on a later poll.
pub struct TargetSessionProbe {
    process_id: u32,
    control: Option<IAudioSessionControl2>,
}

// SAFETY: the control is created in the MTA and only used by the thread that
// currently owns the probe; the capture thread joins the MTA before polling.
unsafe impl Send for TargetSessionProbe {}

impl TargetSessionProbe {
    pub(crate) fn new(process_id: u32) -> Self {
        let mut probe = Self {
            process_id,
            control: None,
        };
        probe.resolve();
        probe
    }

    fn resolve(&mut self) {
        let found = enumerator()
            .and_then(|enumerator| session_controls(&enumerator))
            .map(|controls| controls.into_iter().find(|(pid, _)| *pid == self.process_id));
        match found {
            Ok(found) => self.control = found.map(|(_, control)| control),
            Err(e) => log::debug!("session lookup for pid {} failed: {}", self.process_id, e),
        }
    }
}

impl SessionProbe for TargetSessionProbe {
    fn state(&mut self) -> Option<SessionState> {
        if self.control.is_none() {
            self.resolve();
        }
        let state = unsafe { self.control.as_ref()?.GetState() };
        match state {
            Ok(state) => session_state(state),
            Err(_) => {
                // Stale control; look it up again next poll.
                self.control = None;
                None
            }
        }
    }
}
