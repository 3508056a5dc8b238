//! Host facts attached to activation errors.
//!
//! Process loopback needs Windows 10 1803 (build 17134). The OS version is
//! read through `RtlGetVersion`, which is not subject to the manifest-based
//! version lie of `GetVersionEx`.

use audio_bridge_core::OsVersion;

/// First build that ships `VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK`.
pub const PROCESS_LOOPBACK_MIN_BUILD: u32 = 17134;

pub fn supports_process_loopback(version: OsVersion) -> bool {
    version.major > 10 || (version.major == 10 && version.build >= PROCESS_LOOPBACK_MIN_BUILD)
}

#[cfg(target_os = "windows")]
pub use platform::*;

#[cfg(target_os = "windows")]
mod platform {
    use std::ffi::c_void;

    use windows::Wdk::System::SystemServices::RtlGetVersion;
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows::Win32::System::SystemInformation::OSVERSIONINFOW;
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    use audio_bridge_core::{ActivationDiagnostics, OsVersion, PrivilegeLevel};

    /// Whether the current process token is elevated.
    pub fn privilege_level() -> PrivilegeLevel {
        unsafe {
            let mut token = HANDLE::default();
            if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
                return PrivilegeLevel::Unknown;
            }
            let mut elevation = TOKEN_ELEVATION::default();
            let mut returned = 0u32;
            let queried = GetTokenInformation(
                token,
                TokenElevation,
                Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
                std::mem::size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            );
            let _ = CloseHandle(token);

            match queried {
                Ok(()) if elevation.TokenIsElevated != 0 => PrivilegeLevel::Elevated,
                Ok(()) => PrivilegeLevel::Standard,
                Err(e) => {
                    log::debug!("token elevation query failed: {}", e);
                    PrivilegeLevel::Unknown
                }
            }
        }
    }

    pub fn os_version() -> Option<OsVersion> {
        let mut info = OSVERSIONINFOW {
            dwOSVersionInfoSize: std::mem::size_of::<OSVERSIONINFOW>() as u32,
            ..Default::default()
        };
        let status = unsafe { RtlGetVersion(&mut info) };
        if status.is_err() {
            return None;
        }
        Some(OsVersion {
            major: info.dwMajorVersion,
            minor: info.dwMinorVersion,
            build: info.dwBuildNumber,
        })
    }

    /// Snapshot for an activation attempt.
    pub fn collect() -> ActivationDiagnostics {
        ActivationDiagnostics {
            privilege: privilege_level(),
            os_version: os_version(),
            ..ActivationDiagnostics::default()
        }
    }
}
