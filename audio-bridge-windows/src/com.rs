//! COM apartment and thread-priority guards shared by the backends.

use windows::core::{w, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, RPC_E_CHANGED_MODE};
use windows::Win32::System::Com::{
    CoDecrementMTAUsage, CoIncrementMTAUsage, CoInitializeEx, CoTaskMemFree, CoUninitialize,
    CO_MTA_USAGE_COOKIE, COINIT_MULTITHREADED,
};
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW, OpenProcess,
    QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};

use audio_bridge_core::DeviceError;

pub(crate) fn device_error(context: &str, e: windows::core::Error) -> DeviceError {
    DeviceError::new(format!("{} failed: {}", context, e.message())).with_code(e.code().0)
}

/// Joins the calling thread to the multithreaded apartment for its lifetime.
pub(crate) struct ComScope {
    initialized: bool,
}

impl ComScope {
    pub(crate) fn enter() -> Result<Self, DeviceError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            // The thread is already STA; calls still work through proxies.
            return Ok(Self { initialized: false });
        }
        hr.ok().map_err(|e| device_error("CoInitializeEx", e))?;
        Ok(Self { initialized: true })
    }
}

impl Drop for ComScope {
    fn drop(&mut self) {
        if self.initialized {
            unsafe { CoUninitialize() };
        }
    }
}

/// Keeps the MTA alive while objects created in it outlive the thread that
/// created them.
pub(crate) struct MtaUsage(CO_MTA_USAGE_COOKIE);

impl MtaUsage {
    pub(crate) fn acquire() -> Result<Self, DeviceError> {
        unsafe { CoIncrementMTAUsage() }
            .map(Self)
            .map_err(|e| device_error("CoIncrementMTAUsage", e))
    }
}

impl Drop for MtaUsage {
    fn drop(&mut self) {
        if let Err(e) = unsafe { CoDecrementMTAUsage(self.0) } {
            log::warn!("CoDecrementMTAUsage failed: {}", e);
        }
    }
}

/// MMCSS "Pro Audio" registration for the current thread.
pub(crate) struct MmcssRegistration(HANDLE);

impl MmcssRegistration {
    /// Registration failure only costs scheduling priority, so it is logged
    /// and reported as `None`.
    pub(crate) fn pro_audio() -> Option<Self> {
        let mut task_index = 0u32;
        match unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) } {
            Ok(handle) => Some(Self(handle)),
            Err(e) => {
                log::warn!("MMCSS registration failed: {}", e);
                None
            }
        }
    }
}

impl Drop for MmcssRegistration {
    fn drop(&mut self) {
        let _ = unsafe { AvRevertMmThreadCharacteristics(self.0) };
    }
}

/// Take ownership of a COM-allocated wide string.
///
/// # Safety
/// `value` must be null or a string allocated with `CoTaskMemAlloc`.
pub(crate) unsafe fn take_co_string(value: PWSTR) -> String {
    if value.is_null() {
        return String::new();
    }
    let text = value.to_string().unwrap_or_default();
    CoTaskMemFree(Some(value.0 as *const _));
    text
}

/// Executable file name (without directory) of a running process.
pub(crate) fn process_image_name(process_id: u32) -> Option<String> {
    unsafe {
        let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id).ok()?;
        let mut buffer = [0u16; 1024];
        let mut len = buffer.len() as u32;
        let queried = QueryFullProcessImageNameW(
            process,
            PROCESS_NAME_WIN32,
            PWSTR(buffer.as_mut_ptr()),
            &mut len,
        );
        let _ = CloseHandle(process);
        queried.ok()?;

        let path = String::from_utf16_lossy(&buffer[..len as usize]);
        Some(match path.rsplit_once('\\') {
            Some((_, name)) => name.to_string(),
            None => path,
        })
    }
}
