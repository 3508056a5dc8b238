//! Classification of WASAPI activation HRESULTs.

use audio_bridge_core::ActivationFailure;

pub const E_ACCESSDENIED: i32 = 0x8007_0005_u32 as i32;
pub const REGDB_E_CLASSNOTREG: i32 = 0x8004_0154_u32 as i32;
pub const AUDCLNT_E_UNSUPPORTED_FORMAT: i32 = 0x8889_0008_u32 as i32;
pub const AUDCLNT_E_DEVICE_IN_USE: i32 = 0x8889_000A_u32 as i32;
pub const AUDCLNT_E_ENDPOINT_CREATION_FAILED: i32 = 0x8889_0024_u32 as i32;
pub const AUDCLNT_E_PROCESS_LOOPBACK_ALREADY_EXISTS: i32 = 0x8889_002C_u32 as i32;

/// Map an activation or initialization failure code to its kind.
pub fn classify(code: i32) -> ActivationFailure {
    match code {
        E_ACCESSDENIED => ActivationFailure::AccessDenied,
        // The virtual loopback device is not registered before 1803.
        REGDB_E_CLASSNOTREG => ActivationFailure::UnsupportedOs,
        AUDCLNT_E_PROCESS_LOOPBACK_ALREADY_EXISTS => ActivationFailure::ConcurrentCapture,
        AUDCLNT_E_ENDPOINT_CREATION_FAILED => ActivationFailure::TargetNotPlaying,
        AUDCLNT_E_DEVICE_IN_USE => ActivationFailure::DeviceBusy,
        AUDCLNT_E_UNSUPPORTED_FORMAT => ActivationFailure::UnsupportedFormat,
        _ => ActivationFailure::Backend,
    }
}

/// Short remediation hint logged alongside a failed activation.
pub fn hint(kind: ActivationFailure) -> &'static str {
    match kind {
        ActivationFailure::AccessDenied => "run the host process elevated",
        ActivationFailure::UnsupportedOs => {
            "process loopback needs Windows 10 1803 (build 17134) or newer"
        }
        ActivationFailure::ConcurrentCapture => {
            "another application is already capturing this process"
        }
        ActivationFailure::TargetNotPlaying => {
            "the target process may not have an active audio session"
        }
        ActivationFailure::DeviceBusy => "the endpoint is held in exclusive mode",
        ActivationFailure::UnsupportedFormat => "the engine rejected the capture format",
        ActivationFailure::Timeout => "the audio service did not complete activation",
        ActivationFailure::Backend => "unexpected audio service failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_kinds() {
        assert_eq!(classify(E_ACCESSDENIED), ActivationFailure::AccessDenied);
        assert_eq!(classify(-2004287444), ActivationFailure::ConcurrentCapture);
        assert_eq!(
            classify(AUDCLNT_E_ENDPOINT_CREATION_FAILED),
            ActivationFailure::TargetNotPlaying
        );
        assert_eq!(classify(AUDCLNT_E_DEVICE_IN_USE), ActivationFailure::DeviceBusy);
        assert_eq!(classify(AUDCLNT_E_UNSUPPORTED_FORMAT), ActivationFailure::UnsupportedFormat);
        assert_eq!(classify(REGDB_E_CLASSNOTREG), ActivationFailure::UnsupportedOs);
    }

    #[test]
    fn unknown_codes_are_backend_failures() {
        assert_eq!(classify(0x8000_4005_u32 as i32), ActivationFailure::Backend);
        assert_eq!(classify(0), ActivationFailure::Backend);
    }

    #[test]
    fn retryable_kinds_follow_classification() {
        assert!(classify(AUDCLNT_E_DEVICE_IN_USE).is_retryable());
        assert!(!classify(E_ACCESSDENIED).is_retryable());
    }
}
