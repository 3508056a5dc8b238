use thiserror::Error;

use super::format::SampleEncoding;
use super::state::StreamState;

/// Errors returned by control-plane stream operations.
///
/// The real-time side never produces these; it degrades to silence and
/// counts instead (see `StatsCollector`).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error("cannot {operation} while stream is {state}")]
    InvalidState {
        operation: &'static str,
        state: StreamState,
    },

    #[error("real-time thread failed to start: {0}")]
    Thread(String),
}

impl BridgeError {
    pub(crate) fn invalid_state(operation: &'static str, state: StreamState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Whether retrying the same call (or re-opening) can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) | Self::InvalidState { .. } => false,
            Self::Activation(e) => e.kind.is_retryable(),
            Self::Thread(_) => true,
        }
    }
}

/// Invalid or unsupported stream configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("device not found: {0}")]
    UnknownDevice(String),

    #[error("sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),

    #[error("period length must be at least one frame")]
    InvalidPeriod,

    #[error("buffer must hold at least one period")]
    InvalidBufferPeriods,

    #[error("stream has no input or output channels after clamping to device capability")]
    NoChannels,

    #[error("expected {expected} channel arrays, got {actual}")]
    ChannelCountMismatch { expected: u16, actual: usize },

    #[error("channel arrays must share equal length")]
    UnequalChannelLengths,

    #[error("stream mode does not match the backend: {0}")]
    ModeMismatch(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Why activating a device or loopback session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationFailure {
    /// Access denied; usually the process lacks elevation.
    AccessDenied,
    /// The OS is too old for process-scoped loopback.
    UnsupportedOs,
    /// Another client is already capturing the same target process.
    ConcurrentCapture,
    /// The endpoint could not be created, typically because the target
    /// process has no audio session yet.
    TargetNotPlaying,
    /// Device is held in exclusive mode by someone else.
    DeviceBusy,
    /// The device mix format was rejected.
    UnsupportedFormat,
    /// The asynchronous activation did not complete in time.
    Timeout,
    /// Any other backend failure.
    Backend,
}

impl ActivationFailure {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::DeviceBusy | Self::Timeout | Self::ConcurrentCapture | Self::TargetNotPlaying
        )
    }
}

/// Process privilege level observed at activation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrivilegeLevel {
    Elevated,
    Standard,
    #[default]
    Unknown,
}

/// OS version as reported by the platform backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl std::fmt::Display for OsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} build {}", self.major, self.minor, self.build)
    }
}

/// Context attached to an activation failure so callers can decide between
/// retrying, elevating, or giving up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActivationDiagnostics {
    pub privilege: PrivilegeLevel,
    pub os_version: Option<OsVersion>,
    /// Set when the failure indicates another capture of the same target.
    pub conflicting_capture: bool,
    /// Raw backend status code (an HRESULT on Windows), if any.
    pub code: Option<i32>,
}

/// Subsystem activation failed.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("activation failed ({kind:?}): {message}")]
pub struct ActivationError {
    pub kind: ActivationFailure,
    pub message: String,
    pub diagnostics: ActivationDiagnostics,
}

impl ActivationError {
    pub fn new(kind: ActivationFailure, message: impl Into<String>) -> Self {
        let diagnostics = ActivationDiagnostics {
            conflicting_capture: kind == ActivationFailure::ConcurrentCapture,
            ..ActivationDiagnostics::default()
        };
        Self {
            kind,
            message: message.into(),
            diagnostics,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: ActivationDiagnostics) -> Self {
        let conflicting = self.diagnostics.conflicting_capture;
        self.diagnostics = diagnostics;
        self.diagnostics.conflicting_capture |= conflicting;
        self
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.diagnostics.code = Some(code);
        self
    }
}

/// A backend call on an already-activated device or client failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("audio device error: {message}")]
pub struct DeviceError {
    pub message: String,
    pub code: Option<i32>,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }
}

/// A sample encoding the normalizer cannot decode. Non-fatal: the block
/// degrades to silence.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unsupported sample format: {encoding:?} at {bits_per_sample} bits")]
pub struct FormatError {
    pub encoding: SampleEncoding,
    pub bits_per_sample: u16,
}
