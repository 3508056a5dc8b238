//! # audio-bridge-core
//!
//! Platform-agnostic core for bridging a real-time audio callback to a
//! non-real-time application thread.
//!
//! Provides sample-format normalization, direction-specific ring buffers
//! with their backpressure policies, the stream lifecycle state machine,
//! loopback session monitoring, lock-free stats and a latest-wins frame
//! hand-off. Platform backends (Windows WASAPI) implement the `DeviceHost`,
//! `LoopbackActivator` and `SessionDirectory` traits.
//!
//! ## Architecture
//!
//! ```text
//! audio-bridge-core (this crate)
//! ├── traits/       ← DeviceHost, LoopbackActivator, SessionDirectory, StreamDelegate
//! ├── models/       ← BridgeError, StreamState, StreamConfig, AudioFrame, FormatDescriptor
//! ├── processing/   ← FormatNormalizer, RingBuffer, backpressure, interleaving
//! └── session/      ← StreamController, DuplexProcessor, capture loop, bridge, stats
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{
    AudioFrame, DeviceInfo, DeviceLatencies, DeviceSelector, SessionInfo, WindowInfo,
};
pub use models::config::{StreamConfig, StreamMode};
pub use models::error::{
    ActivationDiagnostics, ActivationError, ActivationFailure, BridgeError, ConfigError,
    DeviceError, FormatError, OsVersion, PrivilegeLevel,
};
pub use models::format::{FormatDescriptor, SampleEncoding, SampleFormat};
pub use models::state::{SessionState, StreamState};
pub use processing::format_normalizer::FormatNormalizer;
pub use processing::ring_buffer::RingBuffer;
pub use session::controller::{StreamController, StreamHandle};
pub use session::duplex::DuplexProcessor;
pub use session::stats::StatsSnapshot;
pub use traits::delegate::{StreamDelegate, StreamEvent};
pub use traits::device_host::{
    CallbackInfo, DeviceHost, DuplexParams, DuplexStream, InputBlock, StopOutcome,
};
pub use traits::loopback::{
    CaptureClient, CapturedPacket, LoopbackActivation, LoopbackActivator, SessionProbe,
};
pub use traits::session_directory::SessionDirectory;
