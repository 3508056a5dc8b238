use std::fmt;

use serde::{Deserialize, Serialize};

/// Stream lifecycle state machine.
///
/// State transitions:
/// ```text
/// idle → opened → running → stopping → opened
///   ↓       ↓        ↓          ↓
///   └───────┴────────┴──────────┴──→ closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Opened,
    Running,
    Stopping,
    Closed,
}

impl StreamState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Opened => "opened",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Activity state of the loopback target's audio session. Polled, never pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Inactive,
    Expired,
}

impl SessionState {
    /// Whether packets captured in this state still carry the target's audio.
    pub fn contributes_audio(&self) -> bool {
        !matches!(self, Self::Expired)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
        };
        f.write_str(name)
    }
}
