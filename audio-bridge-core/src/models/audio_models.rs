
use serde::{Deserialize, Serialize};

use super::state::SessionState;
use crate::processing::interleave;

/// How a caller names the device to open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelector {
    /// The backend's default device.
    #[default]
    Default,
    Index(u32),
    Name(String),
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => f.write_str("default device"),
            Self::Index(index) => write!(f, "device #{}", index),
            Self::Name(name) => write!(f, "device '{}'", name),
        }
    }
}

/// Default latencies reported by a device, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLatencies {
    pub low_input_ms: f64,
    pub low_output_ms: f64,
    pub high_input_ms: f64,
    pub high_output_ms: f64,
}

/// An audio device available for duplex streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    pub host_api: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: f64,
    pub latencies: DeviceLatencies,
}

impl DeviceInfo {
    pub fn matches(&self, selector: &DeviceSelector) -> bool {
        match selector {
            DeviceSelector::Default => true,
            DeviceSelector::Index(index) => self.index == *index,
            DeviceSelector::Name(name) => self.name == *name,
        }
    }
}

/// An audio session on the default render endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub process_id: u32,
    pub display_name: String,
    pub executable_name: String,
    pub state: SessionState,
}

/// A top-level window and its owning process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub handle: u64,
    pub title: String,
    pub process_id: u32,
    pub executable_name: String,
}

/// A block of interleaved canonical samples delivered to subscribers.
///
/// Frame shape: `samples.len() == frame_count * channels`, samples nominally
/// in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: f64,
    pub channels: u16,
    pub frame_count: usize,
    /// Monotonic per-stream counter; gaps mean frames were replaced before
    /// the subscriber saw them.
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: f64, channels: u16) -> Self {
        let frame_count = if channels == 0 {
            0
        } else {
            samples.len() / channels as usize
        };
        Self {
            samples,
            sample_rate,
            channels,
            frame_count,
            sequence: 0,
        }
    }

    pub(crate) fn with_capacity(samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(samples),
            sample_rate: 0.0,
            channels: 0,
            frame_count: 0,
            sequence: 0,
        }
    }

    /// Overwrite this frame in place without reallocating. Samples past the
    /// frame's capacity are cut at a whole-frame boundary.
    pub(crate) fn fill_from(
        &mut self,
        samples: &[f32],
        sample_rate: f64,
        channels: u16,
        sequence: u64,
    ) {
        let frame_count = if channels == 0 {
            0
        } else {
            samples.len().min(self.samples.capacity()) / channels as usize
        };
        self.samples.clear();
        self.samples
            .extend_from_slice(&samples[..frame_count * channels as usize]);
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.frame_count = frame_count;
        self.sequence = sequence;
    }

    /// De-interleaved copy of one channel.
    pub fn channel(&self, index: u16) -> Vec<f32> {
        interleave::extract_channel(&self.samples, self.channels, index)
    }
}
