use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::DeviceSelector;
use super::error::ConfigError;

/// Upper bound for any ring, in samples (64 MiB of `f32`).
pub const MAX_RING_SAMPLES: usize = 16 * 1024 * 1024;

/// Which kind of real-time source a stream wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StreamMode {
    /// A device stream carrying input and output in one periodic callback.
    #[default]
    Duplex,
    /// Capture of one process's audio output.
    #[serde(rename_all = "camelCase")]
    Loopback { process_id: u32 },
}

/// Configuration for a stream. Immutable once the stream is opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    pub mode: StreamMode,

    /// Device to open in duplex mode. Ignored for loopback.
    pub device: DeviceSelector,

    /// Sample rate in Hz (default: 48000). Loopback streams use the
    /// session's mix rate instead.
    pub sample_rate: f64,

    /// Frames per real-time callback (default: 256).
    pub period_frames: u32,

    /// Requested input channels, clamped to the device maximum (default: 2).
    pub input_channels: u16,

    /// Requested output channels, clamped to the device maximum (default: 0).
    pub output_channels: u16,

    /// Ring buffer size in periods for duplex streams (default: 4).
    pub buffer_periods: u32,

    /// Capture ring capacity in samples for loopback streams (default: 1 Mi).
    pub loopback_buffer_samples: usize,

    /// How long `stop` waits for the real-time thread (default: 1000 ms).
    pub stop_timeout_ms: u64,

    /// Session activity poll interval for loopback (default: 100 ms).
    pub session_poll_interval_ms: u64,

    /// Capture loop sleep between packet checks (default: 5 ms).
    pub packet_poll_interval_ms: u64,

    /// Loopback activation timeout handed to the activator (default: 5000 ms).
    pub activation_timeout_ms: u64,
}

impl StreamConfig {
    pub fn duplex(
        device: DeviceSelector,
        sample_rate: f64,
        period_frames: u32,
        input_channels: u16,
        output_channels: u16,
    ) -> Self {
        Self {
            mode: StreamMode::Duplex,
            device,
            sample_rate,
            period_frames,
            input_channels,
            output_channels,
            ..Self::default()
        }
    }

    pub fn loopback(process_id: u32) -> Self {
        Self {
            mode: StreamMode::Loopback { process_id },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.period_frames == 0 {
            return Err(ConfigError::InvalidPeriod);
        }
        if self.stop_timeout_ms == 0 || self.packet_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("timeouts and poll intervals must be non-zero".into()));
        }
        match self.mode {
            StreamMode::Duplex => {
                if self.buffer_periods == 0 {
                    return Err(ConfigError::InvalidBufferPeriods);
                }
                if self.input_channels == 0 && self.output_channels == 0 {
                    return Err(ConfigError::NoChannels);
                }
                // Channels are only ever clamped down, so this bounds the
                // rings actually allocated at open.
                self.ring_capacity(self.input_channels)?;
                self.ring_capacity(self.output_channels)?;
            }
            StreamMode::Loopback { .. } => {
                if self.loopback_buffer_samples == 0 {
                    return Err(ConfigError::Invalid(
                        "loopback buffer must hold at least one sample".into(),
                    ));
                }
                if self.loopback_buffer_samples > MAX_RING_SAMPLES {
                    return Err(ConfigError::Invalid(format!(
                        "loopback buffer of {} samples exceeds {}",
                        self.loopback_buffer_samples, MAX_RING_SAMPLES
                    )));
                }
                if self.session_poll_interval_ms == 0 || self.activation_timeout_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "timeouts and poll intervals must be non-zero".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Ring capacity in samples for a duplex direction with `channels` channels.
    pub fn ring_capacity(&self, channels: u16) -> Result<usize, ConfigError> {
        (self.period_frames as usize)
            .checked_mul(channels as usize)
            .and_then(|n| n.checked_mul(self.buffer_periods as usize))
            .filter(|&n| n <= MAX_RING_SAMPLES)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{} frames x {} periods x {} channels exceeds {} samples",
                    self.period_frames, self.buffer_periods, channels, MAX_RING_SAMPLES
                ))
            })
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_millis(self.session_poll_interval_ms)
    }

    pub fn packet_poll_interval(&self) -> Duration {
        Duration::from_millis(self.packet_poll_interval_ms)
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mode: StreamMode::Duplex,
            device: DeviceSelector::Default,
            sample_rate: 48000.0,
            period_frames: 256,
            input_channels: 2,
            output_channels: 0,
            buffer_periods: 4,
            loopback_buffer_samples: 1024 * 1024,
            stop_timeout_ms: 1000,
            session_poll_interval_ms: 100,
            packet_poll_interval_ms: 5,
            activation_timeout_ms: 5000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StreamConfig::default().validate().is_ok());
        assert!(StreamConfig::loopback(1234).validate().is_ok());
    }

    #[test]
    fn rejects_bad_sample_rate() {
        let config = StreamConfig {
            sample_rate: 0.0,
            ..StreamConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidSampleRate(0.0)));

        let config = StreamConfig {
            sample_rate: f64::NAN,
            ..StreamConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidSampleRate(_))));
    }

    #[test]
    fn rejects_zero_period_and_channels() {
        let config = StreamConfig {
            period_frames: 0,
            ..StreamConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidPeriod));

        let config = StreamConfig::duplex(DeviceSelector::Default, 48000.0, 256, 0, 0);
        assert_eq!(config.validate(), Err(ConfigError::NoChannels));
    }

    #[test]
    fn ring_capacity_in_samples() {
        let config = StreamConfig::duplex(DeviceSelector::Default, 48000.0, 256, 0, 2);
        assert_eq!(config.ring_capacity(2), Ok(256 * 2 * 4));
        assert_eq!(config.ring_capacity(0), Ok(0));
    }

    #[test]
    fn rejects_oversized_rings() {
        let config = StreamConfig {
            period_frames: u32::MAX,
            buffer_periods: u32::MAX,
            ..StreamConfig::duplex(DeviceSelector::Default, 48000.0, 256, 0, 2)
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert!(config.ring_capacity(2).is_err());

        let config = StreamConfig {
            buffer_periods: 1 << 20,
            ..StreamConfig::duplex(DeviceSelector::Default, 48000.0, 256, 2, 0)
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = StreamConfig {
            loopback_buffer_samples: MAX_RING_SAMPLES + 1,
            ..StreamConfig::loopback(1234)
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn deserializes_partial_json() {
        let config: StreamConfig = serde_json::from_str(
            r#"{ "mode": { "type": "loopback", "processId": 9000 }, "sessionPollIntervalMs": 50 }"#,
        )
        .unwrap();

        assert_eq!(config.mode, StreamMode::Loopback { process_id: 9000 });
        assert_eq!(config.session_poll_interval(), Duration::from_millis(50));
        assert_eq!(config.period_frames, 256);
    }

    #[test]
    fn deserializes_device_selector() {
        let config: StreamConfig = serde_json::from_str(
            r#"{ "device": { "name": "Focusrite USB ASIO" }, "outputChannels": 2 }"#,
        )
        .unwrap();
        assert_eq!(config.device, DeviceSelector::Name("Focusrite USB ASIO".into()));
        assert_eq!(config.output_channels, 2);
    }
}
