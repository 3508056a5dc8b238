use serde::{Deserialize, Serialize};

/// Raw sample encoding reported by a device or session mix format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleEncoding {
    /// IEEE 754 floating point.
    IeeeFloat,
    /// Signed little-endian integer PCM.
    Pcm,
    /// Anything else, carrying the backend's raw format tag.
    Other(u16),
}

/// Closed set of decodable sample formats.
///
/// Built from an (encoding, bit depth) pair by [`SampleFormat::resolve`];
/// pairs outside this set are a `FormatError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    Float32,
    Pcm16,
    Pcm24,
    Pcm32,
}

impl SampleFormat {
    pub fn resolve(encoding: SampleEncoding, bits_per_sample: u16) -> Option<Self> {
        match (encoding, bits_per_sample) {
            (SampleEncoding::IeeeFloat, 32) => Some(Self::Float32),
            (SampleEncoding::Pcm, 16) => Some(Self::Pcm16),
            (SampleEncoding::Pcm, 24) => Some(Self::Pcm24),
            (SampleEncoding::Pcm, 32) => Some(Self::Pcm32),
            _ => None,
        }
    }
}

/// Negotiated wire format of a device stream or loopback capture client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub encoding: SampleEncoding,
    pub bits_per_sample: u16,
    pub channels: u16,
    pub sample_rate: f64,
}

impl FormatDescriptor {
    pub fn float32(channels: u16, sample_rate: f64) -> Self {
        Self {
            encoding: SampleEncoding::IeeeFloat,
            bits_per_sample: 32,
            channels,
            sample_rate,
        }
    }

    pub fn pcm(bits_per_sample: u16, channels: u16, sample_rate: f64) -> Self {
        Self {
            encoding: SampleEncoding::Pcm,
            bits_per_sample,
            channels,
            sample_rate,
        }
    }

    pub fn sample_format(&self) -> Option<SampleFormat> {
        SampleFormat::resolve(self.encoding, self.bits_per_sample)
    }

    /// Bytes per interleaved frame, derived from the container bit depth.
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize).div_ceil(8)
    }
}
