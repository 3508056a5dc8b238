//! Raw device sample decoding into canonical interleaved `f32`.
//!
//! Conversion rules:
//! - `Float32` is clipped to `[-1.0, 1.0]` (client headroom overshoot is
//!   clipped, never wrapped). NaN decodes as silence.
//! - Integer PCM is divided by the signed full scale of its container:
//!   32768 for 16-bit, 2^31 for 24- and 32-bit. 24-bit samples are packed in
//!   3 bytes and sign-extended by placing them in the top of an `i32`.
//!
//! Unsupported (encoding, bit depth) pairs produce a zero-filled block of the
//! requested length so downstream timing is preserved.

use crate::models::error::FormatError;
use crate::models::format::{SampleEncoding, SampleFormat};

/// A pure conversion from little-endian bytes to canonical samples.
///
/// Writes `min(out.len(), raw.len() / bytes_per_sample)` samples and returns
/// how many it wrote.
type DecodeFn = fn(&[u8], &mut [f32]) -> usize;

const PCM16_SCALE: f32 = 32768.0;
const PCM32_SCALE: f32 = 2_147_483_648.0;

fn decoder(format: SampleFormat) -> DecodeFn {
    match format {
        SampleFormat::Float32 => decode_float32,
        SampleFormat::Pcm16 => decode_pcm16,
        SampleFormat::Pcm24 => decode_pcm24,
        SampleFormat::Pcm32 => decode_pcm32,
    }
}

fn decode_float32(raw: &[u8], out: &mut [f32]) -> usize {
    let mut written = 0;
    for (dst, bytes) in out.iter_mut().zip(raw.chunks_exact(4)) {
        let sample = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        *dst = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        written += 1;
    }
    written
}

fn decode_pcm16(raw: &[u8], out: &mut [f32]) -> usize {
    let mut written = 0;
    for (dst, bytes) in out.iter_mut().zip(raw.chunks_exact(2)) {
        *dst = f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / PCM16_SCALE;
        written += 1;
    }
    written
}

fn decode_pcm24(raw: &[u8], out: &mut [f32]) -> usize {
    let mut written = 0;
    for (dst, bytes) in out.iter_mut().zip(raw.chunks_exact(3)) {
        let sample = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]);
        *dst = sample as f32 / PCM32_SCALE;
        written += 1;
    }
    written
}

fn decode_pcm32(raw: &[u8], out: &mut [f32]) -> usize {
    let mut written = 0;
    for (dst, bytes) in out.iter_mut().zip(raw.chunks_exact(4)) {
        let sample = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        *dst = sample as f32 / PCM32_SCALE;
        written += 1;
    }
    written
}

/// Result of decoding one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeStatus {
    Decoded,
    /// The block was replaced by silence. `first` is true only for the first
    /// unsupported block this normalizer has seen.
    Silenced { error: FormatError, first: bool },
}

/// Stateful wrapper around the decoder table.
///
/// One instance lives per stream so the unsupported-format warning is
/// raised once per stream rather than once per block.
#[derive(Debug, Default)]
pub struct FormatNormalizer {
    reported: bool,
}

impl FormatNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `raw` into `out` without allocating.
    ///
    /// `out.len()` is the requested `frame_count * channel_count`. A short
    /// `raw` leaves the remaining tail silent.
    pub fn normalize_into(
        &mut self,
        raw: &[u8],
        encoding: SampleEncoding,
        bits_per_sample: u16,
        out: &mut [f32],
    ) -> NormalizeStatus {
        let Some(format) = SampleFormat::resolve(encoding, bits_per_sample) else {
            out.fill(0.0);
            let error = FormatError {
                encoding,
                bits_per_sample,
            };
            let first = !self.reported;
            if first {
                self.reported = true;
                log::warn!("{}; emitting silence to preserve timing", error);
            }
            return NormalizeStatus::Silenced { error, first };
        };

        let written = decoder(format)(raw, out);
        out[written..].fill(0.0);
        NormalizeStatus::Decoded
    }

    /// Allocating convenience form of [`normalize_into`](Self::normalize_into).
    pub fn normalize(
        &mut self,
        raw: &[u8],
        encoding: SampleEncoding,
        bits_per_sample: u16,
        frame_count: usize,
        channel_count: u16,
    ) -> Vec<f32> {
        let mut out = vec![0.0f32; frame_count * channel_count as usize];
        self.normalize_into(raw, encoding, bits_per_sample, &mut out);
        out
    }

    /// Whether an unsupported block has been seen.
    pub fn has_reported_error(&self) -> bool {
        self.reported
    }
}

/// Absolute peak of a decoded block.
pub fn peak_level(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}
