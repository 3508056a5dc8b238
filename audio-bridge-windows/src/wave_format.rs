//! Mapping between `WAVEFORMATEX` and the core `FormatDescriptor`.

use audio_bridge_core::{FormatDescriptor, SampleEncoding};

pub const TAG_PCM: u16 = 0x0001;
pub const TAG_IEEE_FLOAT: u16 = 0x0003;
pub const TAG_EXTENSIBLE: u16 = 0xFFFE;

/// Encoding for a format tag. For `WAVE_FORMAT_EXTENSIBLE` pass the first
/// field of the sub-format GUID, which carries the underlying tag.
pub fn encoding_for_tag(tag: u16) -> SampleEncoding {
    match tag {
        TAG_PCM => SampleEncoding::Pcm,
        TAG_IEEE_FLOAT => SampleEncoding::IeeeFloat,
        other => SampleEncoding::Other(other),
    }
}

/// Resolve the effective tag of a wave format header.
pub fn effective_tag(tag: u16, sub_format_tag: Option<u32>) -> u16 {
    match (tag, sub_format_tag) {
        (TAG_EXTENSIBLE, Some(sub)) if sub <= u16::MAX as u32 => sub as u16,
        (tag, _) => tag,
    }
}

pub fn describe(
    tag: u16,
    sub_format_tag: Option<u32>,
    bits_per_sample: u16,
    channels: u16,
    sample_rate: u32,
) -> FormatDescriptor {
    FormatDescriptor {
        encoding: encoding_for_tag(effective_tag(tag, sub_format_tag)),
        bits_per_sample,
        channels,
        sample_rate: sample_rate as f64,
    }
}

#[cfg(target_os = "windows")]
pub use platform::*;

#[cfg(target_os = "windows")]
mod platform {
    use windows::Win32::Media::Audio::{WAVEFORMATEX, WAVEFORMATEXTENSIBLE};

    use audio_bridge_core::FormatDescriptor;

    use super::{describe, TAG_EXTENSIBLE, TAG_IEEE_FLOAT};

    /// Read a format the engine handed back.
    ///
    /// # Safety
    /// `format` must point at a valid header, and at a full
    /// `WAVEFORMATEXTENSIBLE` when its tag says so.
    pub unsafe fn descriptor_from_wave(format: *const WAVEFORMATEX) -> FormatDescriptor {
        let header = std::ptr::read_unaligned(format);
        let sub_format = if header.wFormatTag == TAG_EXTENSIBLE && header.cbSize >= 22 {
            // Packed struct: read the GUID without forming a reference.
            let extensible = format as *const WAVEFORMATEXTENSIBLE;
            let sub_format = std::ptr::read_unaligned(std::ptr::addr_of!((*extensible).SubFormat));
            Some(sub_format.data1)
        } else {
            None
        };
        describe(
            header.wFormatTag,
            sub_format,
            header.wBitsPerSample,
            header.nChannels,
            header.nSamplesPerSec,
        )
    }

    /// Interleaved 32-bit float at the given shape; the engine converts to
    /// and from its mix format when the stream is opened with
    /// `AUTOCONVERTPCM`.
    pub fn float_format(channels: u16, sample_rate: u32) -> WAVEFORMATEX {
        let block_align = channels * 4;
        WAVEFORMATEX {
            wFormatTag: TAG_IEEE_FLOAT,
            nChannels: channels,
            nSamplesPerSec: sample_rate,
            nAvgBytesPerSec: sample_rate * block_align as u32,
            nBlockAlign: block_align,
            wBitsPerSample: 32,
            cbSize: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_tags_resolve_directly() {
        let format = describe(TAG_IEEE_FLOAT, None, 32, 2, 48_000);
        assert_eq!(format, FormatDescriptor::float32(2, 48_000.0));

        let format = describe(TAG_PCM, None, 16, 1, 44_100);
        assert_eq!(format, FormatDescriptor::pcm(16, 1, 44_100.0));
    }

    #[test]
    fn extensible_uses_sub_format() {
        let format = describe(TAG_EXTENSIBLE, Some(TAG_PCM as u32), 24, 2, 48_000);
        assert_eq!(format.encoding, SampleEncoding::Pcm);
        assert_eq!(format.bits_per_sample, 24);

        let format = describe(TAG_EXTENSIBLE, Some(TAG_IEEE_FLOAT as u32), 32, 8, 96_000);
        assert_eq!(format.encoding, SampleEncoding::IeeeFloat);
    }

    #[test]
    fn extensible_without_sub_format_stays_unknown() {
        let format = describe(TAG_EXTENSIBLE, None, 32, 2, 48_000);
        assert_eq!(format.encoding, SampleEncoding::Other(TAG_EXTENSIBLE));
        assert!(format.sample_format().is_none());
    }

    #[test]
    fn unknown_tag_is_carried() {
        // WAVE_FORMAT_ALAW
        assert_eq!(encoding_for_tag(0x0006), SampleEncoding::Other(6));
    }
}
