use std::sync::Arc;

use crate::processing::format_normalizer::{FormatNormalizer, NormalizeStatus};
use crate::session::controller::StreamShared;
use crate::traits::delegate::StreamEvent;
use crate::traits::device_host::{CallbackInfo, InputBlock};

/// Real-time body of a duplex stream.
///
/// Handed to the device backend at open; the backend calls
/// [`process`](Self::process) once per period on its real-time thread.
/// Never blocks and never allocates: input is decoded into a scratch buffer
/// sized at open, output is pulled from the playback ring with `try_lock`.
pub struct DuplexProcessor {
    shared: Arc<StreamShared>,
    normalizer: FormatNormalizer,
    scratch: Vec<f32>,
}

impl DuplexProcessor {
    pub(crate) fn new(shared: Arc<StreamShared>, period_frames: u32) -> Self {
        // Headroom for drivers that deliver more than the nominal period.
        let scratch = vec![0.0; period_frames as usize * 2 * shared.input_channels as usize];
        Self {
            shared,
            normalizer: FormatNormalizer::new(),
            scratch,
        }
    }

    pub fn input_channels(&self) -> u16 {
        self.shared.input_channels
    }

    pub fn output_channels(&self) -> u16 {
        self.shared.output_channels
    }

    /// Handle one device period.
    ///
    /// `input` is the raw captured block (absent when the stream has no
    /// inputs). `output` receives `info.frames * output_channels` interleaved
    /// samples; any remainder of the slice is zeroed.
    pub fn process(
        &mut self,
        input: Option<InputBlock<'_>>,
        output: &mut [f32],
        info: CallbackInfo,
    ) {
        let stats = &self.shared.stats;
        stats.record_callback();
        stats.set_cpu_load(info.cpu_load);
        if info.input_underflow {
            stats.record_input_underflow();
        }

        let input_channels = self.shared.input_channels;
        if let (Some(input), true) = (input, input_channels > 0) {
            let wanted = (info.frames * input_channels as usize).min(self.scratch.len());
            let block = &mut self.scratch[..wanted];
            let status = self
                .normalizer
                .normalize_into(input.data, input.encoding, input.bits_per_sample, block);
            if let NormalizeStatus::Silenced { error, first } = status {
                stats.record_format_error();
                if first {
                    self.shared.notify(StreamEvent::FormatUnsupported(error));
                }
            }
            self.shared.deliver(block, input_channels);
        }

        let output_channels = self.shared.output_channels as usize;
        let wanted = (info.frames * output_channels).min(output.len());
        let (playable, rest) = output.split_at_mut(wanted);
        rest.fill(0.0);
        if output_channels > 0 {
            let outcome = self.shared.playback.pull_into(playable);
            if outcome.underflowed() || info.output_underflow {
                stats.record_output_underflow();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format::SampleEncoding;
    use crate::testing::{f32_bytes, shared_stream};

    fn info(frames: usize) -> CallbackInfo {
        CallbackInfo {
            frames,
            ..Default::default()
        }
    }

    fn float_input(bytes: &[u8]) -> InputBlock<'_> {
        InputBlock {
            data: bytes,
            encoding: SampleEncoding::IeeeFloat,
            bits_per_sample: 32,
        }
    }

    #[test]
    fn output_pulls_written_samples_then_silence() {
        let shared = shared_stream(0, 2, 8);
        let mut processor = DuplexProcessor::new(Arc::clone(&shared), 4);
        shared.playback.write(&[0.1, 0.2, 0.3, 0.4]);

        let mut out = vec![9.0; 8];
        processor.process(None, &mut out, info(4));
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4, 0.0, 0.0, 0.0, 0.0]);

        processor.process(None, &mut out, info(4));
        assert_eq!(out, vec![0.0; 8]);

        let stats = shared.stats.snapshot();
        assert_eq!(stats.callbacks, 2);
        assert_eq!(stats.output_underflows, 2);
    }

    #[test]
    fn input_is_buffered_for_draining() {
        let shared = shared_stream(2, 0, 16);
        let mut processor = DuplexProcessor::new(Arc::clone(&shared), 2);
        let bytes = f32_bytes(&[0.5, -0.5, 1.5, 0.25]);

        let mut out = Vec::new();
        processor.process(Some(float_input(&bytes)), &mut out, info(2));

        assert_eq!(shared.capture.drain(), vec![0.5, -0.5, 1.0, 0.25]);
        assert_eq!(shared.stats.snapshot().frames_captured, 2);
    }

    #[test]
    fn driver_flags_and_cpu_load_are_recorded() {
        let shared = shared_stream(1, 1, 8);
        let mut processor = DuplexProcessor::new(Arc::clone(&shared), 2);
        shared.playback.write(&[0.5, 0.5]);

        let bytes = f32_bytes(&[0.0, 0.0]);
        let mut out = vec![0.0; 2];
        processor.process(
            Some(float_input(&bytes)),
            &mut out,
            CallbackInfo {
                frames: 2,
                input_underflow: true,
                output_underflow: true,
                cpu_load: 0.25,
            },
        );

        let stats = shared.stats.snapshot();
        assert_eq!(stats.input_underflows, 1);
        // Ring had enough, but the driver flagged an underflow.
        assert_eq!(stats.output_underflows, 1);
        assert_eq!(stats.cpu_load, 0.25);
    }

    #[test]
    fn unsupported_input_is_silenced_and_counted() {
        let shared = shared_stream(1, 0, 16);
        let mut processor = DuplexProcessor::new(Arc::clone(&shared), 4);
        let bytes = [0x40u8; 4];
        let block = InputBlock {
            data: &bytes,
            encoding: SampleEncoding::Pcm,
            bits_per_sample: 8,
        };

        let mut out = Vec::new();
        processor.process(Some(block), &mut out, info(4));
        processor.process(Some(block), &mut out, info(4));

        assert_eq!(shared.capture.drain(), vec![0.0; 8]);
        assert_eq!(shared.stats.snapshot().format_errors, 2);
    }

    #[test]
    fn oversized_period_is_truncated_not_allocated() {
        let shared = shared_stream(1, 1, 64);
        let mut processor = DuplexProcessor::new(Arc::clone(&shared), 2);
        let bytes = f32_bytes(&[0.1; 10]);

        let mut out = vec![1.0; 10];
        processor.process(Some(float_input(&bytes)), &mut out, info(10));

        // Scratch holds two periods of headroom: 4 samples at one channel.
        assert_eq!(shared.capture.drain().len(), 4);
        assert_eq!(out, vec![0.0; 10]);
    }
}
