pub mod backpressure;
pub mod capture_buffer;
pub mod format_normalizer;
pub mod interleave;
pub mod playback_buffer;
pub mod ring_buffer;
