use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lock-free counters shared by the real-time thread and any reader.
///
/// Every field is an independent atomic. The real-time side only
/// increments (or stores the CPU load); readers take a [`StatsSnapshot`].
/// Fields are not read as one consistent cut.
#[derive(Debug)]
pub struct StatsCollector {
    callbacks: AtomicU64,
    input_underflows: AtomicU64,
    output_underflows: AtomicU64,
    capture_overflows: AtomicU64,
    format_errors: AtomicU64,
    frames_captured: AtomicU64,
    frames_delivered: AtomicU64,
    frames_replaced: AtomicU64,
    // Stored as f64 bits via to_bits()/from_bits()
    cpu_load: AtomicU64,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self {
            callbacks: AtomicU64::new(0),
            input_underflows: AtomicU64::new(0),
            output_underflows: AtomicU64::new(0),
            capture_overflows: AtomicU64::new(0),
            format_errors: AtomicU64::new(0),
            frames_captured: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_replaced: AtomicU64::new(0),
            cpu_load: AtomicU64::new(0.0f64.to_bits()),
        }
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_input_underflow(&self) {
        self.input_underflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_output_underflow(&self) {
        self.output_underflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_overflow(&self) {
        self.capture_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_format_error(&self) {
        self.format_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frames_captured(&self, frames: u64) {
        self.frames_captured.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_frame_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_replaced(&self) {
        self.frames_replaced.fetch_add(1, Ordering::Relaxed);
    }

    /// Last CPU load fraction reported by the driver. Non-finite values are
    /// stored as 0.
    pub fn set_cpu_load(&self, load: f64) {
        let load = if load.is_finite() { load.max(0.0) } else { 0.0 };
        self.cpu_load.store(load.to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            input_underflows: self.input_underflows.load(Ordering::Relaxed),
            output_underflows: self.output_underflows.load(Ordering::Relaxed),
            capture_overflows: self.capture_overflows.load(Ordering::Relaxed),
            format_errors: self.format_errors.load(Ordering::Relaxed),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_replaced: self.frames_replaced.load(Ordering::Relaxed),
            cpu_load: f64::from_bits(self.cpu_load.load(Ordering::Relaxed)),
            captured_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of a stream's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    /// Real-time callback invocations (duplex) or packets processed (loopback).
    pub callbacks: u64,
    pub input_underflows: u64,
    pub output_underflows: u64,
    pub capture_overflows: u64,
    pub format_errors: u64,
    pub frames_captured: u64,
    pub frames_delivered: u64,
    pub frames_replaced: u64,
    pub cpu_load: f64,
    pub captured_at: DateTime<Utc>,
}
