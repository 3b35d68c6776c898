//! Unified metrics framework for pipeline components
//!
//! # Design Principles (KISS)
//! - Lock-free atomic counters for the hot path (zero overhead on data path)
//! - Simple snapshot mechanism for reporting
//! - Relaxed ordering everywhere; statistics are eventually consistent,
//!   which is acceptable for monitoring

use std::sync::atomic::{AtomicU64, Ordering};

/// Core counters tracked by every component
///
/// - received: frames coming in
/// - processed: frames successfully handled/sent
/// - dropped: frames lost to backpressure or decode errors
/// - errors: decode/transport errors of any kind
#[derive(Debug)]
pub struct AtomicCounters {
    /// Frames/batches received from upstream
    pub received: AtomicU64,
    /// Frames/batches successfully processed or sent
    pub processed: AtomicU64,
    /// Frames dropped (backpressure or failed decode)
    pub dropped: AtomicU64,
    /// Error count across all non-fatal kinds
    pub errors: AtomicU64,
    /// Events contained in received batches
    pub events_received: AtomicU64,
    /// Events contained in processed batches
    pub events_processed: AtomicU64,
    /// Payload bytes transferred
    pub bytes: AtomicU64,
}

impl AtomicCounters {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_events_received(&self, n: u64) {
        self.events_received.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_events_processed(&self, n: u64) {
        self.events_processed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.received.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.events_received.store(0, Ordering::Relaxed);
        self.events_processed.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }
}

impl Default for AtomicCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    pub received: u64,
    pub processed: u64,
    pub dropped: u64,
    pub errors: u64,
    pub events_received: u64,
    pub events_processed: u64,
    pub bytes: u64,
}

impl CounterSnapshot {
    /// Calculate rates between two snapshots given elapsed seconds
    pub fn rate_from(&self, prev: &CounterSnapshot, elapsed_secs: f64) -> RateSnapshot {
        if elapsed_secs <= 0.0 {
            return RateSnapshot::default();
        }

        RateSnapshot {
            received_rate: (self.received.saturating_sub(prev.received)) as f64 / elapsed_secs,
            processed_rate: (self.processed.saturating_sub(prev.processed)) as f64 / elapsed_secs,
            events_rate: (self.events_processed.saturating_sub(prev.events_processed)) as f64
                / elapsed_secs,
            bytes_rate: (self.bytes.saturating_sub(prev.bytes)) as f64 / elapsed_secs,
        }
    }

    /// Summary numbers published in status reports
    pub fn status_metrics(&self, data_rate_mbps: f64) -> StatusMetrics {
        StatusMetrics {
            data_rate_mbps,
            error_counter: self.errors,
            processed_bytes: self.bytes,
        }
    }
}

/// Numbers carried in a `StatusReport`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMetrics {
    /// Recent payload throughput in MB/s
    pub data_rate_mbps: f64,
    /// Total errors/drops
    pub error_counter: u64,
    /// Total payload bytes handled
    pub processed_bytes: u64,
}

/// Byte-rate sampler for status reports
///
/// Remembers the byte counter and wall clock of the previous sample so each
/// status query reports the throughput since the last one.
#[derive(Debug)]
pub struct RateProbe {
    last: parking_lot::Mutex<(std::time::Instant, u64)>,
}

impl Default for RateProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl RateProbe {
    pub fn new() -> Self {
        Self {
            last: parking_lot::Mutex::new((std::time::Instant::now(), 0)),
        }
    }

    /// Turn a counter snapshot into status metrics with a fresh MB/s figure
    pub fn sample(&self, snap: &CounterSnapshot) -> StatusMetrics {
        let mut last = self.last.lock();
        let elapsed = last.0.elapsed().as_secs_f64();
        let mbps = if elapsed > 0.0 {
            snap.bytes.saturating_sub(last.1) as f64 / elapsed / 1_000_000.0
        } else {
            0.0
        };
        *last = (std::time::Instant::now(), snap.bytes);
        snap.status_metrics(mbps)
    }
}

/// Rate calculations from counter snapshots
#[derive(Debug, Clone, Copy, Default)]
pub struct RateSnapshot {
    /// Frames received per second
    pub received_rate: f64,
    /// Frames processed per second
    pub processed_rate: f64,
    /// Events processed per second
    pub events_rate: f64,
    /// Bytes per second
    pub bytes_rate: f64,
}

impl RateSnapshot {
    /// Payload throughput in MB/s
    pub fn mbps(&self) -> f64 {
        self.bytes_rate / 1_000_000.0
    }

    /// Format bytes rate as human-readable string (KB/s, MB/s, etc.)
    pub fn format_bytes_rate(&self) -> String {
        if self.bytes_rate >= 1_000_000_000.0 {
            format!("{:.2} GB/s", self.bytes_rate / 1_000_000_000.0)
        } else if self.bytes_rate >= 1_000_000.0 {
            format!("{:.2} MB/s", self.bytes_rate / 1_000_000.0)
        } else if self.bytes_rate >= 1_000.0 {
            format!("{:.2} KB/s", self.bytes_rate / 1_000.0)
        } else {
            format!("{:.0} B/s", self.bytes_rate)
        }
    }

    /// Format events rate as human-readable string (K/s, M/s, etc.)
    pub fn format_events_rate(&self) -> String {
        if self.events_rate >= 1_000_000.0 {
            format!("{:.2} M/s", self.events_rate / 1_000_000.0)
        } else if self.events_rate >= 1_000.0 {
            format!("{:.2} K/s", self.events_rate / 1_000.0)
        } else {
            format!("{:.0} /s", self.events_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_zeroed() {
        let counters = AtomicCounters::new();
        let snap = counters.snapshot();
        assert_eq!(snap.received, 0);
        assert_eq!(snap.errors, 0);
        assert_eq!(snap.bytes, 0);
    }

    #[test]
    fn inc_and_add_methods() {
        let counters = AtomicCounters::new();
        counters.inc_received();
        counters.inc_received();
        counters.inc_processed();
        counters.inc_dropped();
        counters.inc_errors();
        counters.add_events_received(100);
        counters.add_events_processed(95);
        counters.add_bytes(1000);

        let snap = counters.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.events_received, 100);
        assert_eq!(snap.events_processed, 95);
        assert_eq!(snap.bytes, 1000);
    }

    #[test]
    fn reset_clears_everything() {
        let counters = AtomicCounters::new();
        counters.inc_received();
        counters.add_bytes(500);
        counters.reset();

        let snap = counters.snapshot();
        assert_eq!(snap.received, 0);
        assert_eq!(snap.bytes, 0);
    }

    #[test]
    fn rate_calculation() {
        let prev = CounterSnapshot {
            received: 100,
            processed: 90,
            events_processed: 900,
            bytes: 10_000,
            ..Default::default()
        };
        let current = CounterSnapshot {
            received: 200,
            processed: 180,
            events_processed: 1800,
            bytes: 20_000,
            ..Default::default()
        };

        let rate = current.rate_from(&prev, 2.0);
        assert_eq!(rate.received_rate, 50.0);
        assert_eq!(rate.processed_rate, 45.0);
        assert_eq!(rate.events_rate, 450.0);
        assert_eq!(rate.bytes_rate, 5000.0);
    }

    #[test]
    fn rate_zero_elapsed() {
        let prev = CounterSnapshot::default();
        let current = CounterSnapshot {
            received: 100,
            ..Default::default()
        };

        let rate = current.rate_from(&prev, 0.0);
        assert_eq!(rate.received_rate, 0.0);
    }

    #[test]
    fn status_metrics_from_snapshot() {
        let snap = CounterSnapshot {
            errors: 5,
            bytes: 2_000_000,
            ..Default::default()
        };
        let status = snap.status_metrics(12.5);
        assert_eq!(status.error_counter, 5);
        assert_eq!(status.processed_bytes, 2_000_000);
        assert_eq!(status.data_rate_mbps, 12.5);
    }

    #[test]
    fn format_rates() {
        let rate = RateSnapshot {
            bytes_rate: 1_500_000.0,
            events_rate: 1500.0,
            ..Default::default()
        };
        assert_eq!(rate.format_bytes_rate(), "1.50 MB/s");
        assert_eq!(rate.format_events_rate(), "1.50 K/s");
        assert_eq!(rate.mbps(), 1.5);
    }
}
