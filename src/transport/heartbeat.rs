//! Heartbeat timing for senders and liveness monitoring for receivers
//!
//! Senders emit a heartbeat frame when nothing else has been sent for the
//! heartbeat interval; real traffic suppresses heartbeats because the timer
//! resets on every transmitted frame, not only on heartbeats. Receivers keep
//! a last-seen timestamp per source and flag sources that have gone silent,
//! which is a CRITICAL condition for the owning component.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default interval between heartbeats on an idle sender
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Default silence after which a source counts as timed out
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(6);

/// Decides when an idle sender owes a heartbeat
#[derive(Debug)]
pub struct HeartbeatManager {
    interval: Duration,
    last_sent: Instant,
}

impl Default for HeartbeatManager {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

impl HeartbeatManager {
    /// Create a manager with the given interval
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: Instant::now(),
        }
    }

    /// True iff the interval has elapsed since the last transmitted frame
    pub fn is_due(&self) -> bool {
        self.last_sent.elapsed() >= self.interval
    }

    /// Record that a frame went out
    ///
    /// Call after ANY transmitted frame (data, heartbeat or EOS).
    pub fn mark_sent(&mut self) {
        self.last_sent = Instant::now();
    }

    /// Change the interval
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Current interval
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Receiver-side liveness monitor keyed by source id
#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_TIMEOUT)
    }
}

impl HeartbeatMonitor {
    /// Create a monitor with the given timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Refresh the last-seen time for a source
    pub fn update(&self, source_id: &str) {
        self.last_seen
            .lock()
            .insert(source_id.to_string(), Instant::now());
    }

    /// True iff the source is known AND has been silent for the timeout
    ///
    /// An unknown source is NOT timed out: absence is different from
    /// silence.
    pub fn is_timed_out(&self, source_id: &str) -> bool {
        self.last_seen
            .lock()
            .get(source_id)
            .is_some_and(|last| last.elapsed() >= self.timeout)
    }

    /// All currently timed-out sources
    pub fn timed_out_sources(&self) -> Vec<String> {
        let mut result: Vec<String> = self
            .last_seen
            .lock()
            .iter()
            .filter(|(_, last)| last.elapsed() >= self.timeout)
            .map(|(id, _)| id.clone())
            .collect();
        result.sort();
        result
    }

    /// Stop monitoring a source
    pub fn remove(&self, source_id: &str) {
        self.last_seen.lock().remove(source_id);
    }

    /// Forget all sources
    pub fn clear(&self) {
        self.last_seen.lock().clear();
    }

    /// Number of sources being monitored
    pub fn source_count(&self) -> usize {
        self.last_seen.lock().len()
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
