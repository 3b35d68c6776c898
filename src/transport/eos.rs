//! End-Of-Stream tracking across multiple sources
//!
//! Used for graceful stop: a downstream component registers every expected
//! upstream source at run start and waits for all of them to send EOS before
//! draining and closing out the run.

use std::collections::HashSet;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct EosSets {
    expected: HashSet<String>,
    received: HashSet<String>,
}

/// Tracks EOS reception from registered sources
///
/// An EOS from an unregistered source is silently ignored, which avoids
/// races when a source attaches late; duplicate EOS is idempotent.
#[derive(Debug, Default)]
pub struct EosTracker {
    sets: Mutex<EosSets>,
}

impl EosTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source expected to send EOS this run
    pub fn register(&self, source_id: &str) {
        self.sets.lock().expected.insert(source_id.to_string());
    }

    /// Unregister a source (e.g. it disconnected before the run)
    pub fn unregister(&self, source_id: &str) {
        let mut sets = self.sets.lock();
        sets.expected.remove(source_id);
        sets.received.remove(source_id);
    }

    /// Record EOS from a source; unregistered sources are ignored
    pub fn receive_eos(&self, source_id: &str) {
        let mut sets = self.sets.lock();
        if sets.expected.contains(source_id) {
            sets.received.insert(source_id.to_string());
        }
    }

    /// True iff every registered source has sent EOS
    ///
    /// Vacuously true when no sources are registered.
    pub fn all_received(&self) -> bool {
        let sets = self.sets.lock();
        sets.received.len() == sets.expected.len()
    }

    /// Sources that have not yet sent EOS, sorted for stable output
    pub fn pending_sources(&self) -> Vec<String> {
        let sets = self.sets.lock();
        let mut pending: Vec<String> = sets
            .expected
            .iter()
            .filter(|id| !sets.received.contains(*id))
            .cloned()
            .collect();
        pending.sort();
        pending
    }

    /// Whether a source has sent EOS
    pub fn has_received(&self, source_id: &str) -> bool {
        self.sets.lock().received.contains(source_id)
    }

    /// Whether a source is registered
    pub fn is_registered(&self, source_id: &str) -> bool {
        self.sets.lock().expected.contains(source_id)
    }

    /// Number of registered sources
    pub fn expected_count(&self) -> usize {
        self.sets.lock().expected.len()
    }

    /// Clear both sets for the next run
    pub fn reset(&self) {
        let mut sets = self.sets.lock();
        sets.expected.clear();
        sets.received.clear();
    }
}
