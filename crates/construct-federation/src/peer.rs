//! Per-peer link bookkeeping (§4.8).
//!
//! The actual connection pooling and keep-alive live in `reqwest`'s
//! transport, matching the spec's "TLS and keep-alive are delegated to the
//! transport." What this module adds on top is the per-peer health state a
//! federation client needs to decide whether a peer is worth retrying:
//! byte counters, the last error, and an `erroneous` flag that trips after
//! too many consecutive failures.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

const ERRONEOUS_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Default)]
pub struct PeerStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<SystemTime>,
    pub consecutive_errors: u32,
    pub erroneous: bool,
}

/// Tracks [`PeerStats`] per destination host.
#[derive(Default)]
pub struct PeerPool {
    stats: Mutex<HashMap<String, PeerStats>>,
}

impl PeerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, host: &str, bytes_out: u64, bytes_in: u64) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let entry = stats.entry(host.to_owned()).or_default();
        entry.bytes_out += bytes_out;
        entry.bytes_in += bytes_in;
        entry.consecutive_errors = 0;
        entry.erroneous = false;
    }

    pub fn record_error(&self, host: &str, error: &str) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let entry = stats.entry(host.to_owned()).or_default();
        entry.last_error = Some(error.to_owned());
        entry.last_error_at = Some(SystemTime::now());
        entry.consecutive_errors += 1;
        entry.erroneous = entry.consecutive_errors >= ERRONEOUS_THRESHOLD;
    }

    /// Whether new requests to `host` should currently be attempted.
    pub fn is_erroneous(&self, host: &str) -> bool {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(host)
            .is_some_and(|s| s.erroneous)
    }

    pub fn stats_for(&self, host: &str) -> PeerStats {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(host)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_trips_erroneous_after_the_threshold_and_clears_on_success() {
        let pool = PeerPool::new();
        for _ in 0..ERRONEOUS_THRESHOLD {
            pool.record_error("remote", "reset");
        }
        assert!(pool.is_erroneous("remote"));

        pool.record_success("remote", 10, 20);
        assert!(!pool.is_erroneous("remote"));
        let stats = pool.stats_for("remote");
        assert_eq!(stats.bytes_out, 10);
        assert_eq!(stats.bytes_in, 20);
    }
}
