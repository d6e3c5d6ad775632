//! Replay guard: single-use nonces within a bounded validity window.
//!
//! Irreversible effects must never be replayed, so a nonce is accepted at
//! most once within its window. The store is TTL-swept on every insert and
//! therefore bounded by the call rate times the window, never by process
//! lifetime.

use std::collections::HashMap;
use std::sync::Mutex;

use compass_core::types::Timestamp;

/// Tracks accepted nonces for the duration of their validity window.
pub trait ReplayGuard: Send + Sync {
    /// Register a nonce. Returns `true` if this is its first use within the
    /// window (the call may proceed), `false` on replay.
    fn register(&self, nonce: &str, now: Timestamp) -> bool;

    /// Number of nonces currently tracked.
    fn tracked(&self) -> usize;
}

/// In-memory TTL-swept replay guard.
pub struct InMemoryReplayGuard {
    ttl_secs: i64,
    seen: Mutex<HashMap<String, i64>>,
}

impl InMemoryReplayGuard {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl_secs,
            seen: Mutex::new(HashMap::new()),
        }
    }
}

impl ReplayGuard for InMemoryReplayGuard {
    fn register(&self, nonce: &str, now: Timestamp) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            // A poisoned lock fails closed: treat every nonce as replayed.
            Err(_) => return false,
        };

        // Sweep expired entries so the store stays bounded.
        seen.retain(|_, expires_at| *expires_at > now.0);

        if seen.contains_key(nonce) {
            return false;
        }
        seen.insert(nonce.to_string(), now.0 + self.ttl_secs);
        true
    }

    fn tracked(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_use_accepted_replay_rejected() {
        let guard = InMemoryReplayGuard::new(600);
        let now = Timestamp::now();
        assert!(guard.register("nonce-1", now));
        assert!(!guard.register("nonce-1", now));
        assert!(guard.register("nonce-2", now));
    }

    #[test]
    fn test_nonce_reusable_after_window() {
        let guard = InMemoryReplayGuard::new(60);
        let now = Timestamp::now();
        assert!(guard.register("nonce-1", now));
        // Inside the window: rejected.
        assert!(!guard.register("nonce-1", Timestamp(now.0 + 59)));
        // Past the window: the entry has expired and the nonce is fresh again.
        assert!(guard.register("nonce-1", Timestamp(now.0 + 61)));
    }

    #[test]
    fn test_sweep_bounds_growth() {
        let guard = InMemoryReplayGuard::new(10);
        let base = Timestamp::now();
        for i in 0..100 {
            assert!(guard.register(&format!("nonce-{}", i), base));
        }
        assert_eq!(guard.tracked(), 100);

        // A registration past the window sweeps all 100 expired entries.
        assert!(guard.register("late", Timestamp(base.0 + 11)));
        assert_eq!(guard.tracked(), 1);
    }
}
