//! Nonce Ledger
//!
//! Single-use token issuance and replay detection. Every nonce, whether
//! issued here or observed on an inbound proof, is remembered for a fixed
//! window and then forgotten. Entries past their window are treated as unused
//! immediately and physically removed by [`NonceLedger::sweep_expired`].
//!
//! Forgetting is deliberate: it bounds memory. A swept value could in
//! principle be drawn again; with 2^53 candidates and a five minute window
//! the residual risk is accepted.

use freobus_core::{PhysicalClock, MAX_SAFE_NONCE};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Set of recently used nonces with per-entry expiry
pub struct NonceLedger {
    /// nonce -> epoch ms after which it is forgotten
    used: Mutex<HashMap<u64, u64>>,
    window: Duration,
    clock: Arc<dyn PhysicalClock>,
}

impl NonceLedger {
    /// Create a ledger remembering nonces for `window`
    pub fn new(window: Duration, clock: Arc<dyn PhysicalClock>) -> Self {
        Self {
            used: Mutex::new(HashMap::new()),
            window,
            clock,
        }
    }

    /// Retention window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Retention window in milliseconds, saturating at `u64::MAX`
    pub fn window_ms(&self) -> u64 {
        u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX)
    }

    fn expiry_from(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.window_ms())
    }

    /// Draw a fresh nonce in `[0, MAX_SAFE_NONCE]` and register it as used
    pub fn generate_nonce(&self) -> u64 {
        let mut rng = rand::thread_rng();
        let now = self.clock.now_ms();
        let mut used = self.used.lock();
        loop {
            let nonce = rng.gen_range(0..=MAX_SAFE_NONCE);
            match used.get(&nonce) {
                Some(&expires_at) if expires_at > now => {
                    trace!(nonce, "regenerating colliding nonce");
                }
                _ => {
                    used.insert(nonce, self.expiry_from(now));
                    return nonce;
                }
            }
        }
    }

    /// True if `nonce` is still inside its window
    pub fn is_used(&self, nonce: u64) -> bool {
        let now = self.clock.now_ms();
        self.used
            .lock()
            .get(&nonce)
            .is_some_and(|&expires_at| expires_at > now)
    }

    /// Register `nonce`; returns false if it was already live
    pub fn mark_used(&self, nonce: u64) -> bool {
        let now = self.clock.now_ms();
        let mut used = self.used.lock();
        match used.get(&nonce) {
            Some(&expires_at) if expires_at > now => false,
            _ => {
                used.insert(nonce, self.expiry_from(now));
                true
            }
        }
    }

    /// Forget every nonce past its window; returns how many were removed
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut used = self.used.lock();
        let before = used.len();
        used.retain(|_, expires_at| *expires_at > now);
        before - used.len()
    }

    /// Entries currently held, expired or not
    pub fn len(&self) -> usize {
        self.used.lock().len()
    }

    /// True if nothing is held
    pub fn is_empty(&self) -> bool {
        self.used.lock().is_empty()
    }
}

impl std::fmt::Debug for NonceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceLedger")
            .field("entries", &self.len())
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use freobus_testkit::ManualClock;
    use proptest::prelude::*;

    fn ledger() -> (NonceLedger, ManualClock) {
        let clock = ManualClock::default();
        let ledger = NonceLedger::new(Duration::from_secs(300), Arc::new(clock.clone()));
        (ledger, clock)
    }

    #[test]
    fn generated_nonces_are_registered_and_distinct() {
        let (ledger, _) = ledger();
        let first = ledger.generate_nonce();
        let second = ledger.generate_nonce();
        assert_ne!(first, second);
        assert!(ledger.is_used(first));
        assert!(ledger.is_used(second));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn mark_used_is_test_and_set() {
        let (ledger, _) = ledger();
        assert!(!ledger.is_used(12345));
        assert!(ledger.mark_used(12345));
        assert!(!ledger.mark_used(12345));
        assert!(ledger.is_used(12345));
    }

    #[test]
    fn nonces_expire_after_window() {
        let (ledger, clock) = ledger();
        let nonce = ledger.generate_nonce();
        ledger.mark_used(42);

        clock.advance(Duration::from_secs(299));
        assert!(ledger.is_used(nonce));
        assert_eq!(ledger.sweep_expired(), 0);

        clock.advance(Duration::from_secs(61));
        assert!(!ledger.is_used(nonce));
        assert!(!ledger.is_used(42));
        assert_eq!(ledger.sweep_expired(), 2);
        assert!(ledger.is_empty());
    }

    #[test]
    fn expired_nonce_can_be_marked_again() {
        let (ledger, clock) = ledger();
        assert!(ledger.mark_used(7));
        clock.advance(Duration::from_secs(301));
        assert!(ledger.mark_used(7));
        assert!(ledger.is_used(7));
    }

    #[test]
    fn oversized_window_saturates() {
        let clock = ManualClock::default();
        // 2^64 ms plus 384 ms
        let window = Duration::from_secs(18_446_744_073_709_552);
        let ledger = NonceLedger::new(window, Arc::new(clock.clone()));
        assert_eq!(ledger.window_ms(), u64::MAX);

        assert!(ledger.mark_used(9));
        clock.advance(Duration::from_secs(1));
        assert!(ledger.is_used(9));
    }

    proptest! {
        #[test]
        fn generated_nonces_stay_in_safe_range(_seed in 0u8..32) {
            let (ledger, _) = ledger();
            let nonce = ledger.generate_nonce();
            prop_assert!(nonce <= MAX_SAFE_NONCE);
            prop_assert!(ledger.is_used(nonce));
        }
    }
}
