//! Physical time effect.

use std::sync::Arc;
use std::time::Duration;

/// Wall-clock source in epoch milliseconds.
///
/// Kept synchronous so callers can read the time while holding a state lock.
pub trait PhysicalClock: Send + Sync {
    /// Current time in epoch milliseconds
    fn now_ms(&self) -> u64;

    /// Milliseconds elapsed since `earlier_ms`, zero if the clock moved back
    fn elapsed_since(&self, earlier_ms: u64) -> Duration {
        Duration::from_millis(self.now_ms().saturating_sub(earlier_ms))
    }
}

impl<T: PhysicalClock + ?Sized> PhysicalClock for Arc<T> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}
