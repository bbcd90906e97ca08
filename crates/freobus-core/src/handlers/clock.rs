//! Clock handlers.

use crate::effects::PhysicalClock;
use std::time::{SystemTime, UNIX_EPOCH};

fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Reads the operating system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl PhysicalClock for SystemClock {
    fn now_ms(&self) -> u64 {
        system_now_ms()
    }
}

/// Wall clock anchored once and advanced by the Tokio timer.
///
/// Never moves backwards, and follows `tokio::time::pause`/`advance` so
/// timer-driven behaviour (inactivity, nonce windows, backoff) can be tested
/// without waiting.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor_ms: u64,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor at the current system time
    pub fn new() -> Self {
        Self::anchored_at(system_now_ms())
    }

    /// Anchor at an explicit epoch time
    pub fn anchored_at(anchor_ms: u64) -> Self {
        Self {
            anchor_ms,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicalClock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.anchor_ms
            .saturating_add(self.anchor.elapsed().as_millis() as u64)
    }
}
