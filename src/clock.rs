//! Wall-clock source for time-windowed state.
//!
//! Every component that reasons about windows, bans, periods or signature
//! freshness reads time through [`Clock`], so tests can drive time explicitly
//! with [`MockClock`] instead of sleeping.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Source of unix time in milliseconds.
pub trait Clock: Send + Sync + Debug {
    /// Current unix time in milliseconds.
    fn now_ms(&self) -> i64;
}

/// System clock backed by `chrono::Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock.
///
/// All clones share the same time value, so advancing one clone advances
/// every component holding another.
#[derive(Debug, Clone)]
pub struct MockClock {
    now_ms: Arc<AtomicI64>,
}

impl MockClock {
    /// Create a mock clock starting at `start_ms`.
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        self.now_ms
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    /// Set the clock to a specific unix time in milliseconds.
    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
