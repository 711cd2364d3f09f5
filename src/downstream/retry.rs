//! Retry Policy
//!
//! Exponential backoff with additive jitter for downstream calls.
//!
//! # Schedule
//!
//! The first wait is `initial_delay`; each later base delay doubles up to
//! `max_delay`. Every wait adds a uniform jitter in `[0, jitter)`:
//!
//! ```text
//! wait(n)  = min(delay(n), max_delay) + U[0, jitter)
//! delay(0) = initial_delay
//! delay(n) = min(2 * delay(n-1), max_delay)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let config = RetryConfig::new()
//!     .max_attempts(4)
//!     .initial_delay(Duration::from_millis(500))
//!     .max_delay(Duration::from_secs(8));
//! ```

use rand::Rng;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,

    /// Base delay before the first retry
    pub initial_delay: Duration,

    /// Ceiling for the base delay
    pub max_delay: Duration,

    /// Exclusive upper bound of the random delay added to every wait
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(200),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of attempts (at least one)
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the base delay before the first retry
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the ceiling for the base delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter bound
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Start a fresh backoff schedule
    pub fn backoff(&self) -> Backoff {
        Backoff {
            delay: self.initial_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
        }
    }
}

/// Backoff schedule for one outbound call
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    max_delay: Duration,
    jitter: Duration,
}

impl Backoff {
    /// Wait before the next attempt; advances the schedule.
    pub fn next_wait(&mut self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };

        let wait = self.delay.min(self.max_delay) + jitter;
        self.delay = self.delay.saturating_mul(2).min(self.max_delay);
        wait
    }
}

/// Check if an HTTP status signals a transient overload
///
/// Retryable: 429 Too Many Requests and every 5xx.
/// Everything else is final.
pub fn should_retry_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}
