//! Sliding-window Rate Limiter
//!
//! Per-identity sliding window over an ordered set of request timestamps,
//! with escalating bans for identities that exceed it.
//!
//! Store layout per identity:
//!
//! - `ban:<id>`: live while banned; value is the ban's expiry (unix ms)
//! - `rl:<id>`: ordered set of `<now>-<uuid>` members scored by time
//! - `vio:<id>`: violation counter, kept for ten windows after the last one

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::config::RateLimitConfig;
use crate::clock::Clock;
use crate::store::{Backends, CoordinationStore, StoreError, WriteJournal};

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Identity is serving a ban
    Banned,
    /// This request pushed the window over its limit
    WindowExceeded,
}

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Window slots left after this request
    pub remaining: u64,

    /// Time until the identity may retry (if not allowed and known)
    pub retry_after: Option<Duration>,

    /// Reason for denial (if not allowed)
    pub reason: Option<DenyReason>,
}

impl RateLimitResult {
    /// Create an allowed result
    pub fn allowed(remaining: u64) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
            reason: None,
        }
    }

    /// Create a denied result
    pub fn denied(reason: DenyReason, retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after,
            reason: Some(reason),
        }
    }
}

/// Sliding-window rate limiter with escalating bans
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    backends: Backends,
    clock: Arc<dyn Clock>,
}

fn millis(duration: Duration) -> i64 {
    duration.as_millis().min(i64::MAX as u128) as i64
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: RateLimitConfig, backends: Backends, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            backends,
            clock,
        }
    }

    /// Limiter configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check and record one request from `identity`.
    ///
    /// Runs against the shared store, or against the local store with
    /// per-process precision when the shared store fails. If even the local
    /// store fails the request is allowed.
    pub async fn check(&self, identity: &str) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::allowed(u64::MAX);
        }

        let result = self
            .backends
            .with_fallback("rate_limit", |store| self.check_on(store, identity))
            .await;

        match result {
            Ok(result) => result,
            Err(e) => {
                error!(identity = %identity, error = %e, "Rate limiter unavailable");
                RateLimitResult::allowed(0)
            }
        }
    }

    async fn check_on(
        &self,
        store: &dyn CoordinationStore,
        identity: &str,
    ) -> Result<RateLimitResult, StoreError> {
        let now = self.clock.now_ms();
        let ban_key = format!("ban:{}", identity);

        // A banned identity consumes no window slot
        if let Some(until) = store.get(&ban_key).await? {
            let retry_after = until
                .parse::<i64>()
                .ok()
                .map(|until| Duration::from_millis(until.saturating_sub(now).max(0) as u64));
            debug!(identity = %identity, "Request from banned identity");
            return Ok(RateLimitResult::denied(DenyReason::Banned, retry_after));
        }

        let mut journal = WriteJournal::new();
        let result = self
            .record_on(store, &mut journal, identity, &ban_key, now)
            .await;
        journal.settle(store, result).await
    }

    /// Record the request in the window and ban on overflow. Writes go
    /// through `journal` so a failed step can take back the earlier ones.
    async fn record_on(
        &self,
        store: &dyn CoordinationStore,
        journal: &mut WriteJournal,
        identity: &str,
        ban_key: &str,
        now: i64,
    ) -> Result<RateLimitResult, StoreError> {
        let window_key = format!("rl:{}", identity);
        let member = format!("{}-{}", now, Uuid::new_v4());
        journal
            .add_to_ordered_set(store, &window_key, now, &member, self.config.window)
            .await?;
        store
            .remove_range_by_score(&window_key, i64::MIN, now - millis(self.config.window))
            .await?;
        let count = store.count_ordered_set(&window_key).await?;

        if count <= self.config.max_per_window {
            return Ok(RateLimitResult::allowed(self.config.max_per_window - count));
        }

        let violation_key = format!("vio:{}", identity);
        let violation_ttl = self.config.violation_ttl();
        let violations = journal
            .increment_by(store, &violation_key, 1, violation_ttl)
            .await?;
        store.expire(&violation_key, violation_ttl).await?;

        let ban = self.config.bans.duration_for(violations.max(1) as u64);
        let until = now.saturating_add(millis(ban));
        store.set(ban_key, &until.to_string(), ban).await?;

        warn!(
            identity = %identity,
            violations,
            ban_ms = millis(ban),
            backend = store.backend(),
            "Rate limit exceeded, identity banned"
        );

        Ok(RateLimitResult::denied(DenyReason::WindowExceeded, Some(ban)))
    }
}
