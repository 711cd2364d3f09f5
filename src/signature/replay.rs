//! Replay Guard
//!
//! Remembers every accepted signature digest until its TTL elapses so the
//! same signed request cannot be admitted twice.

use std::time::Duration;
use tracing::error;

use crate::store::Backends;

/// Minimum lifetime of a replay record
const MIN_REPLAY_TTL: Duration = Duration::from_secs(1);

/// Outcome of a replay check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStatus {
    /// First sighting; a record now blocks reuse
    Fresh,
    /// A live record already exists for this digest
    Replayed,
}

/// Replay guard over the coordination store
#[derive(Debug, Clone)]
pub struct ReplayGuard {
    backends: Backends,
}

impl ReplayGuard {
    /// Create a replay guard.
    pub fn new(backends: Backends) -> Self {
        Self { backends }
    }

    fn key(matched_hash: &str) -> String {
        format!("sig:{}", matched_hash)
    }

    /// Record `matched_hash` unless a live record already exists.
    ///
    /// Check and insert are one atomic `set_if_absent`, so two concurrent
    /// submissions of the same signature cannot both be `Fresh` on one backend.
    pub async fn check_and_record(&self, matched_hash: &str, ttl: Duration) -> ReplayStatus {
        let key = Self::key(matched_hash);
        let ttl = ttl.max(MIN_REPLAY_TTL);

        let created = self
            .backends
            .with_fallback("replay", |store| {
                let key = key.as_str();
                async move { store.set_if_absent(key, "1", ttl).await }
            })
            .await;

        match created {
            Ok(true) => ReplayStatus::Fresh,
            Ok(false) => ReplayStatus::Replayed,
            Err(e) => {
                // Availability first: an unusable local store admits the request
                error!(error = %e, "Replay guard unavailable");
                ReplayStatus::Fresh
            }
        }
    }
}
