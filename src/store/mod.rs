//! Coordination Store
//!
//! Key/value-with-expiry, atomic counter and ordered-set primitives shared by
//! every stateful admission component.
//!
//! # Backends
//!
//! - [`RedisStore`]: shared across all proxy processes
//! - [`LocalStore`]: per-process maps with lazy expiry and a sweeper task
//!
//! The shared backend is chosen once, when [`Backends`] is built. Components
//! run each operation against the shared backend first and re-run it against
//! the local store when the shared call fails, so a store outage degrades
//! cross-process precision but never fails a request.
//!
//! Operations that write more than once record their writes in a
//! [`WriteJournal`]. When a later step fails, the journal takes back what
//! already landed before the operation is re-run elsewhere, so a partial
//! shared-store failure never leaves a charge behind.
//!
//! ```text
//! ┌──────────────┐   Ok    ┌──────────────┐
//! │  component   │ ──────▶ │  RedisStore  │
//! │  operation   │         └──────────────┘
//! │              │  Err    ┌──────────────┐
//! │              │ ──────▶ │  LocalStore  │
//! └──────────────┘         └──────────────┘
//! ```

pub mod local;
pub mod redis_store;

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::metrics;

pub use self::local::LocalStore;
pub use self::redis_store::{RedisStore, RedisStoreConfig};

/// Errors raised by a coordination store backend.
///
/// Never surfaced to callers of the proxy; a `StoreError` from the shared
/// backend always means "use the local fallback".
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend command failed (connection refused, protocol error, ...)
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Command did not complete within the configured bound
    #[error("Store operation timed out after {0}ms")]
    Timeout(u64),

    /// Key holds a value of a different kind than the operation expects
    #[error("Wrong value type at key {0}")]
    WrongType(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Key/value, counter and ordered-set operations with expiry.
///
/// Every write carries a TTL so state self-heals without an external sweep.
#[async_trait]
pub trait CoordinationStore: Send + Sync + Debug {
    /// Short backend name used in logs and metrics.
    fn backend(&self) -> &'static str;

    /// Read a value; absent when missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite a value with an expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Create a value only if no live value exists. Returns `true` when created.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Atomically add `delta` and return the new value.
    ///
    /// Creates the counter at `delta` if absent. `ttl` is attached when the
    /// key carries no expiry, which always holds for a freshly created key.
    async fn increment_by(&self, key: &str, delta: i64, ttl: Duration)
        -> Result<i64, StoreError>;

    /// Refresh the expiry of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Insert `member` with `score` and refresh the set's expiry.
    async fn add_to_ordered_set(
        &self,
        key: &str,
        score: i64,
        member: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Remove one member. Returns `true` when it was present.
    async fn remove_from_ordered_set(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Remove members with `min <= score <= max`. Returns the number removed.
    async fn remove_range_by_score(&self, key: &str, min: i64, max: i64)
        -> Result<u64, StoreError>;

    /// Number of members in an ordered set (0 when absent).
    async fn count_ordered_set(&self, key: &str) -> Result<u64, StoreError>;

    /// Liveness check.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Health of the shared backend as seen by `/health/redis`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedHealth {
    /// No shared backend configured
    Unconfigured,
    /// Shared backend answered a ping
    Healthy,
    /// Shared backend failed to answer
    Unavailable(String),
}

/// A write that can be taken back
#[derive(Debug)]
enum Undo {
    Increment {
        key: String,
        delta: i64,
        ttl: Duration,
    },
    Member {
        key: String,
        member: String,
    },
}

/// Writes made by one multi-step operation against one store.
///
/// Counter deltas on the same key are netted, so an operation that adds and
/// then reverts leaves nothing to undo.
#[derive(Debug, Default)]
pub struct WriteJournal {
    undo: Vec<Undo>,
}

impl WriteJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes still to be undone on failure.
    pub fn pending(&self) -> usize {
        self.undo.len()
    }

    /// `increment_by` on `store`, recorded on success.
    pub async fn increment_by(
        &mut self,
        store: &dyn CoordinationStore,
        key: &str,
        delta: i64,
        ttl: Duration,
    ) -> Result<i64, StoreError> {
        let value = store.increment_by(key, delta, ttl).await?;

        let existing = self.undo.iter().position(
            |undo| matches!(undo, Undo::Increment { key: k, .. } if k.as_str() == key),
        );
        match existing {
            Some(index) => {
                if let Undo::Increment { delta: net, .. } = &mut self.undo[index] {
                    *net = net.saturating_add(delta);
                    if *net == 0 {
                        self.undo.remove(index);
                    }
                }
            }
            None if delta != 0 => self.undo.push(Undo::Increment {
                key: key.to_string(),
                delta,
                ttl,
            }),
            None => {}
        }
        Ok(value)
    }

    /// `add_to_ordered_set` on `store`, recorded on success.
    pub async fn add_to_ordered_set(
        &mut self,
        store: &dyn CoordinationStore,
        key: &str,
        score: i64,
        member: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        store.add_to_ordered_set(key, score, member, ttl).await?;
        self.undo.push(Undo::Member {
            key: key.to_string(),
            member: member.to_string(),
        });
        Ok(())
    }

    /// Pass `result` through, undoing every recorded write first if it failed.
    pub async fn settle<T>(
        self,
        store: &dyn CoordinationStore,
        result: Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if result.is_err() {
            self.rollback(store).await;
        }
        result
    }

    /// Undo recorded writes, newest first. Best effort: failures are logged
    /// and the remaining writes are still attempted.
    pub async fn rollback(self, store: &dyn CoordinationStore) {
        for undo in self.undo.into_iter().rev() {
            let outcome = match &undo {
                Undo::Increment { key, delta, ttl } => store
                    .increment_by(key, delta.saturating_neg(), *ttl)
                    .await
                    .map(|_| ()),
                Undo::Member { key, member } => {
                    store.remove_from_ordered_set(key, member).await.map(|_| ())
                }
            };
            if let Err(e) = outcome {
                warn!(
                    backend = store.backend(),
                    write = ?undo,
                    error = %e,
                    "Could not undo partial store write"
                );
            }
        }
    }
}

/// The store backends available to the admission components.
#[derive(Debug, Clone)]
pub struct Backends {
    shared: Option<Arc<dyn CoordinationStore>>,
    local: Arc<LocalStore>,
}

impl Backends {
    /// Local-only operation (no shared store configured).
    pub fn local_only(local: LocalStore) -> Self {
        Self {
            shared: None,
            local: Arc::new(local),
        }
    }

    /// Shared store with local fallback.
    pub fn with_shared(shared: Arc<dyn CoordinationStore>, local: LocalStore) -> Self {
        Self {
            shared: Some(shared),
            local: Arc::new(local),
        }
    }

    /// The shared backend, if configured.
    pub fn shared(&self) -> Option<&dyn CoordinationStore> {
        self.shared.as_deref()
    }

    /// The per-process fallback store.
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Run `op` against the shared backend, falling back to the local store.
    ///
    /// Shared-backend errors are logged at warn level and counted; only a
    /// failure of the local store itself is returned.
    pub async fn with_fallback<'a, T, F, Fut>(
        &'a self,
        component: &'static str,
        op: F,
    ) -> Result<T, StoreError>
    where
        F: Fn(&'a dyn CoordinationStore) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if let Some(shared) = self.shared.as_deref() {
            match op(shared).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        component,
                        backend = shared.backend(),
                        error = %e,
                        "Shared store call failed, using local fallback"
                    );
                    metrics::STORE_FALLBACKS_TOTAL
                        .with_label_values(&[component])
                        .inc();
                }
            }
        }

        let local: &'a dyn CoordinationStore = self.local.as_ref();
        op(local).await
    }

    /// Ping the shared backend.
    pub async fn shared_health(&self) -> SharedHealth {
        match self.shared.as_deref() {
            None => SharedHealth::Unconfigured,
            Some(shared) => match shared.ping().await {
                Ok(()) => SharedHealth::Healthy,
                Err(e) => SharedHealth::Unavailable(e.to_string()),
            },
        }
    }
}
