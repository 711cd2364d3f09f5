//! Local Coordination Store
//!
//! Per-process fallback backend. State lives in one map behind a
//! `tokio::sync::RwLock`, so every operation is atomic within the process.
//! Expired entries are treated as absent on access; [`LocalStore::spawn_sweeper`]
//! reclaims their memory on a timer.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{CoordinationStore, StoreError};
use crate::clock::Clock;

/// Stored value kinds
#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Counter(i64),
    Ordered(BTreeSet<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map_or(true, |at| at > now_ms)
    }
}

/// In-process coordination store
#[derive(Debug, Clone)]
pub struct LocalStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

fn ttl_ms(ttl: Duration) -> i64 {
    ttl.as_millis().min(i64::MAX as u128) as i64
}

impl LocalStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Drop every expired entry. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Periodically purge expired entries until the handle is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = store.purge_expired().await;
                if removed > 0 {
                    debug!(removed, "Purged expired local store entries");
                }
            }
        })
    }
}

#[async_trait]
impl CoordinationStore for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(Entry {
                value: Value::Counter(n),
                ..
            }) => Ok(Some(n.to_string())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at_ms: Some(now.saturating_add(ttl_ms(ttl))),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at_ms: Some(now.saturating_add(ttl_ms(ttl))),
            },
        );
        Ok(true)
    }

    async fn increment_by(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;

        let (current, expires_at_ms) = match entries.get(key).filter(|e| e.is_live(now)) {
            None => (0, None),
            Some(entry) => {
                let current = match &entry.value {
                    Value::Counter(n) => *n,
                    Value::Text(text) => text
                        .parse::<i64>()
                        .map_err(|_| StoreError::WrongType(key.to_string()))?,
                    Value::Ordered(_) => return Err(StoreError::WrongType(key.to_string())),
                };
                (current, entry.expires_at_ms)
            }
        };

        let updated = current.saturating_add(delta);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Counter(updated),
                expires_at_ms: expires_at_ms.or(Some(now.saturating_add(ttl_ms(ttl)))),
            },
        );
        Ok(updated)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key).filter(|e| e.is_live(now)) {
            entry.expires_at_ms = Some(now.saturating_add(ttl_ms(ttl)));
        }
        Ok(())
    }

    async fn add_to_ordered_set(
        &self,
        key: &str,
        score: i64,
        member: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;

        let mut set = match entries.remove(key).filter(|e| e.is_live(now)) {
            None => BTreeSet::new(),
            Some(Entry {
                value: Value::Ordered(set),
                ..
            }) => set,
            Some(other) => {
                entries.insert(key.to_string(), other);
                return Err(StoreError::WrongType(key.to_string()));
            }
        };

        // Re-adding a member moves it to the new score
        set.retain(|(_, existing)| existing != member);
        set.insert((score, member.to_string()));

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Ordered(set),
                expires_at_ms: Some(now.saturating_add(ttl_ms(ttl))),
            },
        );
        Ok(())
    }

    async fn remove_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key).filter(|e| e.is_live(now)) {
            None => Ok(0),
            Some(Entry {
                value: Value::Ordered(set),
                ..
            }) => {
                let before = set.len();
                set.retain(|(score, _)| *score < min || *score > max);
                Ok((before - set.len()) as u64)
            }
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn remove_from_ordered_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key).filter(|e| e.is_live(now)) {
            None => Ok(false),
            Some(Entry {
                value: Value::Ordered(set),
                ..
            }) => {
                let before = set.len();
                set.retain(|(_, existing)| existing != member);
                Ok(set.len() < before)
            }
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn count_ordered_set(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(0),
            Some(Entry {
                value: Value::Ordered(set),
                ..
            }) => Ok(set.len() as u64),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
