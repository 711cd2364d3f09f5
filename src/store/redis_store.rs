//! Redis-backed coordination store.
//!
//! Shares admission state across every proxy process. Counters, replay
//! markers and window sets map directly onto Redis primitives:
//!
//! - `increment_by`: `INCRBY` + conditional `PEXPIRE` in one Lua script
//! - `set_if_absent`: `SET NX PX`
//! - ordered sets: `ZADD` / `ZREM` / `ZREMRANGEBYSCORE` / `ZCARD`
//!
//! Every command is bounded by `command_timeout`; a slow or unreachable
//! server surfaces as [`StoreError::Timeout`] and the caller falls back to
//! its local store.
//!
//! The connection is established on first use. Until a connect succeeds,
//! every call retries it and fails with a [`StoreError`], so a process that
//! starts during an outage joins the shared state once Redis is back.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Script};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

use super::{CoordinationStore, StoreError};

/// Atomically add ARGV[1] to KEYS[1] and attach a PX expiry of ARGV[2] when
/// the key has none.
const INCREMENT_SCRIPT: &str = r#"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
if redis.call('PTTL', KEYS[1]) < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return value
"#;

/// Configuration for Redis storage.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix prepended to every key (default: empty)
    pub key_prefix: String,
    /// Upper bound for connecting and for each command (default: 500ms)
    pub command_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            command_timeout: Duration::from_millis(500),
        }
    }
}

/// Redis coordination store
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    connection: Arc<OnceCell<ConnectionManager>>,
    config: RedisStoreConfig,
    increment_script: Script,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .field("connected", &self.connection.initialized())
            .finish_non_exhaustive()
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    // PX rejects zero
    (ttl.as_millis().min(u64::MAX as u128) as u64).max(1)
}

impl RedisStore {
    /// Create a store for `url` without connecting.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    /// * `config` - Storage configuration
    ///
    /// # Errors
    /// Returns error if the URL is invalid.
    pub fn open(url: &str, config: RedisStoreConfig) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(url)?,
            connection: Arc::new(OnceCell::new()),
            config,
            increment_script: Script::new(INCREMENT_SCRIPT),
        })
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// The shared connection, connecting first if needed.
    ///
    /// A failed or timed-out connect leaves the store unconnected; the next
    /// call tries again. Once connected, `ConnectionManager` reconnects on
    /// its own.
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let timeout_ms = self.config.command_timeout.as_millis() as u64;
        let connection = tokio::time::timeout(
            self.config.command_timeout,
            self.connection.get_or_try_init(|| async {
                let connection = ConnectionManager::new(self.client.clone()).await?;
                info!("Connected to shared store");
                Ok::<_, StoreError>(connection)
            }),
        )
        .await
        .map_err(|_| StoreError::Timeout(timeout_ms))??;
        Ok(connection.clone())
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn bounded<T>(
        &self,
        command: impl Future<Output = RedisResult<T>>,
    ) -> Result<T, StoreError> {
        let timeout_ms = self.config.command_timeout.as_millis() as u64;
        tokio::time::timeout(self.config.command_timeout, command)
            .await
            .map_err(|_| StoreError::Timeout(timeout_ms))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        self.bounded(async move {
            let value: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        self.bounded(async move {
            let _: () = redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        self.bounded(async move {
            let reply: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms(ttl))
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(reply.is_some())
        })
        .await
    }

    async fn increment_by(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        let script = &self.increment_script;
        self.bounded(async move {
            let value: i64 = script
                .key(&key)
                .arg(delta)
                .arg(ttl_ms(ttl))
                .invoke_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(value)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        self.bounded(async move {
            let _: i64 = redis::cmd("PEXPIRE")
                .arg(&key)
                .arg(ttl_ms(ttl))
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }

    async fn add_to_ordered_set(
        &self,
        key: &str,
        score: i64,
        member: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        self.bounded(async move {
            let _: () = redis::pipe()
                .atomic()
                .cmd("ZADD")
                .arg(&key)
                .arg(score)
                .arg(member)
                .ignore()
                .cmd("PEXPIRE")
                .arg(&key)
                .arg(ttl_ms(ttl))
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }

    async fn remove_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        self.bounded(async move {
            let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
                .arg(&key)
                .arg(min)
                .arg(max)
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(removed)
        })
        .await
    }

    async fn remove_from_ordered_set(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        self.bounded(async move {
            let removed: u64 = redis::cmd("ZREM")
                .arg(&key)
                .arg(member)
                .query_async(&mut conn)
                .await?;
            Ok::<_, redis::RedisError>(removed > 0)
        })
        .await
    }

    async fn count_ordered_set(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let key = self.key(key);
        self.bounded(async move {
            let count: u64 = redis::cmd("ZCARD").arg(&key).query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(count)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        self.bounded(async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }
}
