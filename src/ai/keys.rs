//! API key providers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;

/// Resolves a named API key
#[async_trait]
pub trait KeyProvider: Send + Sync + Debug {
    /// The key, or `None` when it is not available
    async fn get_key(&self, name: &str) -> Option<String>;
}

/// Reads keys from environment variables named after the key
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvKeyProvider;

#[async_trait]
impl KeyProvider for EnvKeyProvider {
    async fn get_key(&self, name: &str) -> Option<String> {
        std::env::var(name)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

/// Fixed set of keys
#[derive(Debug, Clone, Default)]
pub struct StaticKeyProvider {
    keys: HashMap<String, String>,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.insert(name.into(), key.into());
        self
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn get_key(&self, name: &str) -> Option<String> {
        self.keys.get(name).cloned()
    }
}
