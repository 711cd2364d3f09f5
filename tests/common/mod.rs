//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bizcard_proxy::admission::{
    Admission, AdmissionError, AdmissionPipeline, Completion, InboundRequest, RequestKind,
};
use bizcard_proxy::clock::MockClock;
use bizcard_proxy::config::Config;
use bizcard_proxy::downstream::{DownstreamRequest, DownstreamResponse, Transport, TransportError};
use bizcard_proxy::store::{Backends, CoordinationStore, LocalStore, StoreError};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const START_MS: i64 = 1_700_000_000_000;

/// generateContent response body carrying `text`
pub fn model_reply(text: &str) -> String {
    json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}).to_string()
}

/// Transport answering from a queue of canned responses
#[derive(Debug, Default)]
pub struct CannedTransport {
    replies: Mutex<VecDeque<(u16, String)>>,
    calls: AtomicUsize,
}

impl CannedTransport {
    /// Answer each call with the next model reply, in order
    pub fn replying(texts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(texts.iter().map(|t| (200, model_reply(t))).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for CannedTransport {
    async fn send(
        &self,
        _request: &DownstreamRequest,
    ) -> Result<DownstreamResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (status, body) = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((500, "no reply queued".to_string()));
        Ok(DownstreamResponse { status, body })
    }
}

/// Shared backend that is always down
#[derive(Debug, Default)]
pub struct OfflineStore {
    pub calls: AtomicUsize,
}

impl OfflineStore {
    fn fail<T>(&self) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Backend("connection refused".to_string()))
    }
}

#[async_trait]
impl CoordinationStore for OfflineStore {
    fn backend(&self) -> &'static str {
        "offline"
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
        self.fail()
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.fail()
    }

    async fn increment_by(
        &self,
        _key: &str,
        _delta: i64,
        _ttl: Duration,
    ) -> Result<i64, StoreError> {
        self.fail()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
        self.fail()
    }

    async fn add_to_ordered_set(
        &self,
        _key: &str,
        _score: i64,
        _member: &str,
        _ttl: Duration,
    ) -> Result<(), StoreError> {
        self.fail()
    }

    async fn remove_from_ordered_set(&self, _key: &str, _member: &str) -> Result<bool, StoreError> {
        self.fail()
    }

    async fn remove_range_by_score(
        &self,
        _key: &str,
        _min: i64,
        _max: i64,
    ) -> Result<u64, StoreError> {
        self.fail()
    }

    async fn count_ordered_set(&self, _key: &str) -> Result<u64, StoreError> {
        self.fail()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.fail()
    }
}

/// Defaults with signatures off and a single downstream attempt
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.signature.enabled = Some(false);
    config.retry.max_attempts = 1;
    config
}

pub fn local_backends(clock: &MockClock) -> Backends {
    Backends::local_only(LocalStore::new(Arc::new(clock.clone())))
}

pub fn pipeline(
    config: &Config,
    backends: Backends,
    clock: &MockClock,
    transport: Arc<CannedTransport>,
) -> AdmissionPipeline {
    AdmissionPipeline::from_config(config, backends, Arc::new(clock.clone()), transport)
}

/// Admit `inbound` through the full pipeline with an invocation that makes
/// no downstream call and consumes exactly its reservation.
pub async fn admit(
    pipeline: &AdmissionPipeline,
    inbound: &InboundRequest,
    kind: RequestKind,
) -> Result<Admission, AdmissionError> {
    pipeline
        .run(inbound, kind, |admission, _client| async move {
            let reserved = admission.reserved_units;
            Ok(Completion::new(admission, reserved))
        })
        .await
}
