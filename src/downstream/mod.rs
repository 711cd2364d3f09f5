//! Resilient Downstream Client
//!
//! Calls the pay-per-call AI service through a [`Transport`], retrying
//! transient failures with exponential backoff and jitter.
//!
//! # Failure classes
//!
//! - **Overload** (HTTP 429 or 5xx): retried; after the last attempt the last
//!   response is returned so the caller sees the status
//! - **Network** (connect, timeout, reset): retried; after the last attempt
//!   [`DownstreamError::Transient`] is returned
//! - **Everything else** (request build errors, other 4xx): returned at once
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   call()   ┌──────────────────┐   send()   ┌───────────────┐
//! │ request handler │ ─────────▶ │  ResilientClient │ ─────────▶ │   Transport   │
//! └─────────────────┘            │  (retry/backoff) │            │ (reqwest/mock)│
//!                                └──────────────────┘            └───────────────┘
//! ```

pub mod client;
pub mod http;
pub mod retry;

use async_trait::async_trait;
use std::fmt::Debug;

pub use client::ResilientClient;
pub use http::HttpTransport;
pub use retry::{should_retry_status, Backoff, RetryConfig};

/// Outbound request: a JSON body posted to the configured endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamRequest {
    pub body: serde_json::Value,
}

impl DownstreamRequest {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }
}

/// Response as received from the downstream service
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamResponse {
    pub status: u16,
    pub body: String,
}

impl DownstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, if it is JSON
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Errors reported by a single transport attempt
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Connect, timeout or reset; worth retrying
    #[error("Network error: {0}")]
    Network(String),

    /// Request could not be built or sent as specified; never retried
    #[error("Request error: {0}")]
    Request(String),

    /// API key unavailable
    #[error("Missing API key: {0}")]
    MissingKey(String),
}

/// Errors returned by [`ResilientClient::call`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownstreamError {
    /// Network failures persisted through every attempt
    #[error("Downstream unavailable after {attempts} attempts: {message}")]
    Transient { attempts: u32, message: String },

    /// Non-retryable failure
    #[error("Downstream request failed: {0}")]
    Fatal(String),

    /// Downstream credentials are not configured
    #[error("Downstream misconfigured: {0}")]
    Misconfigured(String),
}

/// One attempt against the downstream service
///
/// Each call must be bounded by its own timeout.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn send(&self, request: &DownstreamRequest)
        -> Result<DownstreamResponse, TransportError>;
}
