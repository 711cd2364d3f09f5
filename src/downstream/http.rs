//! HTTP Transport
//!
//! Posts JSON request bodies to the AI service endpoint with `reqwest`.
//!
//! # Configuration
//!
//! - **endpoint**: generateContent URL, without the key
//! - **key_name**: name resolved through the [`KeyProvider`] on every send;
//!   the key travels as the `key` query parameter
//! - **timeout**: per-attempt timeout (default: 30 seconds)
//!
//! # Example
//!
//! ```ignore
//! let transport = HttpTransport::new(endpoint, "GEMINI_API_KEY", Arc::new(EnvKeyProvider))?
//!     .with_timeout(Duration::from_secs(10))?;
//! let client = ResilientClient::new(Arc::new(transport), RetryConfig::default());
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{DownstreamRequest, DownstreamResponse, Transport, TransportError};
use crate::ai::KeyProvider;

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport for the AI service
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Reqwest HTTP client
    client: reqwest::Client,

    /// Endpoint URL
    endpoint: String,

    /// API key name
    key_name: String,

    keys: Arc<dyn KeyProvider>,

    /// Request timeout
    timeout: Duration,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_builder() {
        TransportError::Request(err.to_string())
    } else {
        // connect, timeout, reset, body read
        TransportError::Network(err.to_string())
    }
}

impl HttpTransport {
    /// Create a new HTTP transport
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (TLS backend
    /// initialisation).
    pub fn new(
        endpoint: impl Into<String>,
        key_name: impl Into<String>,
        keys: Arc<dyn KeyProvider>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(DEFAULT_TIMEOUT)?,
            endpoint: endpoint.into(),
            key_name: key_name.into(),
            keys,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, reqwest::Error> {
        self.client = build_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn url_with_key(&self, key: &str) -> Result<reqwest::Url, TransportError> {
        reqwest::Url::parse_with_params(&self.endpoint, &[("key", key)])
            .map_err(|e| TransportError::Request(format!("Invalid endpoint: {}", e)))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &DownstreamRequest,
    ) -> Result<DownstreamResponse, TransportError> {
        let key = self
            .keys
            .get_key(&self.key_name)
            .await
            .ok_or_else(|| TransportError::MissingKey(self.key_name.clone()))?;
        let url = self.url_with_key(&key)?;

        tracing::debug!(endpoint = %self.endpoint, "Sending downstream request");

        let response = self
            .client
            .post(url)
            .json(&request.body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        Ok(DownstreamResponse { status, body })
    }
}
