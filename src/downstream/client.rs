//! Retrying client over a [`Transport`].

use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::retry::{should_retry_status, RetryConfig};
use super::{DownstreamError, DownstreamRequest, DownstreamResponse, Transport, TransportError};
use crate::metrics;

/// Longest response excerpt written to logs
const LOG_EXCERPT_CHARS: usize = 200;

fn excerpt(body: &str) -> String {
    body.chars().take(LOG_EXCERPT_CHARS).collect()
}

/// Downstream client with bounded retries
#[derive(Debug, Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryConfig) -> Self {
        Self { transport, retry }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Call with the configured number of attempts.
    pub async fn call(
        &self,
        request: &DownstreamRequest,
    ) -> Result<DownstreamResponse, DownstreamError> {
        self.call_with_attempts(request, self.retry.max_attempts)
            .await
    }

    /// Call with at most `max_attempts` attempts.
    ///
    /// Dropping the returned future stops any further attempts.
    pub async fn call_with_attempts(
        &self,
        request: &DownstreamRequest,
        max_attempts: u32,
    ) -> Result<DownstreamResponse, DownstreamError> {
        let max_attempts = max_attempts.max(1);
        let mut backoff = self.retry.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.transport.send(request).await {
                Ok(response) if should_retry_status(response.status) => {
                    metrics::DOWNSTREAM_ATTEMPTS_TOTAL
                        .with_label_values(&["overloaded"])
                        .inc();
                    warn!(
                        status = response.status,
                        attempt,
                        body = %excerpt(&response.body),
                        "Downstream overloaded"
                    );
                    if attempt >= max_attempts {
                        error!(
                            status = response.status,
                            attempts = attempt,
                            "Downstream still overloaded after final attempt"
                        );
                        return Ok(response);
                    }
                }
                Ok(response) => {
                    metrics::DOWNSTREAM_ATTEMPTS_TOTAL
                        .with_label_values(&["ok"])
                        .inc();
                    if attempt > 1 {
                        info!(
                            status = response.status,
                            "Downstream call succeeded on attempt {} after {} retries",
                            attempt,
                            attempt - 1
                        );
                    }
                    return Ok(response);
                }
                Err(TransportError::Network(message)) => {
                    metrics::DOWNSTREAM_ATTEMPTS_TOTAL
                        .with_label_values(&["network_error"])
                        .inc();
                    warn!(attempt, error = %message, "Downstream network error");
                    if attempt >= max_attempts {
                        error!(attempts = attempt, error = %message, "Downstream unavailable");
                        return Err(DownstreamError::Transient {
                            attempts: attempt,
                            message,
                        });
                    }
                }
                Err(TransportError::MissingKey(name)) => {
                    metrics::DOWNSTREAM_ATTEMPTS_TOTAL
                        .with_label_values(&["fatal"])
                        .inc();
                    error!(key = %name, "Downstream API key missing");
                    return Err(DownstreamError::Misconfigured(format!(
                        "API key {} not available",
                        name
                    )));
                }
                Err(TransportError::Request(message)) => {
                    metrics::DOWNSTREAM_ATTEMPTS_TOTAL
                        .with_label_values(&["fatal"])
                        .inc();
                    error!(attempt, error = %message, "Downstream request failed");
                    return Err(DownstreamError::Fatal(message));
                }
            }

            let wait = backoff.next_wait();
            metrics::DOWNSTREAM_RETRY_DELAY_SECONDS.observe(wait.as_secs_f64());
            debug!(wait_ms = wait.as_millis() as u64, attempt, "Waiting before retry");
            sleep(wait).await;
        }
    }
}
