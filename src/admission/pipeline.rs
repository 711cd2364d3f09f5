//! Admission Pipeline
//!
//! Runs every check a request must pass before it may cost money downstream,
//! in a fixed order:
//!
//! 1. Bearer token (when enabled)
//! 2. Signature and replay, over the raw body bytes
//! 3. Body validation and identity resolution
//! 4. Rate limit
//! 5. Quota reservation for the request's estimated units
//! 6. Downstream invocation through the resilient client
//! 7. Quota adjustment by the units actually consumed
//!
//! A failed invocation keeps its reservation; nothing is refunded.

use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::auth::{bearer_token, Principal, StaticTokenVerifier, TokenVerifier};
use super::error::{AdmissionError, ErrorKind};
use super::request::{parse_body, resolve_identity, CardRequest, InboundRequest, RequestKind};
use crate::clock::Clock;
use crate::config::{Config, ValidationConfig};
use crate::downstream::{ResilientClient, Transport};
use crate::metrics;
use crate::rate_limit::{QuotaLedger, QuotaLimit, QuotaStatus, RateLimiter, Reservation};
use crate::signature::{ReplayGuard, SignatureVerifier};
use crate::store::{Backends, SharedHealth};

/// A request that passed every admission check and holds a reservation
#[derive(Debug, Clone)]
pub struct Admission {
    pub identity: String,
    pub kind: RequestKind,
    pub request: CardRequest,
    pub principal: Option<Principal>,
    /// Units reserved against the identity's quota
    pub reserved_units: i64,
}

/// Result of a downstream invocation with the units it consumed
#[derive(Debug, Clone)]
pub struct Completion<T> {
    pub value: T,
    pub actual_units: i64,
}

impl<T> Completion<T> {
    pub fn new(value: T, actual_units: i64) -> Self {
        Self {
            value,
            actual_units,
        }
    }
}

/// Admission pipeline shared by all request handlers
#[derive(Debug, Clone)]
pub struct AdmissionPipeline {
    signature: Option<SignatureVerifier>,
    auth_enabled: bool,
    tokens: Option<Arc<dyn TokenVerifier>>,
    limiter: RateLimiter,
    ledger: QuotaLedger,
    client: ResilientClient,
    validation: ValidationConfig,
    backends: Backends,
}

impl AdmissionPipeline {
    /// Build every component from configuration over the given backends.
    pub fn from_config(
        config: &Config,
        backends: Backends,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let signature = config.signature.is_enabled().then(|| {
            SignatureVerifier::new(
                config.signature.secrets(),
                config.signature.ttl(),
                ReplayGuard::new(backends.clone()),
                clock.clone(),
            )
        });

        let static_tokens = StaticTokenVerifier::new(config.auth.app_tokens.clone());
        let tokens = (!static_tokens.is_empty())
            .then(|| Arc::new(static_tokens) as Arc<dyn TokenVerifier>);

        Self {
            signature,
            auth_enabled: config.auth.enabled,
            tokens,
            limiter: RateLimiter::new(config.rate_limit.limits(), backends.clone(), clock),
            ledger: QuotaLedger::new(config.quota.quota(), backends.clone()),
            client: ResilientClient::new(transport, config.retry.retry()),
            validation: config.validation.clone(),
            backends,
        }
    }

    /// Replace the token verifier (e.g. with an identity-provider client).
    pub fn with_token_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.tokens = Some(verifier);
        self
    }

    pub fn signature_enabled(&self) -> bool {
        self.signature.is_some()
    }

    /// Run the checks up to and including quota reservation.
    ///
    /// Crate-private: outside callers go through [`AdmissionPipeline::run`]
    /// so every reservation is settled.
    pub(crate) async fn admit(
        &self,
        inbound: &InboundRequest,
        kind: RequestKind,
    ) -> Result<Admission, AdmissionError> {
        match self.try_admit(inbound, kind).await {
            Ok(admission) => {
                metrics::ADMISSION_DECISIONS_TOTAL
                    .with_label_values(&["admitted"])
                    .inc();
                info!(
                    identity = %admission.identity,
                    kind = kind.as_str(),
                    reserved_units = admission.reserved_units,
                    "Request admitted"
                );
                Ok(admission)
            }
            Err(e) => {
                metrics::ADMISSION_DECISIONS_TOTAL
                    .with_label_values(&[e.kind()])
                    .inc();
                log_failure(&e, kind);
                Err(e)
            }
        }
    }

    async fn try_admit(
        &self,
        inbound: &InboundRequest,
        kind: RequestKind,
    ) -> Result<Admission, AdmissionError> {
        let principal = self.authenticate(inbound).await?;

        if let Some(verifier) = &self.signature {
            verifier
                .verify(inbound.signature.as_deref(), &inbound.body)
                .await?;
        }

        let request = parse_body(&inbound.body, kind, &self.validation)?;
        let identity = resolve_identity(
            request.session_id.as_deref(),
            principal.as_ref().map(|p| p.user_id.as_str()),
            inbound.client_ip,
        );

        let limit = self.limiter.check(&identity).await;
        if !limit.allowed {
            return Err(AdmissionError::RateLimited {
                retry_after: limit.retry_after,
            });
        }

        let estimate = kind.estimate(&request);
        match self.ledger.reserve(&identity, estimate, 1).await {
            Reservation::Granted { .. } => {}
            Reservation::Denied { limit } => {
                let limit = match limit {
                    QuotaLimit::Units => "units",
                    QuotaLimit::Requests => "requests",
                };
                info!(identity = %identity, limit, "Quota exhausted");
                return Err(AdmissionError::QuotaExceeded);
            }
        }

        Ok(Admission {
            identity,
            kind,
            request,
            principal,
            reserved_units: estimate,
        })
    }

    async fn authenticate(
        &self,
        inbound: &InboundRequest,
    ) -> Result<Option<Principal>, AdmissionError> {
        if !self.auth_enabled {
            return Ok(None);
        }
        let verifier = self.tokens.as_ref().ok_or_else(|| {
            AdmissionError::Misconfigured("token auth enabled without a token verifier".to_string())
        })?;
        let token = bearer_token(inbound.authorization.as_deref())?;
        Ok(Some(verifier.verify(token).await?))
    }

    /// Admit the request, invoke downstream and settle the quota.
    ///
    /// `invoke` receives the admission and a handle to the resilient client;
    /// it reports the units it actually consumed in its [`Completion`].
    pub async fn run<T, F, Fut>(
        &self,
        inbound: &InboundRequest,
        kind: RequestKind,
        invoke: F,
    ) -> Result<T, AdmissionError>
    where
        F: FnOnce(Admission, ResilientClient) -> Fut,
        Fut: Future<Output = Result<Completion<T>, AdmissionError>>,
    {
        let admission = self.admit(inbound, kind).await?;
        let identity = admission.identity.clone();
        let reserved = admission.reserved_units;

        match invoke(admission, self.client.clone()).await {
            Ok(completion) => {
                self.ledger
                    .adjust(&identity, completion.actual_units - reserved)
                    .await;
                Ok(completion.value)
            }
            Err(e) => {
                // Reservation stands
                log_failure(&e, kind);
                Err(e)
            }
        }
    }

    /// Current quota consumption for an identity.
    pub async fn quota_status(&self, identity: &str) -> QuotaStatus {
        self.ledger.status(identity).await
    }

    /// Reachability of the shared store.
    pub async fn store_health(&self) -> SharedHealth {
        self.backends.shared_health().await
    }
}

fn log_failure(e: &AdmissionError, kind: RequestKind) {
    match e.category() {
        ErrorKind::Configuration | ErrorKind::Downstream => {
            error!(error = %e, kind = kind.as_str(), "Request failed")
        }
        ErrorKind::Validation | ErrorKind::Auth | ErrorKind::Admission => {
            warn!(reason = e.kind(), kind = kind.as_str(), "Request rejected")
        }
    }
}
