//! Quota Ledger
//!
//! Two-phase metering of usage units and requests per identity. A request
//! reserves an estimate up front; once the real consumption is known the
//! difference is applied with [`QuotaLedger::adjust`].
//!
//! Both counters are created with a TTL of one period. When the store
//! expires them the next reservation starts a fresh period at zero.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::config::QuotaConfig;
use crate::metrics;
use crate::store::{Backends, CoordinationStore, StoreError, WriteJournal};

/// Which limit a denied reservation would have crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaLimit {
    Units,
    Requests,
}

/// Outcome of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Counters now include the reservation
    Granted { units: i64, requests: i64 },
    /// Counters are unchanged
    Denied { limit: QuotaLimit },
}

impl Reservation {
    pub fn is_granted(&self) -> bool {
        matches!(self, Reservation::Granted { .. })
    }
}

/// Usage snapshot for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub units: i64,
    pub requests: i64,
    pub max_units: i64,
    pub max_requests: i64,
    pub period_ms: u64,
}

/// Approximate usage units for `text`: one per four characters, at least one
/// for non-empty text.
pub fn estimate_units(text: &str) -> i64 {
    let chars = text.chars().count() as i64;
    if chars == 0 {
        0
    } else {
        ((chars + 3) / 4).max(1)
    }
}

/// Quota ledger over the coordination store
#[derive(Debug, Clone)]
pub struct QuotaLedger {
    config: QuotaConfig,
    backends: Backends,
}

fn units_key(identity: &str) -> String {
    format!("quota:units:{}", identity)
}

fn requests_key(identity: &str) -> String {
    format!("quota:req:{}", identity)
}

impl QuotaLedger {
    /// Create a new quota ledger
    pub fn new(config: QuotaConfig, backends: Backends) -> Self {
        Self { config, backends }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn period(&self) -> Duration {
        self.config.period
    }

    /// Reserve `units` and `requests` for `identity`.
    ///
    /// Increments are atomic, so concurrent reservations never both succeed
    /// past a limit; a denied reservation takes back exactly what it added.
    /// If the shared store fails part way, whatever already landed there is
    /// taken back before the reservation is retried locally.
    pub async fn reserve(&self, identity: &str, units: i64, requests: i64) -> Reservation {
        let result = self
            .backends
            .with_fallback("quota", |store| {
                self.reserve_on(store, identity, units, requests)
            })
            .await;

        match result {
            Ok(reservation) => {
                if let Reservation::Granted { units, .. } = reservation {
                    metrics::QUOTA_UNITS_RESERVED_TOTAL.inc_by(units.max(0) as u64);
                }
                reservation
            }
            Err(e) => {
                error!(identity = %identity, error = %e, "Quota ledger unavailable");
                Reservation::Granted { units, requests }
            }
        }
    }

    async fn reserve_on(
        &self,
        store: &dyn CoordinationStore,
        identity: &str,
        units: i64,
        requests: i64,
    ) -> Result<Reservation, StoreError> {
        let mut journal = WriteJournal::new();
        let result = self
            .try_reserve(store, &mut journal, identity, units, requests)
            .await;
        journal.settle(store, result).await
    }

    async fn try_reserve(
        &self,
        store: &dyn CoordinationStore,
        journal: &mut WriteJournal,
        identity: &str,
        units: i64,
        requests: i64,
    ) -> Result<Reservation, StoreError> {
        let units_key = units_key(identity);
        let requests_key = requests_key(identity);
        let period = self.period();

        let total_units = journal
            .increment_by(store, &units_key, units, period)
            .await?;
        if total_units > self.config.max_units {
            journal
                .increment_by(store, &units_key, -units, period)
                .await?;
            warn!(identity = %identity, total_units, "Unit quota exceeded");
            return Ok(Reservation::Denied {
                limit: QuotaLimit::Units,
            });
        }

        let total_requests = journal
            .increment_by(store, &requests_key, requests, period)
            .await?;
        if total_requests > self.config.max_requests {
            journal
                .increment_by(store, &units_key, -units, period)
                .await?;
            journal
                .increment_by(store, &requests_key, -requests, period)
                .await?;
            warn!(identity = %identity, total_requests, "Request quota exceeded");
            return Ok(Reservation::Denied {
                limit: QuotaLimit::Requests,
            });
        }

        debug!(
            identity = %identity,
            units,
            total_units,
            total_requests,
            backend = store.backend(),
            "Quota reserved"
        );
        Ok(Reservation::Granted { units, requests })
    }

    /// Apply the difference between actual and reserved usage.
    ///
    /// Never denies and never revokes a granted reservation. Zero is a no-op.
    pub async fn adjust(&self, identity: &str, delta_units: i64) {
        if delta_units == 0 {
            return;
        }

        let key = units_key(identity);
        let result = self
            .backends
            .with_fallback("quota", |store| {
                let key = key.as_str();
                async move { store.increment_by(key, delta_units, self.period()).await }
            })
            .await;

        match result {
            Ok(total_units) => {
                info!(identity = %identity, delta_units, total_units, "Quota adjusted")
            }
            Err(e) => error!(identity = %identity, error = %e, "Quota adjustment lost"),
        }
    }

    /// Current usage for `identity`; counters below zero read as zero.
    pub async fn status(&self, identity: &str) -> QuotaStatus {
        let units_key = units_key(identity);
        let requests_key = requests_key(identity);

        let result = self
            .backends
            .with_fallback("quota", |store| {
                let units_key = units_key.as_str();
                let requests_key = requests_key.as_str();
                async move {
                    let units = store.get(units_key).await?;
                    let requests = store.get(requests_key).await?;
                    Ok::<_, StoreError>((units, requests))
                }
            })
            .await;

        let parse = |value: Option<String>| {
            value
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0)
                .max(0)
        };

        let (units, requests) = match result {
            Ok((units, requests)) => (parse(units), parse(requests)),
            Err(e) => {
                error!(identity = %identity, error = %e, "Quota status unavailable");
                (0, 0)
            }
        };

        QuotaStatus {
            units,
            requests,
            max_units: self.config.max_units,
            max_requests: self.config.max_requests,
            period_ms: self.config.period.as_millis() as u64,
        }
    }
}
