//! bizcard-proxy Library
//!
//! Admission layer for a pay-per-call AI completion service: request
//! signatures with replay protection, sliding-window rate limits with
//! escalating bans, two-phase usage quotas and a retrying downstream client,
//! all coordinated through a shared store with a per-process fallback.

pub mod admission;
pub mod ai;
pub mod clock;
pub mod config;
pub mod downstream;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod signature;
pub mod store;
