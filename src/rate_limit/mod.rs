//! Rate Limiting and Quota Management Module
//!
//! Per-identity admission limits backed by the coordination store.
//!
//! # Features
//!
//! - Sliding-window rate limit over an ordered set of request timestamps
//! - Escalating bans (`base * 2^(violations-1)`, capped) for repeat offenders
//! - Two-phase usage quota: reserve an estimate, adjust with actual usage
//! - Local-store fallback with per-process precision when the shared store fails
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Admission Pipeline                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐      ┌──────────────────────┐     │
//! │  │     RateLimiter      │      │     QuotaLedger      │     │
//! │  │  ban / window / vio  │      │ units / requests     │     │
//! │  └──────────────────────┘      └──────────────────────┘     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │        Coordination Store (shared + local)           │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod limiter;
pub mod quota;

pub use config::{BanConfig, QuotaConfig, RateLimitConfig};
pub use limiter::{DenyReason, RateLimitResult, RateLimiter};
pub use quota::{estimate_units, QuotaLedger, QuotaLimit, QuotaStatus, Reservation};
