//! Rate Limit Configuration
//!
//! Limits for the sliding-window limiter, its escalating bans and the usage
//! quota.

use std::time::Duration;

/// Default rate limits
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_PER_WINDOW: u64 = 30; // requests per window
pub const DEFAULT_BAN_BASE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_BAN_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// Default quota limits
pub const DEFAULT_QUOTA_MAX_UNITS: i64 = 100_000; // units per period
pub const DEFAULT_QUOTA_MAX_REQUESTS: i64 = 1000; // requests per period
pub const DEFAULT_QUOTA_PERIOD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Violation counters outlive the window by this factor
pub const VIOLATION_TTL_FACTOR: u32 = 10;

/// Sliding-window limiter configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,

    /// Window length
    pub window: Duration,

    /// Requests admitted per window
    pub max_per_window: u64,

    /// Escalating ban policy
    pub bans: BanConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: DEFAULT_WINDOW,
            max_per_window: DEFAULT_MAX_PER_WINDOW,
            bans: BanConfig::default(),
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable rate limiting (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Lifetime of the violation counter
    pub fn violation_ttl(&self) -> Duration {
        self.window.saturating_mul(VIOLATION_TTL_FACTOR)
    }
}

/// Escalating ban policy
#[derive(Debug, Clone, PartialEq)]
pub struct BanConfig {
    /// Ban length for the first violation
    pub base: Duration,

    /// Upper bound on any ban
    pub max: Duration,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BAN_BASE,
            max: DEFAULT_BAN_MAX,
        }
    }
}

impl BanConfig {
    /// Ban length after `violations` violations: `min(base * 2^(v-1), max)`.
    pub fn duration_for(&self, violations: u64) -> Duration {
        let factor = 1u32 << violations.saturating_sub(1).min(31);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |ban| ban.min(self.max))
    }
}

/// Usage quota configuration
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaConfig {
    /// Usage units per period
    pub max_units: i64,

    /// Requests per period
    pub max_requests: i64,

    /// Period length; counters expire this long after creation
    pub period: Duration,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_units: DEFAULT_QUOTA_MAX_UNITS,
            max_requests: DEFAULT_QUOTA_MAX_REQUESTS,
            period: DEFAULT_QUOTA_PERIOD,
        }
    }
}
