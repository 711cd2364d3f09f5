// Configuration File Support
//
// One validated configuration value for the admission proxy.
// Supports TOML format with environment variable overrides.
// The default file is ./bizcard-proxy.toml; a missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::downstream::RetryConfig;
use crate::rate_limit::{BanConfig, QuotaConfig, RateLimitConfig};

/// Default configuration file name, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "bizcard-proxy.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// HTTP listener
    pub server: ServerConfig,

    /// Coordination store backends
    pub store: StoreConfig,

    /// Request signatures
    pub signature: SignatureConfig,

    /// Bearer token authentication
    pub auth: AuthConfig,

    /// Sliding-window rate limit and bans
    pub rate_limit: RateLimitSection,

    /// Usage quota
    pub quota: QuotaSection,

    /// Downstream retry policy
    pub retry: RetrySection,

    /// Request body limits
    pub validation: ValidationConfig,

    /// Downstream AI service
    pub downstream: DownstreamConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,

    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,

    /// Browser origins allowed by CORS; any origin when empty
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            max_body_bytes: 128 * 1024,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parsed listen address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.bind))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Shared store URL; local-only when absent
    pub redis_url: Option<String>,

    /// Upper bound for each shared store command
    pub command_timeout_ms: u64,

    /// How often the local store purges expired entries
    pub sweep_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            command_timeout_ms: 500,
            sweep_interval_ms: 30_000,
        }
    }
}

/// Request signature configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignatureConfig {
    /// Require signatures; when unset, required iff any secret is configured
    pub enabled: Option<bool>,

    /// Header carrying `<timestamp>:<hex>`
    pub header: String,

    /// Accepted clock distance and replay record lifetime
    pub ttl_ms: u64,

    /// Current signing secret
    pub secret: Option<String>,

    /// Secret being rotated out
    pub previous_secret: Option<String>,

    /// Further accepted secrets
    pub alternate_secrets: Vec<String>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            enabled: None,
            header: "x-proxy-signature".to_string(),
            ttl_ms: 120_000,
            secret: None,
            previous_secret: None,
            alternate_secrets: Vec::new(),
        }
    }
}

impl SignatureConfig {
    /// Candidate secrets in verification order: current, previous, then
    /// alternates. Blank entries and duplicates are dropped.
    pub fn secrets(&self) -> Vec<String> {
        let mut secrets: Vec<String> = Vec::new();
        let candidates = self
            .secret
            .iter()
            .chain(self.previous_secret.iter())
            .chain(self.alternate_secrets.iter());
        for candidate in candidates {
            let candidate = candidate.trim();
            if !candidate.is_empty() && !secrets.iter().any(|s| s == candidate) {
                secrets.push(candidate.to_string());
            }
        }
        secrets
    }

    /// Whether signatures are enforced
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or_else(|| !self.secrets().is_empty())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Bearer token configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Require `Authorization: Bearer <token>`
    pub enabled: bool,

    /// Accepted app tokens
    pub app_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub window_ms: u64,
    pub max_per_window: u64,
    pub ban_base_ms: u64,
    pub ban_max_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let limits = RateLimitConfig::default();
        let bans = BanConfig::default();
        Self {
            enabled: limits.enabled,
            window_ms: limits.window.as_millis() as u64,
            max_per_window: limits.max_per_window,
            ban_base_ms: bans.base.as_millis() as u64,
            ban_max_ms: bans.max.as_millis() as u64,
        }
    }
}

impl RateLimitSection {
    pub fn limits(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.enabled,
            window: Duration::from_millis(self.window_ms),
            max_per_window: self.max_per_window,
            bans: BanConfig {
                base: Duration::from_millis(self.ban_base_ms),
                max: Duration::from_millis(self.ban_max_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuotaSection {
    pub max_units: i64,
    pub max_requests: i64,
    pub period_ms: u64,
}

impl Default for QuotaSection {
    fn default() -> Self {
        let quota = QuotaConfig::default();
        Self {
            max_units: quota.max_units,
            max_requests: quota.max_requests,
            period_ms: quota.period.as_millis() as u64,
        }
    }
}

impl QuotaSection {
    pub fn quota(&self) -> QuotaConfig {
        QuotaConfig {
            max_units: self.max_units,
            max_requests: self.max_requests,
            period: Duration::from_millis(self.period_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_delay_ms: retry.initial_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            jitter_ms: retry.jitter.as_millis() as u64,
        }
    }
}

impl RetrySection {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new()
            .max_attempts(self.max_attempts)
            .initial_delay(Duration::from_millis(self.initial_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .jitter(Duration::from_millis(self.jitter_ms))
    }
}

/// Request body limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_raw_text_len: usize,
    pub max_template_headers: usize,
    pub max_template_header_len: usize,
    pub max_body_keys: usize,
    pub max_session_id_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_raw_text_len: 4000,
            max_template_headers: 40,
            max_template_header_len: 64,
            max_body_keys: 20,
            max_session_id_len: 256,
        }
    }
}

/// Downstream AI service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownstreamConfig {
    /// generateContent endpoint; the API key is appended as `key=`
    pub endpoint: String,

    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,

    /// Name of the API key handed to the key provider
    pub api_key_name: String,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
            timeout_secs: 30,
            api_key_name: "GEMINI_API_KEY".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether to serve /metrics
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load configuration from `./bizcard-proxy.toml`
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment overrides are applied whether or not the file exists, and
    /// the result is validated once.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the merged configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values.
    /// Unparseable numeric values are ignored.
    fn apply_env_overrides(mut self) -> Self {
        // Logging overrides
        if let Ok(level) = std::env::var("BIZCARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("BIZCARD_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Listener
        if let Some(port) = env_parse::<u16>("PORT") {
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.bind = format!("{}:{}", host, port);
        }
        if let Ok(origins) = std::env::var("PROXY_ALLOWED_ORIGINS") {
            self.server.allowed_origins = split_list(&origins);
        }

        // Store
        if let Ok(url) = std::env::var("REDIS_URL") {
            let url = url.trim();
            self.store.redis_url = (!url.is_empty()).then(|| url.to_string());
        }

        // Signatures
        if let Some(enabled) = std::env::var("PROXY_REQUIRE_SIGNATURE")
            .ok()
            .and_then(|v| parse_flag(&v))
        {
            self.signature.enabled = Some(enabled);
        }
        if let Ok(header) = std::env::var("PROXY_SIGNATURE_HEADER") {
            self.signature.header = header.trim().to_lowercase();
        }
        if let Some(ttl) = env_parse("PROXY_SIGNATURE_TTL_MS") {
            self.signature.ttl_ms = ttl;
        }
        if let Ok(secret) = std::env::var("PROXY_SIGNATURE_SECRET") {
            self.signature.secret = Some(secret);
        }
        if let Ok(previous) = std::env::var("PROXY_SIGNATURE_SECRET_PREVIOUS") {
            self.signature.previous_secret = Some(previous);
        }
        if let Ok(list) = std::env::var("PROXY_SIGNATURE_SECRETS") {
            self.signature.alternate_secrets = split_list(&list);
        }

        // Auth
        if let Some(enabled) = std::env::var("REQUIRE_AUTH").ok().and_then(|v| parse_flag(&v)) {
            self.auth.enabled = enabled;
        }
        if let Ok(tokens) = std::env::var("PROXY_APP_TOKENS") {
            self.auth.app_tokens = split_list(&tokens);
        }

        // Rate limit
        if let Some(window) = env_parse("RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = window;
        }
        if let Some(max) = env_parse("RATE_LIMIT_MAX") {
            self.rate_limit.max_per_window = max;
        }
        if let Some(base) = env_parse("BAN_BASE_MS") {
            self.rate_limit.ban_base_ms = base;
        }
        if let Some(max) = env_parse("BAN_MAX_MS") {
            self.rate_limit.ban_max_ms = max;
        }

        // Quota
        if let Some(units) = env_parse("QUOTA_MAX_TOKENS") {
            self.quota.max_units = units;
        }
        if let Some(requests) = env_parse("QUOTA_MAX_REQUESTS") {
            self.quota.max_requests = requests;
        }
        if let Some(period) = env_parse("QUOTA_PERIOD_MS") {
            self.quota.period_ms = period;
        }

        // Retry
        if let Some(attempts) = env_parse("RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = attempts;
        }
        if let Some(initial) = env_parse("RETRY_INITIAL_MS") {
            self.retry.initial_delay_ms = initial;
        }
        if let Some(max) = env_parse("RETRY_MAX_MS") {
            self.retry.max_delay_ms = max;
        }

        // Validation
        if let Some(len) = env_parse("MAX_RAW_TEXT_LEN") {
            self.validation.max_raw_text_len = len;
        }
        if let Some(count) = env_parse("MAX_TEMPLATE_HEADERS") {
            self.validation.max_template_headers = count;
        }
        if let Some(len) = env_parse("MAX_TEMPLATE_HEADER_LEN") {
            self.validation.max_template_header_len = len;
        }
        if let Some(count) = env_parse("MAX_BODY_KEYS") {
            self.validation.max_body_keys = count;
        }

        self
    }

    /// Validate the configuration
    ///
    /// Enabled signatures without any secret are accepted here; every signed
    /// request is then answered with `server_misconfigured`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        self.server.bind_addr()?;
        if self.server.max_body_bytes == 0 {
            anyhow::bail!("server.max_body_bytes must be > 0");
        }
        for origin in &self.server.allowed_origins {
            if !(origin.starts_with("http://") || origin.starts_with("https://"))
                || origin.ends_with('/')
            {
                anyhow::bail!(
                    "Invalid allowed origin: {}. Expected scheme://host[:port]",
                    origin
                );
            }
        }

        if let Some(url) = &self.store.redis_url {
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                anyhow::bail!("store.redis_url must start with redis:// or rediss://");
            }
        }
        if self.store.command_timeout_ms == 0 {
            anyhow::bail!("store.command_timeout_ms must be > 0");
        }
        if self.store.sweep_interval_ms == 0 {
            anyhow::bail!("store.sweep_interval_ms must be > 0");
        }

        if self.signature.header.trim().is_empty() {
            anyhow::bail!("signature.header must not be empty");
        }
        if self.signature.ttl_ms == 0 {
            anyhow::bail!("signature.ttl_ms must be > 0");
        }

        if self.auth.enabled && self.auth.app_tokens.is_empty() {
            tracing::warn!("Token auth enabled without app tokens; requests will be answered with server_misconfigured");
        }

        if self.rate_limit.window_ms == 0 {
            anyhow::bail!("rate_limit.window_ms must be > 0");
        }
        if self.rate_limit.max_per_window == 0 {
            anyhow::bail!("rate_limit.max_per_window must be > 0");
        }
        if self.rate_limit.ban_base_ms == 0 {
            anyhow::bail!("rate_limit.ban_base_ms must be > 0");
        }
        if self.rate_limit.ban_max_ms < self.rate_limit.ban_base_ms {
            anyhow::bail!("rate_limit.ban_max_ms must be >= rate_limit.ban_base_ms");
        }

        if self.quota.max_units <= 0 || self.quota.max_requests <= 0 {
            anyhow::bail!("quota limits must be > 0");
        }
        if self.quota.period_ms == 0 {
            anyhow::bail!("quota.period_ms must be > 0");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be >= 1");
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            anyhow::bail!("retry.max_delay_ms must be >= retry.initial_delay_ms");
        }

        if self.validation.max_raw_text_len == 0 || self.validation.max_template_header_len == 0 {
            anyhow::bail!("validation length limits must be > 0");
        }

        if self.downstream.endpoint.trim().is_empty() {
            anyhow::bail!("downstream.endpoint must not be empty");
        }
        if self.downstream.timeout_secs == 0 {
            anyhow::bail!("downstream.timeout_secs must be > 0");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Environment is process-global; tests touching it run one at a time
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "BIZCARD_LOG_LEVEL",
        "BIZCARD_LOG_FORMAT",
        "PORT",
        "PROXY_ALLOWED_ORIGINS",
        "REDIS_URL",
        "PROXY_REQUIRE_SIGNATURE",
        "PROXY_SIGNATURE_HEADER",
        "PROXY_SIGNATURE_TTL_MS",
        "PROXY_SIGNATURE_SECRET",
        "PROXY_SIGNATURE_SECRET_PREVIOUS",
        "PROXY_SIGNATURE_SECRETS",
        "REQUIRE_AUTH",
        "PROXY_APP_TOKENS",
        "RATE_LIMIT_WINDOW_MS",
        "RATE_LIMIT_MAX",
        "BAN_BASE_MS",
        "BAN_MAX_MS",
        "QUOTA_MAX_TOKENS",
        "QUOTA_MAX_REQUESTS",
        "QUOTA_PERIOD_MS",
        "RETRY_MAX_ATTEMPTS",
        "RETRY_INITIAL_MS",
        "RETRY_MAX_MS",
        "MAX_RAW_TEXT_LEN",
        "MAX_TEMPLATE_HEADERS",
        "MAX_TEMPLATE_HEADER_LEN",
        "MAX_BODY_KEYS",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.server.bind, "0.0.0.0:3000");
        assert_eq!(config.signature.header, "x-proxy-signature");
        assert_eq!(config.signature.ttl_ms, 120_000);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.rate_limit.max_per_window, 30);
        assert_eq!(config.rate_limit.ban_base_ms, 300_000);
        assert_eq!(config.rate_limit.ban_max_ms, 86_400_000);
        assert_eq!(config.quota.max_units, 100_000);
        assert_eq!(config.quota.max_requests, 1000);
        assert_eq!(config.quota.period_ms, 30 * 24 * 60 * 60 * 1000);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 8000);
        assert_eq!(config.retry.jitter_ms, 200);
        assert_eq!(config.validation.max_body_keys, 20);
        assert!(config.store.redis_url.is_none());
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_limits() {
        let mut config = Config::default();
        config.rate_limit.max_per_window = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limit.ban_max_ms = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.store.redis_url = Some("http://localhost".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.bind = "not an address".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.allowed_origins = vec!["example.com".to_string()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.allowed_origins = vec!["https://example.com".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_signature_secret_composition() {
        let config = SignatureConfig {
            secret: Some("new".to_string()),
            previous_secret: Some("old".to_string()),
            alternate_secrets: vec![
                "alt".to_string(),
                "new".to_string(),
                " ".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(config.secrets(), vec!["new", "old", "alt"]);
        assert!(config.is_enabled());
    }

    #[test]
    fn test_signature_enabled_defaults_to_secret_presence() {
        let config = SignatureConfig::default();
        assert!(!config.is_enabled());

        let explicit = SignatureConfig {
            enabled: Some(true),
            ..Default::default()
        };
        assert!(explicit.is_enabled());
        assert!(explicit.secrets().is_empty());

        let disabled = SignatureConfig {
            enabled: Some(false),
            secret: Some("s".to_string()),
            ..Default::default()
        };
        assert!(!disabled.is_enabled());
    }

    #[test]
    fn test_section_conversions() {
        let config = Config::default();
        let limits = config.rate_limit.limits();
        assert_eq!(limits.window, Duration::from_secs(60));
        assert_eq!(limits.bans.base, Duration::from_secs(300));

        let quota = config.quota.quota();
        assert_eq!(quota.max_units, 100_000);

        let retry = config.retry.retry();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.jitter, Duration::from_millis(200));
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_valid_toml_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[logging]
level = "debug"
format = "json"

[server]
bind = "127.0.0.1:8080"

[store]
redis_url = "redis://127.0.0.1:6379/"

[signature]
secret = "current"
previous_secret = "previous"
ttl_ms = 60000

[rate_limit]
window_ms = 1000
max_per_window = 5

[quota]
max_units = 500
"#;

        fs::write(temp_file.path(), toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(
            config.store.redis_url.as_deref(),
            Some("redis://127.0.0.1:6379/")
        );
        assert_eq!(config.signature.secrets(), vec!["current", "previous"]);
        assert_eq!(config.signature.ttl_ms, 60_000);
        assert_eq!(config.rate_limit.max_per_window, 5);
        assert_eq!(config.quota.max_units, 500);
        // Untouched fields keep defaults
        assert_eq!(config.quota.max_requests, 1000);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_load_invalid_toml_config() {
        let temp_file = NamedTempFile::new().unwrap();
        let toml_content = r#"
[logging
level = "debug"
"#; // Invalid TOML

        fs::write(temp_file.path(), toml_content).unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        std::env::set_var("BIZCARD_LOG_LEVEL", "debug");
        std::env::set_var("PORT", "8081");
        std::env::set_var(
            "PROXY_ALLOWED_ORIGINS",
            "https://example.com, https://app.example.com",
        );
        std::env::set_var("REDIS_URL", "redis://cache:6379/");
        std::env::set_var("PROXY_SIGNATURE_SECRET", "s1");
        std::env::set_var("PROXY_SIGNATURE_SECRET_PREVIOUS", "s0");
        std::env::set_var("PROXY_SIGNATURE_SECRETS", "a, b,,");
        std::env::set_var("PROXY_SIGNATURE_HEADER", "X-Signature");
        std::env::set_var("REQUIRE_AUTH", "true");
        std::env::set_var("PROXY_APP_TOKENS", "t1,t2");
        std::env::set_var("RATE_LIMIT_MAX", "1");
        std::env::set_var("QUOTA_MAX_REQUESTS", "1");
        std::env::set_var("RETRY_MAX_ATTEMPTS", "2");

        let config = Config::default().apply_env_overrides();
        clear_env();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.server.bind, "0.0.0.0:8081");
        assert_eq!(
            config.server.allowed_origins,
            vec!["https://example.com", "https://app.example.com"]
        );
        assert_eq!(config.store.redis_url.as_deref(), Some("redis://cache:6379/"));
        assert_eq!(config.signature.secrets(), vec!["s1", "s0", "a", "b"]);
        assert_eq!(config.signature.header, "x-signature");
        assert!(config.signature.is_enabled());
        assert!(config.auth.enabled);
        assert_eq!(config.auth.app_tokens, vec!["t1", "t2"]);
        assert_eq!(config.rate_limit.max_per_window, 1);
        assert_eq!(config.quota.max_requests, 1);
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_env_overrides_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        std::env::set_var("RATE_LIMIT_MAX", "lots");
        std::env::set_var("PROXY_REQUIRE_SIGNATURE", "maybe");

        let config = Config::default().apply_env_overrides();
        clear_env();

        assert_eq!(config.rate_limit.max_per_window, 30);
        assert_eq!(config.signature.enabled, None);
    }

    #[test]
    fn test_signature_explicitly_disabled_by_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        std::env::set_var("PROXY_SIGNATURE_SECRET", "s1");
        std::env::set_var("PROXY_REQUIRE_SIGNATURE", "false");

        let config = Config::default().apply_env_overrides();
        clear_env();

        assert!(!config.signature.is_enabled());
    }

    #[test]
    fn test_config_path() {
        assert!(Config::config_path().ends_with(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_log_level_parsing() {
        let mut config = Config::default();
        config.logging.level = "debug".to_string();
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);

        config.logging.level = "invalid".to_string();
        assert!(config.log_level().is_err());
    }

    #[test]
    fn test_valid_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = Config::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Log level {} should be valid", level);
        }
    }
}
