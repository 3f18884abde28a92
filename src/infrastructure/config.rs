//! Engine configuration
//!
//! Configuration is a validated struct with named, typed fields. Defaults
//! are resolved once at construction and unknown or conflicting keys are
//! rejected early, before any component starts.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::HealthThresholds;

/// Queue and dispatcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QueueSettings {
    /// Concurrent jobs the dispatcher runs
    pub concurrency: usize,
    /// Attempts per job before it fails for good
    pub max_attempts: u32,
    /// Exponential backoff base in milliseconds
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay
    pub backoff_cap_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_cap_ms: 120_000,
        }
    }
}

/// Request ceilings gating the extraction executor, not the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RateLimitSettings {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub requests_per_day: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 20,
            requests_per_hour: 600,
            requests_per_day: 8_000,
        }
    }
}

/// Alert thresholds consumed by the health monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AlertSettings {
    pub error_burst_count: usize,
    pub error_burst_window_secs: u64,
    pub performance_alert_secs: u64,
    pub performance_degraded_secs: u64,
    pub timeout_ratio_degraded: f64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            error_burst_count: 10,
            error_burst_window_secs: 300,
            performance_alert_secs: 20,
            performance_degraded_secs: 30,
            timeout_ratio_degraded: 0.1,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StoreSettings {
    /// Insert chunk size for batched saves
    pub chunk_size: usize,
    /// Asking price from which a listing is considered high value
    pub high_value_threshold: f64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            high_value_threshold: 100_000.0,
        }
    }
}

/// Category/listing scan sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ScanSettings {
    /// Listings per page on the target site
    pub page_size: u32,
    /// Cap on pages scanned per category in one job
    pub max_pages_per_category: u32,
    /// Health metrics flush interval
    pub health_flush_secs: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            page_size: 25,
            max_pages_per_category: 10,
            health_flush_secs: 60,
        }
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    /// Enable console output
    pub console_output: bool,
    /// Enable file output
    pub file_output: bool,
    /// Directory for log files
    pub log_dir: String,
    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_filters = HashMap::new();
        module_filters.insert("sqlx".to_string(), "warn".to_string());
        module_filters.insert("reqwest".to_string(), "info".to_string());
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
            log_dir: "logs".to_string(),
            module_filters,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Target marketplace base URL
    pub base_url: String,
    /// SQLite database URL
    pub database_url: String,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub queue: QueueSettings,
    pub rate_limits: RateLimitSettings,
    pub alerts: AlertSettings,
    pub store: StoreSettings,
    pub scan: ScanSettings,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://marketplace.example.com".to_string(),
            database_url: "sqlite:data/harvester.db".to_string(),
            request_timeout_secs: 30,
            user_agent: concat!("listing-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            queue: QueueSettings::default(),
            rate_limits: RateLimitSettings::default(),
            alerts: AlertSettings::default(),
            store: StoreSettings::default(),
            scan: ScanSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from an optional file plus `HARVESTER_*`
    /// environment variables, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let loaded = builder
            .add_source(
                config::Environment::with_prefix("HARVESTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let cfg: Self = loaded
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects invalid and mutually conflicting values early
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.concurrency == 0 {
            return Err(ConfigError::Invalid("queue.concurrency must be at least 1"));
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::Invalid("queue.max_attempts must be at least 1"));
        }
        if self.queue.backoff_base_ms == 0 {
            return Err(ConfigError::Invalid("queue.backoff_base_ms must be positive"));
        }
        if self.queue.backoff_cap_ms < self.queue.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "queue.backoff_cap_ms conflicts with queue.backoff_base_ms",
            ));
        }
        if self.store.chunk_size == 0 {
            return Err(ConfigError::Invalid("store.chunk_size must be at least 1"));
        }
        if self.store.high_value_threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "store.high_value_threshold must be positive",
            ));
        }
        if self.scan.page_size == 0 || self.scan.max_pages_per_category == 0 {
            return Err(ConfigError::Invalid("scan sizes must be at least 1"));
        }
        let rl = &self.rate_limits;
        if rl.requests_per_minute == 0 {
            return Err(ConfigError::Invalid(
                "rate_limits.requests_per_minute must be positive",
            ));
        }
        if rl.requests_per_hour < rl.requests_per_minute {
            return Err(ConfigError::Invalid(
                "rate_limits.requests_per_hour conflicts with requests_per_minute",
            ));
        }
        if rl.requests_per_day < rl.requests_per_hour {
            return Err(ConfigError::Invalid(
                "rate_limits.requests_per_day conflicts with requests_per_hour",
            ));
        }
        if !(0.0..=1.0).contains(&self.alerts.timeout_ratio_degraded) {
            return Err(ConfigError::Invalid(
                "alerts.timeout_ratio_degraded must be in [0,1]",
            ));
        }
        Ok(())
    }

    /// Thresholds handed to the health monitor
    #[must_use]
    pub fn health_thresholds(&self) -> HealthThresholds {
        HealthThresholds {
            performance_alert: Duration::from_secs(self.alerts.performance_alert_secs),
            performance_degraded: Duration::from_secs(self.alerts.performance_degraded_secs),
            timeout_ratio_degraded: self.alerts.timeout_ratio_degraded,
            error_burst_count: self.alerts.error_burst_count,
            error_burst_window: Duration::from_secs(self.alerts.error_burst_window_secs),
        }
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.queue.backoff_base_ms)
    }

    #[must_use]
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.queue.backoff_cap_ms)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.queue.concurrency = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn conflicting_rate_ceilings_are_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.rate_limits.requests_per_hour = 5;
        cfg.rate_limits.requests_per_minute = 20;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backoff_cap_below_base_is_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.queue.backoff_base_ms = 10_000;
        cfg.queue.backoff_cap_ms = 1_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn health_thresholds_map_from_alert_settings() {
        let mut cfg = EngineConfig::default();
        cfg.alerts.performance_alert_secs = 7;
        cfg.alerts.error_burst_count = 3;
        let thresholds = cfg.health_thresholds();
        assert_eq!(thresholds.performance_alert, Duration::from_secs(7));
        assert_eq!(thresholds.error_burst_count, 3);
    }
}
