//! Logging system configuration and initialization
//!
//! Builds the tracing subscriber from [`LoggingConfig`]: an `EnvFilter`
//! assembled from the configured level plus module filters, console output
//! and an optional non-blocking file layer whose writer guard is kept
//! alive for the process lifetime.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use tracing_appender::non_blocking;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Registry,
};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps the non-blocking file writer alive; dropping the guard would
// silently stop file output
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Builds the filter string from the base level and module filters
fn build_filter(config: &LoggingConfig) -> String {
    let mut parts = vec![config.level.clone()];
    let mut modules: Vec<_> = config.module_filters.iter().collect();
    modules.sort();
    for (module, level) in modules {
        parts.push(format!("{module}={level}"));
    }
    parts.join(",")
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize the logging system from engine configuration.
///
/// `RUST_LOG` overrides the configured filter when set.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(build_filter(config)));

    let console_layer = config
        .console_output
        .then(|| fmt::layer().with_target(true));

    let file_layer = if config.file_output {
        let log_dir = PathBuf::from(&config.log_dir);
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;
        let appender = tracing_appender::rolling::daily(&log_dir, "listing-harvester.log");
        let (writer, guard) = non_blocking(appender);
        LOG_GUARDS
            .lock()
            .expect("log guard mutex poisoned")
            .push(guard);
        Some(fmt::layer().with_ansi(false).with_writer(writer))
    } else {
        None
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("logging already initialized")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_string_includes_module_overrides() {
        let config = LoggingConfig::default();
        let filter = build_filter(&config);
        assert!(filter.starts_with("info"));
        assert!(filter.contains("sqlx=warn"));
    }
}
