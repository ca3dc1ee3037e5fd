//! Logging subscriber setup
//!
//! A `tracing_subscriber` registry with two layers:
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, else the configured level)
//!   └── Fmt Layer (json or pretty)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use stream_ingestr::config::LoggingConfig;
//! use stream_ingestr::telemetry::init_subscriber;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! init_subscriber(&LoggingConfig::default(), None)?;
//! tracing::info!("ready");
//! # Ok(())
//! # }
//! ```

use crate::config::LoggingConfig;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Subscriber setup errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Pick the filter: `RUST_LOG` wins, then `level_override`, then the
/// configured level
pub fn build_filter(
    config: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = level_override.unwrap_or(&config.level);
    EnvFilter::try_new(directive).map_err(|e| TelemetryError::InvalidFilter {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber
pub fn init_subscriber(
    config: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<(), TelemetryError> {
    let env_filter = build_filter(config, level_override)?;

    let fmt_layer = match config.format.as_str() {
        "pretty" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .pretty()
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_build_filter_uses_override() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig::default();
        let filter = build_filter(&config, Some("debug")).unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    #[serial]
    fn test_build_filter_rejects_garbage() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "stream_ingestr=loudest".into(),
            format: "json".into(),
        };
        assert!(matches!(
            build_filter(&config, None),
            Err(TelemetryError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_init_subscriber() {
        // May fail if another test installed a subscriber first
        let _ = init_subscriber(&LoggingConfig::default(), None);
    }
}
