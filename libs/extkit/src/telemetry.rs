//! Logging bootstrap for processes embedding the extension runtime.

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::config::{config_section_or_default, ConfigError, ConfigProvider, LOGGING_SECTION};

/// Settings of the `logging` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `extkit=debug,warn`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Read the `logging` section. A missing section yields the defaults.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidConfig` if the section does not deserialize.
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        config_section_or_default(provider, LOGGING_SECTION)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter '{directive}': {source}")]
    InvalidFilter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
}

/// Build the filter: a non-empty `RUST_LOG` wins over the configured level.
///
/// # Errors
/// Returns `TelemetryError::InvalidFilter` if the chosen directive does not parse.
pub fn build_filter(cfg: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    let directive = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => cfg.level.clone(),
    };
    EnvFilter::try_new(&directive).map_err(|source| TelemetryError::InvalidFilter { directive, source })
}

/// Install the global `tracing` subscriber.
///
/// Returns `Ok(false)` if a global subscriber was already installed; the
/// existing one is kept.
///
/// # Errors
/// Returns `TelemetryError::InvalidFilter` if the level directive is invalid.
pub fn init_logging(cfg: &LoggingConfig) -> Result<bool, TelemetryError> {
    let filter = build_filter(cfg)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = if cfg.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    if installed {
        tracing::info!(level = %cfg.level, json = cfg.json, "logging initialized");
    } else {
        tracing::debug!("global subscriber already installed, keeping it");
    }
    Ok(installed)
}
