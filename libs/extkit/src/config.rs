//! Process configuration consumed by the extension runtime.
//!
//! Two ways to load a typed section:
//!
//! 1. **Lenient loading** (`config_section_or_default`): falls back to
//!    `T::default()` when the section is missing or not an object.
//! 2. **Strict loading** (`config_section_required`): the section must be
//!    present and valid.
//!
//! Raw sections come from a [`ConfigProvider`]. [`FigmentConfigProvider`]
//! reads them from a YAML file with `EXTKIT__` environment overrides.

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

/// Section holding [`ExtensionsConfig`].
pub const EXTENSIONS_SECTION: &str = "extensions";

/// Section holding [`crate::telemetry::LoggingConfig`].
pub const LOGGING_SECTION: &str = "logging";

/// Prefix of environment overrides; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "EXTKIT__";

/// How often idle dynamic configurations are checked when nothing is configured.
pub const DEFAULT_EXPIRATION_FREQUENCY: Duration = Duration::from_secs(5 * 60);

/// Configuration error for typed config operations
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config section '{section}' not found")]
    SectionNotFound { section: String },
    #[error("config section '{section}' must be an object")]
    InvalidSectionStructure { section: String },
    #[error("invalid config for section '{section}': {source}")]
    InvalidConfig {
        section: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Provider of raw configuration sections.
pub trait ConfigProvider: Send + Sync {
    /// Returns the raw JSON of a top-level section, if any.
    fn get_section(&self, name: &str) -> Option<&serde_json::Value>;
}

/// Lenient loader that falls back to defaults.
///
/// - Section not present → `Ok(T::default())`
/// - Section is not an object → `Ok(T::default())`
/// - Section present but invalid → `Err(ConfigError::InvalidConfig)`
///
/// # Errors
/// Returns `ConfigError::InvalidConfig` if the section exists but cannot be deserialized.
pub fn config_section_or_default<T: DeserializeOwned + Default>(
    provider: &dyn ConfigProvider,
    section: &str,
) -> Result<T, ConfigError> {
    let Some(raw) = provider.get_section(section) else {
        return Ok(T::default());
    };
    if !raw.is_object() {
        return Ok(T::default());
    }
    parse_section(raw, section)
}

/// Strict loader that requires the section to be present.
///
/// # Errors
/// Returns `ConfigError` if the section is missing, is not an object, or is invalid.
pub fn config_section_required<T: DeserializeOwned>(
    provider: &dyn ConfigProvider,
    section: &str,
) -> Result<T, ConfigError> {
    let raw = provider
        .get_section(section)
        .ok_or_else(|| ConfigError::SectionNotFound {
            section: section.to_owned(),
        })?;
    if !raw.is_object() {
        return Err(ConfigError::InvalidSectionStructure {
            section: section.to_owned(),
        });
    }
    parse_section(raw, section)
}

fn parse_section<T: DeserializeOwned>(
    raw: &serde_json::Value,
    section: &str,
) -> Result<T, ConfigError> {
    serde_json::from_value(raw.clone()).map_err(|e| ConfigError::InvalidConfig {
        section: section.to_owned(),
        source: e,
    })
}

/// Settings of the extension runtime (`extensions` section).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExtensionsConfig {
    /// Period of the expiration monitor; accepts `"90s"`, `"5m"` or plain seconds.
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub dynamic_config_expiration_frequency: Option<Duration>,
}

impl ExtensionsConfig {
    #[must_use]
    pub fn expiration_frequency(&self) -> Duration {
        self.dynamic_config_expiration_frequency
            .unwrap_or(DEFAULT_EXPIRATION_FREQUENCY)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

fn deserialize_opt_duration<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<RawDuration> = Option::deserialize(d)?;
    match raw {
        None => Ok(None),
        Some(RawDuration::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
        Some(RawDuration::Text(text)) => humantime::parse_duration(text.trim())
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// [`ConfigProvider`] backed by `figment` (YAML file + environment).
#[derive(Debug, Clone, Default)]
pub struct FigmentConfigProvider {
    root: serde_json::Map<String, serde_json::Value>,
}

impl FigmentConfigProvider {
    /// Load configuration from an optional YAML file, then apply
    /// `EXTKIT__SECTION__KEY=value` environment overrides.
    ///
    /// # Errors
    /// Returns `ConfigError::Load` if a source cannot be read or merged.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(&figment)
    }

    /// # Errors
    /// Returns `ConfigError::Load` if the figment cannot be extracted.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let value: serde_json::Value = figment.extract().map_err(Box::new)?;
        let root = match value {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Ok(Self { root })
    }

    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        let root = match value {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self { root }
    }
}

impl ConfigProvider for FigmentConfigProvider {
    fn get_section(&self, name: &str) -> Option<&serde_json::Value> {
        self.root.get(name)
    }
}
