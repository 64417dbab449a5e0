//! Error taxonomy for extension registration and configuration resolution.

use std::path::PathBuf;

/// Errors surfaced by the registry, the manager and manifest parsing.
///
/// Resolution errors propagate synchronously to the caller of
/// `get_configuration`. Eviction failures never show up here: the expiration
/// monitor logs them per instance and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("there is no registered configuration provider under name '{name}'")]
    UnknownProvider { name: String },

    #[error("extension '{name}' is not registered")]
    UnknownExtension { name: String },

    #[error("extension '{extension}' does not declare a configuration kind named '{kind}'")]
    UnknownConfigurationKind { extension: String, kind: String },

    #[error(
        "too many configs of type '{kind}' found for extension '{extension}': {count} candidates {candidates:?}"
    )]
    AmbiguousConfiguration {
        extension: String,
        kind: String,
        count: usize,
        candidates: Vec<String>,
    },

    #[error("configuration '{kind}' of extension '{extension}' cannot be used implicitly")]
    ConfigurationNotImplicit { extension: String, kind: String },

    #[error("could not read extension manifest at '{location}'")]
    ManifestUnreadable {
        location: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration factory for '{kind}' failed")]
    ConfigurationFactory {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("lifecycle phase '{phase}' failed for configuration '{name}'")]
    Lifecycle {
        name: String,
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("expiration monitor must be started from within a Tokio runtime")]
    NoRuntime,

    #[error("expiration monitor is still stopping")]
    MonitorStopping,

    #[error(
        "provider name '{name}' needed for implicit configuration '{kind}' of extension '{extension}' is already taken"
    )]
    ProviderNameTaken {
        name: String,
        extension: String,
        kind: String,
    },
}

impl ExtensionError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
