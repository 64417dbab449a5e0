#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! ExtKit: extension and configuration lifecycle runtime.
//!
//! - [`ExtensionManager`] registers extensions and configuration providers
//!   and resolves configuration instances for an [`ExecutionContext`],
//!   creating implicit providers on first use when a kind allows it.
//! - [`ExpirationMonitor`] evicts idle dynamic configuration instances in
//!   the background.
//! - [`loader::CompositeLoader`] resolves resources across an enclosing
//!   scope and isolated child scopes according to a [`loader::LookupPolicy`].

pub mod config;
pub mod context;
pub mod error;
pub mod error_catalog;
pub mod implicit;
pub mod instance;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod model;
pub mod monitor;
pub mod provider;
pub mod registry;
pub mod telemetry;

mod keyed_lock;

pub use config::{ConfigError, ConfigProvider, ExtensionsConfig, FigmentConfigProvider};
pub use context::ExecutionContext;
pub use error::ExtensionError;
pub use error_catalog::{ErrorTypeRegistrant, InMemoryErrorCatalog};
pub use implicit::{DefaultImplicitConfigurationFactory, ImplicitConfigurationFactory};
pub use instance::{ConfigurationFactory, ConfigurationInstance, ConfigurationValue, InstanceState};
pub use manager::{ExtensionManager, ExtensionManagerBuilder};
pub use manifest::{parse_manifest, parse_manifest_from_reader};
pub use model::{
    ConfigurationKindDescriptor, ErrorKindDescriptor, ExtensionDescriptor, ExtensionManifest,
};
pub use monitor::{DisposeOnExpiry, EvictionHandler, ExpirationMonitor};
pub use provider::{
    ConfigurationProvider, DynamicConfigurationProvider, ExpirableProvider, ExpirationPolicy,
    StaticConfigurationProvider,
};
pub use registry::ExtensionRegistry;
