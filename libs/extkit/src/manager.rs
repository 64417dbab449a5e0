//! Extension manager: the entry point hosts talk to.
//!
//! It owns the registry, resolves configuration instances for execution
//! contexts (creating implicit providers when allowed) and drives the
//! expiration monitor.

use std::path::Path;
use std::sync::Arc;

use crate::config::{
    ConfigError, ConfigProvider, EXTENSIONS_SECTION, ExtensionsConfig, config_section_or_default,
};
use crate::context::ExecutionContext;
use crate::error::ExtensionError;
use crate::error_catalog::{ErrorTypeRegistrant, InMemoryErrorCatalog};
use crate::implicit::{DefaultImplicitConfigurationFactory, ImplicitConfigurationFactory};
use crate::instance::ConfigurationInstance;
use crate::keyed_lock::KeyedLocks;
use crate::manifest;
use crate::model::{ConfigurationKindDescriptor, ExtensionDescriptor, ExtensionManifest};
use crate::monitor::{DisposeOnExpiry, EvictionHandler, ExpirationMonitor};
use crate::provider::ConfigurationProvider;
use crate::registry::ExtensionRegistry;

pub struct ExtensionManagerBuilder {
    registry: Option<Arc<ExtensionRegistry>>,
    implicit_factory: Arc<dyn ImplicitConfigurationFactory>,
    error_registrant: Arc<dyn ErrorTypeRegistrant>,
    eviction_handler: Arc<dyn EvictionHandler>,
    config: ExtensionsConfig,
}

impl ExtensionManagerBuilder {
    /// Share an existing registry instead of creating a fresh one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ExtensionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn implicit_factory(mut self, factory: Arc<dyn ImplicitConfigurationFactory>) -> Self {
        self.implicit_factory = factory;
        self
    }

    #[must_use]
    pub fn error_registrant(mut self, registrant: Arc<dyn ErrorTypeRegistrant>) -> Self {
        self.error_registrant = registrant;
        self
    }

    #[must_use]
    pub fn eviction_handler(mut self, handler: Arc<dyn EvictionHandler>) -> Self {
        self.eviction_handler = handler;
        self
    }

    #[must_use]
    pub fn config(mut self, config: ExtensionsConfig) -> Self {
        self.config = config;
        self
    }

    /// Read the `extensions` section from `provider`; a missing section
    /// keeps the defaults.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidConfig` if the section is malformed.
    pub fn config_provider(self, provider: &dyn ConfigProvider) -> Result<Self, ConfigError> {
        let config = config_section_or_default(provider, EXTENSIONS_SECTION)?;
        Ok(self.config(config))
    }

    #[must_use]
    pub fn build(self) -> ExtensionManager {
        let registry = self.registry.unwrap_or_default();
        let monitor = ExpirationMonitor::builder(Arc::clone(&registry))
            .run_every(self.config.expiration_frequency())
            .on_expired(self.eviction_handler)
            .build();
        ExtensionManager {
            registry,
            implicit_factory: self.implicit_factory,
            error_registrant: self.error_registrant,
            extension_locks: KeyedLocks::new(),
            monitor,
        }
    }
}

/// Registers extensions and providers and hands out configuration instances.
pub struct ExtensionManager {
    registry: Arc<ExtensionRegistry>,
    implicit_factory: Arc<dyn ImplicitConfigurationFactory>,
    error_registrant: Arc<dyn ErrorTypeRegistrant>,
    // Guards implicit provider creation, one lock per extension name.
    extension_locks: KeyedLocks,
    monitor: ExpirationMonitor,
}

impl std::fmt::Debug for ExtensionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionManager")
            .field("registry", &self.registry)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl Default for ExtensionManager {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ExtensionManager {
    #[must_use]
    pub fn builder() -> ExtensionManagerBuilder {
        ExtensionManagerBuilder {
            registry: None,
            implicit_factory: Arc::new(DefaultImplicitConfigurationFactory),
            error_registrant: Arc::new(InMemoryErrorCatalog::new()),
            eviction_handler: Arc::new(DisposeOnExpiry),
            config: ExtensionsConfig::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn monitor(&self) -> &ExpirationMonitor {
        &self.monitor
    }

    /// Register an extension and its declared error types.
    ///
    /// Returns `false` when an extension with that name is already known;
    /// the earlier descriptor stays and nothing else happens.
    pub fn register_extension(&self, descriptor: impl Into<Arc<ExtensionDescriptor>>) -> bool {
        let descriptor = descriptor.into();
        if self.registry.contains_extension(descriptor.name()) {
            tracing::debug!(
                extension = descriptor.name(),
                "extension already registered, skipping"
            );
            return false;
        }

        tracing::info!(
            extension = descriptor.name(),
            version = descriptor.version(),
            vendor = descriptor.vendor(),
            "registering extension"
        );
        if !self.registry.register_extension(Arc::clone(&descriptor)) {
            // Lost a registration race for the same name.
            tracing::debug!(
                extension = descriptor.name(),
                "extension already registered, skipping"
            );
            return false;
        }
        self.error_registrant.register_errors(&descriptor);
        true
    }

    /// Register a provider; a provider already holding that name is replaced.
    pub fn register_configuration_provider(
        &self,
        provider: Arc<dyn ConfigurationProvider>,
    ) -> Option<Arc<dyn ConfigurationProvider>> {
        let name = provider.name().to_owned();
        let replaced = self.registry.register_configuration_provider(provider);
        if replaced.is_some() {
            tracing::info!(provider = %name, "configuration provider replaced");
        } else {
            tracing::debug!(provider = %name, "configuration provider registered");
        }
        replaced
    }

    /// # Errors
    /// Returns `ExtensionError::InvalidArgument` if `name` is blank.
    pub fn get_configuration_provider(
        &self,
        name: &str,
    ) -> Result<Option<Arc<dyn ConfigurationProvider>>, ExtensionError> {
        if name.trim().is_empty() {
            return Err(ExtensionError::invalid_argument(
                "cannot get configuration provider for a blank provider name",
            ));
        }
        Ok(self.registry.get_configuration_provider(name))
    }

    /// The single provider serving (extension, kind), if there is one.
    ///
    /// # Errors
    /// Returns `ExtensionError::AmbiguousConfiguration` when several match.
    pub fn get_configuration_provider_for(
        &self,
        extension: &str,
        kind: &str,
    ) -> Result<Option<Arc<dyn ConfigurationProvider>>, ExtensionError> {
        let mut providers = self.registry.get_configuration_providers(extension, kind);
        match providers.len() {
            0 => Ok(None),
            1 => Ok(providers.pop()),
            count => Err(ExtensionError::AmbiguousConfiguration {
                extension: extension.to_owned(),
                kind: kind.to_owned(),
                count,
                candidates: providers.iter().map(|p| p.name().to_owned()).collect(),
            }),
        }
    }

    /// Resolve an instance through the provider registered as `provider_name`.
    ///
    /// # Errors
    /// Returns `ExtensionError::UnknownProvider` if no such provider exists,
    /// or whatever the provider fails with.
    pub async fn get_configuration_by_provider(
        &self,
        provider_name: &str,
        ctx: &ExecutionContext,
    ) -> Result<Arc<ConfigurationInstance>, ExtensionError> {
        let provider = self
            .get_configuration_provider(provider_name)?
            .ok_or_else(|| ExtensionError::UnknownProvider {
                name: provider_name.to_owned(),
            })?;
        provider.get(ctx).await
    }

    /// Resolve the instance of `kind` offered by `extension` for `ctx`.
    ///
    /// With no provider registered for the pair, an implicit one is created
    /// when the kind allows it. At most one implicit provider is ever created
    /// per (extension, kind), even under concurrent first use.
    ///
    /// # Errors
    /// - `UnknownExtension` / `UnknownConfigurationKind` if the names do not resolve
    /// - `AmbiguousConfiguration` if several providers match
    /// - `ConfigurationNotImplicit` if none match and the kind is not implicit
    /// - `ProviderNameTaken` if the implicit provider's name belongs to
    ///   another provider
    /// - provider and factory failures
    pub async fn get_configuration(
        &self,
        extension: &str,
        kind: &str,
        ctx: &ExecutionContext,
    ) -> Result<Arc<ConfigurationInstance>, ExtensionError> {
        let descriptor =
            self.registry
                .get_extension(extension)
                .ok_or_else(|| ExtensionError::UnknownExtension {
                    name: extension.to_owned(),
                })?;
        let kind_descriptor = descriptor.configuration_kind(kind).ok_or_else(|| {
            ExtensionError::UnknownConfigurationKind {
                extension: extension.to_owned(),
                kind: kind.to_owned(),
            }
        })?;

        if let Some(provider) = self.get_configuration_provider_for(extension, kind)? {
            return provider.get(ctx).await;
        }
        if !kind_descriptor.can_be_used_implicitly() {
            return Err(ExtensionError::ConfigurationNotImplicit {
                extension: extension.to_owned(),
                kind: kind.to_owned(),
            });
        }

        self.create_implicit_provider_if_absent(&descriptor, kind_descriptor, ctx)
            .await?;

        match self.get_configuration_provider_for(extension, kind)? {
            Some(provider) => provider.get(ctx).await,
            // Unregistered between creation and lookup.
            None => Err(ExtensionError::UnknownProvider {
                name: crate::implicit::implicit_provider_name(extension, kind),
            }),
        }
    }

    async fn create_implicit_provider_if_absent(
        &self,
        extension: &ExtensionDescriptor,
        kind: &ConfigurationKindDescriptor,
        ctx: &ExecutionContext,
    ) -> Result<(), ExtensionError> {
        let _guard = self.extension_locks.lock(extension.name()).await;
        if !self
            .registry
            .get_configuration_providers(extension.name(), kind.name())
            .is_empty()
        {
            return Ok(());
        }

        let provider = self
            .implicit_factory
            .create_implicit_provider(extension, kind, ctx)
            .await?;
        let name = provider.name().to_owned();
        // A provider for another pair may already hold the implicit name.
        if self
            .registry
            .register_configuration_provider_if_absent(provider)
            .is_err()
        {
            tracing::warn!(
                extension = extension.name(),
                kind = kind.name(),
                provider = %name,
                "implicit provider name already taken"
            );
            return Err(ExtensionError::ProviderNameTaken {
                name,
                extension: extension.name().to_owned(),
                kind: kind.name().to_owned(),
            });
        }
        tracing::debug!(
            extension = extension.name(),
            kind = kind.name(),
            provider = %name,
            "created implicit configuration provider"
        );
        Ok(())
    }

    #[must_use]
    pub fn get_extension(&self, name: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.registry.get_extension(name)
    }

    #[must_use]
    pub fn get_extensions(&self) -> Vec<Arc<ExtensionDescriptor>> {
        self.registry.get_extensions()
    }

    /// # Errors
    /// See [`manifest::parse_manifest`].
    pub fn parse_manifest(&self, path: impl AsRef<Path>) -> Result<ExtensionManifest, ExtensionError> {
        manifest::parse_manifest(path)
    }

    /// Start the expiration monitor. Calling it again while running is a no-op.
    ///
    /// # Errors
    /// Returns `ExtensionError::NoRuntime` outside a Tokio runtime and
    /// `ExtensionError::MonitorStopping` while a stop is still draining.
    pub fn start(&self) -> Result<(), ExtensionError> {
        self.monitor.begin_monitoring()?;
        Ok(())
    }

    /// Stop the expiration monitor, waiting for an in-flight sweep. Concurrent
    /// callers all return only once it is drained.
    pub async fn stop(&self) {
        self.monitor.stop_monitoring().await;
    }
}
