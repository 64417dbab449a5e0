//! Implicit configuration: providers synthesized when a caller declared none.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::ExtensionError;
use crate::model::{ConfigurationKindDescriptor, ExtensionDescriptor};
use crate::provider::{ConfigurationProvider, StaticConfigurationProvider};

/// Builds the provider backing an implicit configuration.
#[async_trait]
pub trait ImplicitConfigurationFactory: Send + Sync {
    /// # Errors
    /// Returns an error if the configuration value cannot be built.
    async fn create_implicit_provider(
        &self,
        extension: &ExtensionDescriptor,
        kind: &ConfigurationKindDescriptor,
        ctx: &ExecutionContext,
    ) -> Result<Arc<dyn ConfigurationProvider>, ExtensionError>;
}

/// Name under which the implicit provider of (extension, kind) is registered.
#[must_use]
pub fn implicit_provider_name(extension: &str, kind: &str) -> String {
    format!("{extension}-{kind}-implicit")
}

/// Builds the value with the kind's own factory and serves it statically.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultImplicitConfigurationFactory;

#[async_trait]
impl ImplicitConfigurationFactory for DefaultImplicitConfigurationFactory {
    async fn create_implicit_provider(
        &self,
        extension: &ExtensionDescriptor,
        kind: &ConfigurationKindDescriptor,
        ctx: &ExecutionContext,
    ) -> Result<Arc<dyn ConfigurationProvider>, ExtensionError> {
        let value = kind.factory().create(ctx).await.map_err(|source| {
            ExtensionError::ConfigurationFactory {
                kind: kind.name().to_owned(),
                source,
            }
        })?;

        Ok(Arc::new(StaticConfigurationProvider::new(
            implicit_provider_name(extension.name(), kind.name()),
            extension.name(),
            kind.name(),
            value,
        )))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::instance::{ConfigurationFactory, ConfigurationValue};
    use std::any::Any;

    struct Conn(&'static str);

    #[async_trait]
    impl ConfigurationValue for Conn {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct ConnFactory;

    #[async_trait]
    impl ConfigurationFactory for ConnFactory {
        async fn create(&self, _ctx: &ExecutionContext) -> anyhow::Result<Arc<dyn ConfigurationValue>> {
            Ok(Arc::new(Conn("default")))
        }
    }

    #[tokio::test]
    async fn default_factory_builds_named_static_provider() {
        let kind = ConfigurationKindDescriptor::new("connection", Arc::new(ConnFactory)).implicit(true);
        let ext = ExtensionDescriptor::builder("db").configuration_kind(kind.clone()).build();
        let ctx = ExecutionContext::new();

        let provider = DefaultImplicitConfigurationFactory
            .create_implicit_provider(&ext, &kind, &ctx)
            .await
            .unwrap();

        assert_eq!(provider.name(), "db-connection-implicit");
        assert_eq!(provider.extension(), "db");
        assert_eq!(provider.configuration_kind(), "connection");
        let instance = provider.get(&ctx).await.unwrap();
        assert_eq!(instance.value_as::<Conn>().map(|c| c.0), Some("default"));
    }
}
