//! Live configuration instances and the contracts of the values behind them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::context::ExecutionContext;
use crate::error::ExtensionError;

/// The configuration object an extension operates on.
///
/// Lifecycle hooks default to no-ops so plain value objects only need
/// `as_any`.
#[async_trait]
pub trait ConfigurationValue: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds configuration values for one configuration kind.
#[async_trait]
pub trait ConfigurationFactory: Send + Sync {
    async fn create(&self, ctx: &ExecutionContext) -> anyhow::Result<Arc<dyn ConfigurationValue>>;
}

/// Lifecycle state of a [`ConfigurationInstance`].
///
/// `Created -> Started -> Stopped -> Disposed`. Idleness is not a state of
/// its own: a started instance is idle while nobody touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Started,
    Stopped,
    Disposed,
}

/// A stateful configuration produced by a provider.
pub struct ConfigurationInstance {
    name: String,
    provider: String,
    value: Arc<dyn ConfigurationValue>,
    state: RwLock<InstanceState>,
    // Serializes lifecycle transitions; hooks run while it is held.
    transition: tokio::sync::Mutex<()>,
    last_access: Mutex<Instant>,
}

impl ConfigurationInstance {
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        value: Arc<dyn ConfigurationValue>,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            value,
            state: RwLock::new(InstanceState::Created),
            transition: tokio::sync::Mutex::new(()),
            last_access: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the provider that produced this instance.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    #[must_use]
    pub fn value(&self) -> &Arc<dyn ConfigurationValue> {
        &self.value
    }

    /// Downcast the configuration value to its concrete type.
    #[must_use]
    pub fn value_as<T: 'static>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }

    #[must_use]
    pub fn state(&self) -> InstanceState {
        *self.state.read()
    }

    /// Record an access; resets the idle clock.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    #[must_use]
    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access())
    }

    /// Start the instance if it was just created. No-op in any other state.
    ///
    /// # Errors
    /// Returns `ExtensionError::Lifecycle` if the start hook fails; the
    /// instance then stays `Created`.
    pub async fn start(&self) -> Result<(), ExtensionError> {
        let _guard = self.transition.lock().await;
        if self.state() != InstanceState::Created {
            return Ok(());
        }
        self.value
            .start()
            .await
            .map_err(|source| self.lifecycle_error("start", source))?;
        *self.state.write() = InstanceState::Started;
        Ok(())
    }

    /// Stop the instance if it is started. Returns whether a stop happened.
    ///
    /// # Errors
    /// Returns `ExtensionError::Lifecycle` if the stop hook fails.
    pub async fn stop(&self) -> Result<bool, ExtensionError> {
        let _guard = self.transition.lock().await;
        if self.state() != InstanceState::Started {
            return Ok(false);
        }
        self.value
            .stop()
            .await
            .map_err(|source| self.lifecycle_error("stop", source))?;
        *self.state.write() = InstanceState::Stopped;
        Ok(true)
    }

    /// Dispose the instance. The dispose hook runs at most once over the
    /// instance lifetime, even if it fails. Returns whether this call
    /// performed the disposal.
    ///
    /// # Errors
    /// Returns `ExtensionError::Lifecycle` if the dispose hook fails.
    pub async fn dispose(&self) -> Result<bool, ExtensionError> {
        let _guard = self.transition.lock().await;
        {
            let mut state = self.state.write();
            if *state == InstanceState::Disposed {
                return Ok(false);
            }
            *state = InstanceState::Disposed;
        }
        self.value
            .dispose()
            .await
            .map_err(|source| self.lifecycle_error("dispose", source))?;
        Ok(true)
    }

    fn lifecycle_error(&self, phase: &'static str, source: anyhow::Error) -> ExtensionError {
        ExtensionError::Lifecycle {
            name: self.name.clone(),
            phase,
            source,
        }
    }
}

impl fmt::Debug for ConfigurationInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationInstance")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("type", &self.type_name())
            .field("state", &self.state())
            .field("last_access", &self.last_access())
            .finish_non_exhaustive()
    }
}
