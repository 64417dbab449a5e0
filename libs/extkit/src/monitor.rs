//! Background eviction of idle dynamic configuration instances.
//!
//! The monitor is a single tokio task. Ticks run at fixed delay: the next
//! sleep starts only after the previous sweep finished. Stopping cancels the
//! task and waits for its tracker to drain, so no eviction runs once
//! `stop_monitoring` returns.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::DEFAULT_EXPIRATION_FREQUENCY;
use crate::error::ExtensionError;
use crate::instance::ConfigurationInstance;
use crate::provider::ExpirationPolicy;
use crate::registry::ExtensionRegistry;

/// Receives instances the monitor has released from their provider.
#[async_trait]
pub trait EvictionHandler: Send + Sync {
    /// # Errors
    /// A failure is logged with the instance key and type; it never stops
    /// the rest of the sweep.
    async fn on_expired(&self, key: &str, instance: Arc<ConfigurationInstance>) -> anyhow::Result<()>;
}

/// Default handler: stop the instance if needed, then dispose it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisposeOnExpiry;

#[async_trait]
impl EvictionHandler for DisposeOnExpiry {
    async fn on_expired(&self, key: &str, instance: Arc<ConfigurationInstance>) -> anyhow::Result<()> {
        instance.stop().await?;
        instance.dispose().await?;
        tracing::debug!(key, config = instance.name(), "disposed expired dynamic configuration");
        Ok(())
    }
}

struct Running {
    cancel: CancellationToken,
    tasks: TaskTracker,
}

/// Periodically evicts dynamic configuration instances that went idle.
pub struct ExpirationMonitor {
    registry: Arc<ExtensionRegistry>,
    period: Duration,
    handler: Arc<dyn EvictionHandler>,
    // Some from begin until the stop that drained the tasks completes.
    running: Mutex<Option<Running>>,
    // Scheduled and manual sweeps never overlap.
    sweep_lock: Arc<tokio::sync::Mutex<()>>,
}

impl std::fmt::Debug for ExpirationMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationMonitor")
            .field("period", &self.period)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

pub struct ExpirationMonitorBuilder {
    registry: Arc<ExtensionRegistry>,
    period: Duration,
    handler: Arc<dyn EvictionHandler>,
}

impl ExpirationMonitorBuilder {
    /// Delay between two sweeps. A zero period keeps the default.
    #[must_use]
    pub fn run_every(mut self, period: Duration) -> Self {
        if period.is_zero() {
            tracing::warn!(
                period = %humantime::format_duration(self.period),
                "ignoring zero expiration period, keeping the current one"
            );
        } else {
            self.period = period;
        }
        self
    }

    #[must_use]
    pub fn on_expired(mut self, handler: Arc<dyn EvictionHandler>) -> Self {
        self.handler = handler;
        self
    }

    #[must_use]
    pub fn build(self) -> ExpirationMonitor {
        ExpirationMonitor {
            registry: self.registry,
            period: self.period,
            handler: self.handler,
            running: Mutex::new(None),
            sweep_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

impl ExpirationMonitor {
    #[must_use]
    pub fn builder(registry: Arc<ExtensionRegistry>) -> ExpirationMonitorBuilder {
        ExpirationMonitorBuilder {
            registry,
            period: DEFAULT_EXPIRATION_FREQUENCY,
            handler: Arc::new(DisposeOnExpiry),
        }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// True between `begin_monitoring` and the start of `stop_monitoring`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.cancel.is_cancelled())
    }

    /// Spawn the sweeping task. The first sweep happens one period from now.
    ///
    /// Returns `Ok(false)` if the monitor is already running.
    ///
    /// # Errors
    /// Returns `ExtensionError::NoRuntime` when called outside a Tokio runtime,
    /// and `ExtensionError::MonitorStopping` while a stop is still draining
    /// the previous task.
    pub fn begin_monitoring(&self) -> Result<bool, ExtensionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ExtensionError::NoRuntime)?;
        let mut running = self.running.lock();
        if let Some(current) = running.as_ref() {
            if current.cancel.is_cancelled() {
                return Err(ExtensionError::MonitorStopping);
            }
            return Ok(false);
        }

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.spawn_on(
            sweep_loop(
                Arc::clone(&self.registry),
                self.period,
                Arc::clone(&self.handler),
                Arc::clone(&self.sweep_lock),
                cancel.clone(),
            ),
            &runtime,
        );
        // Manual sweeps may still join until the tracker drains.
        tasks.close();
        *running = Some(Running { cancel, tasks });
        tracing::info!(
            period = %humantime::format_duration(self.period),
            "expiration monitor started"
        );
        Ok(true)
    }

    /// Cancel future sweeps and wait for in-flight ones to finish.
    ///
    /// Concurrent callers all wait for the same drain, so no eviction runs
    /// once any of them returns. Safe to call when the monitor was never
    /// started.
    pub async fn stop_monitoring(&self) {
        let tasks = {
            let running = self.running.lock();
            let Some(current) = running.as_ref() else {
                return;
            };
            current.cancel.cancel();
            current.tasks.clone()
        };
        tasks.wait().await;

        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|current| TaskTracker::ptr_eq(&current.tasks, &tasks)) {
            *running = None;
            tracing::info!("expiration monitor stopped");
        }
    }

    /// Run one sweep right away, outside the schedule. Returns how many
    /// instances were evicted.
    ///
    /// The sweep waits for a scheduled one in progress. While the monitor
    /// runs, `stop_monitoring` also waits for it; once a stop has begun this
    /// returns 0 without sweeping. On a monitor that is not running the
    /// sweep belongs to the caller alone.
    pub async fn check_now(&self) -> usize {
        let _in_flight = {
            let running = self.running.lock();
            match running.as_ref() {
                Some(current) if current.cancel.is_cancelled() => return 0,
                Some(current) => Some(current.tasks.token()),
                None => None,
            }
        };
        sweep(&self.registry, self.period, self.handler.as_ref(), &self.sweep_lock).await
    }
}

async fn sweep_loop(
    registry: Arc<ExtensionRegistry>,
    period: Duration,
    handler: Arc<dyn EvictionHandler>,
    sweep_lock: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }
        let evicted = sweep(&registry, period, handler.as_ref(), &sweep_lock).await;
        if evicted > 0 {
            tracing::debug!(evicted, "expired dynamic configurations evicted");
        }
    }
}

async fn sweep(
    registry: &ExtensionRegistry,
    period: Duration,
    handler: &dyn EvictionHandler,
    sweep_lock: &tokio::sync::Mutex<()>,
) -> usize {
    let _serial = sweep_lock.lock().await;
    let now = Instant::now();
    let mut evicted = 0;

    for provider in registry.expirable_providers() {
        let Some(expirable) = provider.as_expirable() else {
            continue;
        };
        let policy = expirable
            .expiration_policy()
            .unwrap_or_else(|| ExpirationPolicy::new(period));

        for (key, instance) in expirable.dynamic_instances() {
            if !policy.is_expired(&instance, now) {
                continue;
            }
            // Lost the race against a fresh access or a replacement.
            if !expirable.release_if_idle(&key, &instance, policy.max_idle, now) {
                continue;
            }
            evicted += 1;
            let type_name = instance.type_name();
            if let Err(e) = handler.on_expired(&key, instance).await {
                tracing::error!(
                    key = %key,
                    config_type = type_name,
                    provider = provider.name(),
                    error = %format!("{e:#}"),
                    "could not dispose expired dynamic config"
                );
            }
        }
    }
    evicted
}
