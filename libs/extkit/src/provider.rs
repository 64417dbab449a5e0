//! Configuration providers: named factories producing configuration instances.
//!
//! Two flavours ship with the runtime:
//! - [`StaticConfigurationProvider`] always hands out the same instance.
//! - [`DynamicConfigurationProvider`] keys instances by context attributes and
//!   lets the expiration monitor retire the ones that went idle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::context::ExecutionContext;
use crate::error::ExtensionError;
use crate::instance::{ConfigurationFactory, ConfigurationInstance};
use crate::keyed_lock::KeyedLocks;

/// A named factory of configuration instances for one (extension, kind) pair.
#[async_trait]
pub trait ConfigurationProvider: Send + Sync {
    /// Unique name within a registry.
    fn name(&self) -> &str;

    fn extension(&self) -> &str;

    fn configuration_kind(&self) -> &str;

    /// Resolve the instance that should service `ctx`.
    async fn get(&self, ctx: &ExecutionContext) -> Result<Arc<ConfigurationInstance>, ExtensionError>;

    /// Providers whose instances can expire expose themselves here.
    fn as_expirable(&self) -> Option<&dyn ExpirableProvider> {
        None
    }
}

/// Provider-side contract used by the expiration monitor.
pub trait ExpirableProvider: Send + Sync {
    fn expiration_policy(&self) -> Option<ExpirationPolicy>;

    /// Point-in-time snapshot of the live instances with their keys.
    fn dynamic_instances(&self) -> Vec<(String, Arc<ConfigurationInstance>)>;

    /// Drop `instance` from the provider if it is still cached under `key`
    /// and has been idle for longer than `max_idle` at `now`.
    ///
    /// Returns `true` when the caller now owns the instance's retirement.
    fn release_if_idle(
        &self,
        key: &str,
        instance: &Arc<ConfigurationInstance>,
        max_idle: Duration,
        now: Instant,
    ) -> bool;
}

/// How long an instance may stay untouched before it is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    pub max_idle: Duration,
}

impl ExpirationPolicy {
    #[must_use]
    pub fn new(max_idle: Duration) -> Self {
        Self { max_idle }
    }

    #[must_use]
    pub fn is_expired(&self, instance: &ConfigurationInstance, now: Instant) -> bool {
        instance.idle_for(now) > self.max_idle
    }
}

/// Provider that always returns one pre-built instance.
pub struct StaticConfigurationProvider {
    name: String,
    extension: String,
    kind: String,
    instance: Arc<ConfigurationInstance>,
}

impl StaticConfigurationProvider {
    pub fn new(
        name: impl Into<String>,
        extension: impl Into<String>,
        kind: impl Into<String>,
        value: Arc<dyn crate::instance::ConfigurationValue>,
    ) -> Self {
        let name = name.into();
        let instance = Arc::new(ConfigurationInstance::new(name.clone(), name.clone(), value));
        Self {
            name,
            extension: extension.into(),
            kind: kind.into(),
            instance,
        }
    }

    #[must_use]
    pub fn instance(&self) -> &Arc<ConfigurationInstance> {
        &self.instance
    }
}

#[async_trait]
impl ConfigurationProvider for StaticConfigurationProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    fn configuration_kind(&self) -> &str {
        &self.kind
    }

    async fn get(&self, _ctx: &ExecutionContext) -> Result<Arc<ConfigurationInstance>, ExtensionError> {
        self.instance.start().await?;
        self.instance.touch();
        Ok(Arc::clone(&self.instance))
    }
}

impl fmt::Debug for StaticConfigurationProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticConfigurationProvider")
            .field("name", &self.name)
            .field("extension", &self.extension)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Maps an execution context to the key of the instance that serves it.
pub type KeyResolver = Arc<dyn Fn(&ExecutionContext) -> String + Send + Sync>;

/// Provider that keeps one instance per resolved context key.
pub struct DynamicConfigurationProvider {
    name: String,
    extension: String,
    kind: String,
    factory: Arc<dyn ConfigurationFactory>,
    resolver: KeyResolver,
    policy: Option<ExpirationPolicy>,
    cache: DashMap<String, Arc<ConfigurationInstance>>,
    // Single-flight instance creation, per key.
    create_locks: KeyedLocks,
}

impl DynamicConfigurationProvider {
    pub fn new(
        name: impl Into<String>,
        extension: impl Into<String>,
        kind: impl Into<String>,
        factory: Arc<dyn ConfigurationFactory>,
        resolver: KeyResolver,
    ) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            kind: kind.into(),
            factory,
            resolver,
            policy: None,
            cache: DashMap::new(),
            create_locks: KeyedLocks::new(),
        }
    }

    async fn create_instance(
        &self,
        key: String,
        ctx: &ExecutionContext,
    ) -> Result<Arc<ConfigurationInstance>, ExtensionError> {
        if let Some(instance) = self.cached(&key) {
            return Ok(instance);
        }

        let value = self
            .factory
            .create(ctx)
            .await
            .map_err(|source| ExtensionError::ConfigurationFactory {
                kind: self.kind.clone(),
                source,
            })?;
        let instance = Arc::new(ConfigurationInstance::new(
            format!("{}:{key}", self.name),
            self.name.clone(),
            value,
        ));
        if let Err(e) = instance.start().await {
            if let Err(dispose_err) = instance.dispose().await {
                tracing::warn!(
                    provider = %self.name,
                    key = %key,
                    error = %dispose_err,
                    "could not dispose configuration that failed to start"
                );
            }
            return Err(e);
        }

        tracing::debug!(
            provider = %self.name,
            key = %key,
            "created dynamic configuration instance"
        );
        self.cache.insert(key, Arc::clone(&instance));
        Ok(instance)
    }

    /// Key instances by one context attribute; contexts without it share
    /// the empty key.
    pub fn keyed_by_attribute(
        name: impl Into<String>,
        extension: impl Into<String>,
        kind: impl Into<String>,
        factory: Arc<dyn ConfigurationFactory>,
        attribute: impl Into<String>,
    ) -> Self {
        let attribute: String = attribute.into();
        let resolver: KeyResolver = Arc::new(move |ctx: &ExecutionContext| {
            ctx.attribute(&attribute).unwrap_or_default().to_owned()
        });
        Self::new(name, extension, kind, factory, resolver)
    }

    #[must_use]
    pub fn with_expiration_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Forget the instance cached under `key` if it is still `instance`.
    /// The caller becomes responsible for stopping and disposing it.
    pub fn release(&self, key: &str, instance: &Arc<ConfigurationInstance>) -> bool {
        self.cache
            .remove_if(key, |_, cached| Arc::ptr_eq(cached, instance))
            .is_some()
    }

    fn cached(&self, key: &str) -> Option<Arc<ConfigurationInstance>> {
        // Touch while the shard is read-locked so a concurrent
        // `release_if_idle` observes the fresh access time.
        self.cache.get(key).map(|entry| {
            entry.touch();
            Arc::clone(entry.value())
        })
    }
}

#[async_trait]
impl ConfigurationProvider for DynamicConfigurationProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    fn configuration_kind(&self) -> &str {
        &self.kind
    }

    async fn get(&self, ctx: &ExecutionContext) -> Result<Arc<ConfigurationInstance>, ExtensionError> {
        let key = (self.resolver)(ctx);
        if let Some(instance) = self.cached(&key) {
            return Ok(instance);
        }

        let guard = self.create_locks.lock(&key).await;
        let created = self.create_instance(key.clone(), ctx).await;
        drop(guard);
        self.create_locks.remove_unused(&key);
        created
    }

    fn as_expirable(&self) -> Option<&dyn ExpirableProvider> {
        Some(self)
    }
}

impl ExpirableProvider for DynamicConfigurationProvider {
    fn expiration_policy(&self) -> Option<ExpirationPolicy> {
        self.policy
    }

    fn dynamic_instances(&self) -> Vec<(String, Arc<ConfigurationInstance>)> {
        self.cache
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    fn release_if_idle(
        &self,
        key: &str,
        instance: &Arc<ConfigurationInstance>,
        max_idle: Duration,
        now: Instant,
    ) -> bool {
        self.cache
            .remove_if(key, |_, cached| {
                Arc::ptr_eq(cached, instance) && cached.idle_for(now) > max_idle
            })
            .is_some()
    }
}

impl fmt::Debug for DynamicConfigurationProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicConfigurationProvider")
            .field("name", &self.name)
            .field("extension", &self.extension)
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .field("instances", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::instance::{ConfigurationValue, InstanceState};
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tenant(String);

    #[async_trait]
    impl ConfigurationValue for Tenant {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
    }

    #[async_trait]
    impl ConfigurationFactory for CountingFactory {
        async fn create(&self, ctx: &ExecutionContext) -> anyhow::Result<Arc<dyn ConfigurationValue>> {
            tokio::task::yield_now().await;
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Tenant(
                ctx.attribute("tenant").unwrap_or_default().to_owned(),
            )))
        }
    }

    struct FailingFactory;

    #[async_trait]
    impl ConfigurationFactory for FailingFactory {
        async fn create(&self, _ctx: &ExecutionContext) -> anyhow::Result<Arc<dyn ConfigurationValue>> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn tenant_provider(factory: Arc<CountingFactory>) -> DynamicConfigurationProvider {
        DynamicConfigurationProvider::keyed_by_attribute("db-dyn", "db", "connection", factory, "tenant")
    }

    #[tokio::test]
    async fn static_provider_starts_once_and_returns_same_instance() {
        let provider = StaticConfigurationProvider::new("cfg", "db", "connection", Arc::new(Tenant("x".to_owned())));
        let ctx = ExecutionContext::new();

        let a = provider.get(&ctx).await.unwrap();
        let b = provider.get(&ctx).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.state(), InstanceState::Started);
        assert!(provider.as_expirable().is_none());
    }

    #[tokio::test]
    async fn dynamic_provider_keeps_one_instance_per_key() {
        let factory = Arc::new(CountingFactory::default());
        let provider = tenant_provider(factory.clone());

        let a1 = provider.get(&ExecutionContext::new().with_attribute("tenant", "a")).await.unwrap();
        let a2 = provider.get(&ExecutionContext::new().with_attribute("tenant", "a")).await.unwrap();
        let b = provider.get(&ExecutionContext::new().with_attribute("tenant", "b")).await.unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(b.value_as::<Tenant>().map(|t| t.0.as_str()), Some("b"));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(provider.len(), 2);
        assert_eq!(a1.state(), InstanceState::Started);
    }

    #[tokio::test]
    async fn concurrent_first_use_creates_single_instance() {
        let factory = Arc::new(CountingFactory::default());
        let provider = Arc::new(tenant_provider(factory.clone()));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let provider = Arc::clone(&provider);
            handles.push(tokio::spawn(async move {
                provider
                    .get(&ExecutionContext::new().with_attribute("tenant", "shared"))
                    .await
            }));
        }
        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn factory_failure_is_reported_and_nothing_cached() {
        let provider = DynamicConfigurationProvider::keyed_by_attribute(
            "broken",
            "db",
            "connection",
            Arc::new(FailingFactory),
            "tenant",
        );

        let err = provider.get(&ExecutionContext::new()).await.unwrap_err();
        assert!(matches!(err, ExtensionError::ConfigurationFactory { ref kind, .. } if kind == "connection"));
        assert!(provider.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn release_only_drops_idle_instances() {
        let provider = tenant_provider(Arc::new(CountingFactory::default()));
        let instance = provider
            .get(&ExecutionContext::new().with_attribute("tenant", "a"))
            .await
            .unwrap();
        let max_idle = Duration::from_secs(60);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!provider.release_if_idle("a", &instance, max_idle, Instant::now()));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(provider.release_if_idle("a", &instance, max_idle, Instant::now()));
        assert!(provider.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn release_ignores_replaced_instance() {
        let provider = tenant_provider(Arc::new(CountingFactory::default()));
        let ctx = ExecutionContext::new().with_attribute("tenant", "a");
        let stale = Arc::new(ConfigurationInstance::new("stale", "db-dyn", Arc::new(Tenant("a".to_owned()))));
        provider.get(&ctx).await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!provider.release_if_idle("a", &stale, Duration::from_secs(60), Instant::now()));
        assert_eq!(provider.len(), 1);
    }

    #[tokio::test]
    async fn release_drops_entry_so_next_get_rebuilds() {
        let factory = Arc::new(CountingFactory::default());
        let provider = tenant_provider(factory.clone());
        let ctx = ExecutionContext::new().with_attribute("tenant", "a");
        let first = provider.get(&ctx).await.unwrap();

        assert!(provider.release("a", &first));
        assert!(!provider.release("a", &first));

        let second = provider.get(&ctx).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn policy_compares_strictly_greater() {
        let policy = ExpirationPolicy::new(Duration::from_secs(10));
        let instance = ConfigurationInstance::new("x", "p", Arc::new(Tenant(String::new())));
        let at_threshold = instance.last_access() + Duration::from_secs(10);
        assert!(!policy.is_expired(&instance, at_threshold));
        assert!(policy.is_expired(&instance, at_threshold + Duration::from_millis(1)));
    }

    struct GatedFactory {
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl ConfigurationFactory for GatedFactory {
        async fn create(&self, ctx: &ExecutionContext) -> anyhow::Result<Arc<dyn ConfigurationValue>> {
            let tenant = ctx.attribute("tenant").unwrap_or_default().to_owned();
            if tenant == "slow" {
                self.gate.notified().await;
            }
            Ok(Arc::new(Tenant(tenant)))
        }
    }

    #[tokio::test]
    async fn slow_creation_does_not_block_other_keys() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let provider = Arc::new(DynamicConfigurationProvider::keyed_by_attribute(
            "db-dyn",
            "db",
            "connection",
            Arc::new(GatedFactory { gate: Arc::clone(&gate) }),
            "tenant",
        ));

        let slow = {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                provider
                    .get(&ExecutionContext::new().with_attribute("tenant", "slow"))
                    .await
            })
        };
        tokio::task::yield_now().await;

        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            provider.get(&ExecutionContext::new().with_attribute("tenant", "fast")),
        )
        .await
        .expect("'fast' must not wait for 'slow'")
        .unwrap();
        assert_eq!(fast.value_as::<Tenant>().map(|t| t.0.as_str()), Some("fast"));
        assert_eq!(provider.len(), 1);

        gate.notify_one();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.value_as::<Tenant>().map(|t| t.0.as_str()), Some("slow"));
        assert_eq!(provider.len(), 2);
    }

    struct Unstartable {
        disposed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConfigurationValue for Unstartable {
        fn as_any(&self) -> &dyn Any {
            self
        }

        async fn start(&self) -> anyhow::Result<()> {
            anyhow::bail!("port already bound")
        }

        async fn dispose(&self) -> anyhow::Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct UnstartableFactory {
        disposed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConfigurationFactory for UnstartableFactory {
        async fn create(&self, _ctx: &ExecutionContext) -> anyhow::Result<Arc<dyn ConfigurationValue>> {
            Ok(Arc::new(Unstartable {
                disposed: Arc::clone(&self.disposed),
            }))
        }
    }

    #[tokio::test]
    async fn instance_failing_to_start_is_disposed_and_not_cached() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let provider = DynamicConfigurationProvider::keyed_by_attribute(
            "db-dyn",
            "db",
            "connection",
            Arc::new(UnstartableFactory {
                disposed: Arc::clone(&disposed),
            }),
            "tenant",
        );

        let err = provider
            .get(&ExecutionContext::new().with_attribute("tenant", "a"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExtensionError::Lifecycle { phase: "start", .. }));
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(provider.is_empty());
    }
}
