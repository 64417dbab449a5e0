#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Dynamic configurations retired by the manager's expiration monitor.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use extkit::{
    ConfigurationFactory, ConfigurationValue, DynamicConfigurationProvider, ExecutionContext,
    ExtensionManager, ExtensionsConfig, InstanceState,
};

struct Client {
    stops: Arc<AtomicUsize>,
    disposals: Arc<AtomicUsize>,
}

#[async_trait]
impl ConfigurationValue for Client {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn dispose(&self) -> anyhow::Result<()> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ClientFactory {
    stops: Arc<AtomicUsize>,
    disposals: Arc<AtomicUsize>,
}

#[async_trait]
impl ConfigurationFactory for ClientFactory {
    async fn create(&self, _ctx: &ExecutionContext) -> anyhow::Result<Arc<dyn ConfigurationValue>> {
        Ok(Arc::new(Client {
            stops: Arc::clone(&self.stops),
            disposals: Arc::clone(&self.disposals),
        }))
    }
}

fn manager_with_period(period: Duration) -> ExtensionManager {
    ExtensionManager::builder()
        .config(ExtensionsConfig {
            dynamic_config_expiration_frequency: Some(period),
        })
        .build()
}

#[tokio::test(start_paused = true)]
async fn idle_dynamic_configurations_are_stopped_and_disposed() {
    let factory = Arc::new(ClientFactory::default());
    let stops = Arc::clone(&factory.stops);
    let disposals = Arc::clone(&factory.disposals);
    let provider = Arc::new(DynamicConfigurationProvider::keyed_by_attribute(
        "clients", "http", "client", factory, "tenant",
    ));

    let manager = manager_with_period(Duration::from_secs(30));
    manager.register_configuration_provider(provider.clone());
    manager.start().unwrap();

    let acme = ExecutionContext::new().with_attribute("tenant", "acme");
    let globex = ExecutionContext::new().with_attribute("tenant", "globex");
    let stale = manager.get_configuration_by_provider("clients", &acme).await.unwrap();
    let active = manager.get_configuration_by_provider("clients", &globex).await.unwrap();

    // Keep globex busy across two sweeps while acme goes idle.
    for _ in 0..7 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        manager.get_configuration_by_provider("clients", &globex).await.unwrap();
    }
    manager.stop().await;

    assert_eq!(stale.state(), InstanceState::Disposed);
    assert_eq!(active.state(), InstanceState::Started);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(disposals.load(Ordering::SeqCst), 1);
    assert_eq!(provider.len(), 1);

    // A fresh request for the evicted key builds a new instance.
    let rebuilt = manager.get_configuration_by_provider("clients", &acme).await.unwrap();
    assert!(!Arc::ptr_eq(&stale, &rebuilt));
    assert_eq!(rebuilt.state(), InstanceState::Started);
}

#[tokio::test(start_paused = true)]
async fn nothing_is_evicted_after_stop() {
    let factory = Arc::new(ClientFactory::default());
    let disposals = Arc::clone(&factory.disposals);
    let provider = Arc::new(DynamicConfigurationProvider::keyed_by_attribute(
        "clients", "http", "client", factory, "tenant",
    ));

    let manager = manager_with_period(Duration::from_secs(5));
    manager.register_configuration_provider(provider.clone());
    manager.start().unwrap();
    manager
        .get_configuration_by_provider("clients", &ExecutionContext::new())
        .await
        .unwrap();
    manager.stop().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(disposals.load(Ordering::SeqCst), 0);
    assert_eq!(provider.len(), 1);
}
