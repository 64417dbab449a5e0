//! Extension Registry - in-memory store of extensions and configuration providers

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::ExtensionDescriptor;
use crate::provider::ConfigurationProvider;

/// (extension name, configuration kind name)
type PairKey = (String, String);

/// Providers indexed by name and by (extension, kind).
///
/// Both indexes live under one lock so a registration is visible through
/// either of them atomically.
#[derive(Default)]
struct ProviderTable {
    by_name: HashMap<String, Arc<dyn ConfigurationProvider>>,
    // Provider names in registration order.
    by_pair: HashMap<PairKey, Vec<String>>,
}

impl ProviderTable {
    fn unlink(&mut self, provider: &dyn ConfigurationProvider) {
        let pair = pair_of(provider);
        if let Some(names) = self.by_pair.get_mut(&pair) {
            names.retain(|n| n != provider.name());
            if names.is_empty() {
                self.by_pair.remove(&pair);
            }
        }
    }
}

fn pair_of(provider: &dyn ConfigurationProvider) -> PairKey {
    (
        provider.extension().to_owned(),
        provider.configuration_kind().to_owned(),
    )
}

/// Registry that tracks registered extensions and their configuration providers.
pub struct ExtensionRegistry {
    extensions: DashMap<String, Arc<ExtensionDescriptor>>,
    providers: RwLock<ProviderTable>,
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let extensions: Vec<String> = self.extensions.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &extensions)
            .field("providers_count", &self.providers.read().by_name.len())
            .finish()
    }
}

impl ExtensionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            extensions: DashMap::new(),
            providers: RwLock::new(ProviderTable::default()),
        }
    }

    /// Insert the extension unless one with the same name is already present.
    ///
    /// Returns `true` if the descriptor was inserted. A duplicate name is a
    /// no-op: the first descriptor stays.
    pub fn register_extension(&self, descriptor: Arc<ExtensionDescriptor>) -> bool {
        match self.extensions.entry(descriptor.name().to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
                true
            }
        }
    }

    #[must_use]
    pub fn contains_extension(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }

    #[must_use]
    pub fn get_extension(&self, name: &str) -> Option<Arc<ExtensionDescriptor>> {
        self.extensions.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Snapshot of all registered extensions, sorted by name.
    #[must_use]
    pub fn get_extensions(&self) -> Vec<Arc<ExtensionDescriptor>> {
        let mut all: Vec<_> = self
            .extensions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Register a provider under its name, replacing any previous holder of
    /// that name (last write wins). Returns the replaced provider.
    pub fn register_configuration_provider(
        &self,
        provider: Arc<dyn ConfigurationProvider>,
    ) -> Option<Arc<dyn ConfigurationProvider>> {
        let name = provider.name().to_owned();
        let pair = pair_of(provider.as_ref());
        let mut table = self.providers.write();

        let replaced = table.by_name.insert(name.clone(), provider);
        if let Some(old) = &replaced {
            table.unlink(old.as_ref());
        }
        table.by_pair.entry(pair).or_default().push(name);
        replaced
    }

    /// Register a provider only if its name is free. When the name is
    /// taken, nothing changes and the current holder is returned.
    ///
    /// # Errors
    /// Returns the provider already registered under that name.
    pub fn register_configuration_provider_if_absent(
        &self,
        provider: Arc<dyn ConfigurationProvider>,
    ) -> Result<(), Arc<dyn ConfigurationProvider>> {
        let mut table = self.providers.write();
        if let Some(existing) = table.by_name.get(provider.name()) {
            return Err(Arc::clone(existing));
        }
        let name = provider.name().to_owned();
        let pair = pair_of(provider.as_ref());
        table.by_name.insert(name.clone(), provider);
        table.by_pair.entry(pair).or_default().push(name);
        Ok(())
    }

    /// Remove a provider by name; returns it if it was present.
    pub fn unregister_configuration_provider(
        &self,
        name: &str,
    ) -> Option<Arc<dyn ConfigurationProvider>> {
        let mut table = self.providers.write();
        let removed = table.by_name.remove(name)?;
        table.unlink(removed.as_ref());
        Some(removed)
    }

    #[must_use]
    pub fn get_configuration_provider(&self, name: &str) -> Option<Arc<dyn ConfigurationProvider>> {
        self.providers.read().by_name.get(name).cloned()
    }

    /// All providers compatible with (extension, kind), in registration order.
    #[must_use]
    pub fn get_configuration_providers(
        &self,
        extension: &str,
        kind: &str,
    ) -> Vec<Arc<dyn ConfigurationProvider>> {
        let table = self.providers.read();
        let Some(names) = table
            .by_pair
            .get(&(extension.to_owned(), kind.to_owned()))
        else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|n| table.by_name.get(n).cloned())
            .collect()
    }

    /// Snapshot of the providers whose instances can expire.
    #[must_use]
    pub fn expirable_providers(&self) -> Vec<Arc<dyn ConfigurationProvider>> {
        self.providers
            .read()
            .by_name
            .values()
            .filter(|p| p.as_expirable().is_some())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn providers_len(&self) -> usize {
        self.providers.read().by_name.len()
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
