//! Layered resource resolution.
//!
//! A [`CompositeLoader`] puts an enclosing scope and an ordered list of
//! isolated child scopes behind one resolver. The [`LookupPolicy`] decides per
//! identifier which of them are asked and in which order, so hosts can share
//! selected resources while keeping each extension's private ones apart.

mod composite;
mod policy;

use std::collections::HashMap;
use std::sync::Arc;

pub use composite::CompositeLoader;
pub use policy::{LookupPolicy, LookupPolicyBuilder, LookupStrategy, Scope};

#[derive(thiserror::Error, Debug)]
pub enum LoaderError {
    #[error("resource '{identifier}' not found in loader '{loader}'")]
    NotFound { loader: String, identifier: String },

    #[error("loader '{loader}' needs at least one child scope")]
    NoChildScopes { loader: String },

    #[error("invalid lookup pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// A resolved resource and the scope it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub identifier: String,
    /// Name of the resolver that produced it.
    pub origin: String,
    pub content: Arc<[u8]>,
}

/// Anything able to look resources up by identifier.
pub trait ResourceResolver: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self, identifier: &str) -> Option<Resource>;
}

/// In-memory resolver.
#[derive(Debug, Clone, Default)]
pub struct MapResolver {
    name: String,
    entries: HashMap<String, Arc<[u8]>>,
}

impl MapResolver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, identifier: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(identifier, content);
        self
    }

    pub fn insert(&mut self, identifier: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.entries
            .insert(identifier.into(), Arc::from(content.into()));
    }
}

impl ResourceResolver for MapResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, identifier: &str) -> Option<Resource> {
        self.entries.get(identifier).map(|content| Resource {
            identifier: identifier.to_owned(),
            origin: self.name.clone(),
            content: Arc::clone(content),
        })
    }
}
