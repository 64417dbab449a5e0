//! Composite loader: one name over an enclosing scope and isolated children.

use std::fmt;
use std::sync::Arc;

use super::policy::{LookupPolicy, LookupStrategy, Scope};
use super::{LoaderError, Resource, ResourceResolver};

/// One enclosing resolver plus ordered child resolvers behind a single name.
pub struct CompositeLoader {
    name: String,
    parent: Option<Arc<dyn ResourceResolver>>,
    children: Vec<Arc<dyn ResourceResolver>>,
    policy: LookupPolicy,
}

impl CompositeLoader {
    /// Without a parent, enclosing lookups always miss.
    ///
    /// # Errors
    /// Returns `LoaderError::NoChildScopes` if `children` is empty.
    pub fn new(
        name: impl Into<String>,
        parent: Option<Arc<dyn ResourceResolver>>,
        children: Vec<Arc<dyn ResourceResolver>>,
        policy: LookupPolicy,
    ) -> Result<Self, LoaderError> {
        let name = name.into();
        if children.is_empty() {
            return Err(LoaderError::NoChildScopes { loader: name });
        }
        Ok(Self {
            name,
            parent,
            children,
            policy,
        })
    }

    #[must_use]
    pub fn policy(&self) -> &LookupPolicy {
        &self.policy
    }

    #[must_use]
    pub fn children(&self) -> &[Arc<dyn ResourceResolver>] {
        &self.children
    }

    /// Resolve `identifier`, failing if no consulted scope has it.
    ///
    /// # Errors
    /// Returns `LoaderError::NotFound` on a miss.
    pub fn load(&self, identifier: &str) -> Result<Resource, LoaderError> {
        self.resolve(identifier).ok_or_else(|| LoaderError::NotFound {
            loader: self.name.clone(),
            identifier: identifier.to_owned(),
        })
    }

    /// Every match across the consulted scopes, in lookup order.
    #[must_use]
    pub fn resolve_all(&self, identifier: &str) -> Vec<Resource> {
        let strategy = self.policy.lookup_strategy(identifier);
        let mut found = Vec::new();
        for scope in strategy.scopes() {
            match scope {
                Scope::Enclosing => found.extend(self.from_parent(identifier)),
                Scope::Isolated => {
                    found.extend(self.children.iter().filter_map(|c| c.resolve(identifier)));
                }
            }
        }
        found
    }

    fn from_parent(&self, identifier: &str) -> Option<Resource> {
        self.parent.as_ref().and_then(|p| p.resolve(identifier))
    }

    fn from_children(&self, identifier: &str) -> Option<Resource> {
        self.children.iter().find_map(|c| c.resolve(identifier))
    }

    fn resolve_with(&self, strategy: LookupStrategy, identifier: &str) -> Option<Resource> {
        strategy.scopes().iter().find_map(|scope| match scope {
            Scope::Enclosing => self.from_parent(identifier),
            Scope::Isolated => self.from_children(identifier),
        })
    }
}

impl ResourceResolver for CompositeLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, identifier: &str) -> Option<Resource> {
        let strategy = self.policy.lookup_strategy(identifier);
        let resource = self.resolve_with(strategy, identifier);
        tracing::trace!(
            loader = %self.name,
            identifier,
            ?strategy,
            origin = resource.as_ref().map(|r| r.origin.as_str()),
            "resource lookup"
        );
        resource
    }
}

impl fmt::Debug for CompositeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children: Vec<&str> = self.children.iter().map(|c| c.name()).collect();
        f.debug_struct("CompositeLoader")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .field("children", &children)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::loader::MapResolver;

    fn host() -> Arc<dyn ResourceResolver> {
        Arc::new(
            MapResolver::new("host")
                .with("shared.util.Logger", "host logger")
                .with("host.Only", "host only"),
        )
    }

    fn children() -> Vec<Arc<dyn ResourceResolver>> {
        vec![
            Arc::new(
                MapResolver::new("ext-a")
                    .with("shared.util.Logger", "a logger")
                    .with("ext.Widget", "a widget"),
            ),
            Arc::new(MapResolver::new("ext-b").with("ext.Widget", "b widget").with("ext.Gadget", "b gadget")),
        ]
    }

    fn shared_policy() -> LookupPolicy {
        LookupPolicy::builder()
            .rule("shared.*", LookupStrategy::EnclosingFirst)
            .unwrap()
            .default_strategy(LookupStrategy::IsolatedOnly)
            .build()
    }

    #[test]
    fn shared_prefix_goes_to_enclosing_scope_first() {
        let loader = CompositeLoader::new("app", Some(host()), children(), shared_policy()).unwrap();

        let logger = loader.load("shared.util.Logger").unwrap();
        assert_eq!(logger.origin, "host");
        assert_eq!(&*logger.content, b"host logger");
    }

    #[test]
    fn private_identifiers_stay_in_child_scopes() {
        let loader = CompositeLoader::new("app", Some(host()), children(), shared_policy()).unwrap();

        assert_eq!(loader.load("ext.Widget").unwrap().origin, "ext-a");
        assert_eq!(loader.load("ext.Gadget").unwrap().origin, "ext-b");
        let err = loader.load("host.Only").unwrap_err();
        assert!(matches!(err, LoaderError::NotFound { ref identifier, .. } if identifier == "host.Only"));
    }

    #[test]
    fn each_strategy_orders_scopes() {
        let cases = [
            (LookupStrategy::EnclosingFirst, Some("host")),
            (LookupStrategy::IsolatedFirst, Some("ext-a")),
            (LookupStrategy::EnclosingOnly, Some("host")),
            (LookupStrategy::IsolatedOnly, Some("ext-a")),
        ];
        for (strategy, expected) in cases {
            let policy = LookupPolicy::builder().default_strategy(strategy).build();
            let loader = CompositeLoader::new("app", Some(host()), children(), policy).unwrap();
            let origin = loader.resolve("shared.util.Logger").map(|r| r.origin);
            assert_eq!(origin.as_deref(), expected, "{strategy:?}");
        }

        let enclosing_only = LookupPolicy::builder()
            .default_strategy(LookupStrategy::EnclosingOnly)
            .build();
        let loader = CompositeLoader::new("app", Some(host()), children(), enclosing_only).unwrap();
        assert!(loader.resolve("ext.Widget").is_none());
    }

    #[test]
    fn isolated_first_falls_back_to_parent() {
        let loader = CompositeLoader::new("app", Some(host()), children(), LookupPolicy::default()).unwrap();
        assert_eq!(loader.load("host.Only").unwrap().origin, "host");
    }

    #[test]
    fn missing_parent_always_misses_enclosing_lookups() {
        let policy = LookupPolicy::builder()
            .default_strategy(LookupStrategy::EnclosingFirst)
            .build();
        let loader = CompositeLoader::new("app", None, children(), policy).unwrap();
        assert_eq!(loader.load("shared.util.Logger").unwrap().origin, "ext-a");
    }

    #[test]
    fn empty_children_are_rejected() {
        let err = CompositeLoader::new("app", Some(host()), Vec::new(), LookupPolicy::default()).unwrap_err();
        assert!(matches!(err, LoaderError::NoChildScopes { .. }));
    }

    #[test]
    fn resolve_all_lists_every_hit_in_lookup_order() {
        let loader = CompositeLoader::new("app", Some(host()), children(), shared_policy()).unwrap();
        let origins: Vec<String> = loader
            .resolve_all("shared.util.Logger")
            .into_iter()
            .map(|r| r.origin)
            .collect();
        assert_eq!(origins, ["host", "ext-a"]);

        let widgets: Vec<String> = loader.resolve_all("ext.Widget").into_iter().map(|r| r.origin).collect();
        assert_eq!(widgets, ["ext-a", "ext-b"]);
    }

    #[test]
    fn loaders_nest() {
        let inner: Arc<dyn ResourceResolver> =
            Arc::new(CompositeLoader::new("inner", None, children(), LookupPolicy::default()).unwrap());
        let outer = CompositeLoader::new("outer", Some(host()), vec![inner], shared_policy()).unwrap();
        assert_eq!(outer.load("ext.Gadget").unwrap().origin, "ext-b");
    }
}
