//! Process-wide catalog of error types declared by extensions.
//!
//! Each extension gets its own namespace (the upper-cased extension name), so
//! two extensions may both declare `CONNECTIVITY` without clashing.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

use crate::model::ExtensionDescriptor;

/// Identifier of the implicit root every error type descends from.
pub const ANY_ERROR: &str = "ANY";

/// Receives the error kinds an extension declares when it is registered.
pub trait ErrorTypeRegistrant: Send + Sync {
    fn register_errors(&self, extension: &ExtensionDescriptor);
}

/// Fully-qualified error type (`NAMESPACE:IDENTIFIER`).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ErrorType {
    pub namespace: String,
    pub identifier: String,
    pub parent: Option<Box<ErrorType>>,
}

impl fmt::Debug for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identifier)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identifier)
    }
}

/// Namespace under which an extension's errors are registered.
#[must_use]
pub fn error_namespace(extension_name: &str) -> String {
    extension_name.to_uppercase()
}

type ErrorKey = (String, String);

/// In-memory [`ErrorTypeRegistrant`] with lookup by (namespace, identifier).
#[derive(Default)]
pub struct InMemoryErrorCatalog {
    types: RwLock<HashMap<ErrorKey, ErrorType>>,
}

impl InMemoryErrorCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lookup(&self, namespace: &str, identifier: &str) -> Option<ErrorType> {
        self.types
            .read()
            .get(&(namespace.to_owned(), identifier.to_owned()))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl ErrorTypeRegistrant for InMemoryErrorCatalog {
    fn register_errors(&self, extension: &ExtensionDescriptor) {
        let namespace = error_namespace(extension.name());
        let any = ErrorType {
            namespace: namespace.clone(),
            identifier: ANY_ERROR.to_owned(),
            parent: None,
        };

        let mut w = self.types.write();
        w.entry((namespace.clone(), ANY_ERROR.to_owned()))
            .or_insert_with(|| any.clone());

        // Parents may be declared after their children; resolve once all are known.
        let declared: HashMap<&str, Option<&str>> = extension
            .error_kinds()
            .iter()
            .map(|k| (k.identifier.as_str(), k.parent.as_deref()))
            .collect();

        for kind in extension.error_kinds() {
            let error_type = build_type(&namespace, &kind.identifier, &declared, &any, 0);
            tracing::debug!(error_type = %error_type, "registering extension error type");
            w.insert((namespace.clone(), kind.identifier.clone()), error_type);
        }
    }
}

fn build_type(
    namespace: &str,
    identifier: &str,
    declared: &HashMap<&str, Option<&str>>,
    any: &ErrorType,
    depth: usize,
) -> ErrorType {
    let parent = match declared.get(identifier).copied().flatten() {
        // Cycles or unknown parents fall back to the namespace root.
        Some(p) if p != identifier && declared.contains_key(p) && depth < declared.len() => {
            build_type(namespace, p, declared, any, depth + 1)
        }
        _ => any.clone(),
    };
    ErrorType {
        namespace: namespace.to_owned(),
        identifier: identifier.to_owned(),
        parent: Some(Box::new(parent)),
    }
}
