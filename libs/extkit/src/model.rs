//! Extension descriptors: the immutable values the registry is keyed by.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::instance::ConfigurationFactory;

/// One configuration shape offered by an extension.
#[derive(Clone)]
pub struct ConfigurationKindDescriptor {
    name: String,
    implicit: bool,
    factory: Arc<dyn ConfigurationFactory>,
}

impl ConfigurationKindDescriptor {
    /// A kind that must be declared explicitly before use.
    pub fn new(name: impl Into<String>, factory: Arc<dyn ConfigurationFactory>) -> Self {
        Self {
            name: name.into(),
            implicit: false,
            factory,
        }
    }

    /// Mark the kind as usable when the caller declared no configuration.
    #[must_use]
    pub fn implicit(mut self, implicit: bool) -> Self {
        self.implicit = implicit;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn can_be_used_implicitly(&self) -> bool {
        self.implicit
    }

    #[must_use]
    pub fn factory(&self) -> &Arc<dyn ConfigurationFactory> {
        &self.factory
    }
}

impl fmt::Debug for ConfigurationKindDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationKindDescriptor")
            .field("name", &self.name)
            .field("implicit", &self.implicit)
            .finish_non_exhaustive()
    }
}

/// An error kind an extension may raise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorKindDescriptor {
    pub identifier: String,
    /// Parent identifier inside the same extension namespace; `None` means `ANY`.
    #[serde(default)]
    pub parent: Option<String>,
}

impl ErrorKindDescriptor {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            parent: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

/// Descriptor of a pluggable extension. Never mutated once registered.
#[derive(Debug, Clone)]
pub struct ExtensionDescriptor {
    name: String,
    version: String,
    vendor: String,
    configuration_kinds: Vec<ConfigurationKindDescriptor>,
    error_kinds: Vec<ErrorKindDescriptor>,
}

impl ExtensionDescriptor {
    pub fn builder(name: impl Into<String>) -> ExtensionDescriptorBuilder {
        ExtensionDescriptorBuilder {
            name: name.into(),
            version: "0.0.0".to_owned(),
            vendor: String::new(),
            configuration_kinds: Vec::new(),
            error_kinds: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    #[must_use]
    pub fn configuration_kinds(&self) -> &[ConfigurationKindDescriptor] {
        &self.configuration_kinds
    }

    #[must_use]
    pub fn configuration_kind(&self, name: &str) -> Option<&ConfigurationKindDescriptor> {
        self.configuration_kinds.iter().find(|k| k.name == name)
    }

    #[must_use]
    pub fn error_kinds(&self) -> &[ErrorKindDescriptor] {
        &self.error_kinds
    }
}

pub struct ExtensionDescriptorBuilder {
    name: String,
    version: String,
    vendor: String,
    configuration_kinds: Vec<ConfigurationKindDescriptor>,
    error_kinds: Vec<ErrorKindDescriptor>,
}

impl ExtensionDescriptorBuilder {
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    #[must_use]
    pub fn configuration_kind(mut self, kind: ConfigurationKindDescriptor) -> Self {
        self.configuration_kinds.push(kind);
        self
    }

    #[must_use]
    pub fn error_kind(mut self, kind: ErrorKindDescriptor) -> Self {
        self.error_kinds.push(kind);
        self
    }

    #[must_use]
    pub fn build(self) -> ExtensionDescriptor {
        ExtensionDescriptor {
            name: self.name,
            version: self.version,
            vendor: self.vendor,
            configuration_kinds: self.configuration_kinds,
            error_kinds: self.error_kinds,
        }
    }
}

/// Deployment manifest shipped next to an extension's artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub min_runtime_version: Option<String>,
    #[serde(default)]
    pub exported_packages: Vec<String>,
    #[serde(default)]
    pub exported_resources: Vec<String>,
}
