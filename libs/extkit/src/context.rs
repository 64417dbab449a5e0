//! Caller-supplied execution context passed through configuration resolution.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

/// Opaque context of one execution (an event flowing through the host).
///
/// The runtime never interprets it beyond handing it to providers; dynamic
/// providers typically derive their instance key from the attributes.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    event_id: Uuid,
    attributes: Arc<BTreeMap<String, String>>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            attributes: Arc::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.attributes).insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
