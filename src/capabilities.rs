//! Capability discovery.
//!
//! Components that change the store's behaviour announce themselves here at
//! startup; the registry is served read-only at `GET /info`.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Registered capabilities keyed by name.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Capabilities {
    entries: BTreeMap<String, Value>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a capability with its descriptive settings.
    pub fn register(&mut self, name: impl Into<String>, settings: Value) {
        let name = name.into();
        tracing::info!("registering capability {}", name);
        self.entries.insert(name, settings);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }
}
