//! Capability Registry
//!
//! Maps capability names to handlers. Built once at start-up, then shared
//! behind an `Arc` and only read.

use std::collections::HashMap;
use std::sync::Arc;

use query_cascade_core::Capability;
use serde::{Deserialize, Serialize};

/// Outcome of resolving a requested capability name.
pub enum Resolution {
    /// The requested capability is registered.
    Registered(Arc<dyn Capability>),
    /// The requested name is unknown; the default capability stands in.
    Substituted {
        requested: String,
        capability: Arc<dyn Capability>,
    },
    /// Neither the requested nor the default capability is registered.
    Unavailable,
}

/// Registry that stores capabilities and remembers registration order.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    order: Vec<String>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any previous one with the same name.
    /// A replacement keeps the original registration position.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.name().to_string();
        let previous = self.capabilities.insert(name.clone(), capability);
        if previous.is_none() {
            self.order.push(name);
        }
        previous
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        self.register(capability);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Requested name first, then `default_name`.
    pub fn resolve(&self, requested: &str, default_name: &str) -> Resolution {
        if let Some(cap) = self.get(requested) {
            return Resolution::Registered(cap);
        }
        match self.get(default_name) {
            Some(cap) => Resolution::Substituted {
                requested: requested.to_string(),
                capability: cap,
            },
            None => Resolution::Unavailable,
        }
    }

    /// Pick a registered capability other than `current` for a retry.
    ///
    /// A capability named in `hint` wins; otherwise the first registered
    /// capability that is not `current`.
    pub fn alternative_to(&self, current: &str, hint: &str) -> Option<String> {
        let hint = hint.to_lowercase();
        let named = self
            .order
            .iter()
            .filter(|name| name.as_str() != current)
            .find(|name| hint.contains(&name.to_lowercase()));
        named
            .or_else(|| self.order.iter().find(|name| name.as_str() != current))
            .cloned()
    }

    /// Name and description of every capability, in registration order.
    pub fn list(&self) -> Vec<CapabilityInfo> {
        self.order
            .iter()
            .filter_map(|name| self.capabilities.get(name))
            .map(|cap| CapabilityInfo {
                name: cap.name().to_string(),
                description: cap.description().to_string(),
            })
            .collect()
    }
}

/// Summary info about a registered capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
}
