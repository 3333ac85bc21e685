//! Capabilities: reusable bundles of tools and guide text.
//!
//! Side-effectful backends (browser, shell, filesystem, ...) plug into
//! agents through the [`Capability`] interface: each exposes a tool set and
//! a system-prompt guide, and agents hold a list of capabilities. A named
//! [`CapabilityRegistry`] lets hosts register factories and create
//! instances by name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::tool::BoxedTool;

/// A pluggable bundle of tools plus a prompt guide.
pub trait Capability: Send + Sync {
    /// The capability name.
    fn name(&self) -> &str;

    /// The tools this capability contributes.
    fn tools(&self) -> Vec<BoxedTool>;

    /// Guide text appended to the agent's system prompt.
    fn guide(&self) -> String;
}

/// Factory producing capability instances.
pub type CapabilityFactory = Arc<dyn Fn() -> Arc<dyn Capability> + Send + Sync>;

/// A named registry of capability factories.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    factories: Arc<Mutex<HashMap<String, CapabilityFactory>>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl CapabilityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a name, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, factory: CapabilityFactory) {
        self.factories
            .lock()
            .expect("lock poisoned")
            .insert(name.into(), factory);
    }

    /// Create a capability by name.
    #[must_use]
    pub fn create(&self, name: &str) -> Option<Arc<dyn Capability>> {
        let factory = self.factories.lock().expect("lock poisoned").get(name).cloned();
        factory.map(|f| f())
    }

    /// The registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .lock()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// A capability assembled from fixed parts.
pub struct StaticCapability {
    name: String,
    tools: Vec<BoxedTool>,
    guide: String,
}

impl std::fmt::Debug for StaticCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCapability")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl StaticCapability {
    /// Create a capability from a name, tools and guide text.
    #[must_use]
    pub fn new(name: impl Into<String>, tools: Vec<BoxedTool>, guide: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools,
            guide: guide.into(),
        }
    }
}

impl Capability for StaticCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<BoxedTool> {
        self.tools.clone()
    }

    fn guide(&self) -> String {
        self.guide.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_create() {
        let registry = CapabilityRegistry::new();
        registry.register(
            "shell",
            Arc::new(|| {
                Arc::new(StaticCapability::new("shell", vec![], "Run shell commands carefully."))
                    as Arc<dyn Capability>
            }),
        );
        let capability = registry.create("shell").unwrap();
        assert_eq!(capability.name(), "shell");
        assert!(capability.guide().contains("shell"));
        assert!(registry.create("missing").is_none());
    }

    #[test]
    fn re_register_replaces() {
        let registry = CapabilityRegistry::new();
        let make = |guide: &'static str| -> CapabilityFactory {
            Arc::new(move || {
                Arc::new(StaticCapability::new("x", vec![], guide)) as Arc<dyn Capability>
            })
        };
        registry.register("x", make("first"));
        registry.register("x", make("second"));
        assert_eq!(registry.create("x").unwrap().guide(), "second");
    }
}
