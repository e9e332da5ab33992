//! Backend factory registry.
//!
//! Maps broker-type identifiers to factory functions producing boxed
//! [`TraderSession`] trait objects. Adding a venue backend means registering
//! a new factory; the dispatcher and session registry never change.

use std::collections::HashMap;

use crate::session::{BackendContext, TraderSession};
use crate::sim::SimSession;

type BackendFactory = Box<dyn Fn(BackendContext) -> Box<dyn TraderSession> + Send + Sync>;

/// Registry of available backend types.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory under the given broker type.
    pub fn register<F>(&mut self, broker_type: &str, factory: F)
    where
        F: Fn(BackendContext) -> Box<dyn TraderSession> + Send + Sync + 'static,
    {
        self.factories.insert(broker_type.to_string(), Box::new(factory));
    }

    /// Create a backend instance by broker type. Returns `None` if the type
    /// is not registered.
    pub fn create(&self, broker_type: &str, ctx: BackendContext) -> Option<Box<dyn TraderSession>> {
        self.factories.get(broker_type).map(|f| f(ctx))
    }

    /// List all registered broker types.
    pub fn available_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a default registry with the built-in backends.
pub fn default_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register("sim", |ctx| Box::new(SimSession::new(ctx)));
    registry
}
