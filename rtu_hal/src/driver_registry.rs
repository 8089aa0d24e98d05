//! Driver registry for actuator output backends.
//!
//! Provides a `DriverRegistry` struct for registering and retrieving driver
//! factories by backend name. This uses constructor-injection rather than
//! global state.

use rtu_common::actuator::ActuatorConfig;
use rtu_common::driver::{ActuatorDriver, DriverError, DriverFactory};
use std::collections::HashMap;

/// Registry of available output backends.
///
/// Constructed at startup, populated via `register()`, and handed to the
/// actuator manager by value. No global state, testable in isolation.
pub struct DriverRegistry {
    factories: HashMap<&'static str, DriverFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Panics
    /// Panics if a backend with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: DriverFactory) {
        if self.factories.contains_key(name) {
            panic!("Driver '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a backend factory by name.
    pub fn get_factory(&self, name: &str) -> Option<DriverFactory> {
        self.factories.get(name).cloned()
    }

    /// Open a driver for `config` on the named backend.
    ///
    /// # Errors
    /// `DriverError::NotFound` if the backend is not registered, otherwise
    /// whatever the factory reports.
    pub fn create_driver(
        &self,
        name: &str,
        config: &ActuatorConfig,
    ) -> Result<Box<dyn ActuatorDriver>, DriverError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DriverError::NotFound(name.to_string()))?;
        factory(config)
    }

    /// List all registered backend names.
    pub fn list_drivers(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
