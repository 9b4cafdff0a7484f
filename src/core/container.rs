//! Explicit dependency registry.
//!
//! Services are registered under string keys either as shared singletons or
//! as factories invoked on every resolve. There is no global instance: the
//! container is passed to whoever composes the core.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

/// Keys under which the core looks up its collaborators.
pub mod keys {
    pub const AI_CLIENT: &str = "ai_client";
    pub const PERSISTENCE: &str = "persistence";
    pub const SESSION_PROVIDER: &str = "session_provider";
    pub const EVENT_BUS: &str = "event_bus";
    pub const MESSAGE_STATE: &str = "message_state";
    pub const ANIMATION: &str = "animation";
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("service not registered: {0}")]
    NotRegistered(String),

    #[error("service {key} is registered as a different type (requested {requested})")]
    TypeMismatch { key: String, requested: &'static str },

    #[error("factory for {key} failed: {message}")]
    Factory { key: String, message: String },
}

type AnyService = Arc<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&ServiceContainer) -> Result<AnyService, ContainerError> + Send + Sync>;

#[derive(Clone)]
enum Registration {
    Singleton(AnyService),
    Factory(Factory),
}

#[derive(Default)]
pub struct ServiceContainer {
    registrations: RwLock<HashMap<String, Registration>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared value. Trait objects are registered as
    /// `Arc<dyn Trait>` and resolved with the same type.
    pub fn register_singleton<T>(&self, key: &str, service: T)
    where
        T: Any + Clone + Send + Sync,
    {
        self.insert(key, Registration::Singleton(Arc::new(service)));
    }

    /// Register a factory. It receives the container so it can resolve its
    /// own dependencies, and runs on every resolve.
    pub fn register_factory<T, F>(&self, key: &str, factory: F)
    where
        T: Any + Clone + Send + Sync,
        F: Fn(&ServiceContainer) -> Result<T, ContainerError> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |container| {
            factory(container).map(|service| Arc::new(service) as AnyService)
        });
        self.insert(key, Registration::Factory(factory));
    }

    fn insert(&self, key: &str, registration: Registration) {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if registrations.insert(key.to_string(), registration).is_some() {
            debug!(service = key, "service registration overridden");
        }
    }

    pub fn resolve<T>(&self, key: &str) -> Result<T, ContainerError>
    where
        T: Any + Clone + Send + Sync,
    {
        // Clone the registration out so factories can resolve re-entrantly.
        let registration = self
            .registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| ContainerError::NotRegistered(key.to_string()))?;

        let service = match registration {
            Registration::Singleton(service) => service,
            Registration::Factory(factory) => factory(self)?,
        };

        service
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ContainerError::TypeMismatch {
                key: key.to_string(),
                requested: type_name::<T>(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(key)
    }

    pub fn unregister(&self, key: &str) -> bool {
        self.registrations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
            .is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .registrations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}
