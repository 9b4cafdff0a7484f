use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{info, warn};

use crate::api::ModelConfig;
use crate::core::event_bus::EventBus;
use crate::core::events;
use crate::core::message::validate_model_id;
use crate::error::{ChatError, Result};
use crate::utils::sync::lock;

/// The model catalog and the model new requests use.
pub struct ModelSelectionService {
    catalog: Vec<ModelConfig>,
    active: Mutex<String>,
    bus: Arc<EventBus>,
}

impl ModelSelectionService {
    pub fn new(catalog: Vec<ModelConfig>, initial: &str, bus: Arc<EventBus>) -> Self {
        let active = if catalog.iter().any(|model| model.id == initial) {
            initial.to_string()
        } else {
            let fallback = catalog
                .first()
                .map(|model| model.id.clone())
                .unwrap_or_else(|| initial.to_string());
            warn!(requested = initial, using = %fallback, "initial model is not in the catalog");
            fallback
        };
        Self {
            catalog,
            active: Mutex::new(active),
            bus,
        }
    }

    pub fn catalog(&self) -> &[ModelConfig] {
        &self.catalog
    }

    pub fn find(&self, id: &str) -> Option<&ModelConfig> {
        self.catalog.iter().find(|model| model.id == id)
    }

    pub fn active_model_id(&self) -> String {
        lock(&self.active).clone()
    }

    /// The catalog entry for `requested`, or for the active model when
    /// `None`.
    pub fn resolve(&self, requested: Option<&str>) -> Result<ModelConfig> {
        let id = match requested {
            Some(id) => id.to_string(),
            None => self.active_model_id(),
        };
        self.find(&id)
            .cloned()
            .ok_or_else(|| ChatError::validation(format!("unknown model: {id}")))
    }

    /// Make `id` the active model and return the previous one.
    pub fn select_model(&self, id: &str) -> Result<String> {
        validate_model_id(id).map_err(ChatError::Validation)?;
        if self.find(id).is_none() {
            return Err(ChatError::validation(format!("unknown model: {id}")));
        }

        let previous = std::mem::replace(&mut *lock(&self.active), id.to_string());
        if previous != id {
            info!(previous = %previous, current = id, "model changed");
            self.bus.publish(
                events::MODEL_CHANGED,
                json!({ "previous": previous, "current": id }),
            );
        }
        Ok(previous)
    }

    /// Reject search-augmented calls on models that cannot serve them.
    pub fn validate_search(&self, model: &ModelConfig) -> Result<()> {
        if model.supports_search {
            Ok(())
        } else {
            Err(ChatError::validation(format!(
                "model {} does not support search",
                model.id
            )))
        }
    }
}
