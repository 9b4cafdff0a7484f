use tracing::warn;

use crate::api::models::sort_models;
use crate::api::ModelConfig;
use crate::core::config::data::Config;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_REGENERATION_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_COMMAND_HISTORY_LIMIT: usize = 20;
pub const DEFAULT_EVENT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_MAX_EDIT_LENGTH: usize = 10_000;
pub const DEFAULT_AUTO_SAVE_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_CHARS_PER_TICK: usize = 12;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

#[derive(serde::Deserialize)]
struct BuiltinModels {
    models: Vec<ModelConfig>,
}

/// Models compiled into the binary.
pub fn builtin_models() -> Vec<ModelConfig> {
    const CATALOG: &str = include_str!("../../builtin_models.toml");

    match toml::from_str::<BuiltinModels>(CATALOG) {
        Ok(catalog) => catalog.models,
        Err(error) => {
            warn!(error = %error, "built-in model catalog is invalid");
            Vec::new()
        }
    }
}

impl Config {
    /// Built-in models with user entries layered over them by id, sorted for
    /// display.
    pub fn model_catalog(&self) -> Vec<ModelConfig> {
        let mut catalog = builtin_models();
        for model in &self.models {
            match catalog.iter_mut().find(|existing| existing.id == model.id) {
                Some(existing) => *existing = model.clone(),
                None => catalog.push(model.clone()),
            }
        }
        sort_models(&mut catalog);
        catalog
    }

    /// The configured default if it is in the catalog, else the built-in
    /// default.
    pub fn active_model_id(&self) -> String {
        let catalog = self.model_catalog();
        self.default_model
            .as_deref()
            .filter(|id| catalog.iter().any(|model| model.id == *id))
            .unwrap_or(DEFAULT_MODEL)
            .to_string()
    }

    pub fn set_default_model(&mut self, model: impl Into<String>) {
        self.default_model = Some(model.into());
    }
}
