use serde::{Deserialize, Serialize};

/// Per-model request parameters forwarded as `modelConfig`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigPayload {
    pub token_parameter: String,
    pub supports_custom_temperature: bool,
    pub default_temperature: f32,
}

/// A catalog entry describing what a model accepts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelConfig {
    pub id: String,
    pub display_name: String,
    #[serde(default = "default_token_parameter")]
    pub token_parameter: String,
    #[serde(default = "default_true")]
    pub supports_custom_temperature: bool,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
    #[serde(default)]
    pub supports_search: bool,
}

fn default_token_parameter() -> String {
    "max_tokens".to_string()
}

fn default_true() -> bool {
    true
}

fn default_temperature() -> f32 {
    0.7
}

impl ModelConfig {
    pub fn payload(&self) -> ModelConfigPayload {
        ModelConfigPayload {
            token_parameter: self.token_parameter.clone(),
            supports_custom_temperature: self.supports_custom_temperature,
            default_temperature: self.default_temperature,
        }
    }

    /// The temperature to send, or `None` when the model ignores overrides.
    pub fn effective_temperature(&self, requested: Option<f32>) -> Option<f32> {
        if !self.supports_custom_temperature {
            return None;
        }
        requested
    }
}

/// Sort a catalog for display: search-capable models first, then by display
/// name, then by id.
pub fn sort_models(models: &mut [ModelConfig]) {
    models.sort_by(|a, b| {
        b.supports_search
            .cmp(&a.supports_search)
            .then_with(|| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()))
            .then_with(|| a.id.cmp(&b.id))
    });
}
