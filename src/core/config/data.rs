use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::api::ModelConfig;
use crate::core::config::defaults::{
    DEFAULT_AUTO_SAVE_INTERVAL_MS, DEFAULT_CHARS_PER_TICK, DEFAULT_COMMAND_HISTORY_LIMIT,
    DEFAULT_EVENT_HISTORY_LIMIT, DEFAULT_MAX_EDIT_LENGTH, DEFAULT_REGENERATION_HISTORY_LIMIT,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TICK_INTERVAL_MS,
};

/// Progressive reveal of completed assistant replies.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnimationSettings {
    pub enabled: bool,
    pub chars_per_tick: usize,
    pub tick_interval_ms: u64,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            chars_per_tick: DEFAULT_CHARS_PER_TICK,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
        }
    }
}

impl AnimationSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the edge functions, e.g.
    /// `https://<project>.supabase.co/functions/v1`.
    pub edge_base_url: Option<String>,
    pub default_model: Option<String>,
    /// Extra catalog entries, merged over the built-in models by id.
    pub models: Vec<ModelConfig>,
    pub request_timeout_secs: u64,
    pub regeneration_history_limit: usize,
    pub command_history_limit: usize,
    pub event_history_limit: usize,
    pub max_edit_length: usize,
    /// `None` disables auto-save while editing.
    pub auto_save_interval_ms: Option<u64>,
    pub animation: AnimationSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            edge_base_url: None,
            default_model: None,
            models: Vec::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            regeneration_history_limit: DEFAULT_REGENERATION_HISTORY_LIMIT,
            command_history_limit: DEFAULT_COMMAND_HISTORY_LIMIT,
            event_history_limit: DEFAULT_EVENT_HISTORY_LIMIT,
            max_edit_length: DEFAULT_MAX_EDIT_LENGTH,
            auto_save_interval_ms: Some(DEFAULT_AUTO_SAVE_INTERVAL_MS),
            animation: AnimationSettings::default(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn auto_save_interval(&self) -> Option<Duration> {
        self.auto_save_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

pub fn path_display(path: impl AsRef<Path>) -> String {
    path.as_ref().display().to_string()
}
