//! Appends finished turns to a plain-text transcript file.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::event_bus::BusEvent;
use crate::core::events;
use crate::core::plugin::{Configurable, EventHandling, Plugin, PluginError};
use crate::utils::sync::lock;

const PLUGIN_ID: &str = "transcript";

struct TranscriptSettings {
    path: Option<PathBuf>,
    user_label: String,
}

pub struct TranscriptPlugin {
    settings: Mutex<TranscriptSettings>,
}

impl Default for TranscriptPlugin {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TranscriptPlugin {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            settings: Mutex::new(TranscriptSettings {
                path,
                user_label: "You".to_string(),
            }),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        lock(&self.settings).path.clone()
    }

    fn append(&self, entry: &str) -> Result<(), PluginError> {
        let Some(path) = self.path() else {
            return Ok(());
        };
        write_entry(&path, entry).map_err(|error| PluginError::Handler {
            plugin: PLUGIN_ID.to_string(),
            event: "write".to_string(),
            message: format!("{}: {error}", path.display()),
        })
    }
}

fn write_entry(path: &Path, entry: &str) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for line in entry.lines() {
        writeln!(writer, "{line}")?;
    }
    writeln!(writer)?;
    writer.flush()
}

fn check_writable(path: &Path) -> Result<(), String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|error| format!("cannot write {}: {error}", path.display()))
}

impl Plugin for TranscriptPlugin {
    fn id(&self) -> &str {
        PLUGIN_ID
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn supported_event_types(&self) -> Vec<String> {
        vec![
            events::MESSAGE_ADDED.to_string(),
            events::MESSAGE_STATE_CHANGED.to_string(),
        ]
    }

    fn on_start(&self) -> Result<(), PluginError> {
        match self.path() {
            Some(path) => check_writable(&path).map_err(|reason| PluginError::hook(PLUGIN_ID, "start", reason)),
            None => Ok(()),
        }
    }

    fn as_event_handler(&self) -> Option<&dyn EventHandling> {
        Some(self)
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        Some(self)
    }
}

impl EventHandling for TranscriptPlugin {
    fn can_handle_event(&self, event_type: &str) -> bool {
        event_type == events::MESSAGE_ADDED || event_type == events::MESSAGE_STATE_CHANGED
    }

    fn handle_event(&self, event: &BusEvent) -> Result<(), PluginError> {
        let data = &event.data;
        let role = data["role"].as_str().unwrap_or_default();
        let content = data["content"].as_str().unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(());
        }

        let entry = match event.event_type.as_str() {
            // User turns are complete on insert; replies once they settle.
            events::MESSAGE_ADDED if role == "user" && data["state"] == "complete" => {
                let label = lock(&self.settings).user_label.clone();
                format!("{label}: {content}")
            }
            events::MESSAGE_STATE_CHANGED if role == "assistant" && data["to"] == "complete" => {
                content.to_string()
            }
            _ => return Ok(()),
        };
        debug!(plugin = PLUGIN_ID, role, "appending to transcript");
        self.append(&entry)
    }
}

impl Configurable for TranscriptPlugin {
    fn configuration(&self) -> Map<String, Value> {
        let settings = lock(&self.settings);
        let mut map = Map::new();
        map.insert(
            "path".to_string(),
            settings
                .path
                .as_ref()
                .map(|path| Value::String(path.display().to_string()))
                .unwrap_or(Value::Null),
        );
        map.insert("user_label".to_string(), Value::String(settings.user_label.clone()));
        map
    }

    fn configure(&self, settings: Map<String, Value>) -> Result<(), PluginError> {
        let invalid = |reason: String| PluginError::invalid_configuration(PLUGIN_ID, reason);

        let path = match settings.get("path") {
            None => None,
            Some(Value::Null) => Some(None),
            Some(Value::String(path)) if !path.trim().is_empty() => {
                let path = PathBuf::from(path);
                check_writable(&path).map_err(invalid)?;
                Some(Some(path))
            }
            Some(other) => return Err(invalid(format!("path must be a non-empty string, got {other}"))),
        };
        let user_label = match settings.get("user_label") {
            None => None,
            Some(Value::String(label)) if !label.trim().is_empty() => Some(label.trim().to_string()),
            Some(other) => {
                return Err(invalid(format!(
                    "user_label must be a non-empty string, got {other}"
                )))
            }
        };
        if let Some(key) = settings
            .keys()
            .find(|key| !matches!(key.as_str(), "path" | "user_label"))
        {
            return Err(invalid(format!("unknown setting: {key}")));
        }

        let mut current = lock(&self.settings);
        if let Some(path) = path {
            current.path = path;
        }
        if let Some(label) = user_label {
            current.user_label = label;
        }
        Ok(())
    }
}
