//! Well-known event names published on the [`EventBus`](super::event_bus::EventBus).
//!
//! Topics are plain strings so plugins can define their own; the ones below
//! are the events the core itself emits.

pub const MESSAGE_ADDED: &str = "message:added";
pub const MESSAGE_REMOVED: &str = "message:removed";
pub const MESSAGE_STATE_CHANGED: &str = "message:state_changed";
pub const MESSAGE_CONTENT_CHANGED: &str = "message:content_changed";
pub const MESSAGE_FEEDBACK: &str = "message:feedback";

pub const SEND_STARTED: &str = "send:started";
pub const SEND_COMPLETED: &str = "send:completed";
pub const SEND_FAILED: &str = "send:failed";

pub const REGENERATION_STARTED: &str = "regeneration:started";
pub const REGENERATION_COMPLETED: &str = "regeneration:completed";
pub const REGENERATION_FAILED: &str = "regeneration:failed";

pub const STREAM_STARTED: &str = "stream:started";
pub const STREAM_CHUNK: &str = "stream:chunk";
pub const STREAM_PAUSED: &str = "stream:paused";
pub const STREAM_RESUMED: &str = "stream:resumed";
pub const STREAM_STOPPED: &str = "stream:stopped";
pub const STREAM_COMPLETED: &str = "stream:completed";
pub const STREAM_FAILED: &str = "stream:failed";

pub const EDIT_STARTED: &str = "edit:started";
pub const EDIT_UPDATED: &str = "edit:updated";
pub const EDIT_SAVED: &str = "edit:saved";
pub const EDIT_CANCELLED: &str = "edit:cancelled";

pub const MODEL_CHANGED: &str = "model:changed";

pub const COMMAND_EXECUTED: &str = "command:executed";
pub const COMMAND_UNDONE: &str = "command:undone";

pub const PLUGIN_STATE_CHANGED: &str = "plugin:state_changed";
pub const PLUGIN_ERROR: &str = "plugin:error";

pub const ROOM_CLOSED: &str = "room:closed";
