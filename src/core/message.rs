use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::ChatMessage;

pub const DB_ID_PREFIX: &str = "db:";
pub const CLIENT_ID_PREFIX: &str = "msg_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// Lifecycle state of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MessageState {
    Pending,
    Loading,
    Complete,
    Error,
    Animating,
}

impl MessageState {
    pub const ALL: [MessageState; 5] = [
        MessageState::Pending,
        MessageState::Loading,
        MessageState::Complete,
        MessageState::Error,
        MessageState::Animating,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageState::Pending => "pending",
            MessageState::Loading => "loading",
            MessageState::Complete => "complete",
            MessageState::Error => "error",
            MessageState::Animating => "animating",
        }
    }

    /// `complete` and `error` are terminal until a regeneration re-enters them.
    pub fn is_settled(self) -> bool {
        matches!(self, MessageState::Complete | MessageState::Error)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, MessageState::Loading | MessageState::Animating)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MessageState {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, String> {
        match value {
            "pending" => Ok(MessageState::Pending),
            "loading" => Ok(MessageState::Loading),
            "complete" => Ok(MessageState::Complete),
            "error" => Ok(MessageState::Error),
            "animating" => Ok(MessageState::Animating),
            _ => Err(format!("invalid message state: {value}")),
        }
    }
}

impl TryFrom<String> for MessageState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        Self::try_from(value.as_str())
    }
}

impl From<MessageState> for String {
    fn from(value: MessageState) -> Self {
        value.as_str().to_string()
    }
}

/// Where a message id came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOrigin<'a> {
    /// Backed by a database row (`db:<n>`).
    Database(i64),
    /// Generated on this client (`msg_<timestamp>_<random>` or any other
    /// non-database id).
    Client(&'a str),
}

/// Stable message identifier. Never reassigned once a message exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_db(row_id: i64) -> Self {
        Self(format!("{DB_ID_PREFIX}{row_id}"))
    }

    pub fn generate() -> Self {
        Self(generate_client_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn origin(&self) -> MessageOrigin<'_> {
        self.0
            .strip_prefix(DB_ID_PREFIX)
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(MessageOrigin::Database)
            .unwrap_or(MessageOrigin::Client(&self.0))
    }

    pub fn db_id(&self) -> Option<i64> {
        match self.origin() {
            MessageOrigin::Database(id) => Some(id),
            MessageOrigin::Client(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The unit of work tracked by the state manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcurrentMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub state: MessageState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub is_disliked: bool,
}

impl ConcurrentMessage {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>, state: MessageState) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            state,
            timestamp: Utc::now(),
            metadata: None,
            client_id: None,
            is_liked: false,
            is_disliked: false,
        }
    }

    /// A completed user turn with a freshly generated client id.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageId::generate(), Role::User, content, MessageState::Complete)
    }

    /// An empty assistant turn awaiting a response. Its id doubles as the
    /// idempotency key for the request that fills it.
    pub fn assistant_placeholder() -> Self {
        let id = MessageId::generate();
        let mut message = Self::new(id.clone(), Role::Assistant, "", MessageState::Pending);
        message.client_id = Some(id.as_str().to_string());
        message
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn error_reason(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.get("error"))
            .and_then(Value::as_str)
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            id: Some(self.id.as_str().to_string()),
            state: Some(self.state),
        }
    }
}

/// Normalize `messages` into the request history, optionally replacing the
/// content of the final user turn. The input is never mutated.
pub fn normalize_history(
    messages: &[ConcurrentMessage],
    override_last_user: Option<&str>,
) -> Vec<ChatMessage> {
    let mut history: Vec<ChatMessage> = messages.iter().map(|m| m.to_chat_message()).collect();
    if let Some(content) = override_last_user {
        if let Some(last) = history.last_mut().filter(|m| m.role.is_user()) {
            last.content = content.to_string();
        }
    }
    history
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Build a client id of the form `msg_<timestamp_ms>_<random>`.
pub fn generate_client_id() -> String {
    let timestamp = Utc::now().timestamp_millis();
    format!("{CLIENT_ID_PREFIX}{timestamp}_{}", random_suffix())
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut bytes = [0u8; 9];
    if getrandom::fill(&mut bytes).is_err() {
        // Entropy unavailable; fall back to a process-local counter.
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        let seed = ID_COUNTER.fetch_add(1, Ordering::Relaxed) ^ nanos;
        for (index, byte) in bytes.iter_mut().enumerate() {
            *byte = (seed >> ((index % 8) * 8)) as u8;
        }
    }
    bytes
        .iter()
        .map(|byte| ALPHABET[(*byte as usize) % ALPHABET.len()] as char)
        .collect()
}

/// Reject blank or oversized content. `max_len` counts characters.
pub fn validate_content(content: &str, max_len: usize) -> Result<(), String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err("message content cannot be empty".to_string());
    }
    let length = content.chars().count();
    if length > max_len {
        return Err(format!(
            "message content is {length} characters; the limit is {max_len}"
        ));
    }
    Ok(())
}

pub fn validate_model_id(model: &str) -> Result<(), String> {
    if model.trim().is_empty() {
        return Err("model id cannot be empty".to_string());
    }
    if model.chars().any(char::is_whitespace) {
        return Err(format!("model id contains whitespace: {model:?}"));
    }
    Ok(())
}
