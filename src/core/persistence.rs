//! Storage collaborator for message updates.
//!
//! Writes are best-effort: the local message log is authoritative for the
//! session, so failures here are logged and never roll back local state.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::message::{MessageId, MessageOrigin, MessageState};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("no stored message matches {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Fields written back after an assistant turn is (re)generated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantUpdate {
    pub content: String,
    pub state: MessageState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_warning: Option<String>,
}

impl AssistantUpdate {
    pub fn completed(content: impl Into<String>, model: Option<String>) -> Self {
        Self {
            content: content.into(),
            state: MessageState::Complete,
            model,
            citations: Vec::new(),
            time_warning: None,
        }
    }

    /// Attach the sources and freshness note of a search answer.
    pub fn with_search_details(mut self, citations: Vec<Value>, time_warning: Option<String>) -> Self {
        self.citations = citations;
        self.time_warning = time_warning;
        self
    }
}

#[async_trait]
pub trait MessagePersistence: Send + Sync {
    async fn update_assistant_message_by_db_id(
        &self,
        db_id: i64,
        update: &AssistantUpdate,
    ) -> Result<(), PersistenceError>;

    /// Update the row created for `client_id`. Used for turns whose database
    /// id is not yet known locally.
    async fn update_assistant_message_by_client_id(
        &self,
        client_id: &str,
        update: &AssistantUpdate,
    ) -> Result<(), PersistenceError>;

    async fn update_user_message_by_db_id(
        &self,
        db_id: i64,
        content: &str,
    ) -> Result<(), PersistenceError>;
}

/// Persistence that stores nothing, for rooms backed only by the edge
/// function's own writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersistence;

#[async_trait]
impl MessagePersistence for NoopPersistence {
    async fn update_assistant_message_by_db_id(
        &self,
        _db_id: i64,
        _update: &AssistantUpdate,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn update_assistant_message_by_client_id(
        &self,
        _client_id: &str,
        _update: &AssistantUpdate,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn update_user_message_by_db_id(
        &self,
        _db_id: i64,
        _content: &str,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Write an assistant update keyed by whichever identity `id` carries.
/// Returns whether the write succeeded.
pub async fn persist_assistant(
    persistence: &dyn MessagePersistence,
    id: &MessageId,
    update: &AssistantUpdate,
) -> bool {
    let result = match id.origin() {
        MessageOrigin::Database(db_id) => {
            persistence
                .update_assistant_message_by_db_id(db_id, update)
                .await
        }
        MessageOrigin::Client(client_id) => {
            persistence
                .update_assistant_message_by_client_id(client_id, update)
                .await
        }
    };
    match result {
        Ok(()) => true,
        Err(error) => {
            warn!(message_id = %id, error = %error, "failed to persist assistant message");
            false
        }
    }
}

/// Write an edited user message. Client-origin messages have no row to
/// update yet and are skipped.
pub async fn persist_user_edit(
    persistence: &dyn MessagePersistence,
    id: &MessageId,
    content: &str,
) -> bool {
    let Some(db_id) = id.db_id() else {
        debug!(message_id = %id, "skipping user message persistence for client id");
        return false;
    };
    match persistence.update_user_message_by_db_id(db_id, content).await {
        Ok(()) => true,
        Err(error) => {
            warn!(message_id = %id, error = %error, "failed to persist edited user message");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{PersistenceCall, RecordingPersistence};

    #[tokio::test]
    async fn assistant_updates_route_by_origin() {
        let persistence = RecordingPersistence::default();
        let update = AssistantUpdate::completed("hi", None);

        assert!(persist_assistant(&persistence, &MessageId::from_db(7), &update).await);
        assert!(persist_assistant(&persistence, &MessageId::new("msg_1_abc"), &update).await);

        assert_eq!(
            persistence.calls(),
            vec![
                PersistenceCall::AssistantByDbId(7, "hi".into()),
                PersistenceCall::AssistantByClientId("msg_1_abc".into(), "hi".into()),
            ]
        );
    }

    #[tokio::test]
    async fn failures_are_absorbed() {
        let persistence = RecordingPersistence::failing();
        let update = AssistantUpdate::completed("hi", None);
        assert!(!persist_assistant(&persistence, &MessageId::from_db(1), &update).await);
        assert!(!persist_user_edit(&persistence, &MessageId::from_db(1), "x").await);
    }

    #[tokio::test]
    async fn client_origin_user_edits_are_not_written() {
        let persistence = RecordingPersistence::default();
        assert!(!persist_user_edit(&persistence, &MessageId::new("msg_1_abc"), "x").await);
        assert!(persistence.calls().is_empty());
    }
}
