//! In-place editing of existing messages.
//!
//! An editing session holds a draft next to the content it started from.
//! Saving commits the draft to the message log and ends the session;
//! auto-save commits periodically but keeps the session open, so a later
//! cancel still restores the original.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::activity::{ActivityConflict, EditClaim};
use crate::core::events;
use crate::core::message::{validate_content, MessageId};
use crate::core::persistence::persist_user_edit;
use crate::core::services::ServiceContext;
use crate::core::state::StateError;
use crate::utils::sync::lock;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EditError {
    #[error("message {0} is already being edited")]
    AlreadyEditing(MessageId),

    #[error("message {0} is being regenerated")]
    Regenerating(MessageId),

    #[error("message {0} is streaming")]
    Streaming(MessageId),

    #[error("message {0} is not being edited")]
    NotEditing(MessageId),

    #[error("invalid edit: {0}")]
    Validation(String),

    #[error("a save is already in progress for {0}")]
    SaveInFlight(MessageId),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<ActivityConflict> for EditError {
    fn from(conflict: ActivityConflict) -> Self {
        match conflict {
            ActivityConflict::Editing(id) => EditError::AlreadyEditing(id),
            ActivityConflict::Regenerating(id) => EditError::Regenerating(id),
            ActivityConflict::Streaming(id) => EditError::Streaming(id),
            ActivityConflict::IndexRegenerating(index) => {
                EditError::Validation(format!("message at index {index} is regenerating"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditingSession {
    pub message_id: MessageId,
    pub original_content: String,
    pub edited_content: String,
    /// Draft differs from what the log last received.
    pub has_changes: bool,
    pub save_in_flight: bool,
    pub started_at: DateTime<Utc>,
    pub last_saved_at: Option<DateTime<Utc>>,
}

struct AutoSaveTask(JoinHandle<()>);

impl Drop for AutoSaveTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct EditEntry {
    session: EditingSession,
    /// Content last committed to the log.
    committed: String,
    _claim: EditClaim,
    _auto_save: Option<AutoSaveTask>,
}

pub struct EditingService {
    ctx: ServiceContext,
    sessions: Mutex<HashMap<MessageId, EditEntry>>,
    max_edit_length: usize,
    auto_save_interval: Option<Duration>,
}

impl EditingService {
    pub fn new(
        ctx: ServiceContext,
        max_edit_length: usize,
        auto_save_interval: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            sessions: Mutex::new(HashMap::new()),
            max_edit_length,
            auto_save_interval,
        })
    }

    /// Open an editing session for `id` starting from `original`.
    pub fn start_editing(
        self: &Arc<Self>,
        id: &MessageId,
        original: &str,
    ) -> Result<EditingSession, EditError> {
        if self.ctx.state.get(id).is_none() {
            return Err(StateError::NotFound(id.clone()).into());
        }
        let claim = self.ctx.activity.try_begin_edit(id)?;

        let session = EditingSession {
            message_id: id.clone(),
            original_content: original.to_string(),
            edited_content: original.to_string(),
            has_changes: false,
            save_in_flight: false,
            started_at: Utc::now(),
            last_saved_at: None,
        };
        let auto_save = self
            .auto_save_interval
            .and_then(|interval| self.spawn_auto_save(id, interval));

        lock(&self.sessions).insert(
            id.clone(),
            EditEntry {
                session: session.clone(),
                committed: original.to_string(),
                _claim: claim,
                _auto_save: auto_save,
            },
        );
        debug!(message_id = %id, "editing started");
        self.ctx
            .bus()
            .publish(events::EDIT_STARTED, json!({ "id": id }));
        Ok(session)
    }

    pub fn update_edited_content(
        &self,
        id: &MessageId,
        content: &str,
    ) -> Result<EditingSession, EditError> {
        let session = {
            let mut sessions = lock(&self.sessions);
            let entry = sessions
                .get_mut(id)
                .ok_or_else(|| EditError::NotEditing(id.clone()))?;
            entry.session.edited_content = content.to_string();
            entry.session.has_changes = entry.committed != content;
            entry.session.clone()
        };
        self.ctx.bus().publish(
            events::EDIT_UPDATED,
            json!({ "id": id, "hasChanges": session.has_changes }),
        );
        Ok(session)
    }

    /// Validate and commit the draft, then close the session. A validation
    /// failure leaves the session open.
    pub async fn save_edited_message(&self, id: &MessageId) -> Result<String, EditError> {
        let content = self.begin_save(id, true)?.unwrap_or_default();

        let applied = self.apply_content(id, &content).await;
        let entry = lock(&self.sessions).remove(id);
        drop(entry);
        applied?;

        self.ctx
            .bus()
            .publish(events::EDIT_SAVED, json!({ "id": id, "auto": false }));
        Ok(content)
    }

    /// Close the session and return the original content. If auto-save had
    /// already committed the draft, the original is written back.
    pub async fn cancel_editing(&self, id: &MessageId) -> Result<String, EditError> {
        let entry = {
            let mut sessions = lock(&self.sessions);
            match sessions.get(id) {
                None => return Err(EditError::NotEditing(id.clone())),
                Some(entry) if entry.session.save_in_flight => {
                    return Err(EditError::SaveInFlight(id.clone()))
                }
                Some(_) => {}
            }
            sessions.remove(id)
        };
        let Some(entry) = entry else {
            return Err(EditError::NotEditing(id.clone()));
        };

        let original = entry.session.original_content.clone();
        if entry.committed != original {
            if let Err(error) = self.apply_content(id, &original).await {
                warn!(message_id = %id, error = %error, "could not restore original content");
            }
        }
        self.ctx
            .bus()
            .publish(events::EDIT_CANCELLED, json!({ "id": id }));
        Ok(original)
    }

    /// Commit the draft without closing the session. Returns `false` once
    /// the session is gone.
    pub async fn auto_save(&self, id: &MessageId) -> bool {
        let content = match self.begin_save(id, false) {
            Ok(Some(content)) => content,
            Ok(None) => return true,
            Err(EditError::NotEditing(_)) => return false,
            Err(error) => {
                debug!(message_id = %id, error = %error, "auto-save skipped");
                return true;
            }
        };

        let applied = self.apply_content(id, &content).await;
        let mut sessions = lock(&self.sessions);
        let Some(entry) = sessions.get_mut(id) else {
            return false;
        };
        entry.session.save_in_flight = false;
        match applied {
            Ok(()) => {
                entry.committed = content.clone();
                entry.session.has_changes = entry.session.edited_content != content;
                entry.session.last_saved_at = Some(Utc::now());
                drop(sessions);
                self.ctx
                    .bus()
                    .publish(events::EDIT_SAVED, json!({ "id": id, "auto": true }));
            }
            Err(error) => warn!(message_id = %id, error = %error, "auto-save failed"),
        }
        true
    }

    /// Mark a save in flight and return the draft to commit. `Ok(None)`
    /// means an auto-save has nothing to do.
    fn begin_save(&self, id: &MessageId, explicit: bool) -> Result<Option<String>, EditError> {
        let mut sessions = lock(&self.sessions);
        let entry = sessions
            .get_mut(id)
            .ok_or_else(|| EditError::NotEditing(id.clone()))?;
        if entry.session.save_in_flight {
            return Err(EditError::SaveInFlight(id.clone()));
        }
        if !explicit && !entry.session.has_changes {
            return Ok(None);
        }
        validate_content(&entry.session.edited_content, self.max_edit_length)
            .map_err(EditError::Validation)?;
        entry.session.save_in_flight = true;
        Ok(Some(entry.session.edited_content.clone()))
    }

    /// Write `content` to the log and, for database-backed user messages,
    /// to storage.
    async fn apply_content(&self, id: &MessageId, content: &str) -> Result<(), EditError> {
        self.ctx.state.replace_content(id, content)?;
        let is_user = self
            .ctx
            .state
            .get(id)
            .is_some_and(|message| message.role.is_user());
        if is_user {
            persist_user_edit(self.ctx.persistence.as_ref(), id, content).await;
        }
        Ok(())
    }

    fn spawn_auto_save(self: &Arc<Self>, id: &MessageId, interval: Duration) -> Option<AutoSaveTask> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(message_id = %id, "no async runtime; auto-save disabled for this edit");
            return None;
        };
        let service: Weak<Self> = Arc::downgrade(self);
        let id = id.clone();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                if !service.auto_save(&id).await {
                    break;
                }
            }
        });
        Some(AutoSaveTask(task))
    }

    pub fn is_editing(&self, id: &MessageId) -> bool {
        lock(&self.sessions).contains_key(id)
    }

    pub fn session(&self, id: &MessageId) -> Option<EditingSession> {
        lock(&self.sessions)
            .get(id)
            .map(|entry| entry.session.clone())
    }

    /// Drop the session for `id` without touching the log.
    pub fn discard(&self, id: &MessageId) -> bool {
        let entry = lock(&self.sessions).remove(id);
        entry.is_some()
    }

    /// Drop every session without touching the log.
    pub fn clear(&self) -> usize {
        let drained: Vec<EditEntry> = lock(&self.sessions).drain().map(|(_, entry)| entry).collect();
        drained.len()
    }
}
