//! Authoritative per-message state machine and the ordered message log of a
//! room.
//!
//! Every mutation is a short synchronous critical section, so a transition
//! is atomic with respect to its message id. Multi-step transitions (the
//! progressive reveal) take a [`TransitionLease`]; while it is held, plain
//! transitions on that id are rejected instead of racing the lease holder.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::event_bus::EventBus;
use crate::core::events;
use crate::core::message::{ConcurrentMessage, MessageId, MessageState};
use crate::utils::sync::lock;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("message not found: {0}")]
    NotFound(MessageId),

    #[error("message already exists: {0}")]
    Duplicate(MessageId),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: MessageId,
        from: MessageState,
        to: MessageState,
    },

    #[error("another transition is pending for {0}")]
    TransitionPending(MessageId),
}

/// Transition table. Pairs not listed here are rejected.
pub fn is_valid_transition(from: MessageState, to: MessageState) -> bool {
    use MessageState::*;
    matches!(
        (from, to),
        (Pending, Loading)
            | (Loading, Complete)
            | (Loading, Animating)
            | (Animating, Complete)
            | (Loading, Error)
            | (Animating, Error)
            | (Error, Loading)
            | (Complete, Loading)
    )
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TransitionPayload {
    /// Replaces the message content together with the state change.
    pub content: Option<String>,
    /// Recorded under `metadata.error`; cleared when re-entering `loading`.
    pub error: Option<String>,
}

impl TransitionPayload {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            content: None,
            error: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Like,
    Dislike,
    Clear,
}

struct StateInner {
    messages: Vec<ConcurrentMessage>,
    leases: HashSet<MessageId>,
}

impl StateInner {
    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    fn message_mut(&mut self, id: &MessageId) -> Result<&mut ConcurrentMessage, StateError> {
        self.messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(|| StateError::NotFound(id.clone()))
    }
}

pub struct MessageStateManager {
    inner: Mutex<StateInner>,
    bus: Arc<EventBus>,
}

impl MessageStateManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                messages: Vec::new(),
                leases: HashSet::new(),
            }),
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn insert(&self, message: ConcurrentMessage) -> Result<(), StateError> {
        let data = {
            let mut inner = lock(&self.inner);
            if inner.position(&message.id).is_some() {
                return Err(StateError::Duplicate(message.id));
            }
            let data = json!({
                "id": message.id,
                "role": message.role,
                "state": message.state,
                "content": message.content,
                "index": inner.messages.len(),
            });
            inner.messages.push(message);
            data
        };
        self.bus.publish(events::MESSAGE_ADDED, data);
        Ok(())
    }

    pub fn get(&self, id: &MessageId) -> Option<ConcurrentMessage> {
        let inner = lock(&self.inner);
        inner.position(id).map(|index| inner.messages[index].clone())
    }

    pub fn state_of(&self, id: &MessageId) -> Option<MessageState> {
        let inner = lock(&self.inner);
        inner.position(id).map(|index| inner.messages[index].state)
    }

    pub fn index_of(&self, id: &MessageId) -> Option<usize> {
        lock(&self.inner).position(id)
    }

    pub fn message_at(&self, index: usize) -> Option<ConcurrentMessage> {
        lock(&self.inner).messages.get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<ConcurrentMessage> {
        lock(&self.inner).messages.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_pending_transition(&self, id: &MessageId) -> bool {
        lock(&self.inner).leases.contains(id)
    }

    /// Move `id` to `to`, returning the previous state.
    pub fn transition(
        &self,
        id: &MessageId,
        to: MessageState,
        payload: TransitionPayload,
    ) -> Result<MessageState, StateError> {
        self.apply_transition(id, to, payload, false)
    }

    fn apply_transition(
        &self,
        id: &MessageId,
        to: MessageState,
        payload: TransitionPayload,
        via_lease: bool,
    ) -> Result<MessageState, StateError> {
        let data = {
            let mut inner = lock(&self.inner);
            if !via_lease && inner.leases.contains(id) {
                return Err(StateError::TransitionPending(id.clone()));
            }
            let message = inner.message_mut(id)?;
            let from = message.state;
            if !is_valid_transition(from, to) {
                return Err(StateError::InvalidTransition {
                    id: id.clone(),
                    from,
                    to,
                });
            }

            message.state = to;
            if let Some(content) = payload.content {
                message.content = content;
            }
            let metadata = message.metadata.get_or_insert_with(Default::default);
            match (&payload.error, to) {
                (Some(reason), _) => {
                    metadata.insert("error".to_string(), json!(reason));
                }
                (None, MessageState::Loading) => {
                    metadata.remove("error");
                }
                _ => {}
            }

            debug!(message_id = %id, %from, %to, "message state transition");
            let mut data = json!({
                "id": id,
                "role": message.role,
                "from": from,
                "to": to,
            });
            if to == MessageState::Complete {
                data["content"] = json!(message.content);
            }
            if let Some(reason) = payload.error {
                data["error"] = json!(reason);
            }
            (from, data)
        };

        self.bus.publish(events::MESSAGE_STATE_CHANGED, data.1);
        Ok(data.0)
    }

    /// Reserve `id` for a multi-step transition. Fails if another lease is
    /// held or the message does not exist.
    pub fn acquire_lease(&self, id: &MessageId) -> Result<TransitionLease<'_>, StateError> {
        let mut inner = lock(&self.inner);
        if inner.position(id).is_none() {
            return Err(StateError::NotFound(id.clone()));
        }
        if !inner.leases.insert(id.clone()) {
            return Err(StateError::TransitionPending(id.clone()));
        }
        Ok(TransitionLease {
            manager: self,
            id: id.clone(),
        })
    }

    /// Replace the content without a state change, returning the previous
    /// content.
    pub fn replace_content(&self, id: &MessageId, content: &str) -> Result<String, StateError> {
        let previous = {
            let mut inner = lock(&self.inner);
            let message = inner.message_mut(id)?;
            std::mem::replace(&mut message.content, content.to_string())
        };
        self.bus.publish(
            events::MESSAGE_CONTENT_CHANGED,
            json!({ "id": id, "length": content.chars().count() }),
        );
        Ok(previous)
    }

    /// Merge `entries` into the message metadata. No event is published;
    /// callers follow up with the state change that reveals the message.
    pub fn merge_metadata(
        &self,
        id: &MessageId,
        entries: Map<String, Value>,
    ) -> Result<(), StateError> {
        let mut inner = lock(&self.inner);
        let message = inner.message_mut(id)?;
        message.metadata.get_or_insert_with(Map::new).extend(entries);
        Ok(())
    }

    /// Append a streamed chunk. No event is published; streaming reports its
    /// own progress.
    pub fn append_content(&self, id: &MessageId, chunk: &str) -> Result<usize, StateError> {
        let mut inner = lock(&self.inner);
        let message = inner.message_mut(id)?;
        message.content.push_str(chunk);
        Ok(message.content.len())
    }

    pub fn set_feedback(&self, id: &MessageId, feedback: Feedback) -> Result<(), StateError> {
        let (liked, disliked) = {
            let mut inner = lock(&self.inner);
            let message = inner.message_mut(id)?;
            let (liked, disliked) = match feedback {
                Feedback::Like => (!message.is_liked, false),
                Feedback::Dislike => (false, !message.is_disliked),
                Feedback::Clear => (false, false),
            };
            message.is_liked = liked;
            message.is_disliked = disliked;
            (liked, disliked)
        };
        self.bus.publish(
            events::MESSAGE_FEEDBACK,
            json!({ "id": id, "isLiked": liked, "isDisliked": disliked }),
        );
        Ok(())
    }

    /// Explicit deletion; the only way a message leaves the log.
    pub fn remove(&self, id: &MessageId) -> Option<ConcurrentMessage> {
        let removed = {
            let mut inner = lock(&self.inner);
            let index = inner.position(id)?;
            inner.leases.remove(id);
            inner.messages.remove(index)
        };
        self.bus
            .publish(events::MESSAGE_REMOVED, json!({ "id": removed.id }));
        Some(removed)
    }

    pub fn clear(&self) -> usize {
        let mut inner = lock(&self.inner);
        inner.leases.clear();
        let count = inner.messages.len();
        inner.messages.clear();
        count
    }

    /// Best-effort move to `error`. Used on failure paths, which must not
    /// fail again; problems are logged instead.
    pub fn mark_error(&self, id: &MessageId, reason: &str) -> bool {
        match self.transition(id, MessageState::Error, TransitionPayload::error(reason)) {
            Ok(_) => true,
            Err(StateError::InvalidTransition {
                from: MessageState::Error,
                ..
            }) => true,
            Err(error) => {
                warn!(message_id = %id, error = %error, "could not mark message as failed");
                false
            }
        }
    }
}

/// Exclusive right to drive a multi-step transition for one message.
/// Released on drop.
pub struct TransitionLease<'a> {
    manager: &'a MessageStateManager,
    id: MessageId,
}

impl TransitionLease<'_> {
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn transition(
        &self,
        to: MessageState,
        payload: TransitionPayload,
    ) -> Result<MessageState, StateError> {
        self.manager.apply_transition(&self.id, to, payload, true)
    }

    pub fn set_content(&self, content: &str) -> Result<(), StateError> {
        let mut inner = lock(&self.manager.inner);
        let message = inner.message_mut(&self.id)?;
        message.content.clear();
        message.content.push_str(content);
        Ok(())
    }
}

impl Drop for TransitionLease<'_> {
    fn drop(&mut self) {
        lock(&self.manager.inner).leases.remove(&self.id);
    }
}
