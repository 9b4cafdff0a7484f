//! Shared registry of in-flight regenerations, streams and open edits.
//!
//! Regeneration, streaming and editing consult the same registry so no two
//! of them race on one message. Claims are guards: dropping one releases it, whatever
//! path the owning operation leaves by.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::core::message::MessageId;
use crate::utils::sync::lock;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActivityConflict {
    #[error("message at index {0} is already regenerating")]
    IndexRegenerating(usize),

    #[error("message {0} is being regenerated")]
    Regenerating(MessageId),

    #[error("message {0} is being edited")]
    Editing(MessageId),

    #[error("message {0} is streaming")]
    Streaming(MessageId),
}

#[derive(Default)]
struct ActivityInner {
    regenerating_indices: HashSet<usize>,
    regenerating_ids: HashSet<MessageId>,
    editing: HashSet<MessageId>,
    /// Claims per id; a superseding stream overlaps the one it replaces
    /// until the old task unwinds.
    streaming: HashMap<MessageId, usize>,
}

#[derive(Default)]
pub struct ActivityTracker {
    inner: Mutex<ActivityInner>,
}

impl ActivityTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `index` (and the message id living there) for a regeneration.
    pub fn try_begin_regeneration(
        self: &Arc<Self>,
        index: usize,
        id: &MessageId,
    ) -> Result<RegenerationClaim, ActivityConflict> {
        let mut inner = lock(&self.inner);
        if inner.regenerating_indices.contains(&index) {
            return Err(ActivityConflict::IndexRegenerating(index));
        }
        if inner.regenerating_ids.contains(id) {
            return Err(ActivityConflict::Regenerating(id.clone()));
        }
        if inner.editing.contains(id) {
            return Err(ActivityConflict::Editing(id.clone()));
        }
        if inner.streaming.contains_key(id) {
            return Err(ActivityConflict::Streaming(id.clone()));
        }
        inner.regenerating_indices.insert(index);
        inner.regenerating_ids.insert(id.clone());
        Ok(RegenerationClaim {
            tracker: Arc::clone(self),
            index,
            id: id.clone(),
        })
    }

    pub fn try_begin_edit(self: &Arc<Self>, id: &MessageId) -> Result<EditClaim, ActivityConflict> {
        let mut inner = lock(&self.inner);
        if inner.regenerating_ids.contains(id) {
            return Err(ActivityConflict::Regenerating(id.clone()));
        }
        if inner.streaming.contains_key(id) {
            return Err(ActivityConflict::Streaming(id.clone()));
        }
        if !inner.editing.insert(id.clone()) {
            return Err(ActivityConflict::Editing(id.clone()));
        }
        Ok(EditClaim {
            tracker: Arc::clone(self),
            id: id.clone(),
        })
    }

    /// Claim `id` for a stream. Streams may overlap each other on one id,
    /// but never an edit or a regeneration.
    pub fn try_begin_stream(
        self: &Arc<Self>,
        id: &MessageId,
    ) -> Result<StreamClaim, ActivityConflict> {
        let mut inner = lock(&self.inner);
        if inner.regenerating_ids.contains(id) {
            return Err(ActivityConflict::Regenerating(id.clone()));
        }
        if inner.editing.contains(id) {
            return Err(ActivityConflict::Editing(id.clone()));
        }
        *inner.streaming.entry(id.clone()).or_insert(0) += 1;
        Ok(StreamClaim {
            tracker: Arc::clone(self),
            id: id.clone(),
        })
    }

    pub fn is_regenerating_index(&self, index: usize) -> bool {
        lock(&self.inner).regenerating_indices.contains(&index)
    }

    pub fn is_regenerating(&self, id: &MessageId) -> bool {
        lock(&self.inner).regenerating_ids.contains(id)
    }

    pub fn is_editing(&self, id: &MessageId) -> bool {
        lock(&self.inner).editing.contains(id)
    }

    pub fn is_streaming(&self, id: &MessageId) -> bool {
        lock(&self.inner).streaming.contains_key(id)
    }

    pub fn regenerating_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = lock(&self.inner)
            .regenerating_indices
            .iter()
            .copied()
            .collect();
        indices.sort_unstable();
        indices
    }
}

pub struct RegenerationClaim {
    tracker: Arc<ActivityTracker>,
    index: usize,
    id: MessageId,
}

impl RegenerationClaim {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for RegenerationClaim {
    fn drop(&mut self) {
        let mut inner = lock(&self.tracker.inner);
        inner.regenerating_indices.remove(&self.index);
        inner.regenerating_ids.remove(&self.id);
    }
}

pub struct EditClaim {
    tracker: Arc<ActivityTracker>,
    id: MessageId,
}

impl Drop for EditClaim {
    fn drop(&mut self) {
        lock(&self.tracker.inner).editing.remove(&self.id);
    }
}

pub struct StreamClaim {
    tracker: Arc<ActivityTracker>,
    id: MessageId,
}

impl Drop for StreamClaim {
    fn drop(&mut self) {
        let mut inner = lock(&self.tracker.inner);
        if let Some(count) = inner.streaming.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                inner.streaming.remove(&self.id);
            }
        }
    }
}
