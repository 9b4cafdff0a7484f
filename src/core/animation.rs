//! Progressive reveal of completed replies.

use std::sync::Arc;

use tracing::debug;

use crate::core::config::AnimationSettings;
use crate::core::message::{MessageId, MessageState};
use crate::core::state::{MessageStateManager, StateError, TransitionPayload};

pub struct AnimationService {
    state: Arc<MessageStateManager>,
    settings: AnimationSettings,
}

impl AnimationService {
    pub fn new(state: Arc<MessageStateManager>, settings: AnimationSettings) -> Self {
        Self { state, settings }
    }

    pub fn settings(&self) -> &AnimationSettings {
        &self.settings
    }

    /// Complete the `loading` message `id` with `content`.
    ///
    /// With animation enabled the message passes through `animating` while
    /// the content grows tick by tick. The whole sequence holds a transition
    /// lease, so no other transition can interleave with it.
    pub async fn reveal(&self, id: &MessageId, content: &str) -> Result<(), StateError> {
        let step = self.settings.chars_per_tick.max(1);
        if !self.settings.enabled || content.chars().count() <= step {
            self.state
                .transition(id, MessageState::Complete, TransitionPayload::content(content))?;
            return Ok(());
        }

        let lease = self.state.acquire_lease(id)?;
        lease.transition(MessageState::Animating, TransitionPayload::content(""))?;
        debug!(message_id = %id, chars = content.chars().count(), "revealing reply");

        let boundaries = content
            .char_indices()
            .map(|(index, _)| index)
            .skip(step)
            .step_by(step);
        for end in boundaries {
            lease.set_content(&content[..end])?;
            tokio::time::sleep(self.settings.tick_interval()).await;
        }

        lease.transition(MessageState::Complete, TransitionPayload::content(content))?;
        Ok(())
    }
}
