//! Feature services layered on the state manager and event bus.

use std::sync::Arc;

use tracing::warn;

use crate::core::activity::ActivityTracker;
use crate::core::ai_client::AiClient;
use crate::core::animation::AnimationService;
use crate::core::event_bus::EventBus;
use crate::core::message::MessageId;
use crate::core::persistence::MessagePersistence;
use crate::core::room::Room;
use crate::core::session::SessionProvider;
use crate::core::state::MessageStateManager;
use crate::error::{ChatError, Result};

pub mod editing;
pub mod model_selection;
pub mod regeneration;
pub mod streaming;

pub use editing::{EditError, EditingService, EditingSession};
pub use model_selection::ModelSelectionService;
pub use regeneration::{
    RegenerationOptions, RegenerationOutcome, RegenerationRecord, RegenerationService, SkipReason,
};
pub use streaming::{StreamError, StreamOptions, StreamSession, StreamSummary, StreamingService};

/// Collaborators shared by every service of one room.
#[derive(Clone)]
pub struct ServiceContext {
    pub room: Arc<Room>,
    pub state: Arc<MessageStateManager>,
    pub activity: Arc<ActivityTracker>,
    pub ai: Arc<dyn AiClient>,
    pub persistence: Arc<dyn MessagePersistence>,
    pub session: Arc<dyn SessionProvider>,
    pub animation: Arc<AnimationService>,
    pub models: Arc<ModelSelectionService>,
}

impl ServiceContext {
    pub fn bus(&self) -> &Arc<EventBus> {
        self.state.bus()
    }

    pub fn room_id(&self) -> &str {
        self.room.id()
    }

    /// Reveal `content` into the loading message `id`.
    ///
    /// Closing the room clears the log under the reveal; that surfaces as
    /// `RoomClosed` rather than a state error.
    pub async fn reveal(&self, id: &MessageId, content: &str) -> Result<()> {
        match self.animation.reveal(id, content).await {
            Ok(()) => Ok(()),
            Err(_) if !self.room.is_active() => {
                warn!(message_id = %id, "room closed during reveal; dropping it");
                Err(ChatError::RoomClosed(self.room_id().to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
}
