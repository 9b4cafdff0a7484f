//! Composition root for one chat room.
//!
//! [`ChatOrchestrator`] pulls its collaborators out of a [`ServiceContainer`],
//! builds the per-room services around one message log, and exposes the
//! user-facing operations.

use std::any::Any;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::api::{AiResponse, ChatRequest, SearchRequest};
use crate::core::activity::ActivityTracker;
use crate::core::ai_client::{extract_content, AiClient};
use crate::core::animation::AnimationService;
use crate::core::config::Config;
use crate::core::container::{keys, ContainerError, ServiceContainer};
use crate::core::event_bus::EventBus;
use crate::core::events;
use crate::core::message::{
    normalize_history, validate_content, ConcurrentMessage, MessageId, MessageState, Role,
};
use crate::core::persistence::{persist_assistant, persist_user_edit, AssistantUpdate, MessagePersistence};
use crate::core::room::Room;
use crate::core::services::{
    EditingService, EditingSession, ModelSelectionService, RegenerationOptions, RegenerationOutcome,
    RegenerationService, ServiceContext, StreamOptions, StreamSummary, StreamingService,
};
use crate::core::session::{ensure_fresh_token, SessionProvider};
use crate::core::state::{Feedback, MessageStateManager, StateError, TransitionPayload};
use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Route the question through the search endpoint.
    pub use_search: bool,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendOutcome {
    pub user_id: MessageId,
    pub assistant_id: MessageId,
    pub content: String,
}

pub struct ChatOrchestrator {
    ctx: ServiceContext,
    regeneration: RegenerationService,
    streaming: StreamingService,
    editing: Arc<EditingService>,
    max_message_length: usize,
}

fn resolve_optional<T>(container: &ServiceContainer, key: &str) -> Result<Option<T>>
where
    T: Any + Clone + Send + Sync,
{
    match container.resolve::<T>(key) {
        Ok(service) => Ok(Some(service)),
        Err(ContainerError::NotRegistered(_)) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

impl ChatOrchestrator {
    /// Build the services for `room_id`.
    ///
    /// The AI client, persistence and session provider must be registered.
    /// The event bus, message state and animation service are created from
    /// `config` unless the container already provides them.
    pub fn from_container(container: &ServiceContainer, config: &Config, room_id: &str) -> Result<Self> {
        let ai = container.resolve::<Arc<dyn AiClient>>(keys::AI_CLIENT)?;
        let persistence = container.resolve::<Arc<dyn MessagePersistence>>(keys::PERSISTENCE)?;
        let session = container.resolve::<Arc<dyn SessionProvider>>(keys::SESSION_PROVIDER)?;

        let state = match resolve_optional::<Arc<MessageStateManager>>(container, keys::MESSAGE_STATE)? {
            Some(state) => state,
            None => {
                let bus = resolve_optional::<Arc<EventBus>>(container, keys::EVENT_BUS)?.unwrap_or_else(
                    || Arc::new(EventBus::with_history_limit(config.event_history_limit)),
                );
                Arc::new(MessageStateManager::new(bus))
            }
        };
        let animation = resolve_optional::<Arc<AnimationService>>(container, keys::ANIMATION)?
            .unwrap_or_else(|| {
                Arc::new(AnimationService::new(
                    Arc::clone(&state),
                    config.animation.clone(),
                ))
            });
        let models = Arc::new(ModelSelectionService::new(
            config.model_catalog(),
            &config.active_model_id(),
            Arc::clone(state.bus()),
        ));

        let ctx = ServiceContext {
            room: Arc::new(Room::new(room_id)),
            state,
            activity: ActivityTracker::new(),
            ai,
            persistence,
            session,
            animation,
            models,
        };
        debug!(room_id, "chat orchestrator ready");
        Ok(Self {
            regeneration: RegenerationService::new(ctx.clone(), config.regeneration_history_limit),
            streaming: StreamingService::new(ctx.clone()),
            editing: EditingService::new(
                ctx.clone(),
                config.max_edit_length,
                config.auto_save_interval(),
            ),
            max_message_length: config.max_edit_length,
            ctx,
        })
    }

    pub fn room_id(&self) -> &str {
        self.ctx.room_id()
    }

    pub fn state(&self) -> &Arc<MessageStateManager> {
        &self.ctx.state
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.ctx.bus()
    }

    pub fn models(&self) -> &ModelSelectionService {
        &self.ctx.models
    }

    pub fn regeneration(&self) -> &RegenerationService {
        &self.regeneration
    }

    pub fn streaming(&self) -> &StreamingService {
        &self.streaming
    }

    pub fn editing(&self) -> &Arc<EditingService> {
        &self.editing
    }

    pub fn messages(&self) -> Vec<ConcurrentMessage> {
        self.ctx.state.snapshot()
    }

    /// Send `text` as a new user turn and wait for the reply.
    ///
    /// Invalid input fails before anything is appended. Once the turn pair
    /// exists, a failed call leaves the assistant placeholder in `error`.
    pub async fn send_message(&self, text: &str, options: SendOptions) -> Result<SendOutcome> {
        validate_content(text, self.max_message_length).map_err(ChatError::Validation)?;
        let model = self.ctx.models.resolve(options.model.as_deref())?;
        if options.use_search {
            self.ctx.models.validate_search(&model)?;
        }
        self.ensure_active()?;

        let user = ConcurrentMessage::user(text);
        let user_id = user.id.clone();
        self.ctx.state.insert(user)?;
        let history = normalize_history(&self.ctx.state.snapshot(), None);

        let placeholder = ConcurrentMessage::assistant_placeholder();
        let assistant_id = placeholder.id.clone();
        self.ctx.state.insert(placeholder)?;
        self.ctx
            .state
            .transition(&assistant_id, MessageState::Loading, TransitionPayload::default())?;
        self.bus().publish(
            events::SEND_STARTED,
            json!({
                "userId": user_id,
                "assistantId": assistant_id,
                "model": model.id,
                "search": options.use_search,
            }),
        );

        let token = ensure_fresh_token(self.ctx.session.as_ref()).await;
        let response = if options.use_search {
            let request = SearchRequest {
                question: text.to_string(),
                model: model.id.clone(),
                model_config: model.payload(),
            };
            self.ctx.ai.search(&request, token.as_deref()).await
        } else {
            let request = ChatRequest {
                room_id: self.room_id().to_string(),
                messages: history,
                model: model.id.clone(),
                model_config: model.payload(),
                client_message_id: assistant_id.as_str().to_string(),
                skip_persistence: false,
                temperature: model.effective_temperature(options.temperature),
                stream: false,
            };
            self.ctx.ai.chat(&request, token.as_deref()).await
        };

        let result = match response {
            Ok(response) => {
                self.complete_reply(&assistant_id, &response, options.use_search, &model.id)
                    .await
            }
            Err(error) => Err(error.into()),
        };
        match result {
            Ok(content) => {
                info!(message_id = %assistant_id, model = %model.id, "reply received");
                self.bus().publish(
                    events::SEND_COMPLETED,
                    json!({ "assistantId": assistant_id, "length": content.chars().count() }),
                );
                Ok(SendOutcome {
                    user_id,
                    assistant_id,
                    content,
                })
            }
            Err(error) => {
                if !matches!(error, ChatError::RoomClosed(_)) {
                    self.ctx.state.mark_error(&assistant_id, &error.to_string());
                }
                warn!(message_id = %assistant_id, error = %error, "send failed");
                self.bus().publish(
                    events::SEND_FAILED,
                    json!({ "assistantId": assistant_id, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    async fn complete_reply(
        &self,
        id: &MessageId,
        response: &AiResponse,
        search: bool,
        model: &str,
    ) -> Result<String> {
        if !self.ctx.room.is_active() {
            warn!(message_id = %id, "room closed while waiting for a reply; dropping it");
            return Err(ChatError::RoomClosed(self.room_id().to_string()));
        }
        let content = extract_content(response)?;
        if search {
            self.ctx.state.merge_metadata(id, search_metadata(response))?;
        } else if self.ctx.state.get(id).is_none() {
            return Err(StateError::NotFound(id.clone()).into());
        }
        self.ctx.reveal(id, &content).await?;

        // The search function stores nothing itself.
        if search {
            let update = AssistantUpdate::completed(
                content.clone(),
                Some(response.model().unwrap_or(model).to_string()),
            )
            .with_search_details(
                response.citations().to_vec(),
                response.time_warning().map(str::to_string),
            );
            persist_assistant(self.ctx.persistence.as_ref(), id, &update).await;
        }
        Ok(content)
    }

    pub async fn regenerate_message(
        &self,
        index: usize,
        override_user_content: Option<&str>,
        options: RegenerationOptions,
    ) -> Result<RegenerationOutcome> {
        self.ensure_active()?;
        self.regeneration
            .regenerate(index, override_user_content, options)
            .await
    }

    /// Send `text` as a new user turn and stream the reply into a fresh
    /// assistant message.
    pub async fn stream_message(&self, text: &str, options: StreamOptions) -> Result<StreamSummary> {
        validate_content(text, self.max_message_length).map_err(ChatError::Validation)?;
        self.ctx.models.resolve(options.model.as_deref())?;
        self.ensure_active()?;

        self.ctx.state.insert(ConcurrentMessage::user(text))?;
        let placeholder = ConcurrentMessage::assistant_placeholder();
        let id = placeholder.id.clone();
        self.ctx.state.insert(placeholder)?;
        self.streaming.start_streaming(&id, options).await
    }

    /// Stream a new reply into the existing assistant message `id`.
    pub async fn restream_message(&self, id: &MessageId, options: StreamOptions) -> Result<StreamSummary> {
        self.ensure_active()?;
        self.streaming.start_streaming(id, options).await
    }

    /// Open an edit of `id` seeded with its current content.
    pub fn start_edit(&self, id: &MessageId) -> Result<EditingSession> {
        let message = self
            .ctx
            .state
            .get(id)
            .ok_or_else(|| StateError::NotFound(id.clone()))?;
        Ok(self.editing.start_editing(id, &message.content)?)
    }

    pub fn update_edit(&self, id: &MessageId, content: &str) -> Result<EditingSession> {
        Ok(self.editing.update_edited_content(id, content)?)
    }

    pub async fn save_edit(&self, id: &MessageId) -> Result<String> {
        Ok(self.editing.save_edited_message(id).await?)
    }

    pub async fn cancel_edit(&self, id: &MessageId) -> Result<String> {
        Ok(self.editing.cancel_editing(id).await?)
    }

    /// Put `content` back into the settled message `id` and write it through
    /// to storage. Used to undo regenerations and edits.
    pub async fn restore_content(&self, id: &MessageId, content: &str) -> Result<()> {
        self.ensure_active()?;
        let message = self
            .ctx
            .state
            .get(id)
            .ok_or_else(|| StateError::NotFound(id.clone()))?;
        let activity = &self.ctx.activity;
        if activity.is_regenerating(id) || activity.is_editing(id) || activity.is_streaming(id) {
            return Err(ChatError::validation(format!("message {id} is busy")));
        }
        if !message.state.is_settled() && message.role == Role::Assistant {
            return Err(ChatError::validation(format!(
                "message {id} is {}",
                message.state
            )));
        }
        self.ctx.state.replace_content(id, content)?;
        match message.role {
            Role::User => {
                persist_user_edit(self.ctx.persistence.as_ref(), id, content).await;
            }
            Role::Assistant => {
                let update = AssistantUpdate::completed(content.to_string(), None);
                persist_assistant(self.ctx.persistence.as_ref(), id, &update).await;
            }
            Role::System => {}
        }
        Ok(())
    }

    pub fn select_model(&self, id: &str) -> Result<String> {
        self.ctx.models.select_model(id)
    }

    pub fn toggle_like(&self, id: &MessageId) -> Result<()> {
        Ok(self.ctx.state.set_feedback(id, Feedback::Like)?)
    }

    pub fn toggle_dislike(&self, id: &MessageId) -> Result<()> {
        Ok(self.ctx.state.set_feedback(id, Feedback::Dislike)?)
    }

    /// Remove `id` from the log, stopping its stream and dropping any edit
    /// first. Messages being regenerated cannot be deleted.
    pub fn delete_message(&self, id: &MessageId) -> Result<ConcurrentMessage> {
        if self.ctx.activity.is_regenerating(id) {
            return Err(ChatError::validation(format!(
                "message {id} is being regenerated"
            )));
        }
        if self.streaming.stop_stream(id).is_some() {
            debug!(message_id = %id, "stopped stream of deleted message");
        }
        self.editing.discard(id);
        self.ctx
            .state
            .remove(id)
            .ok_or_else(|| StateError::NotFound(id.clone()).into())
    }

    /// Close the room: stop streams, drop edits and clear the log. Replies
    /// still in flight are discarded when they arrive.
    pub fn close_room(&self) -> bool {
        if !self.ctx.room.close() {
            return false;
        }
        let streams = self.streaming.stop_all();
        let edits = self.editing.clear();
        let messages = self.ctx.state.clear();
        info!(room_id = self.room_id(), streams, edits, messages, "room closed");
        self.bus()
            .publish(events::ROOM_CLOSED, json!({ "roomId": self.room_id() }));
        true
    }

    fn ensure_active(&self) -> Result<()> {
        if self.ctx.room.is_active() {
            Ok(())
        } else {
            Err(ChatError::RoomClosed(self.room_id().to_string()))
        }
    }
}

fn search_metadata(response: &AiResponse) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        "citations".to_string(),
        Value::Array(response.citations().to_vec()),
    );
    if let Some(warning) = response.time_warning() {
        metadata.insert("time_warning".to_string(), Value::String(warning.to_string()));
    }
    metadata
}
