//! Fakes and builders shared by the test suites.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::api::{AiResponse, ChatRequest, SearchRequest};
use crate::core::activity::ActivityTracker;
use crate::core::ai_client::{AiClient, AiError};
use crate::core::animation::AnimationService;
use crate::core::chat_stream::ChunkStream;
use crate::core::config::defaults::builtin_models;
use crate::core::config::{AnimationSettings, Config};
use crate::core::container::{keys, ServiceContainer};
use crate::core::event_bus::EventBus;
use crate::core::message::{ConcurrentMessage, MessageId, MessageState, Role};
use crate::core::orchestrator::ChatOrchestrator;
use crate::core::persistence::{AssistantUpdate, MessagePersistence, PersistenceError};
use crate::core::room::Room;
use crate::core::services::{ModelSelectionService, ServiceContext};
use crate::core::session::SessionProvider;
use crate::core::state::MessageStateManager;
use crate::utils::sync::lock;

pub use crate::core::session::StaticSessionProvider;

pub const TEST_ROOM_ID: &str = "room-test";
pub const TEST_MODEL: &str = "gpt-4o-mini";

/// AI client that replays scripted responses and records every request.
#[derive(Default)]
pub struct ScriptedAiClient {
    responses: Mutex<VecDeque<Result<AiResponse, AiError>>>,
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<String, AiError>>>>,
    chat_requests: Mutex<Vec<ChatRequest>>,
    search_requests: Mutex<Vec<SearchRequest>>,
    stream_requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl ScriptedAiClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits `delay` before answering, so concurrent callers
    /// overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(&self, response: AiResponse) -> &Self {
        lock(&self.responses).push_back(Ok(response));
        self
    }

    pub fn fail(&self, error: AiError) -> &Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    /// Queue a stream for the next `stream_chat`; the returned sender feeds
    /// it and dropping the sender ends it.
    pub fn stream(&self) -> mpsc::UnboundedSender<Result<String, AiError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.streams).push_back(rx);
        tx
    }

    pub fn chat_requests(&self) -> Vec<ChatRequest> {
        lock(&self.chat_requests).clone()
    }

    pub fn search_requests(&self) -> Vec<SearchRequest> {
        lock(&self.search_requests).clone()
    }

    pub fn stream_requests(&self) -> Vec<ChatRequest> {
        lock(&self.stream_requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.chat_requests).len()
            + lock(&self.search_requests).len()
            + lock(&self.stream_requests).len()
    }

    async fn next_response(&self) -> Result<AiResponse, AiError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.responses).pop_front().unwrap_or_else(|| {
            Err(AiError::Status {
                status: 500,
                message: "no scripted response".to_string(),
            })
        })
    }
}

#[async_trait]
impl AiClient for ScriptedAiClient {
    async fn chat(
        &self,
        request: &ChatRequest,
        _access_token: Option<&str>,
    ) -> Result<AiResponse, AiError> {
        lock(&self.chat_requests).push(request.clone());
        self.next_response().await
    }

    async fn search(
        &self,
        request: &SearchRequest,
        _access_token: Option<&str>,
    ) -> Result<AiResponse, AiError> {
        lock(&self.search_requests).push(request.clone());
        self.next_response().await
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        _access_token: Option<&str>,
    ) -> Result<ChunkStream, AiError> {
        lock(&self.stream_requests).push(request.clone());
        let receiver = lock(&self.streams).pop_front().ok_or_else(|| AiError::Status {
            status: 500,
            message: "no scripted stream".to_string(),
        })?;
        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceCall {
    AssistantByDbId(i64, String),
    AssistantByClientId(String, String),
    UserByDbId(i64, String),
}

/// Persistence fake that records calls and keeps upserted rows keyed by
/// their identity.
#[derive(Default)]
pub struct RecordingPersistence {
    calls: Mutex<Vec<PersistenceCall>>,
    rows: Mutex<HashMap<String, String>>,
    assistant_updates: Mutex<Vec<AssistantUpdate>>,
    failing: bool,
}

impl RecordingPersistence {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<PersistenceCall> {
        lock(&self.calls).clone()
    }

    pub fn rows(&self) -> HashMap<String, String> {
        lock(&self.rows).clone()
    }

    /// Every assistant update received, in order.
    pub fn assistant_updates(&self) -> Vec<AssistantUpdate> {
        lock(&self.assistant_updates).clone()
    }

    fn record(&self, call: PersistenceCall, key: String, content: &str) -> Result<(), PersistenceError> {
        lock(&self.calls).push(call);
        if self.failing {
            return Err(PersistenceError::Backend("database unavailable".to_string()));
        }
        lock(&self.rows).insert(key, content.to_string());
        Ok(())
    }
}

#[async_trait]
impl MessagePersistence for RecordingPersistence {
    async fn update_assistant_message_by_db_id(
        &self,
        db_id: i64,
        update: &AssistantUpdate,
    ) -> Result<(), PersistenceError> {
        lock(&self.assistant_updates).push(update.clone());
        self.record(
            PersistenceCall::AssistantByDbId(db_id, update.content.clone()),
            format!("db:{db_id}"),
            &update.content,
        )
    }

    async fn update_assistant_message_by_client_id(
        &self,
        client_id: &str,
        update: &AssistantUpdate,
    ) -> Result<(), PersistenceError> {
        lock(&self.assistant_updates).push(update.clone());
        self.record(
            PersistenceCall::AssistantByClientId(client_id.to_string(), update.content.clone()),
            client_id.to_string(),
            &update.content,
        )
    }

    async fn update_user_message_by_db_id(
        &self,
        db_id: i64,
        content: &str,
    ) -> Result<(), PersistenceError> {
        self.record(
            PersistenceCall::UserByDbId(db_id, content.to_string()),
            format!("db:{db_id}"),
            content,
        )
    }
}

/// Defaults with animation and auto-save off so tests stay deterministic.
pub fn test_config() -> Config {
    Config {
        default_model: Some(TEST_MODEL.to_string()),
        auto_save_interval_ms: None,
        animation: AnimationSettings::disabled(),
        ..Config::default()
    }
}

pub struct TestContext {
    pub ctx: ServiceContext,
    pub ai: Arc<ScriptedAiClient>,
    pub persistence: Arc<RecordingPersistence>,
}

pub fn create_test_context(ai: ScriptedAiClient) -> TestContext {
    create_test_context_with(ai, RecordingPersistence::default(), &test_config())
}

pub fn create_test_context_with(
    ai: ScriptedAiClient,
    persistence: RecordingPersistence,
    config: &Config,
) -> TestContext {
    let ai = Arc::new(ai);
    let persistence = Arc::new(persistence);
    let bus = Arc::new(EventBus::with_history_limit(config.event_history_limit));
    let state = Arc::new(MessageStateManager::new(Arc::clone(&bus)));
    let session: Arc<dyn SessionProvider> =
        Arc::new(StaticSessionProvider::new(Some("test-token".to_string())));
    let ctx = ServiceContext {
        room: Arc::new(Room::new(TEST_ROOM_ID)),
        activity: ActivityTracker::new(),
        ai: Arc::clone(&ai) as Arc<dyn AiClient>,
        persistence: Arc::clone(&persistence) as Arc<dyn MessagePersistence>,
        session,
        animation: Arc::new(AnimationService::new(
            Arc::clone(&state),
            config.animation.clone(),
        )),
        models: Arc::new(ModelSelectionService::new(
            builtin_models(),
            &config.active_model_id(),
            bus,
        )),
        state,
    };
    TestContext {
        ctx,
        ai,
        persistence,
    }
}

pub struct TestOrchestrator {
    pub orchestrator: ChatOrchestrator,
    pub ai: Arc<ScriptedAiClient>,
    pub persistence: Arc<RecordingPersistence>,
}

/// Wire an orchestrator through a [`ServiceContainer`] the way the binary
/// does, with fakes at the AI and storage boundaries.
pub fn create_test_orchestrator(ai: ScriptedAiClient) -> TestOrchestrator {
    let ai = Arc::new(ai);
    let persistence = Arc::new(RecordingPersistence::default());
    let container = ServiceContainer::new();
    container.register_singleton::<Arc<dyn AiClient>>(keys::AI_CLIENT, Arc::clone(&ai) as _);
    container.register_singleton::<Arc<dyn MessagePersistence>>(
        keys::PERSISTENCE,
        Arc::clone(&persistence) as _,
    );
    container.register_singleton::<Arc<dyn SessionProvider>>(
        keys::SESSION_PROVIDER,
        Arc::new(StaticSessionProvider::new(Some("test-token".to_string()))) as _,
    );

    let orchestrator = ChatOrchestrator::from_container(&container, &test_config(), TEST_ROOM_ID)
        .unwrap_or_else(|error| panic!("test orchestrator wiring failed: {error}"));
    TestOrchestrator {
        orchestrator,
        ai,
        persistence,
    }
}

pub fn create_test_message(role: Role, content: &str) -> ConcurrentMessage {
    ConcurrentMessage::new(MessageId::generate(), role, content, MessageState::Complete)
}

/// Six settled turns; the last exchange is about the capital of France.
pub fn create_test_messages() -> Vec<ConcurrentMessage> {
    vec![
        create_test_message(Role::User, "Hello"),
        create_test_message(Role::Assistant, "Hi there!"),
        create_test_message(Role::User, "How are you?"),
        create_test_message(Role::Assistant, "I'm doing well, thank you for asking!"),
        create_test_message(Role::User, "What is the capital of France?"),
        create_test_message(Role::Assistant, "The capital of France is Paris."),
    ]
}

/// Insert `messages` into `state` and return their ids in order.
pub fn seed_messages(state: &MessageStateManager, messages: Vec<ConcurrentMessage>) -> Vec<MessageId> {
    messages
        .into_iter()
        .map(|message| {
            let id = message.id.clone();
            state.insert(message).expect("seed message");
            id
        })
        .collect()
}
