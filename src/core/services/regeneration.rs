//! Regenerate an assistant turn from the history that precedes it.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::ChatRequest;
use crate::core::activity::ActivityConflict;
use crate::core::ai_client::extract_content;
use crate::core::events;
use crate::core::message::{normalize_history, ConcurrentMessage, MessageId, MessageState};
use crate::core::persistence::{persist_assistant, persist_user_edit, AssistantUpdate};
use crate::core::services::ServiceContext;
use crate::core::session::ensure_fresh_token;
use crate::core::state::{StateError, TransitionPayload};
use crate::error::{ChatError, Result};
use crate::utils::sync::lock;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegenerationOptions {
    /// Model override; the active model when `None`.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// Free-form labels recorded with the result, e.g. `"shorter"`.
    pub variant_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegenerationRecord {
    pub id: MessageId,
    pub index: usize,
    pub original_message: ConcurrentMessage,
    pub options: RegenerationOptions,
    pub result: String,
    pub timestamp: DateTime<Utc>,
}

/// Why a regeneration request was ignored.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SkipReason {
    #[error("index {index} is out of bounds ({len} messages)")]
    OutOfBounds { index: usize, len: usize },

    #[error("message at index {0} is not an assistant message")]
    NotAssistant(usize),

    #[error("message at index {0} has no id")]
    MissingId(usize),

    #[error("no user message precedes index {0}")]
    NoPrecedingUser(usize),

    #[error("preceding user message is empty")]
    EmptyUserContent,

    #[error("message is {0}")]
    InFlight(MessageState),

    #[error(transparent)]
    Busy(#[from] ActivityConflict),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegenerationOutcome {
    Completed { id: MessageId, content: String },
    Skipped(SkipReason),
}

impl RegenerationOutcome {
    pub fn content(&self) -> Option<&str> {
        match self {
            RegenerationOutcome::Completed { content, .. } => Some(content),
            RegenerationOutcome::Skipped(_) => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RegenerationOutcome::Skipped(_))
    }
}

/// Target assistant turn and the user turn that prompts it.
fn check_preconditions(
    messages: &[ConcurrentMessage],
    index: usize,
    override_user_content: Option<&str>,
) -> std::result::Result<(ConcurrentMessage, ConcurrentMessage), SkipReason> {
    let target = messages.get(index).ok_or(SkipReason::OutOfBounds {
        index,
        len: messages.len(),
    })?;
    if !target.role.is_assistant() {
        return Err(SkipReason::NotAssistant(index));
    }
    if target.id.is_empty() {
        return Err(SkipReason::MissingId(index));
    }

    let user = index
        .checked_sub(1)
        .and_then(|prev| messages.get(prev))
        .filter(|message| message.role.is_user())
        .ok_or(SkipReason::NoPrecedingUser(index))?;
    let has_prompt = match override_user_content {
        Some(content) => !content.trim().is_empty(),
        None => !user.content.trim().is_empty(),
    };
    if !has_prompt {
        return Err(SkipReason::EmptyUserContent);
    }
    Ok((target.clone(), user.clone()))
}

pub struct RegenerationService {
    ctx: ServiceContext,
    history: Mutex<VecDeque<RegenerationRecord>>,
    history_limit: usize,
}

impl RegenerationService {
    pub fn new(ctx: ServiceContext, history_limit: usize) -> Self {
        Self {
            ctx,
            history: Mutex::new(VecDeque::new()),
            history_limit,
        }
    }

    pub fn is_regenerating(&self, index: usize) -> bool {
        self.ctx.activity.is_regenerating_index(index)
    }

    /// Completed regenerations, oldest first.
    pub fn history(&self) -> Vec<RegenerationRecord> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Regenerate the assistant message at `index`.
    ///
    /// Requests that fail a precondition, or target an index that is already
    /// regenerating, are skipped without touching state or the network. When
    /// `override_user_content` is given it replaces the preceding user turn
    /// in the request and, once the call succeeds, in the log.
    pub async fn regenerate(
        &self,
        index: usize,
        override_user_content: Option<&str>,
        options: RegenerationOptions,
    ) -> Result<RegenerationOutcome> {
        let snapshot = self.ctx.state.snapshot();
        let (target, user) = match check_preconditions(&snapshot, index, override_user_content) {
            Ok(pair) => pair,
            Err(reason) => return Ok(self.skip(index, reason)),
        };
        let model = self.ctx.models.resolve(options.model.as_deref())?;

        let _claim = match self.ctx.activity.try_begin_regeneration(index, &target.id) {
            Ok(claim) => claim,
            Err(conflict) => return Ok(self.skip(index, conflict.into())),
        };
        if !target.state.is_settled() {
            return Ok(self.skip(index, SkipReason::InFlight(target.state)));
        }

        self.ctx
            .state
            .transition(&target.id, MessageState::Loading, TransitionPayload::default())?;
        self.ctx.bus().publish(
            events::REGENERATION_STARTED,
            json!({ "index": index, "id": target.id, "model": model.id }),
        );

        let request = ChatRequest {
            room_id: self.ctx.room_id().to_string(),
            messages: normalize_history(&snapshot[..index], override_user_content),
            model: model.id.clone(),
            model_config: model.payload(),
            client_message_id: target.id.as_str().to_string(),
            skip_persistence: true,
            temperature: model.effective_temperature(options.temperature),
            stream: false,
        };

        match self.complete(&target, &user, &request, override_user_content).await {
            Ok(content) => {
                self.record(index, &target, &options, &content);
                info!(message_id = %target.id, index, "regeneration completed");
                self.ctx.bus().publish(
                    events::REGENERATION_COMPLETED,
                    json!({ "index": index, "id": target.id, "length": content.chars().count() }),
                );
                Ok(RegenerationOutcome::Completed {
                    id: target.id,
                    content,
                })
            }
            Err(error) => {
                if !matches!(error, ChatError::RoomClosed(_)) {
                    self.ctx.state.mark_error(&target.id, &error.to_string());
                }
                warn!(message_id = %target.id, index, error = %error, "regeneration failed");
                self.ctx.bus().publish(
                    events::REGENERATION_FAILED,
                    json!({ "index": index, "id": target.id, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    async fn complete(
        &self,
        target: &ConcurrentMessage,
        user: &ConcurrentMessage,
        request: &ChatRequest,
        override_user_content: Option<&str>,
    ) -> Result<String> {
        let token = ensure_fresh_token(self.ctx.session.as_ref()).await;
        let response = self.ctx.ai.chat(request, token.as_deref()).await?;

        if !self.ctx.room.is_active() {
            warn!(message_id = %target.id, "room closed during regeneration; dropping result");
            return Err(ChatError::RoomClosed(self.ctx.room_id().to_string()));
        }
        let content = extract_content(&response)?;

        // The log may have changed while the request was in flight.
        if self.ctx.state.get(&target.id).is_none() {
            return Err(StateError::NotFound(target.id.clone()).into());
        }
        self.ctx.reveal(&target.id, &content).await?;

        let update = AssistantUpdate::completed(
            content.clone(),
            response.model().map(str::to_string).or_else(|| Some(request.model.clone())),
        );
        persist_assistant(self.ctx.persistence.as_ref(), &target.id, &update).await;

        if let Some(edited) = override_user_content.filter(|edited| *edited != user.content) {
            if self.ctx.state.replace_content(&user.id, edited).is_ok() {
                persist_user_edit(self.ctx.persistence.as_ref(), &user.id, edited).await;
            } else {
                debug!(message_id = %user.id, "edited user message no longer present");
            }
        }
        Ok(content)
    }

    fn skip(&self, index: usize, reason: SkipReason) -> RegenerationOutcome {
        warn!(index, reason = %reason, "skipping regeneration");
        RegenerationOutcome::Skipped(reason)
    }

    fn record(
        &self,
        index: usize,
        original: &ConcurrentMessage,
        options: &RegenerationOptions,
        result: &str,
    ) {
        if self.history_limit == 0 {
            return;
        }
        let mut history = lock(&self.history);
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(RegenerationRecord {
            id: original.id.clone(),
            index,
            original_message: original.clone(),
            options: options.clone(),
            result: result.to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AiResponse;
    use crate::core::ai_client::AiError;
    use crate::core::message::Role;
    use crate::core::config::{AnimationSettings, Config};
    use crate::utils::test_utils::{
        create_test_context, create_test_context_with, create_test_message,
        create_test_messages, seed_messages, test_config, PersistenceCall, RecordingPersistence,
        ScriptedAiClient, TestContext,
    };
    use std::time::Duration;

    fn service(test: &TestContext) -> RegenerationService {
        RegenerationService::new(test.ctx.clone(), 50)
    }

    #[tokio::test]
    async fn regenerates_with_history_before_index() {
        let ai = ScriptedAiClient::new();
        ai.respond(AiResponse::chat("Paris."));
        let test = create_test_context(ai);
        let ids = seed_messages(&test.ctx.state, create_test_messages());
        let regeneration = service(&test);

        let outcome = regeneration
            .regenerate(5, None, RegenerationOptions::default())
            .await
            .expect("regenerate");
        assert_eq!(outcome.content(), Some("Paris."));

        let message = test.ctx.state.get(&ids[5]).expect("message");
        assert_eq!(message.content, "Paris.");
        assert_eq!(message.state, MessageState::Complete);

        let requests = test.ai.chat_requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.messages.len(), 5);
        assert_eq!(request.messages[4].content, "What is the capital of France?");
        assert_eq!(request.client_message_id, ids[5].as_str());
        assert!(request.skip_persistence);
        assert_eq!(request.room_id, test.ctx.room_id());

        assert_eq!(
            test.persistence.calls(),
            vec![PersistenceCall::AssistantByClientId(
                ids[5].as_str().to_string(),
                "Paris.".to_string()
            )]
        );
        assert!(!regeneration.is_regenerating(5));
        assert_eq!(regeneration.history().len(), 1);

        let bus = test.ctx.bus();
        assert_eq!(bus.events_of_type(events::REGENERATION_STARTED).len(), 1);
        assert_eq!(bus.events_of_type(events::REGENERATION_COMPLETED).len(), 1);
    }

    #[tokio::test]
    async fn override_replaces_only_the_preceding_user_turn() {
        let ai = ScriptedAiClient::new();
        ai.respond(AiResponse::direct("La capitale de la France est Paris."));
        let test = create_test_context(ai);
        let ids = seed_messages(&test.ctx.state, create_test_messages());

        service(&test)
            .regenerate(5, Some("Tell me in French"), RegenerationOptions::default())
            .await
            .expect("regenerate");

        let request = &test.ai.chat_requests()[0];
        assert_eq!(request.messages[4].content, "Tell me in French");
        assert_eq!(request.messages[2].content, "How are you?");
        assert_eq!(
            test.ctx.state.get(&ids[4]).expect("user").content,
            "Tell me in French"
        );
        // Client-origin user messages have no row to update.
        assert!(!test
            .persistence
            .calls()
            .iter()
            .any(|call| matches!(call, PersistenceCall::UserByDbId(..))));
    }

    #[tokio::test]
    async fn database_messages_persist_by_db_id() {
        let ai = ScriptedAiClient::new();
        ai.respond(AiResponse::chat("Paris."));
        let test = create_test_context(ai);
        let mut user = create_test_message(Role::User, "Capital of France?");
        user.id = MessageId::from_db(10);
        let mut assistant = create_test_message(Role::Assistant, "Lyon?");
        assistant.id = MessageId::from_db(11);
        seed_messages(&test.ctx.state, vec![user, assistant]);

        service(&test)
            .regenerate(1, Some("What is the capital of France?"), RegenerationOptions::default())
            .await
            .expect("regenerate");

        assert_eq!(
            test.persistence.calls(),
            vec![
                PersistenceCall::AssistantByDbId(11, "Paris.".to_string()),
                PersistenceCall::UserByDbId(10, "What is the capital of France?".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_for_one_index_make_one_call() {
        let ai = ScriptedAiClient::new().with_delay(Duration::from_millis(50));
        ai.respond(AiResponse::chat("Paris."));
        let test = create_test_context(ai);
        seed_messages(&test.ctx.state, create_test_messages());
        let regeneration = service(&test);

        let (first, second) = tokio::join!(
            regeneration.regenerate(5, None, RegenerationOptions::default()),
            regeneration.regenerate(5, None, RegenerationOptions::default()),
        );

        assert_eq!(first.expect("first").content(), Some("Paris."));
        assert_eq!(
            second.expect("second"),
            RegenerationOutcome::Skipped(SkipReason::Busy(ActivityConflict::IndexRegenerating(5)))
        );
        assert_eq!(test.ai.call_count(), 1);
        assert!(!regeneration.is_regenerating(5));
    }

    #[tokio::test]
    async fn precondition_violations_are_skipped_without_side_effects() {
        let test = create_test_context(ScriptedAiClient::new());
        let mut messages = create_test_messages();
        messages[2].content = "   ".to_string();
        seed_messages(&test.ctx.state, messages);
        let before = test.ctx.state.snapshot();
        let regeneration = service(&test);

        let cases = [
            (9, None, SkipReason::OutOfBounds { index: 9, len: 6 }),
            (4, None, SkipReason::NotAssistant(4)),
            (3, None, SkipReason::EmptyUserContent),
            (3, Some(" "), SkipReason::EmptyUserContent),
        ];
        for (index, override_content, expected) in cases {
            let outcome = regeneration
                .regenerate(index, override_content, RegenerationOptions::default())
                .await
                .expect("skip is not an error");
            assert_eq!(outcome, RegenerationOutcome::Skipped(expected));
        }

        assert_eq!(test.ai.call_count(), 0);
        assert_eq!(test.ctx.state.snapshot(), before);
    }

    #[tokio::test]
    async fn assistant_without_preceding_user_is_skipped() {
        let test = create_test_context(ScriptedAiClient::new());
        seed_messages(
            &test.ctx.state,
            vec![
                create_test_message(Role::Assistant, "Welcome!"),
                create_test_message(Role::Assistant, "Ask me anything."),
            ],
        );
        let outcome = service(&test)
            .regenerate(0, None, RegenerationOptions::default())
            .await
            .expect("skip");
        assert_eq!(outcome, RegenerationOutcome::Skipped(SkipReason::NoPrecedingUser(0)));
    }

    #[tokio::test]
    async fn failure_marks_error_and_allows_retry() {
        let ai = ScriptedAiClient::new();
        ai.fail(AiError::Timeout);
        ai.respond(AiResponse::chat("Paris."));
        let test = create_test_context(ai);
        let ids = seed_messages(&test.ctx.state, create_test_messages());
        let regeneration = service(&test);

        let error = regeneration
            .regenerate(5, None, RegenerationOptions::default())
            .await
            .expect_err("timeout");
        assert!(matches!(error, ChatError::Network(AiError::Timeout)));

        let failed = test.ctx.state.get(&ids[5]).expect("message");
        assert_eq!(failed.state, MessageState::Error);
        assert_eq!(failed.error_reason(), Some("AI request failed: request timed out"));
        assert!(!regeneration.is_regenerating(5));
        assert_eq!(test.ctx.bus().events_of_type(events::REGENERATION_FAILED).len(), 1);

        regeneration
            .regenerate(5, None, RegenerationOptions::default())
            .await
            .expect("retry");
        assert_eq!(
            test.ctx.state.state_of(&ids[5]),
            Some(MessageState::Complete)
        );
    }

    #[tokio::test]
    async fn empty_response_is_a_shape_error() {
        let ai = ScriptedAiClient::new();
        ai.respond(AiResponse::chat(""));
        let test = create_test_context(ai);
        let ids = seed_messages(&test.ctx.state, create_test_messages());

        let error = service(&test)
            .regenerate(5, None, RegenerationOptions::default())
            .await
            .expect_err("shape");
        assert!(matches!(error, ChatError::ResponseShape(_)));
        assert_eq!(test.ctx.state.state_of(&ids[5]), Some(MessageState::Error));
    }

    #[tokio::test]
    async fn retries_reuse_the_idempotency_key() {
        let ai = ScriptedAiClient::new();
        ai.respond(AiResponse::chat("Paris."));
        ai.respond(AiResponse::chat("It is Paris."));
        let test = create_test_context(ai);
        let ids = seed_messages(&test.ctx.state, create_test_messages());
        let regeneration = service(&test);

        for _ in 0..2 {
            regeneration
                .regenerate(5, None, RegenerationOptions::default())
                .await
                .expect("regenerate");
        }

        let keys: Vec<_> = test
            .ai
            .chat_requests()
            .into_iter()
            .map(|request| request.client_message_id)
            .collect();
        assert_eq!(keys, vec![ids[5].as_str().to_string(); 2]);
        let rows = test.persistence.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get(ids[5].as_str()).map(String::as_str), Some("It is Paris."));
    }

    #[tokio::test]
    async fn history_is_capped() {
        let ai = ScriptedAiClient::new();
        for answer in ["one", "two", "three"] {
            ai.respond(AiResponse::chat(answer));
        }
        let test = create_test_context(ai);
        seed_messages(&test.ctx.state, create_test_messages());
        let regeneration = RegenerationService::new(test.ctx.clone(), 2);

        for _ in 0..3 {
            regeneration
                .regenerate(5, None, RegenerationOptions::default())
                .await
                .expect("regenerate");
        }

        let results: Vec<_> = regeneration.history().into_iter().map(|r| r.result).collect();
        assert_eq!(results, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn unknown_model_override_is_rejected_before_any_change() {
        let test = create_test_context(ScriptedAiClient::new());
        let ids = seed_messages(&test.ctx.state, create_test_messages());
        let options = RegenerationOptions {
            model: Some("gpt-9".to_string()),
            ..Default::default()
        };

        let error = service(&test)
            .regenerate(5, None, options)
            .await
            .expect_err("unknown model");
        assert!(error.is_validation());
        assert_eq!(test.ctx.state.state_of(&ids[5]), Some(MessageState::Complete));
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_dropped_when_the_room_closes() {
        let ai = ScriptedAiClient::new().with_delay(Duration::from_millis(50));
        ai.respond(AiResponse::chat("Paris."));
        let test = create_test_context(ai);
        seed_messages(&test.ctx.state, create_test_messages());
        let regeneration = service(&test);

        let close = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            test.ctx.room.close();
            test.ctx.state.clear();
        };
        let (result, ()) = tokio::join!(
            regeneration.regenerate(5, None, RegenerationOptions::default()),
            close
        );

        assert!(matches!(result, Err(ChatError::RoomClosed(_))));
        assert!(test.ctx.state.is_empty());
        assert!(test.persistence.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_room_mid_reveal_reports_room_closed() {
        let ai = ScriptedAiClient::new();
        ai.respond(AiResponse::chat("The capital of France is Paris."));
        let config = Config {
            animation: AnimationSettings {
                enabled: true,
                chars_per_tick: 4,
                tick_interval_ms: 10,
            },
            ..test_config()
        };
        let test = create_test_context_with(ai, RecordingPersistence::default(), &config);
        seed_messages(&test.ctx.state, create_test_messages());
        let regeneration = service(&test);

        let close = async {
            tokio::time::sleep(Duration::from_millis(25)).await;
            test.ctx.room.close();
            test.ctx.state.clear();
        };
        let (result, ()) = tokio::join!(
            regeneration.regenerate(5, None, RegenerationOptions::default()),
            close
        );

        assert!(matches!(result, Err(ChatError::RoomClosed(_))));
        assert!(test.persistence.calls().is_empty());
        let errored = test
            .ctx
            .bus()
            .events_of_type(events::MESSAGE_STATE_CHANGED)
            .into_iter()
            .filter(|event| event.data["to"] == "error")
            .count();
        assert_eq!(errored, 0);
    }
}
