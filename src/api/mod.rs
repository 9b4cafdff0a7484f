use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::message::{MessageState, Role};

pub mod models;

pub use models::{ModelConfig, ModelConfigPayload};

/// One history entry sent to the edge function.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<MessageState>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            id: None,
            state: None,
        }
    }
}

/// Body of `POST {edge}/ai-chat`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub room_id: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub model_config: ModelConfigPayload,
    /// Idempotency key: stable across retries of one logical send or
    /// regeneration.
    pub client_message_id: String,
    /// Set when the call updates an existing turn instead of creating a row.
    pub skip_persistence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Body of `POST {edge}/react-search`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub question: String,
    pub model: String,
    pub model_config: ModelConfigPayload,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The two response shapes the edge functions produce.
///
/// `ChatChoice` is listed first so a body carrying `choices` is never read as
/// a direct answer.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum AiResponse {
    ChatChoice {
        choices: Vec<ChatChoice>,
        #[serde(default)]
        model: Option<String>,
    },
    Direct {
        content: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        citations: Vec<Value>,
        #[serde(default)]
        time_warning: Option<String>,
    },
}

impl AiResponse {
    pub fn direct(content: impl Into<String>) -> Self {
        AiResponse::Direct {
            content: content.into(),
            model: None,
            citations: Vec::new(),
            time_warning: None,
        }
    }

    pub fn chat(content: impl Into<String>) -> Self {
        AiResponse::ChatChoice {
            choices: vec![ChatChoice {
                message: ChoiceMessage {
                    content: Some(content.into()),
                },
                finish_reason: Some("stop".to_string()),
            }],
            model: None,
        }
    }

    /// The answer text, if the response carries any non-blank content.
    pub fn content(&self) -> Option<&str> {
        let content = match self {
            AiResponse::Direct { content, .. } => Some(content.as_str()),
            AiResponse::ChatChoice { choices, .. } => choices
                .first()
                .and_then(|choice| choice.message.content.as_deref()),
        };
        content.filter(|text| !text.trim().is_empty())
    }

    /// Sources backing a search answer; empty for chat replies.
    pub fn citations(&self) -> &[Value] {
        match self {
            AiResponse::Direct { citations, .. } => citations,
            AiResponse::ChatChoice { .. } => &[],
        }
    }

    pub fn time_warning(&self) -> Option<&str> {
        match self {
            AiResponse::Direct { time_warning, .. } => time_warning.as_deref(),
            AiResponse::ChatChoice { .. } => None,
        }
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            AiResponse::Direct { model, .. } | AiResponse::ChatChoice { model, .. } => {
                model.as_deref()
            }
        }
    }
}

/// Raw body of the search edge function before normalization.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchResponse {
    pub final_answer_md: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub citations: Vec<Value>,
    #[serde(default)]
    pub time_warning: Option<String>,
}

impl From<SearchResponse> for AiResponse {
    fn from(raw: SearchResponse) -> Self {
        AiResponse::Direct {
            content: raw.final_answer_md,
            model: raw.model,
            citations: raw.citations,
            time_warning: raw.time_warning,
        }
    }
}

#[derive(Deserialize)]
pub struct ChatResponseDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    pub delta: ChatResponseDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One server-sent event of a streaming chat response.
#[derive(Deserialize)]
pub struct ChatStreamResponse {
    pub choices: Vec<ChatResponseChoice>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_choice_shape_is_recognized() {
        let body = json!({"choices": [{"message": {"content": "Paris."}}]});
        let response: AiResponse = serde_json::from_value(body).expect("parse");
        assert!(matches!(response, AiResponse::ChatChoice { .. }));
        assert_eq!(response.content(), Some("Paris."));
    }

    #[test]
    fn direct_shape_is_recognized() {
        let body = json!({"content": "Answer", "model": "gpt-4o", "citations": [{"url": "x"}]});
        let response: AiResponse = serde_json::from_value(body).expect("parse");
        assert_eq!(response.content(), Some("Answer"));
        assert_eq!(response.model(), Some("gpt-4o"));
        assert_eq!(response.citations(), &[json!({"url": "x"})]);
        assert_eq!(response.time_warning(), None);
        assert!(AiResponse::chat("Paris.").citations().is_empty());
    }

    #[test]
    fn empty_choices_have_no_content() {
        let body = json!({"choices": []});
        let response: AiResponse = serde_json::from_value(body).expect("parse");
        assert_eq!(response.content(), None);

        let body = json!({"choices": [{"message": {"content": "   "}}]});
        let response: AiResponse = serde_json::from_value(body).expect("parse");
        assert_eq!(response.content(), None);
    }

    #[test]
    fn unrelated_bodies_do_not_parse() {
        let body = json!({"status": "ok"});
        assert!(serde_json::from_value::<AiResponse>(body).is_err());
    }

    #[test]
    fn search_response_normalizes_to_direct() {
        let raw: SearchResponse = serde_json::from_value(json!({
            "final_answer_md": "**Paris**",
            "model": "sonar",
            "citations": ["https://example.com"],
            "time_warning": "data may be stale"
        }))
        .expect("parse");
        let response = AiResponse::from(raw);
        match response {
            AiResponse::Direct {
                content,
                time_warning,
                citations,
                ..
            } => {
                assert_eq!(content, "**Paris**");
                assert_eq!(time_warning.as_deref(), Some("data may be stale"));
                assert_eq!(citations.len(), 1);
            }
            other => panic!("expected direct response, got {other:?}"),
        }
    }

    #[test]
    fn chat_request_uses_camel_case_and_omits_stream_flag() {
        let request = ChatRequest {
            room_id: "room-1".into(),
            messages: vec![ChatMessage::new(Role::User, "hi")],
            model: "gpt-4o-mini".into(),
            model_config: ModelConfigPayload {
                token_parameter: "max_tokens".into(),
                supports_custom_temperature: true,
                default_temperature: 0.7,
            },
            client_message_id: "msg_1_a".into(),
            skip_persistence: true,
            temperature: None,
            stream: false,
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["roomId"], "room-1");
        assert_eq!(json["clientMessageId"], "msg_1_a");
        assert_eq!(json["skipPersistence"], true);
        assert_eq!(json["modelConfig"]["tokenParameter"], "max_tokens");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("stream").is_none());
        assert!(json.get("temperature").is_none());
    }
}
