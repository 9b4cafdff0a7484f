use thiserror::Error;

use crate::core::ai_client::AiError;
use crate::core::container::ContainerError;
use crate::core::persistence::PersistenceError;
use crate::core::plugin::PluginError;
use crate::core::services::editing::EditError;
use crate::core::services::streaming::StreamError;
use crate::core::state::StateError;

/// Errors surfaced by the public operations of the chat core.
///
/// Validation, network and response-shape failures are returned to the caller
/// so a UI can offer a retry. Persistence failures are normally logged and
/// absorbed by the services; the variant exists for callers that persist
/// explicitly.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid index, missing preceding user turn, empty content, or an
    /// unsupported model/search combination. Nothing was mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The AI boundary call failed or timed out.
    #[error("AI request failed: {0}")]
    Network(#[source] AiError),

    /// A response arrived but carried no content that could be extracted.
    #[error("AI response had no extractable content: {0}")]
    ResponseShape(String),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    /// The room was closed while a request for it was in flight; the result
    /// was dropped.
    #[error("room {0} was closed while a request was in flight")]
    RoomClosed(String),
}

impl ChatError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Edit(EditError::Validation(_))
        )
    }
}

impl From<AiError> for ChatError {
    fn from(error: AiError) -> Self {
        match error {
            AiError::ResponseShape(message) => Self::ResponseShape(message),
            other => Self::Network(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_shape_errors_keep_their_own_variant() {
        let error: ChatError = AiError::ResponseShape("missing choices".into()).into();
        assert!(matches!(error, ChatError::ResponseShape(ref msg) if msg == "missing choices"));

        let error: ChatError = AiError::Timeout.into();
        assert!(matches!(error, ChatError::Network(AiError::Timeout)));
    }

    #[test]
    fn validation_helper_builds_validation_variant() {
        let error = ChatError::validation("empty content");
        assert!(error.is_validation());
        assert_eq!(error.to_string(), "validation failed: empty content");
    }
}
