use crate::core::message::{ConcurrentMessage, MessageState, Role};
use crate::core::plugin::{MessageRendering, Plugin, PluginError, RenderCapabilities};

/// Fallback renderer producing terminal-friendly text for any message.
#[derive(Debug, Default)]
pub struct PlainTextRenderer;

impl Plugin for PlainTextRenderer {
    fn id(&self) -> &str {
        "plain-text"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn as_renderer(&self) -> Option<&dyn MessageRendering> {
        Some(self)
    }
}

impl MessageRendering for PlainTextRenderer {
    fn can_render(&self, _message: &ConcurrentMessage) -> bool {
        true
    }

    fn render_capabilities(&self) -> RenderCapabilities {
        RenderCapabilities {
            formats: vec!["text/plain".to_string()],
            supports_partial: true,
        }
    }

    fn render_priority(&self) -> i32 {
        i32::MIN
    }

    fn render(&self, message: &ConcurrentMessage) -> Result<String, PluginError> {
        let body = message.content.trim_end();
        let rendered = match (message.role, message.state) {
            (Role::Assistant, MessageState::Error) => {
                let reason = message.error_reason().unwrap_or("request failed");
                if body.is_empty() {
                    format!("[error: {reason}]")
                } else {
                    format!("{body}\n[error: {reason}]")
                }
            }
            (Role::Assistant, MessageState::Pending | MessageState::Loading) if body.is_empty() => {
                "…".to_string()
            }
            (Role::Assistant, _) => body.to_string(),
            (Role::User, _) => format!("> {body}"),
            (Role::System, _) => format!("[system] {body}"),
        };
        Ok(rendered)
    }
}
