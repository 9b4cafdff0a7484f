//! Server-sent event decoding for streaming chat responses.
//!
//! The edge function streams `data: {"choices":[{"delta":{"content":..}}]}`
//! lines and finishes with `data: [DONE]`. [`chunk_stream`] turns the raw
//! byte stream into a stream of content chunks.

use std::collections::VecDeque;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use memchr::memchr;
use serde_json::Value;
use tracing::warn;

use crate::api::ChatStreamResponse;
use crate::core::ai_client::AiError;

pub type ChunkStream = BoxStream<'static, Result<String, AiError>>;

const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Chunk(String),
    Done,
    Error(String),
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

/// Interpret one SSE line. Comments, blank lines and deltas without content
/// yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let payload = extract_data_payload(line.trim())?;
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }
    if payload.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<ChatStreamResponse>(payload) {
        Ok(response) => response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseEvent::Chunk),
        Err(_) => Some(SseEvent::Error(describe_api_error(payload))),
    }
}

/// Splits arbitrary byte chunks into lines.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(newline) = memchr(b'\n', &self.buffer) {
            match std::str::from_utf8(&self.buffer[..newline]) {
                Ok(line) => events.extend(parse_sse_line(line)),
                Err(error) => warn!(error = %error, "skipping invalid UTF-8 line in stream"),
            }
            self.buffer.drain(..=newline);
        }
        events
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        std::str::from_utf8(&rest).ok().and_then(parse_sse_line)
    }
}

struct DecodeState<S> {
    bytes: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    exhausted: bool,
}

/// Decode a byte stream into content chunks. The stream ends at `[DONE]`,
/// at the end of input, or after yielding the first error.
pub fn chunk_stream<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<AiError> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match state.pending.pop_front() {
                Some(SseEvent::Chunk(text)) => return Some((Ok(text), state)),
                Some(SseEvent::Done) => return None,
                Some(SseEvent::Error(message)) => {
                    state.pending.clear();
                    state.exhausted = true;
                    return Some((Err(AiError::Stream(message)), state));
                }
                None if state.exhausted => return None,
                None => {}
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(error)) => {
                    state.exhausted = true;
                    return Some((Err(error.into()), state));
                }
                None => {
                    state.exhausted = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}

fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| value.get("error").and_then(Value::as_str))
        .or_else(|| value.get("message").and_then(Value::as_str))?;

    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// One-line description of an error body returned by the edge function.
pub fn describe_api_error(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty response body>".to_string();
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&value) {
            return summary;
        }
    }

    let mut description: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        description.push('…');
    }
    description
}
