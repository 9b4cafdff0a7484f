//! Incremental delivery of an assistant reply.
//!
//! Each message has at most one active stream. Control calls take the
//! service lock, and every chunk is applied under the same lock, so once
//! `stop_streaming` returns no further chunk reaches the message.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ChatRequest;
use crate::core::activity::ActivityConflict;
use crate::core::events;
use crate::core::message::{normalize_history, MessageId, MessageState};
use crate::core::persistence::{persist_assistant, AssistantUpdate};
use crate::core::services::ServiceContext;
use crate::core::session::ensure_fresh_token;
use crate::core::state::{StateError, TransitionPayload};
use crate::error::{ChatError, Result};
use crate::utils::sync::lock;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StreamError {
    #[error("stream was stopped")]
    Stopped,

    #[error("streaming speed must be a positive number, got {0}")]
    InvalidSpeed(f64),

    #[error("no active stream")]
    NoActiveStream,

    #[error(transparent)]
    Busy(#[from] ActivityConflict),
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// Known reply length in characters, for exact progress.
    pub expected_length: Option<usize>,
    /// Pause between revealed chunks at speed 1.0.
    pub chunk_delay: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamQuality {
    pub chunk_count: usize,
    pub total_chars: usize,
    pub average_chunk_size: f64,
}

impl StreamQuality {
    fn record(&mut self, chunk: &str) {
        self.chunk_count += 1;
        self.total_chars += chunk.chars().count();
        self.average_chunk_size = self.total_chars as f64 / self.chunk_count as f64;
    }
}

/// Observable state of one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSession {
    pub stream_id: u64,
    pub message_id: MessageId,
    /// Chunks applied to the message, in order.
    pub chunks: Vec<String>,
    /// Chunks received while paused, applied on resume.
    pub held: Vec<String>,
    pub progress: f64,
    pub is_paused: bool,
    pub quality: StreamQuality,
    pub expected_length: Option<usize>,
}

impl StreamSession {
    pub fn content(&self) -> String {
        self.chunks.concat()
    }

    fn update_progress(&mut self) {
        let received = self.quality.total_chars;
        self.progress = match self.expected_length {
            Some(expected) if expected > 0 => (received as f64 / expected as f64).min(0.99),
            _ => {
                let chunks = self.quality.chunk_count as f64;
                chunks / (chunks + 10.0)
            }
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSummary {
    pub stream_id: u64,
    pub message_id: MessageId,
    pub content: String,
    pub quality: StreamQuality,
    pub elapsed_ms: u128,
}

struct ActiveStream {
    session: StreamSession,
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
}

struct StreamingInner {
    streams: HashMap<MessageId, ActiveStream>,
    /// Most recently started stream; the target of the argument-less
    /// controls.
    latest: Option<MessageId>,
    next_stream_id: u64,
    speed: f64,
}

/// What happened to a chunk handed to [`StreamingService::apply_chunk`].
enum ChunkDisposition {
    Applied { progress: f64 },
    Held,
}

pub struct StreamingService {
    ctx: ServiceContext,
    inner: Mutex<StreamingInner>,
}

impl StreamingService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            inner: Mutex::new(StreamingInner {
                streams: HashMap::new(),
                latest: None,
                next_stream_id: 1,
                speed: 1.0,
            }),
        }
    }

    /// Stream a reply into the assistant message `id`, using the messages
    /// before it as history. A stream already running for `id` is stopped
    /// first; an open edit or regeneration of `id` rejects the call. Resolves
    /// once the reply is complete, or with [`StreamError::Stopped`] when
    /// stopped.
    pub async fn start_streaming(
        &self,
        id: &MessageId,
        options: StreamOptions,
    ) -> Result<StreamSummary> {
        let snapshot = self.ctx.state.snapshot();
        let index = snapshot
            .iter()
            .position(|message| &message.id == id)
            .ok_or_else(|| ChatError::from(StateError::NotFound(id.clone())))?;
        if !snapshot[index].role.is_assistant() {
            return Err(ChatError::validation(format!(
                "message {id} is not an assistant message"
            )));
        }
        let model = self.ctx.models.resolve(options.model.as_deref())?;
        let _claim = self
            .ctx
            .activity
            .try_begin_stream(id)
            .map_err(StreamError::from)?;

        // Updating a finished turn; a fresh placeholder is persisted by the
        // edge function itself.
        let existing_turn = snapshot[index].state.is_settled();
        if self.stop_stream(id).is_some() {
            debug!(message_id = %id, "superseded previous stream");
        }
        self.ctx
            .state
            .transition(id, MessageState::Loading, TransitionPayload::content(""))?;

        let (stream_id, cancel, mut pause_rx) = self.register(id, options.expected_length);
        self.ctx.bus().publish(
            events::STREAM_STARTED,
            json!({ "id": id, "streamId": stream_id, "model": model.id }),
        );

        let request = ChatRequest {
            room_id: self.ctx.room_id().to_string(),
            messages: normalize_history(&snapshot[..index], None),
            model: model.id.clone(),
            model_config: model.payload(),
            client_message_id: id.as_str().to_string(),
            skip_persistence: existing_turn,
            temperature: model.effective_temperature(options.temperature),
            stream: true,
        };

        let started = Instant::now();
        let result = self
            .pump(id, stream_id, &request, &options, &cancel, &mut pause_rx)
            .await;

        match result {
            Ok(()) => {
                let summary = self.finish(id, stream_id, started)?;
                if existing_turn {
                    let update = AssistantUpdate::completed(summary.content.clone(), Some(model.id));
                    persist_assistant(self.ctx.persistence.as_ref(), id, &update).await;
                }
                Ok(summary)
            }
            Err(ChatError::Stream(StreamError::Stopped)) => {
                debug!(message_id = %id, stream_id, "stream ended by stop");
                Err(StreamError::Stopped.into())
            }
            Err(error) => {
                if self.remove_if_current(id, stream_id).is_some() && self.ctx.room.is_active() {
                    self.ctx.state.mark_error(id, &error.to_string());
                }
                warn!(message_id = %id, stream_id, error = %error, "stream failed");
                self.ctx.bus().publish(
                    events::STREAM_FAILED,
                    json!({ "id": id, "streamId": stream_id, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    fn register(
        &self,
        id: &MessageId,
        expected_length: Option<usize>,
    ) -> (u64, CancellationToken, watch::Receiver<bool>) {
        let mut inner = lock(&self.inner);
        let stream_id = inner.next_stream_id;
        inner.next_stream_id += 1;
        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        inner.streams.insert(
            id.clone(),
            ActiveStream {
                session: StreamSession {
                    stream_id,
                    message_id: id.clone(),
                    chunks: Vec::new(),
                    held: Vec::new(),
                    progress: 0.0,
                    is_paused: false,
                    quality: StreamQuality::default(),
                    expected_length,
                },
                cancel: cancel.clone(),
                pause_tx,
            },
        );
        inner.latest = Some(id.clone());
        (stream_id, cancel, pause_rx)
    }

    async fn pump(
        &self,
        id: &MessageId,
        stream_id: u64,
        request: &ChatRequest,
        options: &StreamOptions,
        cancel: &CancellationToken,
        pause_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let token = ensure_fresh_token(self.ctx.session.as_ref()).await;
        let mut chunks = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Stopped.into()),
            opened = self.ctx.ai.stream_chat(request, token.as_deref()) => opened?,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Stopped.into()),
                next = chunks.next() => next,
            };
            let chunk = match next {
                Some(chunk) => chunk?,
                None => break,
            };

            match self.apply_chunk(id, stream_id, &chunk)? {
                ChunkDisposition::Applied { progress } => {
                    self.ctx.bus().publish(
                        events::STREAM_CHUNK,
                        json!({ "id": id, "streamId": stream_id, "chunk": chunk, "progress": progress }),
                    );
                }
                ChunkDisposition::Held => continue,
            }

            let delay = self.reveal_delay(options.chunk_delay);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StreamError::Stopped.into()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        // Held chunks are released only by resume.
        while *pause_rx.borrow_and_update() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Stopped.into()),
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        return Err(StreamError::Stopped.into());
                    }
                }
            }
        }
        Ok(())
    }

    fn reveal_delay(&self, base: Duration) -> Duration {
        let speed = lock(&self.inner).speed;
        Duration::try_from_secs_f64(base.as_secs_f64() / speed).unwrap_or(base)
    }

    fn apply_chunk(
        &self,
        id: &MessageId,
        stream_id: u64,
        chunk: &str,
    ) -> std::result::Result<ChunkDisposition, ChatError> {
        let mut inner = lock(&self.inner);
        let stream = match inner.streams.get_mut(id) {
            Some(stream) if stream.session.stream_id == stream_id => stream,
            _ => return Err(StreamError::Stopped.into()),
        };
        if stream.session.is_paused {
            stream.session.held.push(chunk.to_string());
            return Ok(ChunkDisposition::Held);
        }
        self.ctx.state.append_content(id, chunk)?;
        let session = &mut stream.session;
        session.chunks.push(chunk.to_string());
        session.quality.record(chunk);
        session.update_progress();
        Ok(ChunkDisposition::Applied {
            progress: session.progress,
        })
    }

    fn finish(&self, id: &MessageId, stream_id: u64, started: Instant) -> Result<StreamSummary> {
        let session = self
            .remove_if_current(id, stream_id)
            .ok_or(StreamError::Stopped)?;
        let content = session.content();

        if !self.ctx.room.is_active() {
            warn!(message_id = %id, "room closed during stream; dropping result");
            return Err(ChatError::RoomClosed(self.ctx.room_id().to_string()));
        }
        self.ctx.state.transition(
            id,
            MessageState::Complete,
            TransitionPayload::content(content.clone()),
        )?;

        info!(message_id = %id, stream_id, chunks = session.quality.chunk_count, "stream completed");
        self.ctx.bus().publish(
            events::STREAM_COMPLETED,
            json!({
                "id": id,
                "streamId": stream_id,
                "progress": 1.0,
                "chunkCount": session.quality.chunk_count,
            }),
        );
        Ok(StreamSummary {
            stream_id,
            message_id: id.clone(),
            content,
            quality: session.quality,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    fn remove_if_current(&self, id: &MessageId, stream_id: u64) -> Option<StreamSession> {
        let mut inner = lock(&self.inner);
        if inner.streams.get(id)?.session.stream_id != stream_id {
            return None;
        }
        if inner.latest.as_ref() == Some(id) {
            inner.latest = None;
        }
        inner.streams.remove(id).map(|stream| stream.session)
    }

    fn latest_id(&self) -> std::result::Result<MessageId, StreamError> {
        lock(&self.inner)
            .latest
            .clone()
            .ok_or(StreamError::NoActiveStream)
    }

    pub fn pause_streaming(&self) -> std::result::Result<(), StreamError> {
        let id = self.latest_id()?;
        self.set_paused(&id, true)
    }

    pub fn resume_streaming(&self) -> std::result::Result<(), StreamError> {
        let id = self.latest_id()?;
        self.set_paused(&id, false)
    }

    fn set_paused(&self, id: &MessageId, paused: bool) -> std::result::Result<(), StreamError> {
        let (stream_id, flushed, progress) = {
            let mut inner = lock(&self.inner);
            let stream = inner.streams.get_mut(id).ok_or(StreamError::NoActiveStream)?;
            if stream.session.is_paused == paused {
                return Ok(());
            }
            stream.session.is_paused = paused;
            stream.pause_tx.send_replace(paused);

            let mut flushed = Vec::new();
            for chunk in std::mem::take(&mut stream.session.held) {
                if let Err(error) = self.ctx.state.append_content(id, &chunk) {
                    warn!(message_id = %id, error = %error, "could not apply held chunk");
                    break;
                }
                let session = &mut stream.session;
                session.quality.record(&chunk);
                session.update_progress();
                session.chunks.push(chunk.clone());
                flushed.push((chunk, session.progress));
            }
            stream.session.update_progress();
            (stream.session.stream_id, flushed, stream.session.progress)
        };

        for (chunk, chunk_progress) in &flushed {
            self.ctx.bus().publish(
                events::STREAM_CHUNK,
                json!({ "id": id, "streamId": stream_id, "chunk": chunk, "progress": chunk_progress }),
            );
        }

        let event = if paused {
            events::STREAM_PAUSED
        } else {
            events::STREAM_RESUMED
        };
        self.ctx.bus().publish(
            event,
            json!({ "id": id, "streamId": stream_id, "flushed": flushed.len(), "progress": progress }),
        );
        Ok(())
    }

    /// Stop the most recent stream. Its `start_streaming` call fails with
    /// [`StreamError::Stopped`]; the returned summary is the frozen buffer.
    pub fn stop_streaming(&self) -> std::result::Result<StreamSession, StreamError> {
        let id = self.latest_id()?;
        self.stop_stream(&id).ok_or(StreamError::NoActiveStream)
    }

    /// Stop the stream for `id`, if any, and move the message to `error`.
    pub fn stop_stream(&self, id: &MessageId) -> Option<StreamSession> {
        let stopped = {
            let mut inner = lock(&self.inner);
            let stream = inner.streams.remove(id)?;
            if inner.latest.as_ref() == Some(id) {
                inner.latest = None;
            }
            stream.cancel.cancel();
            stream.session
        };

        self.ctx.state.mark_error(id, "stopped");
        self.ctx.bus().publish(
            events::STREAM_STOPPED,
            json!({ "id": id, "streamId": stopped.stream_id, "length": stopped.content().len() }),
        );
        Some(stopped)
    }

    /// Stop every stream, e.g. when the room closes.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<MessageId> = lock(&self.inner).streams.keys().cloned().collect();
        ids.iter().filter(|id| self.stop_stream(id).is_some()).count()
    }

    /// Scale the delay between revealed chunks; `2.0` reveals twice as fast.
    pub fn set_streaming_speed(&self, multiplier: f64) -> std::result::Result<(), StreamError> {
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(StreamError::InvalidSpeed(multiplier));
        }
        lock(&self.inner).speed = multiplier;
        Ok(())
    }

    pub fn streaming_speed(&self) -> f64 {
        lock(&self.inner).speed
    }

    pub fn current_session(&self) -> Option<StreamSession> {
        let inner = lock(&self.inner);
        let id = inner.latest.as_ref()?;
        inner.streams.get(id).map(|stream| stream.session.clone())
    }

    pub fn session(&self, id: &MessageId) -> Option<StreamSession> {
        lock(&self.inner)
            .streams
            .get(id)
            .map(|stream| stream.session.clone())
    }

    pub fn is_streaming(&self, id: &MessageId) -> bool {
        lock(&self.inner).streams.contains_key(id)
    }
}
