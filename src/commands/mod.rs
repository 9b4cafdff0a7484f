//! Slash commands with bounded, undoable history.

mod handlers;
mod registry;

pub use registry::{all_commands, find_command, CommandEntry};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::config::defaults::DEFAULT_COMMAND_HISTORY_LIMIT;
use crate::core::config::Config;
use crate::core::event_bus::EventBus;
use crate::core::events;
use crate::core::message::MessageId;
use crate::core::orchestrator::ChatOrchestrator;
use crate::error::ChatError;
use crate::utils::sync::lock;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: /{0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("{0}")]
    Rejected(String),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error(transparent)]
    Chat(#[from] ChatError),
}

/// Whitespace-separated arguments following the command name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandArgs {
    pub raw: String,
}

impl CommandArgs {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into().trim().to_string(),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.raw.split_whitespace().nth(index)
    }

    /// Everything after the first `index` arguments, with inner spacing
    /// preserved.
    pub fn rest_from(&self, index: usize) -> Option<&str> {
        let mut rest = self.raw.as_str();
        for _ in 0..index {
            let trimmed = rest.trim_start();
            let end = trimmed.find(char::is_whitespace)?;
            rest = &trimmed[end..];
        }
        let rest = rest.trim();
        (!rest.is_empty()).then_some(rest)
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// Content a message held before a command changed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentSnapshot {
    pub id: MessageId,
    pub content: String,
}

/// State needed to reverse a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UndoAction {
    /// Put every snapshot back, in order.
    RestoreContents(Vec<ContentSnapshot>),
    RestoreModel(String),
}

impl UndoAction {
    pub fn restore_content(id: MessageId, content: impl Into<String>) -> Self {
        Self::RestoreContents(vec![ContentSnapshot {
            id,
            content: content.into(),
        }])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutput {
    pub message: String,
    pub undo: Option<UndoAction>,
}

impl CommandOutput {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            undo: None,
        }
    }

    pub fn undoable(message: impl Into<String>, undo: UndoAction) -> Self {
        Self {
            message: message.into(),
            undo: Some(undo),
        }
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        chat: &ChatOrchestrator,
        args: &CommandArgs,
    ) -> Result<CommandOutput, CommandError>;

    fn can_undo(&self) -> bool {
        false
    }

    async fn undo(&self, chat: &ChatOrchestrator, output: &CommandOutput) -> Result<(), CommandError> {
        let _ = (chat, output);
        Err(CommandError::Rejected(format!("/{} cannot be undone", self.name())))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandRecord {
    pub sequence: u64,
    pub command_name: String,
    pub args: CommandArgs,
    pub result: CommandOutput,
    pub timestamp: DateTime<Utc>,
}

/// What [`CommandManager::process_input`] did with a line of input.
#[derive(Debug)]
pub enum CommandResult {
    Executed(CommandOutput),
    /// Not a command; send it as a message.
    ProcessAsMessage(String),
}

struct HistoryInner {
    records: VecDeque<CommandRecord>,
    next_sequence: u64,
}

pub struct CommandManager {
    bus: Arc<EventBus>,
    history: Mutex<HistoryInner>,
    history_limit: usize,
}

impl CommandManager {
    pub fn new(bus: Arc<EventBus>, history_limit: usize) -> Self {
        Self {
            bus,
            history: Mutex::new(HistoryInner {
                records: VecDeque::new(),
                next_sequence: 1,
            }),
            history_limit,
        }
    }

    pub fn with_default_limit(bus: Arc<EventBus>) -> Self {
        Self::new(bus, DEFAULT_COMMAND_HISTORY_LIMIT)
    }

    pub fn from_config(bus: Arc<EventBus>, config: &Config) -> Self {
        Self::new(bus, config.command_history_limit)
    }

    /// Run `input` as a command when it starts with `/`.
    pub async fn process_input(
        &self,
        chat: &ChatOrchestrator,
        input: &str,
    ) -> Result<CommandResult, CommandError> {
        let trimmed = input.trim();
        let Some(body) = trimmed.strip_prefix('/') else {
            return Ok(CommandResult::ProcessAsMessage(input.to_string()));
        };
        let mut parts = body.splitn(2, char::is_whitespace);
        let name = match parts.next() {
            Some(name) if !name.is_empty() => name,
            _ => return Ok(CommandResult::ProcessAsMessage(input.to_string())),
        };
        let args = CommandArgs::new(parts.next().unwrap_or(""));
        self.execute(chat, name, args)
            .await
            .map(CommandResult::Executed)
    }

    pub async fn execute(
        &self,
        chat: &ChatOrchestrator,
        name: &str,
        args: CommandArgs,
    ) -> Result<CommandOutput, CommandError> {
        let entry = find_command(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;
        let command = entry.command;
        debug!(command = command.name(), args = %args.raw, "executing command");
        let output = command.execute(chat, &args).await?;

        {
            let mut history = lock(&self.history);
            let sequence = history.next_sequence;
            history.next_sequence += 1;
            if self.history_limit > 0 {
                while history.records.len() >= self.history_limit {
                    history.records.pop_front();
                }
                history.records.push_back(CommandRecord {
                    sequence,
                    command_name: command.name().to_string(),
                    args: args.clone(),
                    result: output.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
        self.bus.publish(
            events::COMMAND_EXECUTED,
            json!({ "command": command.name(), "args": args.raw, "message": output.message }),
        );
        Ok(output)
    }

    /// Undo the most recent undoable command. The record is dropped from
    /// history only when the undo succeeds.
    pub async fn undo_last_command(&self, chat: &ChatOrchestrator) -> Result<CommandRecord, CommandError> {
        let record = lock(&self.history)
            .records
            .iter()
            .rev()
            .find(|record| {
                record.result.undo.is_some()
                    && find_command(&record.command_name).is_some_and(|entry| entry.command.can_undo())
            })
            .cloned()
            .ok_or(CommandError::NothingToUndo)?;
        let entry = find_command(&record.command_name)
            .ok_or_else(|| CommandError::Unknown(record.command_name.clone()))?;

        entry.command.undo(chat, &record.result).await?;

        lock(&self.history)
            .records
            .retain(|candidate| candidate.sequence != record.sequence);
        info!(command = %record.command_name, "command undone");
        self.bus.publish(
            events::COMMAND_UNDONE,
            json!({ "command": record.command_name, "args": record.args.raw }),
        );
        Ok(record)
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<CommandRecord> {
        lock(&self.history).records.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests;
