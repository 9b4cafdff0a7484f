use async_trait::async_trait;
use tracing::warn;

use super::index_arg;
use crate::commands::{
    Command, CommandArgs, CommandError, CommandOutput, ContentSnapshot, UndoAction,
};
use crate::core::message::{ConcurrentMessage, Role};
use crate::core::orchestrator::ChatOrchestrator;
use crate::core::services::{RegenerationOptions, RegenerationOutcome};

const REGENERATE_USAGE: &str = "/regenerate <index> [replacement question]";
const EDIT_USAGE: &str = "/edit <index> <new content>";

fn message_at(chat: &ChatOrchestrator, index: usize) -> Result<ConcurrentMessage, CommandError> {
    chat.state()
        .message_at(index)
        .ok_or_else(|| CommandError::Rejected(format!("no message at index {index}")))
}

/// The user turn a regeneration of `index` answers.
fn preceding_user(chat: &ChatOrchestrator, index: usize) -> Option<ConcurrentMessage> {
    index
        .checked_sub(1)
        .and_then(|prev| chat.state().message_at(prev))
        .filter(|message| message.role == Role::User)
}

async fn restore(chat: &ChatOrchestrator, output: &CommandOutput) -> Result<(), CommandError> {
    match &output.undo {
        Some(UndoAction::RestoreContents(snapshots)) => {
            for snapshot in snapshots {
                chat.restore_content(&snapshot.id, &snapshot.content).await?;
            }
            Ok(())
        }
        _ => Err(CommandError::NothingToUndo),
    }
}

pub(crate) struct RegenerateCommand;

#[async_trait]
impl Command for RegenerateCommand {
    fn name(&self) -> &'static str {
        "regenerate"
    }

    async fn execute(
        &self,
        chat: &ChatOrchestrator,
        args: &CommandArgs,
    ) -> Result<CommandOutput, CommandError> {
        let index = index_arg(args, REGENERATE_USAGE)?;
        let previous = message_at(chat, index)?;
        let replacement = args.rest_from(1);
        let question = replacement
            .and_then(|_| preceding_user(chat, index))
            .filter(|user| Some(user.content.as_str()) != replacement);
        let outcome = chat
            .regenerate_message(index, replacement, RegenerationOptions::default())
            .await?;
        match outcome {
            RegenerationOutcome::Completed { id, .. } => {
                let mut snapshots = vec![ContentSnapshot {
                    id,
                    content: previous.content,
                }];
                snapshots.extend(question.map(|user| ContentSnapshot {
                    id: user.id,
                    content: user.content,
                }));
                Ok(CommandOutput::undoable(
                    format!("Regenerated message {index}"),
                    UndoAction::RestoreContents(snapshots),
                ))
            }
            RegenerationOutcome::Skipped(reason) => Err(CommandError::Rejected(format!(
                "regeneration skipped: {reason}"
            ))),
        }
    }

    fn can_undo(&self) -> bool {
        true
    }

    async fn undo(&self, chat: &ChatOrchestrator, output: &CommandOutput) -> Result<(), CommandError> {
        restore(chat, output).await
    }
}

pub(crate) struct EditCommand;

#[async_trait]
impl Command for EditCommand {
    fn name(&self) -> &'static str {
        "edit"
    }

    async fn execute(
        &self,
        chat: &ChatOrchestrator,
        args: &CommandArgs,
    ) -> Result<CommandOutput, CommandError> {
        let index = index_arg(args, EDIT_USAGE)?;
        let content = args.rest_from(1).ok_or(CommandError::Usage(EDIT_USAGE))?;
        let message = message_at(chat, index)?;

        let session = chat.start_edit(&message.id)?;
        chat.update_edit(&message.id, content)?;
        if let Err(error) = chat.save_edit(&message.id).await {
            if let Err(cancel_error) = chat.cancel_edit(&message.id).await {
                warn!(message_id = %message.id, error = %cancel_error, "could not close edit");
            }
            return Err(error.into());
        }
        Ok(CommandOutput::undoable(
            format!("Edited message {index}"),
            UndoAction::restore_content(message.id, session.original_content),
        ))
    }

    fn can_undo(&self) -> bool {
        true
    }

    async fn undo(&self, chat: &ChatOrchestrator, output: &CommandOutput) -> Result<(), CommandError> {
        restore(chat, output).await
    }
}
