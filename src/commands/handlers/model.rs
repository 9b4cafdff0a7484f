use async_trait::async_trait;

use super::required_arg;
use crate::commands::{Command, CommandArgs, CommandError, CommandOutput, UndoAction};
use crate::core::orchestrator::ChatOrchestrator;

const USAGE: &str = "/switch-model <model id>";

pub(crate) struct SwitchModelCommand;

#[async_trait]
impl Command for SwitchModelCommand {
    fn name(&self) -> &'static str {
        "switch-model"
    }

    async fn execute(
        &self,
        chat: &ChatOrchestrator,
        args: &CommandArgs,
    ) -> Result<CommandOutput, CommandError> {
        let model = required_arg(args, 0, USAGE)?;
        let previous = chat.select_model(model)?;
        Ok(CommandOutput::undoable(
            format!("Model set: {model}"),
            UndoAction::RestoreModel(previous),
        ))
    }

    fn can_undo(&self) -> bool {
        true
    }

    async fn undo(&self, chat: &ChatOrchestrator, output: &CommandOutput) -> Result<(), CommandError> {
        match &output.undo {
            Some(UndoAction::RestoreModel(previous)) => {
                chat.select_model(previous)?;
                Ok(())
            }
            _ => Err(CommandError::NothingToUndo),
        }
    }
}
