use async_trait::async_trait;

use crate::commands::{all_commands, Command, CommandArgs, CommandError, CommandOutput};
use crate::core::orchestrator::ChatOrchestrator;

pub(crate) struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    async fn execute(
        &self,
        _chat: &ChatOrchestrator,
        _args: &CommandArgs,
    ) -> Result<CommandOutput, CommandError> {
        let mut help = String::from("Commands:\n");
        for entry in all_commands() {
            help.push_str(&format!("  {:<44} {}\n", entry.usage, entry.help));
        }
        Ok(CommandOutput::info(help.trim_end()))
    }
}
