use super::handlers::{EditCommand, HelpCommand, RegenerateCommand, SwitchModelCommand};
use super::Command;

pub struct CommandEntry {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    pub command: &'static dyn Command,
}

pub fn all_commands() -> &'static [CommandEntry] {
    COMMANDS
}

pub fn find_command(name: &str) -> Option<&'static CommandEntry> {
    all_commands()
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(name))
}

const COMMANDS: &[CommandEntry] = &[
    CommandEntry {
        name: "help",
        usage: "/help",
        help: "List the available commands.",
        command: &HelpCommand,
    },
    CommandEntry {
        name: "regenerate",
        usage: "/regenerate <index> [replacement question]",
        help: "Ask again for the assistant reply at <index>, optionally rewording the question before it.",
        command: &RegenerateCommand,
    },
    CommandEntry {
        name: "edit",
        usage: "/edit <index> <new content>",
        help: "Replace the content of the message at <index>.",
        command: &EditCommand,
    },
    CommandEntry {
        name: "switch-model",
        usage: "/switch-model <model id>",
        help: "Make <model id> the active model for new requests.",
        command: &SwitchModelCommand,
    },
];
