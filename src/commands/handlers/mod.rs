mod core;
mod message;
mod model;

pub(super) use self::core::HelpCommand;
pub(super) use message::{EditCommand, RegenerateCommand};
pub(super) use model::SwitchModelCommand;

use crate::commands::{CommandArgs, CommandError};

pub(super) fn required_arg<'a>(
    args: &'a CommandArgs,
    index: usize,
    usage: &'static str,
) -> Result<&'a str, CommandError> {
    args.arg(index).ok_or(CommandError::Usage(usage))
}

pub(super) fn index_arg(args: &CommandArgs, usage: &'static str) -> Result<usize, CommandError> {
    required_arg(args, 0, usage)?
        .parse()
        .map_err(|_| CommandError::Usage(usage))
}
