//! CLI for ocrtrain
//!
//! This module contains the argument parser and command handlers.

mod args;
mod check;
mod train;

pub use args::{parse_args, Cli, Command, ConfigArgs};

use crate::error::Result;

/// Execute a parsed command.
pub fn run_command(cli: Cli) -> Result<()> {
    let quiet = cli.common.is_quiet();
    match cli.command {
        Command::Train(args) => train::run_train(args, quiet),
        Command::Check(args) => check::run_check(args, quiet),
    }
}
