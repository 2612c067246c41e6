mod commands;
mod parse;

pub(crate) use commands::run_command;
pub(crate) use parse::Cli;
