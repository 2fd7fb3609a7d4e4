//! CLI entry point for the `e2` tool.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod app;
mod app_config;
mod cli;
mod commands;

use app::terminal;
use cli::Cli;

/// Process outcome mapped onto the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Success,
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => Self::SUCCESS,
            ProcessExit::Failure => Self::FAILURE,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    let loaded = app_config::load_default_file_config()?;

    // Priority: quiet/verbose flags > RUST_LOG > config verbosity > info
    let (default_level, force_cli_level) =
        terminal::resolve_log_level(cli.verbose, cli.quiet, loaded.config.verbosity);
    let no_color = terminal::no_color_env_requested() || terminal::is_dumb_terminal();
    terminal::init_tracing(default_level, force_cli_level, no_color);

    debug!(
        config = ?loaded.path,
        from_file = loaded.loaded_from_file,
        "configuration resolved"
    );

    let exit = app::command_dispatcher::dispatch(&cli, &loaded.config).await?;
    Ok(exit.into())
}
