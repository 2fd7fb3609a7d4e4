//! CLI command routing.

use anyhow::Result;

use crate::app::context::RunContext;
use crate::app_config::FileConfig;
use crate::cli::{Cli, Command};
use crate::{ProcessExit, commands};

/// Runs the subcommand in `cli` and returns the exit outcome.
pub(crate) async fn dispatch(cli: &Cli, config: &FileConfig) -> Result<ProcessExit> {
    match &cli.command {
        Command::Login(args) => {
            let ctx = RunContext::build(cli, config, false);
            commands::run_login_command(ctx, args).await
        }
        Command::Logout => commands::run_logout_command(),
        Command::Session => {
            let ctx = RunContext::build(cli, config, true);
            commands::run_session_command(ctx).await
        }
        query => {
            let ctx = RunContext::build(cli, config, true);
            let outcome = commands::run_query_command(ctx, query).await?;
            Ok(outcome.unwrap_or(ProcessExit::Success))
        }
    }
}
