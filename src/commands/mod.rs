//! Subcommand handlers.

mod auth;
mod query;

use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;

pub(crate) use auth::{run_login_command, run_logout_command, run_session_command};
pub(crate) use query::run_query_command;

/// Writes `value` to stdout as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{rendered}").context("Failed to write to stdout")?;
    Ok(())
}
