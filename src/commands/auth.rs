//! Handlers for `e2 login`, `e2 logout` and `e2 session`.

use anyhow::{Result, anyhow};
use earth2_core::ApiClient;
use earth2_core::auth::{clear_session, session_path, store_session};
use tracing::{info, warn};

use crate::ProcessExit;
use crate::app::context::{RunContext, SessionSource};
use crate::cli::LoginArgs;

use super::print_json;

/// Logs in and, unless `--no-save` is given, persists the session.
pub(crate) async fn run_login_command(ctx: RunContext, args: &LoginArgs) -> Result<ProcessExit> {
    let email = args
        .email
        .clone()
        .or(ctx.default_email)
        .unwrap_or_default();
    let password = args.password.clone().unwrap_or_default();

    let client = ApiClient::new(ctx.options)?;
    let credential = client
        .login(&email, &password)
        .await
        .map_err(|error| anyhow!("Login failed: {error}"))?;
    info!(cookies = credential.cookie_count(), "Logged in");

    if args.no_save {
        info!("Session not saved (--no-save)");
        return Ok(ProcessExit::Success);
    }

    let path =
        store_session(&credential).map_err(|error| anyhow!("Failed to save session: {error}"))?;
    info!(path = %path.display(), "Session saved");
    Ok(ProcessExit::Success)
}

/// Deletes the stored session.
pub(crate) fn run_logout_command() -> Result<ProcessExit> {
    let removed = clear_session().map_err(|error| anyhow!("Failed to clear session: {error}"))?;
    if removed {
        info!("Stored session removed");
    } else {
        match session_path() {
            Ok(path) => info!(path = %path.display(), "No stored session found"),
            Err(_) => info!("No stored session found"),
        }
    }
    Ok(ProcessExit::Success)
}

/// Checks the current session and prints the verdict as JSON.
///
/// Exits with failure when the session is missing or rejected.
pub(crate) async fn run_session_command(ctx: RunContext) -> Result<ProcessExit> {
    let source = ctx.session_source;
    let client = ApiClient::new(ctx.options)?;
    let validity = client.check_session().await;
    print_json(&validity)?;

    if validity.valid {
        return Ok(ProcessExit::Success);
    }
    match source {
        SessionSource::None => warn!("No session available; run `e2 login` first"),
        SessionSource::Flag | SessionSource::Stored => {
            warn!("Session rejected; run `e2 login` to refresh it");
        }
    }
    Ok(ProcessExit::Failure)
}
