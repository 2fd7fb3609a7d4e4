//! Builds client options from CLI flags, the config file and the stored session.

use std::time::Duration;

use earth2_core::api::{ApiEndpoints, ClientOptions};
use earth2_core::auth::{AuthEndpoints, SessionCredential, TransportTimeouts, load_session};
use tracing::{debug, warn};

use crate::app_config::FileConfig;
use crate::cli::Cli;

/// Where the session credential for this run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionSource {
    Flag,
    Stored,
    None,
}

/// Startup state shared by the command handlers.
pub(crate) struct RunContext {
    pub(crate) options: ClientOptions,
    pub(crate) session_source: SessionSource,
    pub(crate) default_email: Option<String>,
}

impl RunContext {
    /// Resolves options; reads the stored session only when `load_stored` is set.
    pub(crate) fn build(cli: &Cli, config: &FileConfig, load_stored: bool) -> Self {
        let mut options = client_options(cli, config);
        let (session, session_source) = resolve_session(cli, load_stored);
        options.session = session;
        Self {
            options,
            session_source,
            default_email: config.email.clone(),
        }
    }
}

fn client_options(cli: &Cli, config: &FileConfig) -> ClientOptions {
    let defaults = ClientOptions::default();

    let endpoints = config
        .api_base
        .as_deref()
        .map_or_else(ApiEndpoints::default, ApiEndpoints::single_host);

    let auth_defaults = AuthEndpoints::default();
    let auth = AuthEndpoints {
        login_url: config.login_url.clone().unwrap_or(auth_defaults.login_url),
        identity_origin: config
            .identity_origin
            .clone()
            .unwrap_or(auth_defaults.identity_origin),
        app_host: config.app_host.clone().unwrap_or(auth_defaults.app_host),
        session_check_url: config
            .session_check_url
            .clone()
            .unwrap_or(auth_defaults.session_check_url),
    };

    let timeouts = TransportTimeouts {
        connect_secs: config
            .connect_timeout_secs
            .unwrap_or(defaults.timeouts.connect_secs),
        request_secs: cli
            .timeout
            .or(config.request_timeout_secs)
            .unwrap_or(defaults.timeouts.request_secs),
    };

    ClientOptions {
        endpoints,
        auth,
        timeouts,
        rate_limit: !cli.no_rate_limit && config.rate_limit.unwrap_or(true),
        cache_ttl: config
            .cache_ttl_secs
            .map_or(defaults.cache_ttl, Duration::from_secs),
        session: None,
    }
}

/// `--cookie` first, then the stored session, then nothing.
fn resolve_session(cli: &Cli, load_stored: bool) -> (Option<SessionCredential>, SessionSource) {
    if let Some(cookie) = cli.cookie.as_deref().map(str::trim)
        && !cookie.is_empty()
    {
        debug!("using session cookie from command line");
        return (
            Some(SessionCredential::new(cookie, cli.csrf.clone())),
            SessionSource::Flag,
        );
    }
    if !load_stored {
        return (None, SessionSource::None);
    }
    match load_session() {
        Ok(Some(stored)) => {
            debug!(age_secs = stored.age_secs(), "using stored session");
            (Some(stored.credential), SessionSource::Stored)
        }
        Ok(None) => (None, SessionSource::None),
        Err(error) => {
            warn!(%error, "stored session unreadable; continuing without it");
            (None, SessionSource::None)
        }
    }
}
