use crate::app_config::VerbositySetting;

pub(crate) fn no_color_env_requested() -> bool {
    std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty())
}

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

/// Picks the default tracing filter.
///
/// Priority: `-q`, then `-v` count, then the config file, then `info`.
/// Returns `true` as the second value when a CLI flag chose the level, in
/// which case it also overrides `RUST_LOG`.
pub(crate) fn resolve_log_level(
    verbose: u8,
    quiet: bool,
    configured: Option<VerbositySetting>,
) -> (&'static str, bool) {
    if quiet {
        return ("error", true);
    }
    match verbose {
        0 => (
            configured.map_or("info", VerbositySetting::default_level),
            false,
        ),
        1 => ("debug", true),
        _ => ("trace", true),
    }
}

pub(crate) fn init_tracing(default_level: &str, force_cli_level: bool, no_color: bool) {
    let filter = if force_cli_level {
        tracing_subscriber::EnvFilter::new(default_level)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
    };
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_env_filter(filter)
        .try_init();
}
