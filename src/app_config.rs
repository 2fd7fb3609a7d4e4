//! Config file loading for CLI defaults.
//!
//! The file lives next to the stored session at
//! `$XDG_CONFIG_HOME/earth2/config.toml` and holds flat `key = value` lines.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use earth2_core::auth::config_dir;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Values read from the config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Default login email.
    pub email: Option<String>,
    /// Base URL used for every API host.
    pub api_base: Option<String>,
    /// Login page URL.
    pub login_url: Option<String>,
    /// Identity provider origin, e.g. `https://auth.earth2.io`.
    pub identity_origin: Option<String>,
    /// Host that marks the end of the login redirect chain.
    pub app_host: Option<String>,
    /// URL requested by `e2 session`.
    pub session_check_url: Option<String>,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Enforce client-side rate limits.
    pub rate_limit: Option<bool>,
    /// Lifetime of cached responses in seconds.
    pub cache_ttl_secs: Option<u64>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates value ranges.
    pub fn validate(&self) -> Result<()> {
        validate_timeout_secs("request_timeout_secs", self.request_timeout_secs)?;
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        if let Some(ttl) = self.cache_ttl_secs
            && ttl > 86_400
        {
            bail!("Invalid config value for `cache_ttl_secs`: {ttl}. Expected range: 0..=86400");
        }
        for (field, value) in [
            ("api_base", &self.api_base),
            ("login_url", &self.login_url),
            ("identity_origin", &self.identity_origin),
            ("session_check_url", &self.session_check_url),
        ] {
            if let Some(value) = value
                && url::Url::parse(value).is_err()
            {
                bail!("Invalid config value for `{field}`: '{value}' is not an absolute URL");
            }
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Tracing filter used when no CLI flag overrides it.
    #[must_use]
    pub fn default_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose | Self::Debug => "debug",
            Self::Quiet => "error",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed config; default when no file exists.
    pub config: FileConfig,
    /// Whether a file was read.
    pub loaded_from_file: bool,
}

/// Resolves the default config path, if a base directory is known.
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    config_dir().ok().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Loads the config file from the default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load_file_config(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            ..LoadedConfig::default()
        }),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_number = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_number}");

        match key {
            "email" => cfg.email = Some(parse_string_literal(value).with_context(context)?),
            "api_base" => cfg.api_base = Some(parse_string_literal(value).with_context(context)?),
            "login_url" => {
                cfg.login_url = Some(parse_string_literal(value).with_context(context)?);
            }
            "identity_origin" => {
                cfg.identity_origin = Some(parse_string_literal(value).with_context(context)?);
            }
            "app_host" => cfg.app_host = Some(parse_string_literal(value).with_context(context)?),
            "session_check_url" => {
                cfg.session_check_url = Some(parse_string_literal(value).with_context(context)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "rate_limit" => cfg.rate_limit = Some(parse_boolean(value).with_context(context)?),
            "cache_ttl_secs" => {
                cfg.cache_ttl_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_number}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_number}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    let Some(inner) = raw_value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        bail!("Expected double-quoted string");
    };
    Ok(inner.to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    if token.starts_with('-') {
        bail!("Expected non-negative integer");
    }
    Ok(token.parse::<u64>()?)
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
