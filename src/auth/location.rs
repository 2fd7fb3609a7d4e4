//! Redirect location and form action normalization.
//!
//! The identity provider emits relative redirect targets and a malformed
//! `psid:` query separator; both must be repaired before a URL is requested.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::form::compile_static_regex;

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^[A-Za-z][A-Za-z0-9+.\-]*://"));

/// The identity provider's origin, split into the parts normalization needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityOrigin {
    scheme: String,
    authority: String,
    host: String,
}

impl IdentityOrigin {
    /// Parses an origin such as `https://auth.earth2.io`.
    ///
    /// Returns `None` when the value is not an absolute URL with a host.
    #[must_use]
    pub fn parse(origin: &str) -> Option<Self> {
        let url = Url::parse(origin).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        Some(Self {
            scheme: url.scheme().to_string(),
            authority,
            host,
        })
    }

    /// `scheme://host[:port]` without a trailing slash.
    #[must_use]
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.authority)
    }

    /// Lowercased host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }
}

/// Normalizes a redirect `Location` or form `action` against the identity provider.
///
/// - `/path` becomes `{origin}/path`
/// - a scheme-less value becomes `{scheme}://{authority}/{value}`
/// - the literal `psid:` is replaced with `psid=`
///
/// Already-absolute URLs only receive the `psid` repair, so the function is
/// idempotent.
#[must_use]
pub fn normalize_location(value: &str, origin: &IdentityOrigin) -> String {
    let value = value.trim();
    let absolute = if value.starts_with('/') {
        format!("{}{value}", origin.origin())
    } else if SCHEME_RE.is_match(value) {
        value.to_string()
    } else {
        format!("{}://{}/{value}", origin.scheme, origin.authority)
    };
    absolute.replace("psid:", "psid=")
}

/// Returns the path component of `url`, or the whole value when it does not parse.
#[must_use]
pub(crate) fn path_of(url: &str) -> String {
    Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Returns the lowercased host of `url`, if it has one.
#[must_use]
pub(crate) fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
}
