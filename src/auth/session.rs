//! Session credential and the single-slot store that holds it.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Cookie names whose value doubles as the anti-forgery token.
const ANTI_FORGERY_COOKIES: &[&str] = &["XSRF-TOKEN", "csrftoken"];

/// Cookie string plus optional anti-forgery token authorizing API calls.
///
/// Both values are sensitive; `Debug` output redacts them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    cookie: String,
    csrf_token: Option<String>,
}

impl SessionCredential {
    /// Creates a credential from a ready `Cookie` header value.
    #[must_use]
    pub fn new(cookie: impl Into<String>, csrf_token: Option<String>) -> Self {
        Self {
            cookie: cookie.into(),
            csrf_token: csrf_token.filter(|token| !token.is_empty()),
        }
    }

    /// Builds a credential from captured `Set-Cookie` header values.
    ///
    /// Each value keeps only its `name=value` part; attributes such as `Path=`
    /// or `HttpOnly` are dropped. Fragments are joined in capture order.
    #[must_use]
    pub fn from_set_cookies<I, S>(set_cookies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fragments: Vec<String> = set_cookies
            .into_iter()
            .map(|header| cookie_fragment(header.as_ref()).to_string())
            .filter(|fragment| !fragment.is_empty())
            .collect();
        let csrf_token = anti_forgery_token(&fragments);
        Self::new(fragments.join("; "), csrf_token)
    }

    /// The `Cookie` header value.
    ///
    /// Sensitive; avoid logging the return value.
    #[must_use]
    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    /// The anti-forgery token, if one is known.
    #[must_use]
    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    /// Returns true when there is no cookie to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookie.trim().is_empty()
    }

    /// Number of `name=value` pairs in the cookie string.
    #[must_use]
    pub fn cookie_count(&self) -> usize {
        self.cookie
            .split("; ")
            .filter(|pair| !pair.trim().is_empty())
            .count()
    }

    /// Header pairs to attach to an authenticated request.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(4);
        if !self.is_empty() {
            headers.push(("Cookie", self.cookie.clone()));
        }
        if let Some(token) = &self.csrf_token {
            headers.push(("X-CSRF-TOKEN", token.clone()));
            headers.push(("X-XSRF-TOKEN", token.clone()));
            headers.push(("X-CsrfToken", token.clone()));
        }
        headers
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("cookies", &self.cookie_count())
            .field("cookie", &"[REDACTED]")
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Result of probing a credential against the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionValidity {
    /// The check returned HTTP 200.
    pub valid: bool,
    /// The caller should log in again.
    pub needs_reauth: bool,
    /// Status of the check response; absent on transport failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl SessionValidity {
    /// Classifies a check status: 200 is valid, anything else needs re-auth.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        let valid = status == 200;
        Self {
            valid,
            needs_reauth: !valid,
            status_code: Some(status),
        }
    }

    /// The check could not be completed.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            valid: false,
            needs_reauth: true,
            status_code: None,
        }
    }

    /// No credential to check.
    #[must_use]
    pub fn missing() -> Self {
        Self::unreachable()
    }
}

/// Single mutable slot holding the current session credential.
///
/// Writers replace the whole credential in one assignment; readers get a
/// shared snapshot that later replacements do not affect.
#[derive(Debug, Default)]
pub struct SessionStore {
    slot: RwLock<Option<Arc<SessionCredential>>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `credential`.
    #[must_use]
    pub fn with_credential(credential: SessionCredential) -> Self {
        Self {
            slot: RwLock::new(Some(Arc::new(credential))),
        }
    }

    /// Returns the current credential snapshot.
    #[must_use]
    pub fn current(&self) -> Option<Arc<SessionCredential>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the stored credential, returning the previous one.
    pub fn replace(&self, credential: SessionCredential) -> Option<Arc<SessionCredential>> {
        let mut guard = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        guard.replace(Arc::new(credential))
    }

    /// Empties the store, returning the previous credential.
    pub fn clear(&self) -> Option<Arc<SessionCredential>> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Headers for the current credential (empty when none is stored).
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        self.current()
            .map(|credential| credential.headers())
            .unwrap_or_default()
    }
}

/// Returns the `name=value` part of a `Set-Cookie` header value.
#[must_use]
pub fn cookie_fragment(set_cookie: &str) -> &str {
    set_cookie.split("; ").next().unwrap_or_default().trim()
}

fn anti_forgery_token(fragments: &[String]) -> Option<String> {
    fragments.iter().rev().find_map(|fragment| {
        let (name, value) = fragment.split_once('=')?;
        if !ANTI_FORGERY_COOKIES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(name.trim()))
        {
            return None;
        }
        let decoded = urlencoding::decode(value)
            .map(|value| value.into_owned())
            .unwrap_or_else(|_| value.to_string());
        Some(decoded).filter(|token| !token.is_empty())
    })
}
