//! Errors for API queries.

use std::time::Duration;

use thiserror::Error;

use crate::auth::AuthError;

/// Longest body excerpt kept in [`ApiError::HttpStatus`].
pub const SNIPPET_CHARS: usize = 200;

/// Errors returned by [`ApiClient`](super::ApiClient) operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connect, TLS or body-read failure.
    #[error("GET {url} failed: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying error description.
        message: String,
    },

    /// The request exceeded the configured timeout.
    #[error("GET {url} timed out\n  Suggestion: raise --timeout or request_timeout_secs")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// The server answered with a non-success status.
    #[error("GET {url} failed: {status} {snippet}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Start of the response body.
        snippet: String,
    },

    /// The body was not valid JSON.
    #[error("GET {url} returned a body that is not JSON: {message}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Parser error description.
        message: String,
    },

    /// Refused locally by the request guard, or HTTP 429 from the server.
    #[error("GET {url} rate limited: {reason}\n  Suggestion: wait before retrying or pass --no-rate-limit")]
    RateLimited {
        /// Requested URL.
        url: String,
        /// Why the request was refused.
        reason: String,
        /// Server-provided delay, when known.
        retry_after: Option<Duration>,
    },

    /// A caller-supplied argument cannot be used.
    #[error("invalid {name}: {reason}")]
    InvalidArgument {
        /// Argument name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Login failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ApiError {
    /// Classifies a reqwest error for `url`.
    #[must_use]
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }

    /// Builds an [`ApiError::HttpStatus`] keeping only the start of `body`.
    #[must_use]
    pub fn http_status(url: &str, status: u16, body: &str) -> Self {
        Self::HttpStatus {
            url: url.to_string(),
            status,
            snippet: body.chars().take(SNIPPET_CHARS).collect(),
        }
    }

    /// Returns true when a fresh login may fix the error.
    #[must_use]
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::HttpStatus { status: 401 | 403, .. })
    }
}
