//! Error types for the login flow.
//!
//! Every failure names the [`LoginStage`] it happened in so a failed login can
//! be diagnosed from the log line alone, without replaying it against the
//! live identity provider.

use std::fmt;

use thiserror::Error;

/// The step of the login handshake an error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    /// Initial GET of the platform login page.
    LoginPage,
    /// Redirects leading to the identity provider's email page.
    EmailRedirects,
    /// POST of the email form.
    EmailSubmit,
    /// Redirects leading to the password page.
    PasswordRedirects,
    /// POST of the password form.
    PasswordSubmit,
    /// Redirects leading back to the application domain.
    AppRedirects,
}

impl LoginStage {
    /// Returns the stable label used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginPage => "login-page",
            Self::EmailRedirects => "email-redirects",
            Self::EmailSubmit => "email-submit",
            Self::PasswordRedirects => "password-redirects",
            Self::PasswordSubmit => "password-submit",
            Self::AppRedirects => "app-redirects",
        }
    }
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level failure (DNS, connect, TLS, timeout, body read).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Target URL.
        url: String,
    },

    /// Any other network failure.
    #[error("request to {url} failed: {message}")]
    Network {
        /// Target URL.
        url: String,
        /// Underlying error description.
        message: String,
    },
}

impl TransportError {
    /// Classifies a reqwest error into a transport error for `url`.
    #[must_use]
    pub fn from_reqwest(url: impl Into<String>, error: &reqwest::Error) -> Self {
        let url = url.into();
        if error.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network {
                url,
                message: error.to_string(),
            }
        }
    }
}

/// Errors returned by [`Authenticator::authenticate`](super::Authenticator::authenticate).
#[derive(Debug, Error)]
pub enum AuthError {
    /// Email or password was empty.
    #[error("email and password are required\n  Suggestion: pass --email/--password or set E2_EMAIL/E2_PASSWORD")]
    MissingCredentials,

    /// A configured endpoint is not a usable absolute URL.
    #[error("invalid login endpoint: {value}")]
    InvalidEndpoint {
        /// The rejected value.
        value: String,
    },

    /// The network transport failed.
    #[error("[{stage}] transport error: {source}")]
    Transport {
        /// Stage in which the request was sent.
        stage: LoginStage,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// The email-entry page contained no form.
    #[error("no login form found at {url}")]
    NoLoginForm {
        /// URL of the page that was scraped.
        url: String,
    },

    /// The password-entry page contained no form.
    #[error("no password form found at {url}\n  Suggestion: check that the email address is registered")]
    NoPasswordForm {
        /// URL of the page that was scraped.
        url: String,
    },

    /// A bounded redirect phase ran out of hops.
    #[error("[{stage}] redirect limit exceeded after {hops} hops")]
    RedirectLoopExceeded {
        /// Phase that was exhausted.
        stage: LoginStage,
        /// Number of hops followed before giving up.
        hops: usize,
    },

    /// A response was neither 2xx nor 3xx.
    #[error("[{stage}] unexpected HTTP {status} from {url}")]
    UnexpectedStatus {
        /// Stage in which the response was received.
        stage: LoginStage,
        /// URL that produced the status.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The flow stopped on a non-redirect response before reaching the application.
    #[error("[{stage}] expected a redirect back to the application, got HTTP {status}\n  Suggestion: check the password")]
    NoRedirect {
        /// Stage that ended without a redirect.
        stage: LoginStage,
        /// Status of the terminal response.
        status: u16,
    },
}

impl AuthError {
    /// Wraps a transport failure with the stage it occurred in.
    #[must_use]
    pub fn transport(stage: LoginStage, source: TransportError) -> Self {
        Self::Transport { stage, source }
    }

    /// Returns the stage the error was raised from, when it has one.
    #[must_use]
    pub fn stage(&self) -> Option<LoginStage> {
        match self {
            Self::Transport { stage, .. }
            | Self::RedirectLoopExceeded { stage, .. }
            | Self::UnexpectedStatus { stage, .. }
            | Self::NoRedirect { stage, .. } => Some(*stage),
            Self::NoLoginForm { .. } => Some(LoginStage::EmailRedirects),
            Self::NoPasswordForm { .. } => Some(LoginStage::PasswordRedirects),
            Self::MissingCredentials | Self::InvalidEndpoint { .. } => None,
        }
    }
}
