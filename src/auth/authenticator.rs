//! Browser-emulating login against the platform's OAuth identity provider.
//!
//! The handshake is a fixed sequence: fetch the login page, follow redirects
//! to the email page, submit the email form, follow redirects to the password
//! page, submit the password form, then follow redirects back to the
//! application host. Every phase is bounded and every `Set-Cookie` seen along
//! the way ends up in the returned [`SessionCredential`].

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::error::{AuthError, LoginStage};
use super::form::extract_form;
use super::location::{IdentityOrigin, host_of, normalize_location, path_of};
use super::redirect::{HopCheck, LandingKind, LoginAttempt, RedirectPhase, follow_redirects};
use super::session::{SessionCredential, SessionValidity};
use super::transport::{HttpRequest, ReqwestTransport, Transport, TransportTimeouts};

/// Platform login page that starts the OAuth handshake.
pub const DEFAULT_LOGIN_URL: &str = "https://app.earth2.io/login";

/// Identity provider origin used to resolve relative redirects and actions.
pub const DEFAULT_IDENTITY_ORIGIN: &str = "https://auth.earth2.io";

/// Host that marks the end of a successful login.
pub const DEFAULT_APP_HOST: &str = "app.earth2.io";

/// Cheap authenticated endpoint requested by [`Authenticator::check_session_validity`].
pub const DEFAULT_SESSION_CHECK_URL: &str = "https://r.earth2.io/api/v2/my/favorites";

/// Path fragments that mark the password-entry page.
const PASSWORD_PAGE_MARKERS: &[&str] = &["/password", "/login", "/register"];

/// URLs and hosts the handshake talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    /// Platform login page.
    pub login_url: String,
    /// Identity provider origin (`scheme://host[:port]`).
    pub identity_origin: String,
    /// Application host that ends the flow.
    pub app_host: String,
    /// Session validity check URL.
    pub session_check_url: String,
}

impl Default for AuthEndpoints {
    fn default() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            identity_origin: DEFAULT_IDENTITY_ORIGIN.to_string(),
            app_host: DEFAULT_APP_HOST.to_string(),
            session_check_url: DEFAULT_SESSION_CHECK_URL.to_string(),
        }
    }
}

/// Hop bounds for the three redirect phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectBounds {
    /// Login page to email page.
    pub email: usize,
    /// Email submit to password page.
    pub password: usize,
    /// Password submit to application host.
    pub application: usize,
}

impl Default for RedirectBounds {
    fn default() -> Self {
        Self {
            email: 10,
            password: 10,
            application: 20,
        }
    }
}

/// Drives the login handshake and checks session validity.
///
/// `authenticate` is strictly sequential and never touches shared state;
/// callers that store the result must serialize concurrent logins themselves.
pub struct Authenticator {
    transport: Arc<dyn Transport>,
    endpoints: AuthEndpoints,
    origin: IdentityOrigin,
    bounds: RedirectBounds,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("endpoints", &self.endpoints)
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates an authenticator with the production reqwest transport.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidEndpoint`] when the identity origin does
    /// not parse, or [`AuthError::Transport`] when the HTTP client cannot be
    /// built.
    pub fn new(endpoints: AuthEndpoints, timeouts: TransportTimeouts) -> Result<Self, AuthError> {
        let transport = ReqwestTransport::with_timeouts(timeouts)
            .map_err(|source| AuthError::transport(LoginStage::LoginPage, source))?;
        Self::with_transport(Arc::new(transport), endpoints)
    }

    /// Creates an authenticator over any transport.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidEndpoint`] when the identity origin does not parse.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        endpoints: AuthEndpoints,
    ) -> Result<Self, AuthError> {
        let origin = IdentityOrigin::parse(&endpoints.identity_origin).ok_or_else(|| {
            AuthError::InvalidEndpoint {
                value: endpoints.identity_origin.clone(),
            }
        })?;
        Ok(Self {
            transport,
            endpoints,
            origin,
            bounds: RedirectBounds::default(),
        })
    }

    /// Overrides the redirect hop bounds.
    #[must_use]
    pub fn with_bounds(mut self, bounds: RedirectBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Endpoints in use.
    #[must_use]
    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// Runs the full login handshake.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] naming the stage at which the flow could not proceed.
    #[instrument(skip(self, email, password), fields(email = %redact_email(email)))]
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionCredential, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let mut attempt = LoginAttempt::new(self.transport.as_ref(), &self.origin);
        let login_url = self.endpoints.login_url.clone();

        let response = attempt
            .send(LoginStage::LoginPage, HttpRequest::get(&login_url))
            .await?;

        let identity_host = self.origin.host();
        let to_email_page = |location: &str| {
            if location.contains(identity_host) && location.contains("/email") {
                HopCheck::StopAfterFetch
            } else {
                HopCheck::Continue
            }
        };
        let email_page = follow_redirects(
            &mut attempt,
            response,
            login_url,
            &RedirectPhase {
                stage: LoginStage::EmailRedirects,
                max_hops: self.bounds.email,
                check: &to_email_page,
            },
        )
        .await?;
        debug!(hops = email_page.hops, url = %email_page.url, "reached email page");

        let email_form = extract_form(&email_page.response.body).ok_or_else(|| {
            AuthError::NoLoginForm {
                url: email_page.url.clone(),
            }
        })?;
        let email_action = normalize_location(&email_form.action, &self.origin);
        debug!(
            action = %email_action,
            hidden_fields = email_form.hidden_fields.len(),
            "submitting email form"
        );
        let response = attempt
            .send(
                LoginStage::EmailSubmit,
                HttpRequest::post_form(&email_action, email_form.form_body("email", email)),
            )
            .await?;

        let to_password_page = |location: &str| {
            let path = path_of(location);
            if PASSWORD_PAGE_MARKERS
                .iter()
                .any(|marker| path.contains(marker))
            {
                HopCheck::StopAfterFetch
            } else {
                HopCheck::Continue
            }
        };
        let mut password_page = follow_redirects(
            &mut attempt,
            response,
            email_action,
            &RedirectPhase {
                stage: LoginStage::PasswordRedirects,
                max_hops: self.bounds.password,
                check: &to_password_page,
            },
        )
        .await?;

        if password_page.response.is_redirect() {
            debug!("password page answered with a redirect; following one more hop");
            let one_more = |_: &str| HopCheck::StopAfterFetch;
            password_page = follow_redirects(
                &mut attempt,
                password_page.response,
                password_page.url,
                &RedirectPhase {
                    stage: LoginStage::PasswordRedirects,
                    max_hops: 1,
                    check: &one_more,
                },
            )
            .await?;
        }
        debug!(url = %password_page.url, "reached password page");

        let password_form = extract_form(&password_page.response.body).ok_or_else(|| {
            AuthError::NoPasswordForm {
                url: password_page.url.clone(),
            }
        })?;
        let password_action = normalize_location(&password_form.action, &self.origin);
        let response = attempt
            .send(
                LoginStage::PasswordSubmit,
                HttpRequest::post_form(
                    &password_action,
                    password_form.form_body("password", password),
                ),
            )
            .await?;

        let app_host = self.endpoints.app_host.to_ascii_lowercase();
        let to_application = |location: &str| {
            if host_of(location).is_some_and(|host| host == app_host) {
                HopCheck::StopBeforeFetch
            } else {
                HopCheck::Continue
            }
        };
        let landing = follow_redirects(
            &mut attempt,
            response,
            password_action,
            &RedirectPhase {
                stage: LoginStage::AppRedirects,
                max_hops: self.bounds.application,
                check: &to_application,
            },
        )
        .await?;

        if landing.kind == LandingKind::Terminal {
            let stage = if landing.hops == 0 {
                LoginStage::PasswordSubmit
            } else {
                LoginStage::AppRedirects
            };
            warn!(stage = %stage, status = landing.response.status, "login did not return to the application");
            return Err(AuthError::NoRedirect {
                stage,
                status: landing.response.status,
            });
        }

        let captured = attempt.captured();
        let credential = attempt.into_credential();
        info!(
            set_cookies = captured,
            cookies = credential.cookie_count(),
            csrf = credential.csrf_token().is_some(),
            "login succeeded"
        );
        Ok(credential)
    }

    /// Checks `credential` against a cheap authenticated endpoint.
    ///
    /// HTTP 200 means valid. Any other status or a transport failure means the
    /// caller should re-authenticate. Never fails.
    #[instrument(skip(self, credential))]
    pub async fn check_session_validity(&self, credential: &SessionCredential) -> SessionValidity {
        let mut request = HttpRequest::get(&self.endpoints.session_check_url)
            .header("Accept", "application/json, text/plain, */*");
        for (name, value) in credential.headers() {
            request = request.header(name, value);
        }

        match self.transport.send(request).await {
            Ok(response) => {
                let validity = SessionValidity::from_status(response.status);
                debug!(status = response.status, valid = validity.valid, "session check");
                validity
            }
            Err(error) => {
                warn!(error = %error, "session check failed");
                SessionValidity::unreachable()
            }
        }
    }
}

/// Masks an email address for logs: `alice@example.com` becomes `a***@example.com`.
fn redact_email(email: &str) -> String {
    match email.trim().split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}
