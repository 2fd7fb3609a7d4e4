//! Bounded redirect following shared by every phase of the login flow.
//!
//! [`LoginAttempt`] carries the cookies captured during one login run and
//! sends each request with them attached. [`follow_redirects`] walks a
//! redirect chain under a hop bound and a per-phase stop rule.

use tracing::{debug, trace};

use super::error::{AuthError, LoginStage};
use super::location::{IdentityOrigin, host_of, normalize_location};
use super::session::{SessionCredential, cookie_fragment};
use super::transport::{HttpRequest, HttpResponse, Transport};

/// What to do with the next redirect target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HopCheck {
    /// Fetch it and keep following.
    Continue,
    /// Fetch it, then end the phase on that response.
    StopAfterFetch,
    /// End the phase without fetching it.
    StopBeforeFetch,
}

/// One redirect-following phase: a hop bound and a stop rule over normalized locations.
pub(crate) struct RedirectPhase<'p> {
    pub(crate) stage: LoginStage,
    pub(crate) max_hops: usize,
    pub(crate) check: &'p (dyn Fn(&str) -> HopCheck + Sync),
}

/// How a phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LandingKind {
    /// The stop rule matched.
    Target,
    /// A response without a usable redirect ended the chain.
    Terminal,
}

/// The response a phase ended on.
#[derive(Debug)]
pub(crate) struct Landing {
    pub(crate) response: HttpResponse,
    /// URL `response` was fetched from.
    pub(crate) url: String,
    /// Number of redirect targets fetched during the phase.
    pub(crate) hops: usize,
    pub(crate) kind: LandingKind,
}

/// A `Set-Cookie` value with the host that sent it.
struct CapturedCookie {
    /// Lowercased host of the response; `None` when the URL had no host.
    host: Option<String>,
    /// `Domain` attribute, kept only when it covers `host`.
    domain: Option<String>,
    set_cookie: String,
}

impl CapturedCookie {
    fn new(origin_url: &str, set_cookie: &str) -> Self {
        let host = host_of(origin_url);
        let domain = cookie_domain(set_cookie)
            .filter(|domain| host.as_deref().is_some_and(|host| domain_matches(host, domain)));
        Self {
            host,
            domain,
            set_cookie: set_cookie.to_string(),
        }
    }

    fn applies_to(&self, request_host: Option<&str>) -> bool {
        let Some(request_host) = request_host else {
            return false;
        };
        match &self.domain {
            Some(domain) => domain_matches(request_host, domain),
            None => self.host.as_deref() == Some(request_host),
        }
    }
}

/// Lowercased `Domain` attribute without its leading dot.
fn cookie_domain(set_cookie: &str) -> Option<String> {
    set_cookie.split(';').skip(1).find_map(|attribute| {
        let (name, value) = attribute.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("domain") {
            return None;
        }
        let domain = value.trim().trim_start_matches('.').to_ascii_lowercase();
        (!domain.is_empty()).then_some(domain)
    })
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// State of one `authenticate` run; dropped when the run ends.
///
/// Captured cookies are only sent back to the host that set them, or to
/// hosts under their `Domain` attribute.
pub(crate) struct LoginAttempt<'a> {
    transport: &'a dyn Transport,
    origin: &'a IdentityOrigin,
    cookies: Vec<CapturedCookie>,
}

impl<'a> LoginAttempt<'a> {
    pub(crate) fn new(transport: &'a dyn Transport, origin: &'a IdentityOrigin) -> Self {
        Self {
            transport,
            origin,
            cookies: Vec::new(),
        }
    }

    pub(crate) fn origin(&self) -> &IdentityOrigin {
        self.origin
    }

    /// Sends `request` with the cookies captured so far and records new ones.
    ///
    /// Any status outside 2xx/3xx fails the attempt.
    pub(crate) async fn send(
        &mut self,
        stage: LoginStage,
        mut request: HttpRequest,
    ) -> Result<HttpResponse, AuthError> {
        if let Some(cookie) = self.cookie_header_for(&request.url) {
            request = request.header("Cookie", cookie);
        }
        let url = request.url.clone();
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|source| AuthError::transport(stage, source))?;

        trace!(
            stage = %stage,
            status = response.status,
            new_cookies = response.set_cookies.len(),
            "login response"
        );
        self.cookies.extend(
            response
                .set_cookies
                .iter()
                .map(|set_cookie| CapturedCookie::new(&url, set_cookie)),
        );

        if !response.is_success_or_redirect() {
            return Err(AuthError::UnexpectedStatus {
                stage,
                url,
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Number of `Set-Cookie` headers captured so far.
    pub(crate) fn captured(&self) -> usize {
        self.cookies.len()
    }

    /// Consumes the attempt and builds the session credential from every
    /// captured cookie, whatever host set it.
    pub(crate) fn into_credential(self) -> SessionCredential {
        let set_cookies: Vec<String> = self
            .cookies
            .into_iter()
            .map(|cookie| cookie.set_cookie)
            .collect();
        SessionCredential::from_set_cookies(&set_cookies)
    }

    fn cookie_header_for(&self, url: &str) -> Option<String> {
        let host = host_of(url);
        let fragments: Vec<&str> = self
            .cookies
            .iter()
            .filter(|cookie| cookie.applies_to(host.as_deref()))
            .map(|cookie| cookie_fragment(&cookie.set_cookie))
            .filter(|fragment| !fragment.is_empty())
            .collect();
        if fragments.is_empty() {
            None
        } else {
            Some(fragments.join("; "))
        }
    }
}

/// Follows redirects from `response` until the stop rule matches or the chain ends.
///
/// `url` is where `response` came from.
///
/// # Errors
///
/// Returns [`AuthError::RedirectLoopExceeded`] when `max_hops` targets were
/// fetched and the response is still a redirect, or any error from
/// [`LoginAttempt::send`].
pub(crate) async fn follow_redirects(
    attempt: &mut LoginAttempt<'_>,
    mut response: HttpResponse,
    mut url: String,
    phase: &RedirectPhase<'_>,
) -> Result<Landing, AuthError> {
    let mut hops = 0;

    while response.is_redirect() {
        let Some(raw_location) = response.location.clone() else {
            debug!(stage = %phase.stage, status = response.status, "redirect without Location header");
            break;
        };
        if hops >= phase.max_hops {
            return Err(AuthError::RedirectLoopExceeded {
                stage: phase.stage,
                hops,
            });
        }

        let next = normalize_location(&raw_location, attempt.origin());
        let check = (phase.check)(&next);
        debug!(stage = %phase.stage, hop = hops + 1, location = %next, ?check, "redirect");

        if check == HopCheck::StopBeforeFetch {
            return Ok(Landing {
                response,
                url,
                hops,
                kind: LandingKind::Target,
            });
        }

        response = attempt.send(phase.stage, HttpRequest::get(&next)).await?;
        url = next;
        hops += 1;

        if check == HopCheck::StopAfterFetch {
            return Ok(Landing {
                response,
                url,
                hops,
                kind: LandingKind::Target,
            });
        }
    }

    Ok(Landing {
        response,
        url,
        hops,
        kind: LandingKind::Terminal,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::auth::error::TransportError;

    /// Transport replaying canned responses and recording requests.
    pub(crate) struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let url = request.url.clone();
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Network {
                    url,
                    message: "script exhausted".to_string(),
                }))
        }
    }

    pub(crate) fn redirect(location: &str, cookie: Option<&str>) -> HttpResponse {
        HttpResponse {
            status: 302,
            location: Some(location.to_string()),
            set_cookies: cookie.map(|c| vec![c.to_string()]).unwrap_or_default(),
            body: String::new(),
        }
    }

    pub(crate) fn page(body: &str, cookie: Option<&str>) -> HttpResponse {
        HttpResponse {
            status: 200,
            location: None,
            set_cookies: cookie.map(|c| vec![c.to_string()]).unwrap_or_default(),
            body: body.to_string(),
        }
    }

    fn origin() -> IdentityOrigin {
        IdentityOrigin::parse("https://auth.earth2.io").unwrap()
    }

    fn never_stop(_: &str) -> HopCheck {
        HopCheck::Continue
    }

    #[tokio::test]
    async fn test_n_hop_chain_terminates_after_exactly_n() {
        for n in 0..10 {
            let mut script = Vec::new();
            for hop in 1..n {
                script.push(Ok(redirect(&format!("/hop{hop}"), None)));
            }
            if n > 0 {
                script.push(Ok(page("done", None)));
            }
            let transport = ScriptedTransport::new(script);
            let origin = origin();
            let mut attempt = LoginAttempt::new(&transport, &origin);
            let start = if n == 0 {
                page("start", None)
            } else {
                redirect("/hop0", None)
            };

            let phase = RedirectPhase {
                stage: LoginStage::EmailRedirects,
                max_hops: 10,
                check: &never_stop,
            };
            let landing = follow_redirects(&mut attempt, start, "https://app/login".into(), &phase)
                .await
                .unwrap();

            assert_eq!(landing.hops, n, "chain of {n} hops");
            assert_eq!(transport.request_count(), n);
            assert_eq!(landing.kind, LandingKind::Terminal);
        }
    }

    #[tokio::test]
    async fn test_endless_chain_hits_bound() {
        let script = (0..50)
            .map(|i| Ok(redirect(&format!("/loop{i}"), None)))
            .collect();
        let transport = ScriptedTransport::new(script);
        let origin = origin();
        let mut attempt = LoginAttempt::new(&transport, &origin);
        let phase = RedirectPhase {
            stage: LoginStage::PasswordRedirects,
            max_hops: 10,
            check: &never_stop,
        };

        let err = follow_redirects(&mut attempt, redirect("/start", None), "u".into(), &phase)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AuthError::RedirectLoopExceeded {
                stage: LoginStage::PasswordRedirects,
                hops: 10
            }
        ));
        assert_eq!(transport.request_count(), 10);
    }

    #[tokio::test]
    async fn test_chain_of_exactly_bound_with_terminal_succeeds() {
        let mut script: Vec<_> = (1..10).map(|i| Ok(redirect(&format!("/h{i}"), None))).collect();
        script.push(Ok(page("end", None)));
        let transport = ScriptedTransport::new(script);
        let origin = origin();
        let mut attempt = LoginAttempt::new(&transport, &origin);
        let phase = RedirectPhase {
            stage: LoginStage::EmailRedirects,
            max_hops: 10,
            check: &never_stop,
        };

        let landing = follow_redirects(&mut attempt, redirect("/h0", None), "u".into(), &phase)
            .await
            .unwrap();
        assert_eq!(landing.hops, 10);
        assert_eq!(landing.response.body, "end");
    }

    #[tokio::test]
    async fn test_stop_after_fetch_returns_fetched_page() {
        let transport = ScriptedTransport::new(vec![
            Ok(redirect("/email", None)),
            Ok(page("email page", None)),
        ]);
        let origin = origin();
        let mut attempt = LoginAttempt::new(&transport, &origin);
        let check = |location: &str| {
            if location.contains("/email") {
                HopCheck::StopAfterFetch
            } else {
                HopCheck::Continue
            }
        };
        let phase = RedirectPhase {
            stage: LoginStage::EmailRedirects,
            max_hops: 10,
            check: &check,
        };

        let landing = follow_redirects(&mut attempt, redirect("/authorize", None), "u".into(), &phase)
            .await
            .unwrap();
        assert_eq!(landing.kind, LandingKind::Target);
        assert_eq!(landing.url, "https://auth.earth2.io/email");
        assert_eq!(landing.hops, 2);
        // The phase ends on the page fetched from /email, not on a redirect.
        assert_eq!(landing.response.body, "email page");
        assert!(!landing.response.is_redirect());
    }

    #[tokio::test]
    async fn test_stop_before_fetch_sends_nothing() {
        let transport = ScriptedTransport::new(vec![]);
        let origin = origin();
        let mut attempt = LoginAttempt::new(&transport, &origin);
        let check = |_: &str| HopCheck::StopBeforeFetch;
        let phase = RedirectPhase {
            stage: LoginStage::AppRedirects,
            max_hops: 20,
            check: &check,
        };

        let landing = follow_redirects(
            &mut attempt,
            redirect("https://app.earth2.io/", None),
            "u".into(),
            &phase,
        )
        .await
        .unwrap();
        assert_eq!(landing.kind, LandingKind::Target);
        assert_eq!(landing.hops, 0);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_captured_cookies_are_forwarded() {
        let transport = ScriptedTransport::new(vec![
            Ok(redirect("/b", Some("b=2; Path=/"))),
            Ok(page("end", None)),
        ]);
        let origin = origin();
        let mut attempt = LoginAttempt::new(&transport, &origin);
        let first = attempt
            .send(LoginStage::LoginPage, HttpRequest::get("https://app/login"))
            .await
            .unwrap();
        assert!(
            transport.requests.lock().unwrap()[0]
                .header_value("cookie")
                .is_none()
        );
        assert_eq!(first.location.as_deref(), Some("/b"));

        let _ = attempt
            .send(LoginStage::EmailRedirects, HttpRequest::get("https://app/b"))
            .await
            .unwrap();
        assert_eq!(
            transport.requests.lock().unwrap()[1].header_value("cookie"),
            Some("b=2")
        );
        assert_eq!(attempt.captured(), 1);
    }

    #[tokio::test]
    async fn test_cookies_stay_on_the_host_that_set_them() {
        let transport = ScriptedTransport::new(vec![
            Ok(redirect("https://auth.earth2.io/authorize", Some("app_sid=1; Path=/"))),
            Ok(redirect("/email", Some("idp=2; HttpOnly"))),
            Ok(page("email page", None)),
            Ok(page("back on app", None)),
        ]);
        let origin = origin();
        let mut attempt = LoginAttempt::new(&transport, &origin);

        for url in [
            "https://app.earth2.io/login",
            "https://auth.earth2.io/authorize",
            "https://auth.earth2.io/email",
            "https://app.earth2.io/dashboard",
        ] {
            attempt
                .send(LoginStage::EmailRedirects, HttpRequest::get(url))
                .await
                .unwrap();
        }

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[1].header_value("cookie"), None);
        assert_eq!(requests[2].header_value("cookie"), Some("idp=2"));
        assert_eq!(requests[3].header_value("cookie"), Some("app_sid=1"));
        drop(requests);

        // The credential still carries every captured cookie in order.
        assert_eq!(attempt.into_credential().cookie(), "app_sid=1; idp=2");
    }

    #[tokio::test]
    async fn test_domain_cookie_reaches_sibling_hosts() {
        let transport = ScriptedTransport::new(vec![
            Ok(page("login", Some("shared=1; Domain=.earth2.io; Path=/"))),
            Ok(page("idp", None)),
            Ok(page("other", None)),
        ]);
        let origin = origin();
        let mut attempt = LoginAttempt::new(&transport, &origin);

        for url in [
            "https://app.earth2.io/login",
            "https://auth.earth2.io/authorize",
            "https://evil-earth2.io/",
        ] {
            attempt
                .send(LoginStage::LoginPage, HttpRequest::get(url))
                .await
                .unwrap();
        }

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[1].header_value("cookie"), Some("shared=1"));
        assert_eq!(requests[2].header_value("cookie"), None);
    }

    #[test]
    fn test_foreign_domain_attribute_is_ignored() {
        let cookie = CapturedCookie::new("https://auth.earth2.io/x", "t=1; Domain=example.com");
        assert_eq!(cookie.domain, None);
        assert!(cookie.applies_to(Some("auth.earth2.io")));
        assert!(!cookie.applies_to(Some("example.com")));
    }

    #[tokio::test]
    async fn test_error_status_fails_with_unexpected_status() {
        let mut response = page("boom", None);
        response.status = 503;
        let transport = ScriptedTransport::new(vec![Ok(response)]);
        let origin = origin();
        let mut attempt = LoginAttempt::new(&transport, &origin);

        let err = attempt
            .send(LoginStage::EmailSubmit, HttpRequest::get("https://auth/x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::UnexpectedStatus {
                stage: LoginStage::EmailSubmit,
                status: 503,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_redirect_without_location_is_terminal() {
        let transport = ScriptedTransport::new(vec![]);
        let origin = origin();
        let mut attempt = LoginAttempt::new(&transport, &origin);
        let phase = RedirectPhase {
            stage: LoginStage::EmailRedirects,
            max_hops: 10,
            check: &never_stop,
        };
        let response = HttpResponse {
            status: 302,
            ..HttpResponse::default()
        };

        let landing = follow_redirects(&mut attempt, response, "u".into(), &phase)
            .await
            .unwrap();
        assert_eq!(landing.kind, LandingKind::Terminal);
        assert_eq!(landing.hops, 0);
    }
}
