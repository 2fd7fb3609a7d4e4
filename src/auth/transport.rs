//! HTTP transport seam for the login flow.
//!
//! The authenticator drives redirects itself, so the transport must never
//! follow them and must expose every `Set-Cookie` header separately.
//! [`ReqwestTransport`] is the production implementation; tests substitute
//! their own [`Transport`] to inject faults.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION, SET_COOKIE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, warn};

use super::error::TransportError;
use crate::user_agent::BROWSER_USER_AGENT;

/// Default per-request timeout for every login and session-check request.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default TCP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Request method supported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// HTTP GET.
    Get,
    /// HTTP POST with a url-encoded form body.
    Post,
}

/// One outgoing request.
#[derive(Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute target URL.
    pub url: String,
    /// Extra request headers (name, value).
    pub headers: Vec<(String, String)>,
    /// Url-encoded form fields for POST requests.
    pub form: Option<Vec<(String, String)>>,
}

impl HttpRequest {
    /// Creates a GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            form: None,
        }
    }

    /// Creates a POST request with a url-encoded form body.
    #[must_use]
    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            form: Some(form),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the value of the first header named `name` (case-insensitive).
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// Form values carry the password and headers carry cookies.
impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers.len())
            .field("form_fields", &self.form.as_ref().map(Vec::len))
            .finish()
    }
}

/// A received response with the parts the login flow inspects.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw `Location` header, if present.
    pub location: Option<String>,
    /// Every `Set-Cookie` header value, in received order.
    pub set_cookies: Vec<String>,
    /// Response body decoded as text.
    pub body: String,
}

impl HttpResponse {
    /// Returns true for 301, 302, 303, 307 and 308.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    /// Returns true for any 2xx or 3xx status.
    #[must_use]
    pub fn is_success_or_redirect(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Sends single HTTP requests without following redirects.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on network, TLS, timeout or body-read failure.
    /// HTTP error statuses are returned as responses, not errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Timeout settings for [`ReqwestTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    /// Connect timeout in seconds.
    pub connect_secs: u64,
    /// Whole-request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: CONNECT_TIMEOUT_SECS,
            request_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Production transport backed by a redirect-disabled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a transport with default timeouts and the browser User-Agent.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the client cannot be constructed.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeouts(TransportTimeouts::default())
    }

    /// Builds a transport with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the client cannot be constructed.
    pub fn with_timeouts(timeouts: TransportTimeouts) -> Result<Self, TransportError> {
        let client = build_no_redirect_client(timeouts)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(level = "debug", skip(self, request), fields(method = ?request.method, url = %request.url))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(form) = &request.form {
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encode_form(form));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, &e))?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let location = headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let set_cookies = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, &e))?;

        debug!(
            status,
            cookies = set_cookies.len(),
            has_location = location.is_some(),
            "response received"
        );

        Ok(HttpResponse {
            status,
            location,
            set_cookies,
            body,
        })
    }
}

/// Encodes form fields as `application/x-www-form-urlencoded`.
#[must_use]
pub fn encode_form(fields: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields.iter().map(|(name, value)| (name.as_str(), value.as_str())))
        .finish()
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn build_no_redirect_client(timeouts: TransportTimeouts) -> Result<Client, TransportError> {
    match try_build_client(timeouts, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // Restricted sandboxes can panic while reading system proxy settings.
            warn!("login client hit system proxy panic; using env-proxy fallback builder");
            try_build_client(timeouts, true).map_err(|failure| build_failure(&failure))
        }
        Err(failure) => Err(build_failure(&failure)),
    }
}

fn build_failure(failure: &BuildClientFailure) -> TransportError {
    let message = match failure {
        BuildClientFailure::Panic => "HTTP client construction panicked".to_string(),
        BuildClientFailure::Build(error) => format!("HTTP client construction failed: {error}"),
    };
    TransportError::Network {
        url: String::new(),
        message,
    }
}

fn try_build_client(
    timeouts: TransportTimeouts,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(timeouts);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(timeouts: TransportTimeouts) -> ClientBuilder {
    let mut default_headers = reqwest::header::HeaderMap::new();
    default_headers.insert(
        USER_AGENT,
        reqwest::header::HeaderValue::from_static(BROWSER_USER_AGENT),
    );
    Client::builder()
        .redirect(Policy::none())
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .timeout(Duration::from_secs(timeouts.request_secs))
        .default_headers(default_headers)
        .gzip(true)
}

pub(crate) fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    let names: &[&str] = match scheme {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => return None,
    };
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_statuses() {
        for status in [301, 302, 303, 307, 308] {
            let response = HttpResponse {
                status,
                ..HttpResponse::default()
            };
            assert!(response.is_redirect(), "{status} is a redirect");
        }
        for status in [200, 204, 300, 304, 400, 500] {
            let response = HttpResponse {
                status,
                ..HttpResponse::default()
            };
            assert!(!response.is_redirect(), "{status} is not a redirect");
        }
    }

    #[test]
    fn test_success_or_redirect_range() {
        let ok = HttpResponse {
            status: 204,
            ..HttpResponse::default()
        };
        let bad = HttpResponse {
            status: 404,
            ..HttpResponse::default()
        };
        assert!(ok.is_success_or_redirect());
        assert!(!bad.is_success_or_redirect());
    }

    #[test]
    fn test_request_debug_hides_form_values() {
        let request = HttpRequest::post_form(
            "https://auth.example/password",
            vec![("password".to_string(), "hunter2".to_string())],
        )
        .header("Cookie", "sid=secret");
        let debug = format!("{request:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("secret"));
        assert_eq!(request.header_value("cookie"), Some("sid=secret"));
    }

    #[test]
    fn test_encode_form_escapes_values() {
        let body = encode_form(&[
            ("email".to_string(), "me+1@example.com".to_string()),
            ("state".to_string(), "a b&c".to_string()),
        ]);
        assert_eq!(body, "email=me%2B1%40example.com&state=a+b%26c");
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = TransportTimeouts::default();
        assert_eq!(timeouts.request_secs, 30);
        assert_eq!(timeouts.connect_secs, 10);
    }
}
