//! Query client for the Earth2 API.
//!
//! Every query is a plain GET whose JSON body is returned unchanged. The
//! client attaches the stored session headers, consults the
//! [`RequestGuard`] before sending, and feeds results back into it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::error::ApiError;
use super::floor::{FLOOR_SAMPLE_ITEMS, MarketFloor, floor_from_html, floor_from_json};
use super::guard::{DEFAULT_CACHE_TTL, GuardDecision, RequestGuard, RequestMethod, parse_retry_after};
use super::query::{LeaderboardKind, LeaderboardQuery, MarketQuery};
use crate::auth::{
    AuthEndpoints, Authenticator, SessionCredential, SessionStore, SessionValidity,
    TransportTimeouts, apply_env_proxy_fallback,
};
use crate::user_agent::default_api_user_agent;

/// Main API host.
pub const DEFAULT_API_BASE: &str = "https://r.earth2.io";

/// Resources API host.
pub const DEFAULT_RESOURCES_BASE: &str = "https://resources.earth2.io";

/// Web application host, which also serves user lookups.
pub const DEFAULT_APP_BASE: &str = "https://app.earth2.io";

const ACCEPT_JSON: &str = "application/json, text/plain, */*";

/// A GET body, either replayed from the guard cache or freshly received.
enum Fetched {
    Cached(Value),
    Fresh(String),
}

/// Base URLs for the three API hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    /// Main API base (`r.earth2.io`).
    pub api_base: String,
    /// Resources API base.
    pub resources_base: String,
    /// Application base.
    pub app_base: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            resources_base: DEFAULT_RESOURCES_BASE.to_string(),
            app_base: DEFAULT_APP_BASE.to_string(),
        }
    }
}

impl ApiEndpoints {
    /// Points every host at one base URL.
    #[must_use]
    pub fn single_host(base: &str) -> Self {
        Self {
            api_base: base.to_string(),
            resources_base: base.to_string(),
            app_base: base.to_string(),
        }
    }
}

/// Settings for [`ApiClient::new`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// API base URLs.
    pub endpoints: ApiEndpoints,
    /// Login flow endpoints.
    pub auth: AuthEndpoints,
    /// Timeouts for both API and login requests.
    pub timeouts: TransportTimeouts,
    /// Enforce client-side rate limits and caching.
    pub rate_limit: bool,
    /// Lifetime of cached GET responses.
    pub cache_ttl: Duration,
    /// Credential to start with.
    pub session: Option<SessionCredential>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoints: ApiEndpoints::default(),
            auth: AuthEndpoints::default(),
            timeouts: TransportTimeouts::default(),
            rate_limit: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            session: None,
        }
    }
}

/// Earth2 API client.
#[derive(Debug)]
pub struct ApiClient {
    http: Client,
    endpoints: ApiEndpoints,
    session: Arc<SessionStore>,
    guard: Arc<RequestGuard>,
    authenticator: Authenticator,
    login_gate: Mutex<()>,
    user_agent: String,
}

impl ApiClient {
    /// Builds a client from `options`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when an HTTP client cannot be built or the login
    /// endpoints are invalid.
    pub fn new(options: ClientOptions) -> Result<Self, ApiError> {
        let authenticator = Authenticator::new(options.auth.clone(), options.timeouts)?;
        Self::with_authenticator(options, authenticator)
    }

    /// Builds a client around an existing authenticator.
    ///
    /// `options.auth` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the HTTP client cannot be built.
    pub fn with_authenticator(
        options: ClientOptions,
        authenticator: Authenticator,
    ) -> Result<Self, ApiError> {
        let http = build_api_client(options.timeouts)?;
        let guard = if options.rate_limit {
            let guard = RequestGuard::new();
            guard.set_cache_ttl(options.cache_ttl);
            guard
        } else {
            RequestGuard::disabled()
        };
        let session = match options.session {
            Some(credential) => SessionStore::with_credential(credential),
            None => SessionStore::new(),
        };
        Ok(Self {
            http,
            endpoints: options.endpoints,
            session: Arc::new(session),
            guard: Arc::new(guard),
            authenticator,
            login_gate: Mutex::new(()),
            user_agent: default_api_user_agent(),
        })
    }

    /// The session slot the client reads headers from.
    #[must_use]
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// The request guard in use.
    #[must_use]
    pub fn guard(&self) -> &Arc<RequestGuard> {
        &self.guard
    }

    /// The authenticator used by [`login`](Self::login).
    #[must_use]
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Logs in and stores the resulting credential.
    ///
    /// On failure the previously stored credential is left in place.
    /// Concurrent calls are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Auth`] when the handshake fails, or
    /// [`ApiError::RateLimited`] when too many logins were attempted.
    #[instrument(skip(self, email, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionCredential, ApiError> {
        let _gate = self.login_gate.lock().await;
        let login_url = self.authenticator.endpoints().login_url.clone();

        if let GuardDecision::Blocked(reason) = self.guard.check(&login_url, RequestMethod::Post) {
            return Err(ApiError::RateLimited {
                url: login_url,
                reason: reason.to_string(),
                retry_after: None,
            });
        }

        match self.authenticator.authenticate(email, password).await {
            Ok(credential) => {
                self.guard.record_request(&login_url);
                self.session.replace(credential.clone());
                // Cached bodies may belong to the previous session.
                self.guard.clear_cache();
                info!(cookies = credential.cookie_count(), "session stored");
                Ok(credential)
            }
            Err(error) => {
                self.guard.record_error(&login_url, None);
                if self.session.current().is_some() {
                    warn!(%error, "login failed; previous credential kept and may be stale");
                }
                Err(error.into())
            }
        }
    }

    /// Checks the stored credential.
    ///
    /// Without a stored credential this reports invalid without any request.
    pub async fn check_session(&self) -> SessionValidity {
        match self.session.current() {
            Some(credential) => self.authenticator.check_session_validity(&credential).await,
            None => {
                debug!("no session stored");
                SessionValidity::missing()
            }
        }
    }

    /// Landing page metrics.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status, decode or rate-limit failure.
    pub async fn landing_metrics(&self) -> Result<Value, ApiError> {
        self.get_json(self.api_url("/landing/metrics")?).await
    }

    /// Trending places.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status, decode or rate-limit failure.
    pub async fn trending_places(&self) -> Result<Value, ApiError> {
        self.get_json(self.api_url("/landing/trending_places")?).await
    }

    /// Territory release winners.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status, decode or rate-limit failure.
    pub async fn territory_release_winners(&self) -> Result<Value, ApiError> {
        self.get_json(self.api_url("/landing/territory_release_winners")?)
            .await
    }

    /// Recent avatar sales.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status, decode or rate-limit failure.
    pub async fn avatar_sales(&self) -> Result<Value, ApiError> {
        self.get_json(self.api_url("/avatar_sales")?).await
    }

    /// A single property.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidArgument`] for an empty id, otherwise any
    /// request failure.
    pub async fn property(&self, id: &str) -> Result<Value, ApiError> {
        let id = required("property id", id)?;
        self.get_json(self.api_url(&format!("/landfields/{}", urlencoding::encode(id)))?)
            .await
    }

    /// Marketplace search.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status, decode or rate-limit failure.
    pub async fn search_market(&self, query: &MarketQuery) -> Result<Value, ApiError> {
        let mut url = self.api_url("/marketplace")?;
        query.apply(&mut url);
        self.get_json(url).await
    }

    /// Lowest price per tile for the marketplace filters in `filters`.
    ///
    /// Only the country, tier, tile class and tile count of `filters` are
    /// used; the first page of the cheapest listings is inspected. A JSON body
    /// yields `price / tileCount` of its landfields, anything else is scanned
    /// for per-tile prices. `None` means no price was found.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status or rate-limit failure.
    pub async fn market_floor(
        &self,
        filters: &MarketQuery,
    ) -> Result<Option<MarketFloor>, ApiError> {
        let query = MarketQuery {
            page: 1,
            items: FLOOR_SAMPLE_ITEMS,
            search: String::new(),
            search_terms: Vec::new(),
            ..filters.clone()
        };
        let mut url = self.api_url("/marketplace")?;
        query.apply(&mut url);
        let target = url.to_string();

        let floor = match self.fetch(url).await? {
            Fetched::Cached(value) => floor_from_json(&value),
            Fetched::Fresh(body) => match serde_json::from_str::<Value>(&body) {
                Ok(value) => {
                    self.guard.cache_response(&target, RequestMethod::Get, &value);
                    floor_from_json(&value).or_else(|| floor_from_html(&body))
                }
                Err(_) => {
                    debug!("marketplace body is not JSON; scanning text");
                    floor_from_html(&body)
                }
            },
        };
        debug!(?floor, "market floor");
        Ok(floor)
    }

    /// One of the leaderboards.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status, decode or rate-limit failure.
    pub async fn leaderboard(
        &self,
        kind: LeaderboardKind,
        query: &LeaderboardQuery,
    ) -> Result<Value, ApiError> {
        let mut url = self.api_url(&format!("/leaderboards/{}", kind.path()))?;
        query.apply(&mut url);
        self.get_json(url).await
    }

    /// Resource deposits of a property.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidArgument`] for an empty id, otherwise any
    /// request failure.
    pub async fn resources(&self, property_id: &str) -> Result<Value, ApiError> {
        let id = required("property id", property_id)?;
        let path = format!("/v1/landfields/{}/resources", urlencoding::encode(id));
        self.get_json(join(&self.endpoints.resources_base, &path)?)
            .await
    }

    /// Public profile of one user.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidArgument`] for an empty id, otherwise any
    /// request failure.
    pub async fn user_info(&self, user_id: &str) -> Result<Value, ApiError> {
        let id = required("user id", user_id)?;
        let path = format!("/api/v2/user_info/{}", urlencoding::encode(id));
        self.get_json(join(&self.endpoints.app_base, &path)?).await
    }

    /// Several users at once.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidArgument`] when `user_ids` is empty,
    /// otherwise any request failure.
    pub async fn users(&self, user_ids: &[String]) -> Result<Value, ApiError> {
        if user_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(ApiError::InvalidArgument {
                name: "user ids",
                reason: "at least one id is required".to_string(),
            });
        }
        let mut url = join(&self.endpoints.app_base, "/users")?;
        {
            let mut pairs = url.query_pairs_mut();
            for id in user_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
                pairs.append_pair("ids", id);
            }
        }
        self.get_json(url).await
    }

    /// Favorites of the logged-in user; requires a session.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport, status, decode or rate-limit failure.
    pub async fn my_favorites(&self) -> Result<Value, ApiError> {
        self.get_json(self.api_url("/api/v2/my/favorites")?).await
    }

    fn api_url(&self, path: &str) -> Result<Url, ApiError> {
        join(&self.endpoints.api_base, path)
    }

    async fn get_json(&self, url: Url) -> Result<Value, ApiError> {
        let target = url.to_string();
        let body = match self.fetch(url).await? {
            Fetched::Cached(value) => return Ok(value),
            Fetched::Fresh(body) => body,
        };
        let value: Value = serde_json::from_str(&body).map_err(|error| ApiError::Decode {
            url: target.clone(),
            message: error.to_string(),
        })?;
        self.guard.cache_response(&target, RequestMethod::Get, &value);
        Ok(value)
    }

    /// Sends a guarded GET and returns the body of a 2xx response.
    #[instrument(level = "debug", skip(self, url), fields(url = %url))]
    async fn fetch(&self, url: Url) -> Result<Fetched, ApiError> {
        let target = url.to_string();

        match self.guard.check(&target, RequestMethod::Get) {
            GuardDecision::Proceed => {}
            GuardDecision::Cached(body) => return Ok(Fetched::Cached(body)),
            GuardDecision::Blocked(reason) => {
                return Err(ApiError::RateLimited {
                    url: target,
                    reason: reason.to_string(),
                    retry_after: None,
                });
            }
        }

        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, ACCEPT_JSON)
            .header(USER_AGENT, self.user_agent.as_str());
        for (name, value) in self.session.headers() {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                self.guard.record_error(&target, None);
                return Err(ApiError::from_reqwest(&target, &error));
            }
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            self.guard.record_error(&target, Some(status.as_u16()));
            warn!(retry_after_secs = retry_after.map(|d| d.as_secs()), "server rate limit");
            return Err(ApiError::RateLimited {
                url: target,
                reason: "server answered 429 Too Many Requests".to_string(),
                retry_after,
            });
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                self.guard.record_error(&target, Some(status.as_u16()));
                return Err(ApiError::from_reqwest(&target, &error));
            }
        };

        if !status.is_success() {
            self.guard.record_error(&target, Some(status.as_u16()));
            debug!(status = status.as_u16(), "request failed");
            return Err(ApiError::http_status(&target, status.as_u16(), &body));
        }

        self.guard.record_request(&target);
        Ok(Fetched::Fresh(body))
    }
}

fn required<'a>(name: &'static str, value: &'a str) -> Result<&'a str, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::InvalidArgument {
            name,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(value)
}

fn join(base: &str, path: &str) -> Result<Url, ApiError> {
    let joined = format!("{}{path}", base.trim_end_matches('/'));
    Url::parse(&joined).map_err(|error| ApiError::InvalidArgument {
        name: "base url",
        reason: format!("{joined}: {error}"),
    })
}

fn build_api_client(timeouts: TransportTimeouts) -> Result<Client, ApiError> {
    let build = |env_proxy_only: bool| {
        catch_unwind(AssertUnwindSafe(|| {
            let mut builder = Client::builder()
                .connect_timeout(Duration::from_secs(timeouts.connect_secs))
                .timeout(Duration::from_secs(timeouts.request_secs))
                .gzip(true);
            if env_proxy_only {
                builder = apply_env_proxy_fallback(builder.no_proxy());
            }
            builder.build()
        }))
    };

    let built = match build(false) {
        Ok(result) => result,
        Err(_) => {
            // Restricted sandboxes can panic while reading system proxy settings.
            warn!("API client hit system proxy panic; using env-proxy fallback builder");
            build(true).map_err(|_| ApiError::Network {
                url: String::new(),
                message: "HTTP client construction panicked".to_string(),
            })?
        }
    };
    built.map_err(|error| ApiError::Network {
        url: String::new(),
        message: format!("HTTP client construction failed: {error}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_join_trims_trailing_slash() {
        let url = join("https://r.earth2.io/", "/landing/metrics").unwrap();
        assert_eq!(url.as_str(), "https://r.earth2.io/landing/metrics");
    }

    #[test]
    fn test_join_rejects_bad_base() {
        assert!(matches!(
            join("not a base", "/x"),
            Err(ApiError::InvalidArgument { name: "base url", .. })
        ));
    }

    #[test]
    fn test_required_trims_and_rejects_blank() {
        assert_eq!(required("id", "  abc ").unwrap(), "abc");
        assert!(matches!(
            required("property id", " "),
            Err(ApiError::InvalidArgument {
                name: "property id",
                ..
            })
        ));
    }

    #[test]
    fn test_single_host_endpoints() {
        let endpoints = ApiEndpoints::single_host("http://127.0.0.1:9");
        assert_eq!(endpoints.api_base, endpoints.app_base);
        assert_eq!(endpoints.api_base, endpoints.resources_base);
    }

    #[test]
    fn test_new_uses_configured_login_endpoints() {
        let auth = AuthEndpoints {
            login_url: "http://127.0.0.1:9/login".to_string(),
            identity_origin: "http://127.0.0.1:9".to_string(),
            app_host: "127.0.0.1".to_string(),
            session_check_url: "http://127.0.0.1:9/api/v2/my/favorites".to_string(),
        };
        let client = ApiClient::new(ClientOptions {
            auth: auth.clone(),
            endpoints: ApiEndpoints::single_host("http://127.0.0.1:9"),
            ..ClientOptions::default()
        })
        .unwrap();
        assert_eq!(client.authenticator().endpoints(), &auth);
    }

    #[tokio::test]
    async fn test_check_session_without_credential_is_invalid() {
        let client = ApiClient::new(ClientOptions::default()).unwrap();
        let validity = client.check_session().await;
        assert!(!validity.valid);
        assert!(validity.needs_reauth);
        assert_eq!(validity.status_code, None);
    }

    #[tokio::test]
    async fn test_empty_property_id_is_rejected_before_sending() {
        let client = ApiClient::new(ClientOptions::default()).unwrap();
        assert!(matches!(
            client.property("").await,
            Err(ApiError::InvalidArgument { .. })
        ));
        assert!(matches!(
            client.resources(" ").await,
            Err(ApiError::InvalidArgument { .. })
        ));
        assert!(matches!(
            client.users(&[]).await,
            Err(ApiError::InvalidArgument { .. })
        ));
        assert_eq!(client.guard().stats().total_requests, 0);
    }
}
