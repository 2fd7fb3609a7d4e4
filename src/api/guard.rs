//! Client-side request guard: rate limits, error backoff and a GET cache.
//!
//! Every API URL falls into an [`EndpointCategory`] with its own per-minute
//! budget. On top of that sit a global per-minute budget and a short burst
//! window. Consecutive errors in a category trigger exponential backoff.
//! Successful GET responses are cached for a few minutes so repeated queries
//! do not reach the server at all.
//!
//! The guard never sleeps; it answers [`GuardDecision::Blocked`] and leaves
//! the retry decision to the caller.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Window for per-category and global budgets.
const MINUTE: Duration = Duration::from_secs(60);

/// Window for the burst budget.
const BURST_WINDOW: Duration = Duration::from_secs(10);

/// Requests allowed per minute across all categories.
pub const GLOBAL_LIMIT_PER_MINUTE: usize = 200;

/// Requests allowed within [`BURST_WINDOW`].
pub const BURST_LIMIT: usize = 10;

/// Longest error backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Default lifetime of a cached GET response.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cache size that triggers eviction.
const CACHE_CAPACITY: usize = 1000;

/// Entries dropped per eviction, oldest first.
const CACHE_EVICTION_BATCH: usize = 200;

/// Maximum Retry-After value honored.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// HTTP method as seen by the guard; only GET responses are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    /// GET.
    Get,
    /// POST.
    Post,
}

impl RequestMethod {
    fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Budget bucket a URL is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointCategory {
    /// Login and auth endpoints.
    Auth,
    /// Marketplace search.
    Search,
    /// Single property lookups.
    Property,
    /// Leaderboards.
    Leaderboard,
    /// User lookups.
    User,
    /// Property resources.
    Resources,
    /// Everything else.
    Default,
}

impl EndpointCategory {
    /// Classifies `url` by substring, first match wins.
    #[must_use]
    pub fn classify(url: &str) -> Self {
        let url = url.to_ascii_lowercase();
        if url.contains("auth") || url.contains("login") {
            Self::Auth
        } else if url.contains("marketplace") || url.contains("search") {
            Self::Search
        } else if url.contains("landfields") && !url.contains("/resources") {
            Self::Property
        } else if url.contains("leaderboard") {
            Self::Leaderboard
        } else if url.contains("user_info") || url.contains("users") {
            Self::User
        } else if url.contains("resources") {
            Self::Resources
        } else {
            Self::Default
        }
    }

    /// Requests allowed per minute in this category.
    #[must_use]
    pub fn per_minute_limit(self) -> usize {
        match self {
            Self::Auth => 5,
            Self::Search | Self::Resources => 30,
            Self::Property => 60,
            Self::Leaderboard => 20,
            Self::User => 40,
            Self::Default => 50,
        }
    }

    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Search => "search",
            Self::Property => "property",
            Self::Leaderboard => "leaderboard",
            Self::User => "user",
            Self::Resources => "resources",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for EndpointCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// Recent errors in the category; wait before retrying.
    Backoff {
        /// Category in backoff.
        category: EndpointCategory,
        /// Full backoff length in seconds.
        wait_secs: u64,
    },
    /// Too many requests in the burst window.
    Burst,
    /// Global per-minute budget exhausted.
    Global,
    /// Category per-minute budget exhausted.
    Category {
        /// Exhausted category.
        category: EndpointCategory,
        /// Its per-minute limit.
        limit: usize,
    },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backoff { category, wait_secs } => {
                write!(f, "backing off {category} requests after errors (wait {wait_secs}s)")
            }
            Self::Burst => write!(
                f,
                "burst limit exceeded (max {BURST_LIMIT} requests per {}s)",
                BURST_WINDOW.as_secs()
            ),
            Self::Global => write!(
                f,
                "global rate limit exceeded (max {GLOBAL_LIMIT_PER_MINUTE} requests per minute)"
            ),
            Self::Category { category, limit } => write!(
                f,
                "rate limit exceeded for {category} (max {limit} requests per minute)"
            ),
        }
    }
}

/// Outcome of [`RequestGuard::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    /// Send the request.
    Proceed,
    /// Use this cached body instead of sending.
    Cached(Value),
    /// Do not send the request.
    Blocked(BlockReason),
}

/// Counters reported by [`RequestGuard::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardStats {
    /// Requests recorded as sent.
    pub total_requests: u64,
    /// Requests refused.
    pub blocked_requests: u64,
    /// Requests sent in the last minute.
    pub current_rpm: usize,
    /// Live cache entries.
    pub cache_size: usize,
    /// Consecutive error count per category label.
    pub error_counts: Vec<(String, u32)>,
    /// Share of requests not blocked, in percent.
    pub efficiency: f64,
}

#[derive(Debug, Default)]
struct CategoryState {
    requests: VecDeque<Instant>,
    consecutive_errors: u32,
    last_error: Option<Instant>,
}

#[derive(Debug, Default)]
struct Windows {
    global: VecDeque<Instant>,
    burst: VecDeque<Instant>,
}

#[derive(Debug)]
struct CacheEntry {
    stored_at: Instant,
    body: Value,
}

/// Rate limiter and response cache shared by every request of one client.
///
/// `RequestGuard` is `Send + Sync`; wrap it in `Arc` to share it.
#[derive(Debug)]
pub struct RequestGuard {
    disabled: bool,
    windows: Mutex<Windows>,
    categories: DashMap<EndpointCategory, CategoryState>,
    cache: DashMap<String, CacheEntry>,
    cache_ttl_ms: AtomicU64,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
}

impl Default for RequestGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestGuard {
    /// Creates an enforcing guard with the default cache TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Creates a guard that always proceeds and never caches.
    #[must_use]
    pub fn disabled() -> Self {
        debug!("request guard disabled");
        Self::build(true)
    }

    fn build(disabled: bool) -> Self {
        Self {
            disabled,
            windows: Mutex::new(Windows::default()),
            categories: DashMap::new(),
            cache: DashMap::new(),
            cache_ttl_ms: AtomicU64::new(duration_ms(DEFAULT_CACHE_TTL)),
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
        }
    }

    /// Returns whether the guard is a no-op.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Decides whether a request to `url` may be sent now.
    #[instrument(level = "trace", skip(self))]
    pub fn check(&self, url: &str, method: RequestMethod) -> GuardDecision {
        self.check_at(url, method, Instant::now())
    }

    /// Records a request that was sent; resets the category's error streak.
    pub fn record_request(&self, url: &str) {
        self.record_request_at(url, Instant::now());
    }

    /// Records a failed request, extending the category's backoff.
    pub fn record_error(&self, url: &str, status: Option<u16>) {
        self.record_error_at(url, status, Instant::now());
    }

    /// Caches a GET response body.
    pub fn cache_response(&self, url: &str, method: RequestMethod, body: &Value) {
        self.cache_response_at(url, method, body, Instant::now());
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> GuardStats {
        self.stats_at(Instant::now())
    }

    /// Drops every cached response.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Changes the cache lifetime for lookups from now on.
    pub fn set_cache_ttl(&self, ttl: Duration) {
        self.cache_ttl_ms.store(duration_ms(ttl), Ordering::Relaxed);
    }

    fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms.load(Ordering::Relaxed))
    }

    fn check_at(&self, url: &str, method: RequestMethod, now: Instant) -> GuardDecision {
        if self.disabled {
            return GuardDecision::Proceed;
        }

        if method == RequestMethod::Get
            && let Some(body) = self.cached(&cache_key(url, method), now)
        {
            debug!(url, "serving cached response");
            return GuardDecision::Cached(body);
        }

        let category = EndpointCategory::classify(url);
        match self.refusal(category, now) {
            Some(reason) => {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                warn!(url, %category, %reason, "request blocked");
                GuardDecision::Blocked(reason)
            }
            None => GuardDecision::Proceed,
        }
    }

    fn refusal(&self, category: EndpointCategory, now: Instant) -> Option<BlockReason> {
        let category_count = {
            let mut state = self.categories.entry(category).or_default();
            prune(&mut state.requests, now, MINUTE);
            if state.consecutive_errors > 0
                && let Some(last_error) = state.last_error
            {
                let backoff = backoff_for(state.consecutive_errors);
                if now.saturating_duration_since(last_error) < backoff {
                    return Some(BlockReason::Backoff {
                        category,
                        wait_secs: backoff.as_secs(),
                    });
                }
            }
            state.requests.len()
        };

        {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            prune(&mut windows.global, now, MINUTE);
            prune(&mut windows.burst, now, BURST_WINDOW);
            if windows.burst.len() >= BURST_LIMIT {
                return Some(BlockReason::Burst);
            }
            if windows.global.len() >= GLOBAL_LIMIT_PER_MINUTE {
                return Some(BlockReason::Global);
            }
        }

        let limit = category.per_minute_limit();
        (category_count >= limit).then_some(BlockReason::Category { category, limit })
    }

    fn record_request_at(&self, url: &str, now: Instant) {
        if self.disabled {
            return;
        }
        let category = EndpointCategory::classify(url);
        {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            windows.global.push_back(now);
            windows.burst.push_back(now);
        }
        let mut state = self.categories.entry(category).or_default();
        state.requests.push_back(now);
        state.consecutive_errors = 0;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error_at(&self, url: &str, status: Option<u16>, now: Instant) {
        if self.disabled {
            return;
        }
        let category = EndpointCategory::classify(url);
        let mut state = self.categories.entry(category).or_default();
        state.consecutive_errors = state.consecutive_errors.saturating_add(1);
        state.last_error = Some(now);
        debug!(
            %category,
            status,
            errors = state.consecutive_errors,
            backoff_secs = backoff_for(state.consecutive_errors).as_secs(),
            "recorded request error"
        );
    }

    fn cache_response_at(&self, url: &str, method: RequestMethod, body: &Value, now: Instant) {
        if self.disabled || method != RequestMethod::Get {
            return;
        }
        if self.cache.len() > CACHE_CAPACITY {
            self.evict_oldest(CACHE_EVICTION_BATCH);
        }
        self.cache.insert(
            cache_key(url, method),
            CacheEntry {
                stored_at: now,
                body: body.clone(),
            },
        );
    }

    fn cached(&self, key: &str, now: Instant) -> Option<Value> {
        let ttl = self.cache_ttl();
        let fresh = {
            let entry = self.cache.get(key)?;
            (now.saturating_duration_since(entry.stored_at) < ttl).then(|| entry.body.clone())
        };
        if fresh.is_none() {
            self.cache.remove(key);
        }
        fresh
    }

    fn evict_oldest(&self, count: usize) {
        let mut by_age: Vec<(Instant, String)> = self
            .cache
            .iter()
            .map(|entry| (entry.stored_at, entry.key().clone()))
            .collect();
        by_age.sort_by_key(|(stored_at, _)| *stored_at);
        for (_, key) in by_age.into_iter().take(count) {
            self.cache.remove(&key);
        }
        debug!(evicted = count, remaining = self.cache.len(), "evicted cached responses");
    }

    #[allow(clippy::cast_precision_loss)]
    fn stats_at(&self, now: Instant) -> GuardStats {
        let current_rpm = {
            let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
            prune(&mut windows.global, now, MINUTE);
            windows.global.len()
        };
        let mut error_counts: Vec<(String, u32)> = self
            .categories
            .iter()
            .map(|entry| (entry.key().as_str().to_string(), entry.consecutive_errors))
            .collect();
        error_counts.sort();

        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let blocked_requests = self.blocked_requests.load(Ordering::Relaxed);
        let attempts = (total_requests + blocked_requests).max(1);
        GuardStats {
            total_requests,
            blocked_requests,
            current_rpm,
            cache_size: self.cache.len(),
            error_counts,
            efficiency: (1.0 - blocked_requests as f64 / attempts as f64) * 100.0,
        }
    }
}

fn cache_key(url: &str, method: RequestMethod) -> String {
    format!("{}:{url}", method.as_str())
}

fn prune(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while queue
        .front()
        .is_some_and(|&at| now.saturating_duration_since(at) >= window)
    {
        queue.pop_front();
    }
}

/// `min(2^errors s, 300 s)`.
fn backoff_for(consecutive_errors: u32) -> Duration {
    2_u64
        .checked_pow(consecutive_errors)
        .map_or(MAX_BACKOFF, Duration::from_secs)
        .min(MAX_BACKOFF)
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Parses a `Retry-After` header: integer seconds or an HTTP-date.
///
/// Negative or unparseable values yield `None`; past dates yield zero.
/// Values above one hour are capped.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        let seconds = u64::try_from(seconds).ok()?;
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    let at = httpdate::parse_http_date(header_value).ok()?;
    let wait = at
        .duration_since(std::time::SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Some(wait.min(MAX_RETRY_AFTER))
}
