//! Earth2 API query client and its request guard.

mod client;
mod error;
mod floor;
mod guard;
mod query;

pub use client::{
    ApiClient, ApiEndpoints, ClientOptions, DEFAULT_API_BASE, DEFAULT_APP_BASE,
    DEFAULT_RESOURCES_BASE,
};
pub use error::{ApiError, SNIPPET_CHARS};
pub use floor::{FLOOR_SAMPLE_ITEMS, FloorSource, MarketFloor, floor_from_html, floor_from_json};
pub use guard::{
    BURST_LIMIT, BlockReason, DEFAULT_CACHE_TTL, EndpointCategory, GLOBAL_LIMIT_PER_MINUTE,
    GuardDecision, GuardStats, RequestGuard, RequestMethod, parse_retry_after,
};
pub use query::{LeaderboardKind, LeaderboardQuery, MarketQuery};
