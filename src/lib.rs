//! Earth2 Core Library
//!
//! Client library for the Earth2 web API. Logging in emulates a browser
//! walking the OAuth redirect chain, since the service offers no token API.
//!
//! # Architecture
//!
//! - [`auth`] - Login flow, session credential, encrypted session storage
//! - [`api`] - Query client, request guard (rate limits, backoff, cache)
//! - [`user_agent`] - User-Agent strings for login and API traffic

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod auth;
pub mod user_agent;

// Re-export commonly used types
pub use api::{
    ApiClient, ApiEndpoints, ApiError, ClientOptions, FloorSource, GuardStats, LeaderboardKind,
    LeaderboardQuery, MarketFloor, MarketQuery, RequestGuard,
};
pub use auth::{
    AuthEndpoints, AuthError, Authenticator, LoginStage, SessionCredential, SessionStore,
    SessionValidity, StorageError, StoredSession, TransportTimeouts,
};
