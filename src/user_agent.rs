//! Shared User-Agent strings for the login flow and the query client.
//!
//! The login flow must look like a desktop browser to the identity provider;
//! API queries identify the tool instead.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/earth2";

/// Desktop browser User-Agent sent on every login-flow request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default User-Agent for API query requests.
#[must_use]
pub fn default_api_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("earth2/{version} (+{PROJECT_UA_URL})")
}
