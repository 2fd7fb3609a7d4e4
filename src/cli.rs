//! CLI argument definitions using clap derive macros.

use clap::{Args, Parser, Subcommand};

use earth2_core::LeaderboardKind;

/// Query the Earth2 web API from the command line.
///
/// Log in once with `e2 login`; the session is stored encrypted and reused by
/// later commands. Query results are printed as JSON on stdout.
#[derive(Parser, Debug)]
#[command(name = "e2")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Session cookie header to use instead of the stored session
    #[arg(long, global = true, env = "E2_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    /// Anti-forgery token sent with --cookie
    #[arg(long, global = true, env = "E2_CSRF", hide_env_values = true)]
    pub csrf: Option<String>,

    /// Per-request timeout in seconds (1-3600)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Disable client-side rate limiting and response caching
    #[arg(long, global = true)]
    pub no_rate_limit: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in with email and password and store the session
    Login(LoginArgs),
    /// Delete the stored session
    Logout,
    /// Check whether the current session is still accepted
    Session,
    /// Trending places
    Trending,
    /// Territory release winners
    TerritoryWinners,
    /// Landing page metrics
    LandingMetrics,
    /// Recent avatar sales
    AvatarSales,
    /// Favorites of the logged-in user
    MyFavorites,
    /// Details of one property
    Property {
        /// Property id
        id: String,
    },
    /// Resources of one property
    Resources {
        /// Property id
        property_id: String,
    },
    /// Public profile of one user
    User {
        /// User id
        id: String,
    },
    /// Several users at once
    Users {
        /// User ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Marketplace search sorted by price per tile
    Market(MarketArgs),
    /// Lowest price per tile for the given marketplace filters
    MarketFloor(MarketFloorArgs),
    /// Leaderboards
    Leaderboard(LeaderboardArgs),
}

/// Arguments for `e2 login`.
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Account email (falls back to `email` in the config file)
    #[arg(long, env = "E2_EMAIL")]
    pub email: Option<String>,

    /// Account password
    #[arg(long, env = "E2_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Do not persist the session to disk
    #[arg(long)]
    pub no_save: bool,
}

/// Arguments for `e2 market`.
#[derive(Args, Debug)]
pub struct MarketArgs {
    /// Country code, e.g. AU
    #[arg(long)]
    pub country: Option<String>,

    /// Landfield tier, e.g. 1
    #[arg(long)]
    pub tier: Option<String>,

    /// Tile class (tier 1 only)
    #[arg(long)]
    pub tile_class: Option<String>,

    /// Tile count
    #[arg(long)]
    pub tile_count: Option<String>,

    /// Page number
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub page: u32,

    /// Items per page (1-500)
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=500))]
    pub items: u32,

    /// Free-text search
    #[arg(long, default_value = "")]
    pub search: String,

    /// Additional search term (repeatable)
    #[arg(long = "term")]
    pub terms: Vec<String>,
}

/// Arguments for `e2 market-floor`.
#[derive(Args, Debug)]
pub struct MarketFloorArgs {
    /// Country code, e.g. AU
    #[arg(long)]
    pub country: Option<String>,

    /// Landfield tier, e.g. 1
    #[arg(long)]
    pub tier: Option<String>,

    /// Tile class (tier 1 only)
    #[arg(long)]
    pub tile_class: Option<String>,

    /// Tile count
    #[arg(long)]
    pub tile_count: Option<String>,
}

/// Arguments for `e2 leaderboard`.
#[derive(Args, Debug)]
pub struct LeaderboardArgs {
    /// Which leaderboard: players, countries or player-countries
    #[arg(long = "type", default_value_t = LeaderboardKind::Players)]
    pub kind: LeaderboardKind,

    /// Sort column
    #[arg(long, default_value = "tiles_count")]
    pub sort_by: String,

    /// Country filter
    #[arg(long)]
    pub country: Option<String>,

    /// Continent filter
    #[arg(long)]
    pub continent: Option<String>,
}
