//! Handlers for the read-only API queries.

use anyhow::Result;
use earth2_core::{ApiClient, ApiError, LeaderboardKind, LeaderboardQuery, MarketQuery};
use serde_json::Value;
use tracing::{debug, info};

use crate::ProcessExit;
use crate::app::context::RunContext;
use crate::cli::{Command, LeaderboardArgs, MarketArgs, MarketFloorArgs};

use super::print_json;

const RELOGIN_HINT: &str = "The server rejected the session; run `e2 login` to sign in again";

/// Runs one query command and prints its JSON body.
///
/// Returns `None` for commands that are not queries.
pub(crate) async fn run_query_command(
    ctx: RunContext,
    command: &Command,
) -> Result<Option<ProcessExit>> {
    let client = ApiClient::new(ctx.options)?;
    let Some(body) = query(&client, command).await.map_err(query_failure)? else {
        return Ok(None);
    };

    let stats = client.guard().stats();
    debug!(
        total_requests = stats.total_requests,
        cache_size = stats.cache_size,
        "request guard"
    );
    print_json(&body)?;
    Ok(Some(ProcessExit::Success))
}

async fn query(client: &ApiClient, command: &Command) -> Result<Option<Value>, ApiError> {
    let body = match command {
        Command::Trending => client.trending_places().await?,
        Command::TerritoryWinners => client.territory_release_winners().await?,
        Command::LandingMetrics => client.landing_metrics().await?,
        Command::AvatarSales => client.avatar_sales().await?,
        Command::MyFavorites => client.my_favorites().await?,
        Command::Property { id } => client.property(id).await?,
        Command::Resources { property_id } => client.resources(property_id).await?,
        Command::User { id } => client.user_info(id).await?,
        Command::Users { ids } => client.users(ids).await?,
        Command::Market(args) => client.search_market(&market_query(args)).await?,
        Command::MarketFloor(args) => {
            let floor = client.market_floor(&floor_query(args)).await?;
            if floor.is_none() {
                info!("No per-tile price found for these filters");
            }
            serde_json::to_value(floor).unwrap_or(Value::Null)
        }
        Command::Leaderboard(args) => {
            let (kind, query) = leaderboard_query(args);
            debug!(leaderboard = %kind, "fetching leaderboard");
            client.leaderboard(kind, &query).await?
        }
        Command::Login(_) | Command::Logout | Command::Session => return Ok(None),
    };
    Ok(Some(body))
}

/// Adds a re-login hint to errors a fresh session may fix.
fn query_failure(error: ApiError) -> anyhow::Error {
    if error.needs_reauth() {
        anyhow::Error::new(error).context(RELOGIN_HINT)
    } else {
        error.into()
    }
}

fn market_query(args: &MarketArgs) -> MarketQuery {
    MarketQuery {
        country: args.country.clone(),
        landfield_tier: args.tier.clone(),
        tile_class: args.tile_class.clone(),
        tile_count: args.tile_count.clone(),
        page: args.page,
        items: args.items,
        search: args.search.clone(),
        search_terms: args.terms.clone(),
    }
}

fn floor_query(args: &MarketFloorArgs) -> MarketQuery {
    MarketQuery {
        country: args.country.clone(),
        landfield_tier: args.tier.clone(),
        tile_class: args.tile_class.clone(),
        tile_count: args.tile_count.clone(),
        ..MarketQuery::default()
    }
}

fn leaderboard_query(args: &LeaderboardArgs) -> (LeaderboardKind, LeaderboardQuery) {
    (
        args.kind,
        LeaderboardQuery {
            sort_by: args.sort_by.clone(),
            country: args.country.clone(),
            continent: args.continent.clone(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    #[test]
    fn test_market_args_map_onto_query() {
        let cli = Cli::try_parse_from([
            "e2", "market", "--country", "AU", "--tier", "1", "--page", "3", "--term", "x",
        ])
        .expect("args should parse");
        let Command::Market(args) = cli.command else {
            panic!("expected market");
        };
        let query = market_query(&args);
        assert_eq!(query.country.as_deref(), Some("AU"));
        assert_eq!(query.landfield_tier.as_deref(), Some("1"));
        assert_eq!(query.page, 3);
        assert_eq!(query.items, 100);
        assert_eq!(query.search_terms, vec!["x"]);
    }

    #[test]
    fn test_leaderboard_args_map_onto_query() {
        let cli = Cli::try_parse_from([
            "e2",
            "leaderboard",
            "--type",
            "countries",
            "--sort-by",
            "value",
            "--continent",
            "asia",
        ])
        .expect("args should parse");
        let Command::Leaderboard(args) = cli.command else {
            panic!("expected leaderboard");
        };
        let (kind, query) = leaderboard_query(&args);
        assert_eq!(kind, LeaderboardKind::Countries);
        assert_eq!(query.sort_by, "value");
        assert_eq!(query.continent.as_deref(), Some("asia"));
        assert!(query.country.is_none());
    }

    #[test]
    fn test_market_floor_args_map_onto_filters() {
        let cli = Cli::try_parse_from(["e2", "market-floor", "--country", "AU", "--tile-count", "5"])
            .expect("args should parse");
        let Command::MarketFloor(args) = cli.command else {
            panic!("expected market-floor");
        };
        let query = floor_query(&args);
        assert_eq!(query.country.as_deref(), Some("AU"));
        assert_eq!(query.tile_count.as_deref(), Some("5"));
        assert!(query.landfield_tier.is_none());
    }

    #[test]
    fn test_rejected_session_suggests_login() {
        let error = query_failure(ApiError::http_status("https://r.earth2.io/x", 401, "denied"));
        let rendered = format!("{error:#}");
        assert!(rendered.contains("e2 login"), "got {rendered}");
        assert!(rendered.contains("401"), "got {rendered}");

        let error = query_failure(ApiError::http_status("https://r.earth2.io/x", 404, ""));
        assert!(!format!("{error:#}").contains("e2 login"));
    }
}
