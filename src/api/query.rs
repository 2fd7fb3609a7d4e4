//! Query parameter builders for marketplace search and leaderboards.

use std::fmt;
use std::str::FromStr;

use url::Url;

/// Marketplace search filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketQuery {
    /// Country code filter.
    pub country: Option<String>,
    /// Tier filter, e.g. `"1"`.
    pub landfield_tier: Option<String>,
    /// Tile class; only sent for tier 1.
    pub tile_class: Option<String>,
    /// Tile count filter.
    pub tile_count: Option<String>,
    /// Page number, starting at 1.
    pub page: u32,
    /// Items per page.
    pub items: u32,
    /// Free-text search.
    pub search: String,
    /// Extra search terms, each sent as `searchTerms[]`.
    pub search_terms: Vec<String>,
}

impl Default for MarketQuery {
    fn default() -> Self {
        Self {
            country: None,
            landfield_tier: None,
            tile_class: None,
            tile_count: None,
            page: 1,
            items: 100,
            search: String::new(),
            search_terms: Vec::new(),
        }
    }
}

impl MarketQuery {
    /// Appends the query parameters to `url`.
    pub fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("sorting", "price_per_tile")
            .append_pair("page", &self.page.to_string())
            .append_pair("items", &self.items.to_string())
            .append_pair("search", &self.search);
        if let Some(country) = non_empty(self.country.as_deref()) {
            pairs.append_pair("country", country);
        }
        if let Some(tier) = non_empty(self.landfield_tier.as_deref()) {
            pairs.append_pair("landfieldTier", tier);
            if tier == "1"
                && let Some(tile_class) = non_empty(self.tile_class.as_deref())
            {
                pairs.append_pair("tileClass", tile_class);
            }
        }
        if let Some(tile_count) = non_empty(self.tile_count.as_deref()) {
            pairs.append_pair("tileCount", tile_count);
        }
        for term in &self.search_terms {
            pairs.append_pair("searchTerms[]", term);
        }
    }
}

/// Which leaderboard to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaderboardKind {
    /// Players ranked by holdings.
    #[default]
    Players,
    /// Countries ranked by land sold.
    Countries,
    /// Countries ranked by player count.
    PlayerCountries,
}

impl LeaderboardKind {
    /// Path segment under `/leaderboards/`.
    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Players => "players",
            Self::Countries => "landfield_countries",
            Self::PlayerCountries => "player_countries",
        }
    }
}

impl fmt::Display for LeaderboardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Players => "players",
            Self::Countries => "countries",
            Self::PlayerCountries => "player-countries",
        })
    }
}

impl FromStr for LeaderboardKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "players" => Ok(Self::Players),
            "countries" | "landfield-countries" => Ok(Self::Countries),
            "player-countries" => Ok(Self::PlayerCountries),
            other => Err(format!(
                "unknown leaderboard '{other}' (expected players, countries or player-countries)"
            )),
        }
    }
}

/// Leaderboard parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardQuery {
    /// Sort column.
    pub sort_by: String,
    /// Country filter.
    pub country: Option<String>,
    /// Continent filter.
    pub continent: Option<String>,
}

impl Default for LeaderboardQuery {
    fn default() -> Self {
        Self {
            sort_by: "tiles_count".to_string(),
            country: None,
            continent: None,
        }
    }
}

impl LeaderboardQuery {
    /// Appends the query parameters to `url`.
    pub fn apply(&self, url: &mut Url) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("sort_by", &self.sort_by);
        if let Some(country) = non_empty(self.country.as_deref()) {
            pairs.append_pair("country", country);
        }
        if let Some(continent) = non_empty(self.continent.as_deref()) {
            pairs.append_pair("continent", continent);
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
