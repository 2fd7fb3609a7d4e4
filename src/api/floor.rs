//! Marketplace floor price extraction.
//!
//! The marketplace answers with JSON, but some deployments have served a
//! rendered page instead; the floor is then scraped from "N per tile" text.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::auth::compile_static_regex;

/// Page size of the marketplace sample the floor is read from.
pub const FLOOR_SAMPLE_ITEMS: u32 = 24;

static PER_TILE_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)([0-9]+[0-9.,]*)\s*per\s*tile"));
static PER_TILE_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)"price[_\-]?per[_\-]?tile":\s*([0-9]+[0-9.,]*)"#)
});

/// Where a floor price was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FloorSource {
    /// `landfields[].price / tileCount` of a JSON body.
    Json,
    /// Per-tile prices scraped from page text.
    Html,
}

/// Lowest price per tile on the first marketplace page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketFloor {
    /// Price per tile.
    pub ppt: f64,
    pub source: FloorSource,
}

/// Floor of a decoded marketplace body, if it lists any priced landfield.
#[must_use]
pub fn floor_from_json(body: &Value) -> Option<MarketFloor> {
    body.get("landfields")?
        .as_array()?
        .iter()
        .filter_map(|landfield| {
            let price = number(landfield.get("price")?)?;
            let tiles = number(landfield.get("tileCount")?)?;
            (price > 0.0 && tiles > 0.0).then_some(price / tiles)
        })
        .filter(|ppt| ppt.is_finite() && *ppt > 0.0)
        .min_by(f64::total_cmp)
        .map(|ppt| MarketFloor {
            ppt,
            source: FloorSource::Json,
        })
}

/// Floor scraped from page text: the smallest positive per-tile figure.
#[must_use]
pub fn floor_from_html(text: &str) -> Option<MarketFloor> {
    [&*PER_TILE_TEXT_RE, &*PER_TILE_FIELD_RE]
        .into_iter()
        .flat_map(|pattern| pattern.captures_iter(text))
        .filter_map(|captures| captures.get(1))
        .filter_map(|figure| figure.as_str().replace(',', "").parse::<f64>().ok())
        .filter(|ppt| ppt.is_finite() && *ppt > 0.0)
        .min_by(f64::total_cmp)
        .map(|ppt| MarketFloor {
            ppt,
            source: FloorSource::Html,
        })
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
