//! HTML form scraping for the identity provider's email and password pages.
//!
//! Pages are not rendered or scripted: the first `<form>` tag supplies the
//! submission target and every `type="hidden"` input is echoed back verbatim.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static FORM_TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(?is)<form\b[^>]*>"));
static INPUT_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<input\b[^>]*>"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
    )
});

/// Submission target and hidden fields scraped from one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormExtraction {
    /// Raw `action` attribute (entity-decoded, not yet normalized).
    pub action: String,
    /// Hidden input name to value; a repeated name keeps its last value.
    pub hidden_fields: BTreeMap<String, String>,
}

impl FormExtraction {
    /// Builds the url-encoded body: all hidden fields plus one submitted field.
    ///
    /// The submitted field replaces a hidden field of the same name.
    #[must_use]
    pub fn form_body(&self, field: &str, value: &str) -> Vec<(String, String)> {
        let mut body: Vec<(String, String)> = self
            .hidden_fields
            .iter()
            .filter(|(name, _)| name.as_str() != field)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        body.push((field.to_string(), value.to_string()));
        body
    }
}

/// Scrapes the first form's action and all hidden inputs from `html`.
///
/// Returns `None` when the page has no `<form>` tag with an `action`.
#[must_use]
pub fn extract_form(html: &str) -> Option<FormExtraction> {
    let form_tag = FORM_TAG_RE.find(html)?;
    let action = attributes(form_tag.as_str())
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("action"))
        .map(|(_, value)| value)
        .filter(|value| !value.trim().is_empty())?;

    let mut hidden_fields = BTreeMap::new();
    for input in INPUT_TAG_RE.find_iter(html) {
        let attrs = attributes(input.as_str());
        let is_hidden = attrs
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case("type") && value.eq_ignore_ascii_case("hidden"));
        if !is_hidden {
            continue;
        }
        let Some(name) = attr_value(&attrs, "name") else {
            continue;
        };
        let value = attr_value(&attrs, "value").unwrap_or_default();
        hidden_fields.insert(name, value);
    }

    Some(FormExtraction {
        action,
        hidden_fields,
    })
}

fn attributes(tag: &str) -> Vec<(String, String)> {
    ATTR_RE
        .captures_iter(tag)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_string();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map_or("", |m| m.as_str());
            Some((name, decode_entities(value)))
        })
        .collect()
}

fn attr_value(attrs: &[(String, String)], wanted: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
        .map(|(_, value)| value.clone())
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#x2F;", "/")
        .replace("&amp;", "&")
}
