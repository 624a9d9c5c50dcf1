//! Citation grammar — detects coded legal citations such as `CCCH.Art1545`,
//! `DL824.Art10` or the legacy `L20190 Artículo 5` form inside model output.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A raw `(key, article)` citation tuple, case-normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    /// Code shorthand, uppercased (`CCCH`, `L20190`, `DFL1.2006`, `DL824`).
    pub key: String,
    /// Article id, lowercased (`1545`, `41e`, `21bis`).
    pub article: String,
}

impl Citation {
    pub fn new(key: impl Into<String>, article: impl Into<String>) -> Self {
        Self {
            key: key.into().to_uppercase(),
            article: article.into().to_lowercase(),
        }
    }
}

/// Norm-key alternation.  Specific numbered forms and the well-known code
/// shorthands come first so they win over the generic uppercase alternative
/// at the same position.  The generic alternative is deliberately
/// case-sensitive: lowercase words like "el" or "la" must never be read as
/// code shorthands.
const KEY_PATTERN: &str = r"(?:(?i:DFL)\d+\.\d{4}|(?i:DL)\d+(?:\.\d{4})?|(?i:D)\d+\.\d{4}|(?i:L)\d{4,6}|(?i:CCCH|CPCH|CTRIB)|[A-Z]{2,10})";

/// Article id: digits plus an optional ordinal suffix or single letter.
const ARTICLE_PATTERN: &str =
    r"\d+(?:(?i:bis|ter|quater|quinquies|sexies|septies|octies|novies|decies)|[a-zA-Z])?";

fn compact_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"\b({KEY_PATTERN})\.(?i:Art)\.?({ARTICLE_PATTERN})\b"
        ))
        .expect("compact citation regex")
    })
}

fn legacy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"\b({KEY_PATTERN})\s+(?i:Art(?:[íi]culo)?)\.?\s*({ARTICLE_PATTERN})\b"
        ))
        .expect("legacy citation regex")
    })
}

/// Extract every citation in `text`, deduplicated, preserving the order of
/// first occurrence across both accepted syntaxes.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let mut hits: Vec<(usize, Citation)> = Vec::new();

    for re in [compact_regex(), legacy_regex()] {
        for caps in re.captures_iter(text) {
            let whole = caps.get(0).expect("match 0");
            let citation = Citation::new(&caps[1], &caps[2]);
            hits.push((whole.start(), citation));
        }
    }

    hits.sort_by_key(|(start, _)| *start);

    let mut seen: HashSet<Citation> = HashSet::new();
    let mut ordered = Vec::new();
    for (_, citation) in hits {
        if seen.insert(citation.clone()) {
            ordered.push(citation);
        }
    }
    ordered
}

/// Render a citation back into its canonical compact form (`KEY.ArtID`).
pub fn render_citation(citation: &Citation) -> String {
    format!("{}.Art{}", citation.key, citation.article)
}
