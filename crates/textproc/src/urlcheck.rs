//! URL validator — reconciles law-site URLs cited by the model against the
//! URLs present in retrieval evidence.  Incomplete citations (missing the
//! `idparte` query parameter) are repaired from evidence; citations with no
//! evidence counterpart are flagged.  The validator never introduces a URL
//! that is not present in evidence.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// One retrieval result chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceChunk {
    pub id: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlCorrection {
    pub original: String,
    pub corrected: String,
    pub norm: String,
    pub article: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlValidationStats {
    pub evidence_urls: usize,
    pub articles_indexed: usize,
    pub corrected: usize,
    pub warned: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlValidation {
    pub text: String,
    pub corrections: Vec<UrlCorrection>,
    pub warnings: Vec<String>,
    pub stats: UrlValidationStats,
}

// ─── URL syntaxes ────────────────────────────────────────────────────────────

/// Canonical law-site navigation URL.
fn canonical_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://[^\s\]\)"'<>]+/navigate\?[^\s\]\)"'<>]+"#).expect("canonical url")
    })
}

/// Legacy metadata line.
fn legacy_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\*\*ulr parte norma especifica pdf\*\*:\s*(https?://[^\s\]\)"'<>]+)"#)
            .expect("legacy url line")
    })
}

/// Current block markers.
fn block_markers() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#">>>ulr_start<<<\s*(https?://[^\s\]\)"'<>]+)\s*>>>ulr_end<<<"#)
            .expect("block url markers")
    })
}

/// Evidence chunk header line.
fn chunk_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^##\s+(.+?)\s*$").expect("chunk header"))
}

fn header_article() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)art[íi]culo\s+(\d+\w*)").expect("header article"))
}

fn idnorma_param() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"idnorma=(\d+)").expect("idnorma param"))
}

fn idparte_param() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"idparte=\d+").expect("idparte param"))
}

/// Complete iff both `idnorma` and `idparte` carry digits.
fn is_complete(url: &str) -> bool {
    idnorma_param().is_match(url) && idparte_param().is_match(url)
}

fn idnorma_value(url: &str) -> Option<&str> {
    idnorma_param()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Same host and path — the test for "a more complete form of the same
/// document" when query parameters differ.
fn same_document(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.host_str() == b.host_str() && a.path() == b.path(),
        _ => false,
    }
}

/// All URLs in `text` across the three accepted syntaxes, unique, in order
/// of first appearance.
pub(crate) fn extract_all_urls(text: &str) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = Vec::new();
    for m in canonical_url().find_iter(text) {
        hits.push((m.start(), m.as_str().to_string()));
    }
    for caps in legacy_line().captures_iter(text) {
        let m = caps.get(1).expect("legacy capture");
        hits.push((m.start(), m.as_str().to_string()));
    }
    for caps in block_markers().captures_iter(text) {
        let m = caps.get(1).expect("block capture");
        hits.push((m.start(), m.as_str().to_string()));
    }
    hits.sort_by_key(|(start, _)| *start);

    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for (_, url) in hits {
        if seen.insert(url.clone()) {
            urls.push(url);
        }
    }
    urls
}

// ─── Evidence indexing ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct UrlInfo {
    norm: String,
    article: String,
}

/// Derive `(norm_name_normalized, article_number)` from a chunk's leading
/// `##` header, e.g. `## codigo civil - dfl 1 2000 articulo 12`.
fn parse_chunk_key(body: &str) -> Option<(String, String)> {
    let header = chunk_header().captures(body)?.get(1)?.as_str();
    let article_caps = header_article().captures(header)?;
    let article_match = article_caps.get(0)?;
    let article = article_caps.get(1)?.as_str().to_lowercase();

    let norm = header[..article_match.start()]
        .trim()
        .trim_end_matches('-')
        .trim()
        .to_lowercase();
    if norm.is_empty() {
        return None;
    }
    Some((norm, article))
}

struct EvidenceIndex {
    /// Evidence URLs in insertion order (first occurrence wins).
    urls: Vec<(String, UrlInfo)>,
    article_to_url: HashMap<(String, String), String>,
    evidence_urls: usize,
}

impl EvidenceIndex {
    /// A cited URL is grounded when it appears verbatim in evidence, or when
    /// an evidence URL points at the same document with the same `idnorma`
    /// (the incomplete-citation case).
    fn lookup(&self, cited: &str) -> Option<&UrlInfo> {
        if let Some((_, info)) = self.urls.iter().find(|(url, _)| url == cited) {
            return Some(info);
        }
        let cited_idnorma = idnorma_value(cited)?;
        self.urls
            .iter()
            .find(|(url, _)| {
                idnorma_value(url) == Some(cited_idnorma) && same_document(url, cited)
            })
            .map(|(_, info)| info)
    }
}

fn index_evidence(evidence: &[EvidenceChunk]) -> EvidenceIndex {
    let mut urls: Vec<(String, UrlInfo)> = Vec::new();
    let mut article_to_url: HashMap<(String, String), String> = HashMap::new();
    let mut evidence_urls = 0usize;

    for chunk in evidence {
        let key = parse_chunk_key(&chunk.body);
        for url in extract_all_urls(&chunk.body) {
            evidence_urls += 1;
            let (norm, article) = key.clone().unwrap_or_default();
            if !urls.iter().any(|(existing, _)| *existing == url) {
                urls.push((url.clone(), UrlInfo { norm: norm.clone(), article: article.clone() }));
            }
            if norm.is_empty() {
                continue;
            }
            let map_key = (norm, article);
            match article_to_url.get(&map_key) {
                // First wins, but a complete URL displaces an incomplete one.
                Some(existing) if is_complete(existing) || !is_complete(&url) => {}
                _ => {
                    article_to_url.insert(map_key, url.clone());
                }
            }
        }
    }

    EvidenceIndex { urls, article_to_url, evidence_urls }
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Validate and repair law-site URLs in `text` against `evidence`.
pub fn validate_urls(text: &str, evidence: &[EvidenceChunk]) -> UrlValidation {
    let index = index_evidence(evidence);
    let cited = extract_all_urls(text);

    let mut corrections: Vec<UrlCorrection> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut replacements: HashMap<String, String> = HashMap::new();

    for url in &cited {
        match index.lookup(url) {
            Some(info) => {
                if is_complete(url) || info.norm.is_empty() {
                    continue;
                }
                let map_key = (info.norm.clone(), info.article.clone());
                if let Some(complete) = index.article_to_url.get(&map_key) {
                    if is_complete(complete) && complete != url {
                        replacements.insert(url.clone(), complete.clone());
                        corrections.push(UrlCorrection {
                            original: url.clone(),
                            corrected: complete.clone(),
                            norm: info.norm.clone(),
                            article: info.article.clone(),
                        });
                    }
                }
            }
            None => {
                warnings.push(format!("URL not grounded in retrieval evidence: {url}"));
            }
        }
    }

    // Rewrite matched spans whose text equals a replaced URL.  Span-wise
    // replacement (in reverse order) avoids corrupting URLs that contain a
    // shorter cited URL as a prefix.
    let mut output = text.to_string();
    if !replacements.is_empty() {
        let spans: Vec<(usize, usize, String)> = canonical_url()
            .find_iter(text)
            .filter_map(|m| {
                replacements
                    .get(m.as_str())
                    .map(|complete| (m.start(), m.end(), complete.clone()))
            })
            .collect();
        for (start, end, complete) in spans.into_iter().rev() {
            output.replace_range(start..end, &complete);
        }
    }

    debug!(
        cited = cited.len(),
        corrected = corrections.len(),
        warned = warnings.len(),
        "url validation finished"
    );

    let stats = UrlValidationStats {
        evidence_urls: index.evidence_urls,
        articles_indexed: index.article_to_url.len(),
        corrected: corrections.len(),
        warned: warnings.len(),
    };

    UrlValidation { text: output, corrections, warnings, stats }
}
