//! Resolves extracted citations against the normative store and renders the
//! two annex views: a verbose block for model-side verification and a clean
//! entry list for client rendering.

use std::sync::{Arc, OnceLock};

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::grammar::{extract_citations, render_citation, Citation};
use crate::store::{NormativeRecord, NormativeStore};

/// Characters of article text shown in the user view before truncation.
const USER_VIEW_TEXT_CHARS: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Directive prepended to the model view (e.g. instructions to verify
    /// quotes against the literal article text).  Loaded from tenant config.
    pub verification_directive: Option<String>,
    /// Record fields included in the model view, in order.
    pub model_view_fields: Vec<String>,
    /// Entry fields included in the user view.
    pub user_view_fields: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            verification_directive: None,
            model_view_fields: [
                "norma",
                "norma_tipo",
                "norma_organismo",
                "nombreparte",
                "url_norma_pdf",
                "clasificacion_norma",
                "metadatos_fechaversion",
                "rutacompleta",
                "texto",
            ]
            .map(str::to_string)
            .to_vec(),
            user_view_fields: ["key", "norm", "article", "url", "text", "text_full"]
                .map(str::to_string)
                .to_vec(),
        }
    }
}

/// A citation resolved to its database row.
#[derive(Debug, Clone)]
pub struct ResolvedCitation {
    pub citation: Citation,
    pub record: NormativeRecord,
}

/// The two views produced for a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnexViews {
    /// Verbose plain-text block for model-side verification.
    pub model_view: String,
    /// Clean entries for client rendering.
    pub user_view: Vec<Value>,
}

pub struct CitationResolver {
    store: Arc<dyn NormativeStore>,
    config: ResolverConfig,
}

fn dl_without_year() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^DL\d+$").expect("dl key regex"))
}

fn dl_variant(prefix: &str) -> Regex {
    Regex::new(&format!(r"^{}\.\d{{4}}$", regex::escape(prefix))).expect("dl variant regex")
}

impl CitationResolver {
    pub fn new(store: Arc<dyn NormativeStore>, config: ResolverConfig) -> Self {
        Self { store, config }
    }

    /// Extract citations from `text`, resolve them, and build both views.
    /// Returns `None` when no citation was detected or none resolved.
    pub fn process(&self, text: &str) -> Result<Option<AnnexViews>> {
        let citations = extract_citations(text);
        if citations.is_empty() {
            return Ok(None);
        }

        let mut resolved = Vec::new();
        for citation in citations {
            match self.resolve(&citation)? {
                Some(record) => resolved.push(ResolvedCitation { citation, record }),
                None => {
                    debug!(
                        key = %citation.key,
                        article = %citation.article,
                        "citation did not resolve"
                    );
                }
            }
        }

        if resolved.is_empty() {
            return Ok(None);
        }

        Ok(Some(AnnexViews {
            model_view: self.build_model_view(&resolved),
            user_view: self.build_user_view(&resolved),
        }))
    }

    /// Four-step resolution strategy; all lookups are case-normalized by the
    /// store.
    pub fn resolve(&self, citation: &Citation) -> Result<Option<NormativeRecord>> {
        let key = &citation.key;
        let article = &citation.article;

        if let Some(record) = self.store.find_exact(key, article)? {
            return Ok(Some(record));
        }

        let normalized = format!("articulo {article}");
        if let Some(record) = self.store.find_by_part_normalized(key, &normalized)? {
            return Ok(Some(record));
        }

        let patterns = vec![
            format!("%articulo {article}%"),
            format!("%artículo {article}%"),
            format!("%art. {article}%"),
        ];
        if let Some(record) = self.store.find_by_part_like(key, &patterns)? {
            return Ok(Some(record));
        }

        // DL shorthand without a year: resolve only when exactly one yeared
        // variant carries the requested article.
        if dl_without_year().is_match(key) {
            return self.resolve_dl_variant(key, article);
        }

        Ok(None)
    }

    fn resolve_dl_variant(&self, key: &str, article: &str) -> Result<Option<NormativeRecord>> {
        let variant_re = dl_variant(key);
        let candidates: Vec<String> = self
            .store
            .claves_with_prefix(key)?
            .into_iter()
            .filter(|clave| variant_re.is_match(clave))
            .collect();

        let mut hits = Vec::new();
        for clave in &candidates {
            if let Some(record) = self.store.find_exact(clave, article)? {
                hits.push(record);
            }
        }

        match hits.len() {
            1 => Ok(hits.pop()),
            0 => Ok(None),
            n => {
                warn!(key, article, variants = n, "ambiguous DL citation left unresolved");
                Ok(None)
            }
        }
    }

    // ─── view rendering ──────────────────────────────────────────────────

    fn build_model_view(&self, resolved: &[ResolvedCitation]) -> String {
        let mut out = String::new();
        if let Some(directive) = &self.config.verification_directive {
            out.push_str(directive);
            out.push_str("\n\n");
        }

        for item in resolved {
            out.push_str(&format!("### {}\n", render_citation(&item.citation)));
            for field in &self.config.model_view_fields {
                let value = record_field(&item.record, field);
                if value.is_empty() {
                    continue;
                }
                if field == "texto" {
                    out.push_str(&format!("texto:\n{value}\n"));
                } else {
                    out.push_str(&format!("{field}: {value}\n"));
                }
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    fn build_user_view(&self, resolved: &[ResolvedCitation]) -> Vec<Value> {
        resolved
            .iter()
            .map(|item| {
                let full = json!({
                    "key": render_citation(&item.citation),
                    "norm": item.record.norma,
                    "article": item.record.nombreparte,
                    "url": item.record.url_norma_pdf,
                    "text": truncate_chars(&item.record.texto, USER_VIEW_TEXT_CHARS),
                    "text_full": item.record.texto,
                });
                let obj = full.as_object().expect("user view entry object");
                let filtered: Map<String, Value> = self
                    .config
                    .user_view_fields
                    .iter()
                    .filter_map(|f| obj.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                Value::Object(filtered)
            })
            .collect()
    }
}

fn record_field(record: &NormativeRecord, field: &str) -> String {
    match field {
        "clave" => record.clave.clone(),
        "norma" => record.norma.clone(),
        "norma_tipo" => record.norma_tipo.clone(),
        "norma_organismo" => record.norma_organismo.clone(),
        "nombreparte" => record.nombreparte.clone(),
        "url_norma_pdf" => record.url_norma_pdf.clone(),
        "texto" => record.texto.clone(),
        "clasificacion_norma" => record.clasificacion_norma.clone(),
        "rutacompleta" => record.rutacompleta.clone(),
        "materias" => record.materias.clone(),
        "bloque_juridico" => record.bloque_juridico.clone(),
        "norma_idnorma" => record.norma_idnorma.clone(),
        "metadatos_idparte" => record.metadatos_idparte.clone(),
        "metadatos_fechaversion" => record.metadatos_fechaversion.clone(),
        _ => String::new(),
    }
}

/// Truncate on a char boundary; article texts are UTF-8 Spanish.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
