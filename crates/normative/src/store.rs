//! Keyed lookup into the pre-built normative database.
//!
//! The production backend opens the SQLite database read-only; it is shared
//! across threads behind a mutex because a turn performs at most a handful of
//! point lookups.  The in-memory backend backs tests and fixtures.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// One resolved row of the normative database (§ column names follow the
/// database schema, which is Spanish throughout).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormativeRecord {
    pub clave: String,
    pub norma: String,
    pub norma_tipo: String,
    pub norma_organismo: String,
    pub nombreparte: String,
    pub url_norma_pdf: String,
    pub texto: String,
    pub clasificacion_norma: String,
    pub rutacompleta: String,
    pub materias: String,
    pub bloque_juridico: String,
    pub norma_idnorma: String,
    pub metadatos_idparte: String,
    pub metadatos_fechaversion: String,
}

/// Read-only keyed lookup used by the citation resolver.
pub trait NormativeStore: Send + Sync {
    /// Exact match on `(clave, numero_articulo)`.
    fn find_exact(&self, clave: &str, numero_articulo: &str) -> Result<Option<NormativeRecord>>;

    /// Match on `(clave, nombreparte_normalizado)`.
    fn find_by_part_normalized(
        &self,
        clave: &str,
        nombreparte_normalizado: &str,
    ) -> Result<Option<NormativeRecord>>;

    /// Fuzzy match on `nombreparte` against any of the given LIKE patterns.
    fn find_by_part_like(&self, clave: &str, patterns: &[String])
        -> Result<Option<NormativeRecord>>;

    /// Distinct `clave` values starting with `prefix`.
    fn claves_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

// ─── SQLite backend ──────────────────────────────────────────────────────────

const COLUMNS: &str = "clave, norma, norma_tipo, norma_organismo, nombreparte, \
    url_norma_pdf, texto, clasificacion_norma, rutacompleta, materias, \
    bloque_juridico, norma_idnorma, metadatos_idparte, metadatos_fechaversion";

pub struct SqliteNormativeStore {
    conn: Mutex<Connection>,
}

impl SqliteNormativeStore {
    /// Open the database read-only.  The file is pre-built by an external
    /// pipeline; this process never writes to it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("open normative db {}", path.as_ref().display()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<NormativeRecord> {
        Ok(NormativeRecord {
            clave: row.get(0)?,
            norma: row.get(1)?,
            norma_tipo: row.get(2)?,
            norma_organismo: row.get(3)?,
            nombreparte: row.get(4)?,
            url_norma_pdf: row.get(5)?,
            texto: row.get(6)?,
            clasificacion_norma: row.get(7)?,
            rutacompleta: row.get(8)?,
            materias: row.get(9)?,
            bloque_juridico: row.get(10)?,
            norma_idnorma: row.get(11)?,
            metadatos_idparte: row.get(12)?,
            metadatos_fechaversion: row.get(13)?,
        })
    }
}

impl NormativeStore for SqliteNormativeStore {
    fn find_exact(&self, clave: &str, numero_articulo: &str) -> Result<Option<NormativeRecord>> {
        let conn = self.conn.lock().expect("normative db lock");
        let sql = format!(
            "SELECT {COLUMNS} FROM normas \
             WHERE clave = ?1 COLLATE NOCASE AND numero_articulo = ?2 COLLATE NOCASE \
             LIMIT 1"
        );
        conn.query_row(&sql, (clave, numero_articulo), Self::record_from_row)
            .optional()
            .context("normative exact lookup")
    }

    fn find_by_part_normalized(
        &self,
        clave: &str,
        nombreparte_normalizado: &str,
    ) -> Result<Option<NormativeRecord>> {
        let conn = self.conn.lock().expect("normative db lock");
        let sql = format!(
            "SELECT {COLUMNS} FROM normas \
             WHERE clave = ?1 COLLATE NOCASE \
             AND nombreparte_normalizado = ?2 COLLATE NOCASE \
             LIMIT 1"
        );
        conn.query_row(&sql, (clave, nombreparte_normalizado), Self::record_from_row)
            .optional()
            .context("normative normalized-part lookup")
    }

    fn find_by_part_like(
        &self,
        clave: &str,
        patterns: &[String],
    ) -> Result<Option<NormativeRecord>> {
        let conn = self.conn.lock().expect("normative db lock");
        let sql = format!(
            "SELECT {COLUMNS} FROM normas \
             WHERE clave = ?1 COLLATE NOCASE AND nombreparte LIKE ?2 \
             LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        for pattern in patterns {
            let found = stmt
                .query_row((clave, pattern), Self::record_from_row)
                .optional()
                .context("normative LIKE lookup")?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    fn claves_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("normative db lock");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT clave FROM normas WHERE clave LIKE ?1 || '%' ORDER BY clave",
        )?;
        let rows = stmt.query_map([prefix], |row| row.get::<_, String>(0))?;
        let mut claves = Vec::new();
        for clave in rows {
            claves.push(clave?);
        }
        Ok(claves)
    }
}

// ─── In-memory backend ───────────────────────────────────────────────────────

/// In-memory store for tests and fixture data.  Rows carry the extra lookup
/// columns (`numero_articulo`, `nombreparte_normalizado`) alongside the
/// record itself.
#[derive(Debug, Default)]
pub struct MemoryNormativeStore {
    rows: Vec<MemoryRow>,
}

#[derive(Debug, Clone)]
struct MemoryRow {
    numero_articulo: String,
    nombreparte_normalizado: String,
    record: NormativeRecord,
}

impl MemoryNormativeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        numero_articulo: impl Into<String>,
        nombreparte_normalizado: impl Into<String>,
        record: NormativeRecord,
    ) {
        self.rows.push(MemoryRow {
            numero_articulo: numero_articulo.into(),
            nombreparte_normalizado: nombreparte_normalizado.into(),
            record,
        });
    }
}

/// SQL LIKE over an in-memory string: `%` wildcard only, case-insensitive.
fn like_matches(pattern: &str, value: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let value = value.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();
    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match value[pos..].find(part) {
            Some(found) => {
                // A pattern not starting with `%` must match at the start.
                if i == 0 && found != 0 {
                    return false;
                }
                pos += found + part.len();
            }
            None => return false,
        }
    }
    // A pattern not ending with `%` must consume the whole value.
    if !pattern.ends_with('%') && pos != value.len() {
        return false;
    }
    true
}

impl NormativeStore for MemoryNormativeStore {
    fn find_exact(&self, clave: &str, numero_articulo: &str) -> Result<Option<NormativeRecord>> {
        Ok(self
            .rows
            .iter()
            .find(|row| {
                row.record.clave.eq_ignore_ascii_case(clave)
                    && row.numero_articulo.eq_ignore_ascii_case(numero_articulo)
            })
            .map(|row| row.record.clone()))
    }

    fn find_by_part_normalized(
        &self,
        clave: &str,
        nombreparte_normalizado: &str,
    ) -> Result<Option<NormativeRecord>> {
        Ok(self
            .rows
            .iter()
            .find(|row| {
                row.record.clave.eq_ignore_ascii_case(clave)
                    && row
                        .nombreparte_normalizado
                        .eq_ignore_ascii_case(nombreparte_normalizado)
            })
            .map(|row| row.record.clone()))
    }

    fn find_by_part_like(
        &self,
        clave: &str,
        patterns: &[String],
    ) -> Result<Option<NormativeRecord>> {
        for pattern in patterns {
            let found = self.rows.iter().find(|row| {
                row.record.clave.eq_ignore_ascii_case(clave)
                    && like_matches(pattern, &row.record.nombreparte)
            });
            if let Some(row) = found {
                return Ok(Some(row.record.clone()));
            }
        }
        Ok(None)
    }

    fn claves_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_lowercase();
        let claves: BTreeSet<String> = self
            .rows
            .iter()
            .filter(|row| row.record.clave.to_lowercase().starts_with(&prefix))
            .map(|row| row.record.clave.clone())
            .collect();
        Ok(claves.into_iter().collect())
    }
}
