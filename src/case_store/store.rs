//! SQLite-backed case store.

use super::models::{CaseFilters, CaseRecord, CaseStatus};
use super::trait_def::CaseStore;
use anyhow::{anyhow, Context, Result};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cases (
    id TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    case_type TEXT NOT NULL DEFAULT 'external',
    category_id TEXT,
    status TEXT NOT NULL DEFAULT 'draft',
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (tenant_id, id)
);
CREATE TABLE IF NOT EXISTS case_tags (
    tenant_id TEXT NOT NULL,
    case_id TEXT NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (tenant_id, case_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_cases_tenant_status ON cases (tenant_id, status);
";

const CASE_COLUMNS: &str = "id, tenant_id, title, content, case_type, category_id, status";

/// SQLite-backed case store.
#[derive(Clone)]
pub struct SqliteCaseStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCaseStore {
    /// Open (or create) a case database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open case database at {:?}", db_path))?;
        info!("Opened case database at {:?}", db_path);
        Self::from_connection(conn)
    }

    /// Create a store backed by an in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create case schema")?;
        // Built-in lower() and LIKE only fold ASCII letters
        conn.create_scalar_function(
            "lower_unicode",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let text: Option<String> = ctx.get(0)?;
                Ok(text.map(|t| t.to_lowercase()))
            },
        )
        .context("Failed to register lower_unicode")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("case store connection lock poisoned"))
    }

    fn row_to_case(row: &Row) -> rusqlite::Result<CaseRecord> {
        let status: String = row.get(6)?;
        Ok(CaseRecord {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            case_type: row.get(4)?,
            category_id: row.get(5)?,
            tags: Vec::new(),
            status: CaseStatus::parse(&status).unwrap_or(CaseStatus::Draft),
        })
    }

    fn load_tags(conn: &Connection, case: &mut CaseRecord) -> Result<()> {
        let mut stmt = conn.prepare_cached(
            "SELECT tag FROM case_tags WHERE tenant_id = ?1 AND case_id = ?2 ORDER BY tag",
        )?;
        case.tags = stmt
            .query_map(params![case.tenant_id, case.id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(())
    }

    fn write_tags(conn: &Connection, case: &CaseRecord) -> Result<()> {
        conn.execute(
            "DELETE FROM case_tags WHERE tenant_id = ?1 AND case_id = ?2",
            params![case.tenant_id, case.id],
        )?;
        for tag in &case.tags {
            conn.execute(
                "INSERT OR IGNORE INTO case_tags (tenant_id, case_id, tag) VALUES (?1, ?2, ?3)",
                params![case.tenant_id, case.id, tag],
            )?;
        }
        Ok(())
    }

    /// Run a filtered SELECT and hydrate tags for each row.
    fn query_cases(
        conn: &Connection,
        where_clause: &str,
        params: Vec<String>,
        tail: &str,
    ) -> Result<Vec<CaseRecord>> {
        let sql = format!("SELECT {CASE_COLUMNS} FROM cases WHERE {where_clause} {tail}");
        let mut stmt = conn.prepare(&sql)?;
        let mut cases = stmt
            .query_map(params_from_iter(params.iter()), Self::row_to_case)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for case in cases.iter_mut() {
            Self::load_tags(conn, case)?;
        }
        Ok(cases)
    }
}

/// Build the WHERE clause for a tenant + filters query.
///
/// Returns the clause and its positional parameters, in order.
fn filter_clause(tenant_id: &str, filters: &CaseFilters) -> (String, Vec<String>) {
    let mut clause = String::from("tenant_id = ?1");
    let mut params = vec![tenant_id.to_string()];

    if let Some(category_id) = &filters.category_id {
        params.push(category_id.clone());
        clause.push_str(&format!(" AND category_id = ?{}", params.len()));
    }
    if let Some(case_type) = &filters.case_type {
        params.push(case_type.clone());
        clause.push_str(&format!(" AND case_type = ?{}", params.len()));
    }
    if !filters.tags.is_empty() {
        let mut placeholders = Vec::with_capacity(filters.tags.len());
        for tag in &filters.tags {
            params.push(tag.clone());
            placeholders.push(format!("?{}", params.len()));
        }
        clause.push_str(&format!(
            " AND (SELECT COUNT(DISTINCT t.tag) FROM case_tags t \
             WHERE t.tenant_id = cases.tenant_id AND t.case_id = cases.id \
             AND t.tag IN ({})) = {}",
            placeholders.join(", "),
            filters.tags.len()
        ));
    }

    (clause, params)
}

/// Escape LIKE wildcards so the needle matches literally.
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl CaseStore for SqliteCaseStore {
    fn get_case(&self, tenant_id: &str, case_id: &str) -> Result<Option<CaseRecord>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {CASE_COLUMNS} FROM cases WHERE tenant_id = ?1 AND id = ?2");
        let case = conn
            .query_row(&sql, params![tenant_id, case_id], Self::row_to_case)
            .optional()?;
        match case {
            Some(mut case) => {
                Self::load_tags(&conn, &mut case)?;
                Ok(Some(case))
            }
            None => Ok(None),
        }
    }

    fn insert_case(&self, case: &CaseRecord) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO cases (id, tenant_id, title, content, case_type, category_id, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                case.id,
                case.tenant_id,
                case.title,
                case.content,
                case.case_type,
                case.category_id,
                case.status.as_str()
            ],
        )
        .with_context(|| format!("Failed to insert case {}", case.id))?;
        Self::write_tags(&tx, case)?;
        tx.commit()?;
        Ok(())
    }

    fn update_case(&self, case: &CaseRecord) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE cases SET title = ?3, content = ?4, case_type = ?5, category_id = ?6, \
             status = ?7, updated_at = strftime('%s', 'now') WHERE tenant_id = ?1 AND id = ?2",
            params![
                case.tenant_id,
                case.id,
                case.title,
                case.content,
                case.case_type,
                case.category_id,
                case.status.as_str()
            ],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        Self::write_tags(&tx, case)?;
        tx.commit()?;
        Ok(true)
    }

    fn delete_case(&self, tenant_id: &str, case_id: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM case_tags WHERE tenant_id = ?1 AND case_id = ?2",
            params![tenant_id, case_id],
        )?;
        let deleted = tx.execute(
            "DELETE FROM cases WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, case_id],
        )?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn find_cases(
        &self,
        tenant_id: &str,
        filters: &CaseFilters,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CaseRecord>> {
        let conn = self.lock()?;
        let (clause, params) = filter_clause(tenant_id, filters);
        let tail = format!("ORDER BY id LIMIT {} OFFSET {}", limit, offset);
        Self::query_cases(&conn, &clause, params, &tail)
    }

    fn count_cases(&self, tenant_id: &str, filters: &CaseFilters) -> Result<usize> {
        let conn = self.lock()?;
        let (clause, params) = filter_clause(tenant_id, filters);
        let sql = format!("SELECT COUNT(*) FROM cases WHERE {clause}");
        let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |r| r.get(0))?;
        Ok(count as usize)
    }

    fn scan_text(
        &self,
        tenant_id: &str,
        needle: &str,
        filters: &CaseFilters,
        limit: usize,
    ) -> Result<Vec<CaseRecord>> {
        let needle = needle.trim();
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let (mut clause, mut params) = filter_clause(tenant_id, filters);
        params.push(CaseStatus::Published.as_str().to_string());
        clause.push_str(&format!(" AND status = ?{}", params.len()));
        params.push(format!("%{}%", escape_like(&needle.to_lowercase())));
        let p = params.len();
        clause.push_str(&format!(
            " AND (lower_unicode(title) LIKE ?{p} ESCAPE '\\' \
             OR lower_unicode(content) LIKE ?{p} ESCAPE '\\')"
        ));

        let tail = format!("ORDER BY id LIMIT {}", limit);
        Self::query_cases(&conn, &clause, params, &tail)
    }
}
