use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, params_from_iter};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Article, Author};

const LOOKUP_CHUNK: usize = 500;
// SQLITE_MAX_VARIABLE_NUMBER in the bundled build.
const MAX_BOUND_PARAMS: usize = 32766;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not open database {path} after {attempts} attempts")]
    Connect {
        path: String,
        attempts: usize,
        #[source]
        source: rusqlite::Error,
    },
    #[error("stored timestamp `{0}` is not RFC 3339")]
    BadTimestamp(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn with_attempts(attempts: usize) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A row that can be bulk-inserted into one table.
pub trait InsertRow {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn values(&self) -> Vec<Value>;
}

/// Article-category association row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryLink {
    pub pratilipi_id: u64,
    pub category: String,
}

impl InsertRow for Article {
    const TABLE: &'static str = "pratilipi_scripts";
    const COLUMNS: &'static [&'static str] = &[
        "title",
        "read_count",
        "read_time",
        "language",
        "rating",
        "author_id",
        "pratilipi_id",
        "page_url",
        "tags",
        "site_updated_at",
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.title.clone()),
            Value::Integer(self.read_count as i64),
            Value::Integer(self.read_time as i64),
            Value::Text(self.language.clone()),
            Value::Real(self.rating),
            Value::Integer(self.author_id as i64),
            Value::Integer(self.pratilipi_id as i64),
            Value::Text(self.page_url.clone()),
            Value::Text(self.tags.join(",")),
            Value::Text(format_time(self.updated_at)),
        ]
    }
}

impl InsertRow for Author {
    const TABLE: &'static str = "pratilipi_authors";
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "follow_count",
        "read_count",
        "language",
        "gender",
        "pratilipi_id",
        "page_url",
        "site_registration_at",
    ];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            Value::Integer(self.follow_count as i64),
            Value::Integer(self.read_count as i64),
            Value::Text(self.language.clone()),
            Value::Text(self.gender.clone()),
            Value::Integer(self.pratilipi_id as i64),
            Value::Text(self.page_url.clone()),
            Value::Text(format_time(self.registered_at)),
        ]
    }
}

impl InsertRow for CategoryLink {
    const TABLE: &'static str = "pratilipi_categories";
    const COLUMNS: &'static [&'static str] = &["pratilipi_id", "category"];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.pratilipi_id as i64),
            Value::Text(self.category.clone()),
        ]
    }
}

// Fixed-width UTC form, so MAX() over the column orders chronologically.
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub struct Store {
    conn: Connection,
    retry: BackoffPolicy,
}

impl Store {
    /// Opens the database, retrying failed opens per `retry`, and creates the
    /// tables if needed. Backoff waits yield to the runtime.
    pub async fn connect(path: &Path, retry: BackoffPolicy) -> Result<Self, StoreError> {
        let mut attempt = 0;
        let conn = loop {
            match Connection::open(path) {
                Ok(conn) => break conn,
                Err(source) if attempt + 1 >= retry.max_attempts => {
                    return Err(StoreError::Connect {
                        path: path.display().to_string(),
                        attempts: attempt + 1,
                        source,
                    });
                }
                Err(e) => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(path = %path.display(), attempt = attempt + 1, error = %e, ?delay, "Database open failed; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        let store = Self { conn, retry };
        store.init()?;
        info!(path = %path.display(), "Database ready");
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            retry: BackoffPolicy::default(),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS pratilipi_scripts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                read_count INTEGER NOT NULL,
                read_time INTEGER NOT NULL DEFAULT 0,
                language TEXT NOT NULL,
                rating REAL NOT NULL,
                author_id INTEGER NOT NULL,
                pratilipi_id INTEGER NOT NULL UNIQUE,
                page_url TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '',
                site_updated_at TEXT NOT NULL,
                fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_scripts_updated_at
                ON pratilipi_scripts (site_updated_at);

            CREATE TABLE IF NOT EXISTS pratilipi_authors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                follow_count INTEGER NOT NULL,
                read_count INTEGER NOT NULL,
                language TEXT NOT NULL,
                gender TEXT NOT NULL,
                pratilipi_id INTEGER NOT NULL UNIQUE,
                page_url TEXT NOT NULL,
                site_registration_at TEXT NOT NULL,
                fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS pratilipi_categories (
                pratilipi_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                UNIQUE (pratilipi_id, category)
            );
            ",
        )?;
        Ok(())
    }

    /// Latest `site_updated_at` among stored articles.
    pub fn latest_update(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let latest: Option<String> = self.conn.query_row(
            "SELECT MAX(site_updated_at) FROM pratilipi_scripts",
            [],
            |row| row.get(0),
        )?;

        latest
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| StoreError::BadTimestamp(s))
            })
            .transpose()
    }

    pub fn existing_article_ids(&self) -> Result<Vec<u64>, StoreError> {
        self.ids("SELECT pratilipi_id FROM pratilipi_scripts")
    }

    pub fn existing_author_ids(&self) -> Result<Vec<u64>, StoreError> {
        self.ids("SELECT pratilipi_id FROM pratilipi_authors")
    }

    fn ids(&self, sql: &str) -> Result<Vec<u64>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;

        let mut ids = Vec::new();
        for id in rows {
            ids.push(id? as u64);
        }
        Ok(ids)
    }

    /// Stored category links among the given article ids.
    pub fn existing_category_links(&self, ids: &[u64]) -> Result<HashSet<CategoryLink>, StoreError> {
        let mut links = HashSet::new();

        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT pratilipi_id, category FROM pratilipi_categories WHERE pratilipi_id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter().map(|id| *id as i64)), |row| {
                Ok(CategoryLink {
                    pratilipi_id: row.get::<_, i64>(0)? as u64,
                    category: row.get(1)?,
                })
            })?;
            for link in rows {
                links.insert(link?);
            }
        }

        Ok(links)
    }

    /// Bulk-inserts `rows`, `batch_size` rows per statement. Rows whose unique
    /// key is already stored are ignored. Returns the number of rows written.
    pub async fn insert_rows<R: InsertRow>(&self, rows: &[R], batch_size: usize) -> Result<usize, StoreError> {
        let per_statement = rows_per_statement(batch_size, R::COLUMNS.len());
        if per_statement < batch_size {
            warn!(table = R::TABLE, batch_size, per_statement, "Batch size exceeds SQLite parameter limit; clamping");
        }

        let mut inserted = 0;
        for chunk in rows.chunks(per_statement) {
            let sql = insert_sql(R::TABLE, R::COLUMNS, chunk.len());
            let values: Vec<Value> = chunk.iter().flat_map(R::values).collect();
            inserted += self
                .with_retry(R::TABLE, |conn| {
                    conn.execute(&sql, params_from_iter(values.iter()))
                })
                .await?;
        }

        info!(table = R::TABLE, rows = rows.len(), inserted, "Inserted rows");
        Ok(inserted)
    }

    /// Runs `op`, retrying busy/locked failures per the store's policy.
    async fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            match op(&self.conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(what, attempt = attempt + 1, error = %e, ?delay, "Transient database error; retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn rows_per_statement(batch_size: usize, columns: usize) -> usize {
    let limit = (MAX_BOUND_PARAMS / columns.max(1)).max(1);
    batch_size.clamp(1, limit)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn insert_sql(table: &str, columns: &[&str], rows: usize) -> String {
    let row = format!("({})", placeholders(columns.len()));
    format!(
        "INSERT OR IGNORE INTO {table} ({}) VALUES {}",
        columns.join(", "),
        vec![row.as_str(); rows].join(", ")
    )
}
