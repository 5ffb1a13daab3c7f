//! Backend plumbing for the storage gateway.
//!
//! SQL throughout the crate is written once, with `?` placeholders and only
//! portable constructs. This module owns the differences between the two
//! engines: placeholder syntax, mutation descriptors, and dynamic row
//! decoding. Callers never branch on which backend they are talking to.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Postgres, Row, Sqlite};

use crate::error::{Error, Result};

/// A parameter for the uniform query layer. Nulls bind as numeric nulls;
/// the only nullable bound columns in this schema are KPI actual/budget.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Option<f64>> for SqlValue {
    fn from(v: Option<f64>) -> Self {
        v.map(SqlValue::Real).unwrap_or(SqlValue::Null)
    }
}

/// Backend-normalized outcome of INSERT/UPDATE/DELETE. Postgres does not
/// report a last-insert id without RETURNING, so id-needing callers re-read
/// by natural key instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub last_insert_id: Option<i64>,
    pub rows_affected: u64,
}

/// One fetched row with dynamically typed columns, in select order.
#[derive(Debug, Clone)]
pub struct SqlRow {
    columns: Vec<(String, SqlValue)>,
}

impl SqlRow {
    pub fn value(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, value)| value)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.value(name)? {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn real(&self, name: &str) -> Option<f64> {
        match self.value(name)? {
            SqlValue::Real(v) => Some(*v),
            SqlValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.value(name)? {
            SqlValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Connection to one of the two supported engines.
pub enum Db {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl Db {
    /// Connect from a database URL. `postgres://` or `postgresql://` selects
    /// Postgres; anything else is treated as a SQLite location (URL form or
    /// bare path, `sqlite::memory:` included).
    pub async fn connect(database_url: &str) -> Result<Db> {
        if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .map_err(Error::StorageUnavailable)?;
            return Ok(Db::Postgres(pool));
        }

        let url = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{database_url}")
        };
        let file = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
        if !file.contains(":memory:") {
            if let Some(parent) = Path::new(file).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        log::debug!("could not create {}: {e}", parent.display());
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(Error::StorageUnavailable)?
            .create_if_missing(true);
        // One connection, never reaped: SQLite is single-writer here and an
        // in-memory database must not be split across pooled connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(Error::StorageUnavailable)?;
        Ok(Db::Sqlite(pool))
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Db::Postgres(_) => "postgres",
            Db::Sqlite(_) => "sqlite",
        }
    }

    /// Run a mutating statement written with `?` placeholders.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<ExecResult> {
        match self {
            Db::Postgres(pool) => {
                let sql = pg_placeholders(sql);
                let done = bind_pg(sqlx::query(&sql), params).execute(pool).await?;
                Ok(ExecResult {
                    last_insert_id: None,
                    rows_affected: done.rows_affected(),
                })
            }
            Db::Sqlite(pool) => {
                let done = bind_sqlite(sqlx::query(sql), params).execute(pool).await?;
                Ok(ExecResult {
                    last_insert_id: Some(done.last_insert_rowid()),
                    rows_affected: done.rows_affected(),
                })
            }
        }
    }

    /// Run a SELECT written with `?` placeholders and decode every row
    /// dynamically.
    pub async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        match self {
            Db::Postgres(pool) => {
                let sql = pg_placeholders(sql);
                let rows = bind_pg(sqlx::query(&sql), params).fetch_all(pool).await?;
                Ok(rows.iter().map(decode_pg_row).collect())
            }
            Db::Sqlite(pool) => {
                let rows = bind_sqlite(sqlx::query(sql), params).fetch_all(pool).await?;
                Ok(rows.iter().map(decode_sqlite_row).collect())
            }
        }
    }

    /// Convenience for single-row lookups.
    pub async fn fetch_optional(&self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlRow>> {
        Ok(self.fetch_all(sql, params).await?.into_iter().next())
    }
}

/// Rewrite `?` placeholders to `$1..$n` for Postgres. Question marks inside
/// quoted literals are left alone.
fn pg_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0usize;
    let mut in_literal = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                out.push(ch);
            }
            '?' if !in_literal => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

fn bind_pg<'q>(mut query: PgQuery<'q>, params: &[SqlValue]) -> PgQuery<'q> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<f64>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_sqlite<'q>(mut query: SqliteQuery<'q>, params: &[SqlValue]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<f64>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

// Dynamic decoding probes the handful of types this schema can produce.
// try_get skips the compatibility check for NULLs, so nulls land on the
// first probe as None.

fn decode_pg_row(row: &PgRow) -> SqlRow {
    let mut columns = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
            v.map(SqlValue::Int).unwrap_or(SqlValue::Null)
        } else if let Ok(v) = row.try_get::<Option<i32>, _>(i) {
            v.map(|n| SqlValue::Int(n as i64)).unwrap_or(SqlValue::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
            v.map(SqlValue::Real).unwrap_or(SqlValue::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(i) {
            v.map(SqlValue::Text).unwrap_or(SqlValue::Null)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
            v.map(|b| SqlValue::Int(b as i64)).unwrap_or(SqlValue::Null)
        } else {
            SqlValue::Null
        };
        columns.push((column.name().to_string(), value));
    }
    SqlRow { columns }
}

fn decode_sqlite_row(row: &SqliteRow) -> SqlRow {
    let mut columns = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
            v.map(SqlValue::Int).unwrap_or(SqlValue::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
            v.map(SqlValue::Real).unwrap_or(SqlValue::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(i) {
            v.map(SqlValue::Text).unwrap_or(SqlValue::Null)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(i) {
            v.map(|b| SqlValue::Int(b as i64)).unwrap_or(SqlValue::Null)
        } else {
            SqlValue::Null
        };
        columns.push((column.name().to_string(), value));
    }
    SqlRow { columns }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------
    // Placeholder rewriting
    // ------------------------------------------------------------------

    #[test]
    fn test_placeholders_are_numbered_in_order() {
        assert_eq!(
            pg_placeholders("INSERT INTO t (a, b, c) VALUES (?, ?, ?)"),
            "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn test_placeholders_inside_literals_are_untouched() {
        assert_eq!(
            pg_placeholders("SELECT * FROM t WHERE a = '?' AND b = ? AND c != 'null'"),
            "SELECT * FROM t WHERE a = '?' AND b = $1 AND c != 'null'"
        );
    }

    #[test]
    fn test_statement_without_placeholders_is_unchanged() {
        let ddl = "CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY)";
        assert_eq!(pg_placeholders(ddl), ddl);
    }

    // ------------------------------------------------------------------
    // SQLite round trip through the dynamic layer
    // ------------------------------------------------------------------

    async fn memory_db() -> Db {
        Db::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_execute_reports_mutation_descriptor() {
        let db = memory_db().await;
        db.execute(
            "CREATE TABLE samples (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, score REAL)",
            &[],
        )
        .await
        .unwrap();

        let first = db
            .execute(
                "INSERT INTO samples (name, score) VALUES (?, ?)",
                &[SqlValue::from("alpha"), SqlValue::from(12.5)],
            )
            .await
            .unwrap();
        assert_eq!(first.last_insert_id, Some(1));
        assert_eq!(first.rows_affected, 1);

        let update = db
            .execute("UPDATE samples SET score = ? WHERE name = ?", &[
                SqlValue::from(13.0),
                SqlValue::from("alpha"),
            ])
            .await
            .unwrap();
        assert_eq!(update.rows_affected, 1);
    }

    #[tokio::test]
    async fn test_fetch_decodes_typed_and_null_columns() {
        let db = memory_db().await;
        db.execute(
            "CREATE TABLE samples (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, score REAL)",
            &[],
        )
        .await
        .unwrap();
        db.execute(
            "INSERT INTO samples (name, score) VALUES (?, ?)",
            &[SqlValue::from("alpha"), SqlValue::Null],
        )
        .await
        .unwrap();

        let row = db
            .fetch_optional("SELECT id, name, score FROM samples WHERE name = ?", &[
                SqlValue::from("alpha"),
            ])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.int("id"), Some(1));
        assert_eq!(row.text("name"), Some("alpha"));
        assert_eq!(row.value("score"), Some(&SqlValue::Null));
        assert_eq!(row.real("score"), None);
        assert_eq!(row.value("missing"), None);
    }

    #[tokio::test]
    async fn test_in_memory_schema_survives_across_calls() {
        // The pool must hold one pinned connection or :memory: databases
        // would silently reset between statements.
        let db = memory_db().await;
        db.execute("CREATE TABLE t (v INTEGER)", &[]).await.unwrap();
        for i in 0..5 {
            db.execute("INSERT INTO t (v) VALUES (?)", &[SqlValue::Int(i)])
                .await
                .unwrap();
        }
        let rows = db.fetch_all("SELECT v FROM t ORDER BY v", &[]).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4].int("v"), Some(4));
    }
}
