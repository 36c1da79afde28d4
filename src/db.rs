//! Storage adapter and SQLite connection pooling
//!
//! The engine only ever talks to storage through [`StorageAdapter`]: bound
//! parameters in, rows or an [`ExecOutcome`] out. [`SqliteStorage`] is the
//! reference backend.

use std::fs;
use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params_from_iter;
use tracing::{debug, trace};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Row, Value};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
/// A connection checked out of [`DbPool`]
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Result of a write statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Rows changed (or matched) by the statement
    pub affected_rows: usize,
    /// Row id generated by the most recent insert on the connection
    pub last_insert_id: i64,
}

/// Query/execute capability over a relational backend.
///
/// Implementations must bind `params` positionally (`?1`, `?2`, ...) and
/// never splice them into the statement text.
#[cfg_attr(test, mockall::automock)]
pub trait StorageAdapter: Send + Sync {
    /// Run a statement that returns rows
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run a single write statement
    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome>;

    /// Run one or more parameterless statements (DDL)
    fn execute_batch(&self, sql: &str) -> Result<()>;
}

/// SQLite storage backed by an r2d2 connection pool
#[derive(Clone)]
pub struct SqliteStorage {
    pool: DbPool,
}

impl SqliteStorage {
    /// Open (creating if needed) a SQLite database.
    ///
    /// `url` may be `sqlite:path`, `sqlite://path`, a plain path or `:memory:`.
    pub fn open(url: &str, max_connections: u32, connection_timeout: Duration) -> Result<Self> {
        let path = database_path(url);
        if path == ":memory:" {
            return Self::in_memory();
        }

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(connection_timeout)
            .build(manager)?;

        debug!(path, max_connections, "Opened SQLite pool");
        Ok(Self { pool })
    }

    /// Open using the `[database]` configuration section
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::open(
            &config.url,
            config.max_connections,
            Duration::from_secs(config.connection_timeout_secs),
        )
    }

    /// A private in-memory database.
    ///
    /// Every SQLite memory connection is its own database, so the pool is
    /// capped at a single connection.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        Ok(Self { pool })
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }
}

impl StorageAdapter for SqliteStorage {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        trace!(sql, params = params.len(), "query");
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let row_iter = stmt.query_map(params_from_iter(params.iter()), |sql_row| {
            let mut record = Row::new();
            for (idx, name) in names.iter().enumerate() {
                record.insert(name.clone(), sql_row.get::<_, Value>(idx)?);
            }
            Ok(record)
        })?;

        let mut results = Vec::new();
        for record in row_iter {
            results.push(record?);
        }

        Ok(results)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome> {
        trace!(sql, params = params.len(), "execute");
        let conn = self.get_connection()?;
        let affected_rows = conn.execute(sql, params_from_iter(params.iter()))?;

        Ok(ExecOutcome {
            affected_rows,
            last_insert_id: conn.last_insert_rowid(),
        })
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        trace!(sql, "execute_batch");
        let conn = self.get_connection()?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

/// Strip a `sqlite:` / `sqlite://` scheme from a database URL
#[must_use]
pub fn database_path(url: &str) -> &str {
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path_strips_scheme() {
        assert_eq!(database_path("sqlite:data/tables.db"), "data/tables.db");
        assert_eq!(database_path("sqlite:///tmp/x.db"), "/tmp/x.db");
        assert_eq!(database_path("plain.db"), "plain.db");
        assert_eq!(database_path("sqlite::memory:"), ":memory:");
    }

    #[test]
    fn test_query_and_execute_round_trip() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, score REAL)")
            .unwrap();

        let outcome = storage
            .execute(
                "INSERT INTO t (name, score) VALUES (?1, ?2)",
                &[Value::from("alpha"), Value::Float(1.5)],
            )
            .unwrap();
        assert_eq!(outcome.affected_rows, 1);
        assert_eq!(outcome.last_insert_id, 1);

        let rows = storage.query("SELECT * FROM t WHERE name = ?1", &[Value::from("alpha")]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Value::Integer(1)));
        assert_eq!(rows[0].get("score"), Some(&Value::Float(1.5)));
    }

    #[test]
    fn test_bound_parameters_are_not_interpreted() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage.execute_batch("CREATE TABLE t (name TEXT)").unwrap();
        storage
            .execute("INSERT INTO t (name) VALUES (?1)", &[Value::from("x'); DROP TABLE t; --")])
            .unwrap();

        let rows = storage.query("SELECT name FROM t", &[]).unwrap();
        assert_eq!(rows[0].get("name"), Some(&Value::from("x'); DROP TABLE t; --")));
    }
}
