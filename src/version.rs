//! Schema version markers
//!
//! Each physical partner table has a persisted marker holding the descriptor
//! version that was last installed. Markers are compared with
//! [`compare_versions`]: dotted numeric components, missing components count
//! as zero, and a `-suffix` pre-release sorts before the plain release.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::db::StorageAdapter;
use crate::error::{PartnerTableError, Result};
use crate::models::Value;
use crate::schema::{quote_ident, versions};

/// A parsed version: numeric core plus optional pre-release suffix
#[derive(Debug, Clone)]
pub struct ParsedVersion {
    core: Vec<u64>,
    pre: Option<String>,
}

/// Parse `1.2.3`, `1.2`, `2`, `1.0.0-beta.1`, `v1.4`
#[must_use]
pub fn parse_version(raw: &str) -> Option<ParsedVersion> {
    let raw = raw.trim();
    let raw = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
    let (core, pre) = match raw.split_once('-') {
        Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
        Some(_) => return None,
        None => (raw, None),
    };

    let core = core
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    Some(ParsedVersion { core, pre })
}

impl Ord for ParsedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.core.len().max(other.core.len());
        for idx in 0..len {
            let a = self.core.get(idx).copied().unwrap_or(0);
            let b = other.core.get(idx).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {},
                unequal => return unequal,
            }
        }

        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialEq for ParsedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ParsedVersion {}

impl PartialOrd for ParsedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version strings. Unparseable versions sort before any
/// parseable one, so a garbage marker always triggers a reinstall.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Whether `installed` is strictly older than `target`
#[must_use]
pub fn is_older(installed: &str, target: &str) -> bool {
    compare_versions(installed, target) == Ordering::Less
}

/// Persisted table name → installed version mapping
pub trait VersionMarkerStore: Send + Sync {
    /// Installed version for a table, if any
    fn get(&self, table_name: &str) -> Result<Option<String>>;

    /// Record the installed version for a table
    fn set(&self, table_name: &str, version: &str) -> Result<()>;
}

/// Process-local markers, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct InMemoryVersionMarkers {
    markers: RwLock<HashMap<String, String>>,
}

impl InMemoryVersionMarkers {
    /// Empty marker store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionMarkerStore for InMemoryVersionMarkers {
    fn get(&self, table_name: &str) -> Result<Option<String>> {
        let markers = self
            .markers
            .read()
            .map_err(|_| PartnerTableError::Other("version marker lock poisoned".to_string()))?;
        Ok(markers.get(table_name).cloned())
    }

    fn set(&self, table_name: &str, version: &str) -> Result<()> {
        let mut markers = self
            .markers
            .write()
            .map_err(|_| PartnerTableError::Other("version marker lock poisoned".to_string()))?;
        markers.insert(table_name.to_string(), version.to_string());
        Ok(())
    }
}

/// Markers stored in the `partner_table_versions` table.
///
/// The table name is the primary key and writes are upserts, so concurrent
/// installers converge on a single marker row.
pub struct SqliteVersionMarkers {
    storage: Arc<dyn StorageAdapter>,
}

impl SqliteVersionMarkers {
    /// Create the marker table if needed
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Result<Self> {
        storage.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {name} TEXT PRIMARY KEY NOT NULL,
                {version} TEXT NOT NULL,
                {updated_at} TEXT NOT NULL
            );",
            table = quote_ident(versions::TABLE),
            name = quote_ident(versions::TABLE_NAME),
            version = quote_ident(versions::VERSION),
            updated_at = quote_ident(versions::UPDATED_AT),
        ))?;
        Ok(Self { storage })
    }
}

impl VersionMarkerStore for SqliteVersionMarkers {
    fn get(&self, table_name: &str) -> Result<Option<String>> {
        let rows = self.storage.query(
            &format!(
                "SELECT {version} FROM {table} WHERE {name} = ?1 LIMIT 1",
                table = quote_ident(versions::TABLE),
                name = quote_ident(versions::TABLE_NAME),
                version = quote_ident(versions::VERSION),
            ),
            &[Value::from(table_name)],
        )?;

        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove(versions::VERSION))
            .and_then(|value| value.as_str().map(ToString::to_string)))
    }

    fn set(&self, table_name: &str, version: &str) -> Result<()> {
        self.storage.execute(
            &format!(
                "INSERT INTO {table} ({name}, {version}, {updated_at}) VALUES (?1, ?2, ?3)
                 ON CONFLICT({name}) DO UPDATE SET {version} = excluded.{version}, {updated_at} = excluded.{updated_at}",
                table = quote_ident(versions::TABLE),
                name = quote_ident(versions::TABLE_NAME),
                version = quote_ident(versions::VERSION),
                updated_at = quote_ident(versions::UPDATED_AT),
            ),
            &[
                Value::from(table_name),
                Value::from(version),
                Value::from(Utc::now().to_rfc3339()),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStorage;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.0", "1.0.1"), Ordering::Less);
        assert_eq!(compare_versions("1.10.0", "1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("2.0.0-beta", "2.0.0"), Ordering::Less);
        assert_eq!(compare_versions("v1.2", "1.2.0"), Ordering::Equal);
    }

    #[test]
    fn test_unparseable_marker_is_older() {
        assert!(is_older("garbage", "1.0.0"));
        assert!(!is_older("1.0.0", "1.0.0"));
    }

    #[test]
    fn test_parse_version_rejects_bad_input() {
        assert!(parse_version("").is_none());
        assert!(parse_version("1..2").is_none());
        assert!(parse_version("1.0-").is_none());
        assert!(parse_version("1.x").is_none());
    }

    #[test]
    fn test_in_memory_markers() {
        let markers = InMemoryVersionMarkers::new();
        assert_eq!(markers.get("pt_location").unwrap(), None);
        markers.set("pt_location", "1.0.0").unwrap();
        assert_eq!(markers.get("pt_location").unwrap().as_deref(), Some("1.0.0"));
    }

    #[test]
    fn test_sqlite_markers_upsert() {
        let storage: Arc<dyn StorageAdapter> = Arc::new(SqliteStorage::in_memory().unwrap());
        let markers = SqliteVersionMarkers::new(storage.clone()).unwrap();

        markers.set("pt_location", "1.0.0").unwrap();
        markers.set("pt_location", "1.1.0").unwrap();

        assert_eq!(markers.get("pt_location").unwrap().as_deref(), Some("1.1.0"));
        let rows = storage.query("SELECT * FROM partner_table_versions", &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
