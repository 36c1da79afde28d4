//! Versioned installs and additive column upgrades

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use partner_tables::config::TablesConfig;
use partner_tables::db::{ExecOutcome, SqliteStorage, StorageAdapter};
use partner_tables::descriptor::TableDescriptor;
use partner_tables::engine::PartnerTable;
use partner_tables::models::{row, Column, ColumnType, Row, SchemaStatus, Value};
use partner_tables::repository::InMemoryContentSource;
use partner_tables::schema::existing_columns;
use partner_tables::version::{InMemoryVersionMarkers, VersionMarkerStore};
use partner_tables::{PartnerTableError, Result};
use tempfile::TempDir;

/// Reviews table; `with_rating` is the second schema revision
struct ReviewsTable {
    with_rating: bool,
}

impl TableDescriptor for ReviewsTable {
    fn name(&self) -> &str {
        "reviews"
    }

    fn version(&self) -> &str {
        if self.with_rating {
            "1.1.0"
        } else {
            "1.0.0"
        }
    }

    fn primary_key(&self) -> &str {
        "id"
    }

    fn foreign_key(&self) -> &str {
        "item_id"
    }

    fn columns(&self) -> Vec<Column> {
        let mut columns = vec![
            Column::new("id", ColumnType::Integer),
            Column::new("item_id", ColumnType::Integer),
            Column::new("body", ColumnType::Text),
        ];
        if self.with_rating {
            columns.push(Column::new("rating", ColumnType::Integer));
        }
        columns
    }

    fn column_defaults(&self) -> Row {
        let mut defaults = row([("body", "")]);
        if self.with_rating {
            defaults.insert("rating".to_string(), Value::Integer(3));
        }
        defaults
    }

    fn item_types(&self) -> Vec<String> {
        vec!["product".to_string()]
    }
}

fn open(
    storage: &Arc<dyn StorageAdapter>,
    markers: &Arc<InMemoryVersionMarkers>,
    with_rating: bool,
) -> PartnerTable<ReviewsTable> {
    PartnerTable::new(
        ReviewsTable { with_rating },
        Arc::clone(storage),
        Arc::new(InMemoryContentSource::new()),
        markers.clone(),
        &TablesConfig::default(),
    )
    .expect("Failed to create reviews table")
}

#[test]
fn test_upgrade_adds_new_column_to_existing_rows() {
    let storage: Arc<dyn StorageAdapter> =
        Arc::new(SqliteStorage::in_memory().expect("Failed to open in-memory database"));
    let markers = Arc::new(InMemoryVersionMarkers::new());

    let v1 = open(&storage, &markers, false);
    v1.ensure_schema().expect("Failed to install v1");
    let id = v1
        .insert(row([("item_id", Value::Integer(9)), ("body", Value::from("great"))]))
        .expect("Failed to insert");
    assert!(v1.insert(row([("rating", 5)])).is_ok(), "undeclared columns are dropped");

    let v2 = open(&storage, &markers, true);
    let status = v2.ensure_schema().expect("Failed to upgrade");
    assert_eq!(
        status,
        SchemaStatus::Installed {
            previous: Some("1.0.0".to_string()),
            version: "1.1.0".to_string(),
        }
    );

    let columns = existing_columns(storage.as_ref(), "pt_reviews").expect("Failed to read columns");
    assert!(columns.contains(&"rating".to_string()));

    let stored = v2.get(id).expect("Failed to get").expect("Row should exist");
    assert_eq!(stored.get("rating"), Some(&Value::Integer(3)));
    assert_eq!(stored.get("body"), Some(&Value::from("great")));
    assert_eq!(markers.get("pt_reviews").expect("marker").as_deref(), Some("1.1.0"));
}

/// Holds every table introspection open for a while before returning
struct SlowIntrospection {
    inner: SqliteStorage,
}

impl StorageAdapter for SlowIntrospection {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let rows = self.inner.query(sql, params)?;
        if sql.starts_with("PRAGMA table_info") {
            thread::sleep(Duration::from_millis(300));
        }
        Ok(rows)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecOutcome> {
        self.inner.execute(sql, params)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.inner.execute_batch(sql)
    }
}

#[test]
fn test_concurrent_upgrades_both_succeed() {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let url = format!("sqlite://{}", dir.path().join("reviews.db").display());
    let connect = || SqliteStorage::open(&url, 2, Duration::from_secs(5)).expect("Failed to open database");
    let markers = Arc::new(InMemoryVersionMarkers::new());

    let base: Arc<dyn StorageAdapter> = Arc::new(connect());
    open(&base, &markers, false).ensure_schema().expect("Failed to install v1");

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let storage: Arc<dyn StorageAdapter> = Arc::new(SlowIntrospection { inner: connect() });
            let table = open(&storage, &markers, true);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                table.ensure_schema()
            })
        })
        .collect();

    for handle in handles {
        let status = handle.join().expect("upgrade thread panicked");
        assert!(status.is_ok(), "upgrade failed: {status:?}");
    }

    let columns = existing_columns(base.as_ref(), "pt_reviews").expect("Failed to read columns");
    assert_eq!(columns.iter().filter(|name| *name == "rating").count(), 1);
    assert_eq!(markers.get("pt_reviews").expect("marker").as_deref(), Some("1.1.0"));
}

#[test]
fn test_older_descriptor_does_not_downgrade() {
    let storage: Arc<dyn StorageAdapter> =
        Arc::new(SqliteStorage::in_memory().expect("Failed to open in-memory database"));
    let markers = Arc::new(InMemoryVersionMarkers::new());

    open(&storage, &markers, true).ensure_schema().expect("Failed to install v2");
    let status = open(&storage, &markers, false)
        .ensure_schema()
        .expect("Failed to check v1");

    assert_eq!(status, SchemaStatus::Current);
    assert_eq!(markers.get("pt_reviews").expect("marker").as_deref(), Some("1.1.0"));
}

#[test]
fn test_invalid_descriptor_is_rejected() {
    struct Broken;

    impl TableDescriptor for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        fn primary_key(&self) -> &str {
            "id"
        }

        fn foreign_key(&self) -> &str {
            "item_id"
        }

        fn columns(&self) -> Vec<Column> {
            vec![Column::new("id", ColumnType::Integer)]
        }

        fn column_defaults(&self) -> Row {
            Row::new()
        }

        fn item_types(&self) -> Vec<String> {
            vec!["post".to_string()]
        }
    }

    let storage: Arc<dyn StorageAdapter> =
        Arc::new(SqliteStorage::in_memory().expect("Failed to open in-memory database"));
    let result = PartnerTable::new(
        Broken,
        storage,
        Arc::new(InMemoryContentSource::new()),
        Arc::new(InMemoryVersionMarkers::new()),
        &TablesConfig::default(),
    );

    assert!(matches!(result, Err(PartnerTableError::InvalidDescriptor { .. })));
}
