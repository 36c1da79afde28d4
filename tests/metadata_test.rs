//! The location table seen through the metadata interface

use std::sync::Arc;

use partner_tables::config::TablesConfig;
use partner_tables::db::{SqliteStorage, StorageAdapter};
use partner_tables::engine::PartnerTable;
use partner_tables::location::LocationTable;
use partner_tables::metadata::{Intercept, MetadataInterceptor, MetadataRegistry};
use partner_tables::models::{row, ListQuery, Value, WriteOutcome};
use partner_tables::repository::InMemoryContentSource;
use partner_tables::version::InMemoryVersionMarkers;

fn setup() -> (Arc<PartnerTable<LocationTable>>, MetadataRegistry) {
    let storage: Arc<dyn StorageAdapter> =
        Arc::new(SqliteStorage::in_memory().expect("Failed to open in-memory database"));
    let table = Arc::new(
        PartnerTable::open(
            LocationTable,
            storage,
            Arc::new(InMemoryContentSource::new()),
            Arc::new(InMemoryVersionMarkers::new()),
            &TablesConfig::default(),
        )
        .expect("Failed to open location table"),
    );

    let mut registry = MetadataRegistry::new();
    registry.register(table.clone());
    (table, registry)
}

#[test]
fn test_write_creates_then_updates_the_same_row() {
    let (table, registry) = setup();

    let first = registry
        .write(42, "pt_location", row([("city", "Reno"), ("zipcode", "89501")]))
        .expect("Failed to write metadata");
    assert_eq!(first, Intercept::Handled(WriteOutcome::Applied(1)));

    let stored = table
        .get_by("post_id", 42)
        .expect("Failed to read")
        .expect("Row should exist");
    assert_eq!(stored.get("post_id"), Some(&Value::Integer(42)));
    let row_id = stored.get("id").and_then(Value::as_i64).expect("Row should have an id");

    let second = registry
        .write(42, "pt_location", row([("city", "Sparks")]))
        .expect("Failed to write metadata");
    assert_eq!(second, Intercept::Handled(WriteOutcome::Applied(1)));

    let rows = table.search(&ListQuery::new()).expect("Failed to list");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id").and_then(Value::as_i64), Some(row_id));
    assert_eq!(rows[0].get("city"), Some(&Value::from("Sparks")));
    assert_eq!(rows[0].get("zipcode"), Some(&Value::from("89501")));
}

#[test]
fn test_write_forces_foreign_key_and_ignores_primary_key() {
    let (table, registry) = setup();

    registry
        .write(
            7,
            "pt_location",
            row([
                ("id", Value::Integer(500)),
                ("post_id", Value::Integer(8)),
                ("city", Value::from("Elko")),
            ]),
        )
        .expect("Failed to write metadata");

    assert_eq!(table.get(500).expect("Failed to read"), None);
    assert!(table.get_by("post_id", 8).expect("Failed to read").is_none());
    let stored = table
        .get_by("post_id", 7)
        .expect("Failed to read")
        .expect("Row should exist");
    assert_eq!(stored.get("city"), Some(&Value::from("Elko")));
}

#[test]
fn test_read_and_delete_through_the_registry() {
    let (_table, registry) = setup();
    registry
        .write(3, "pt_location", row([("state", "NV")]))
        .expect("Failed to write metadata");

    let read = registry.read(3, "pt_location").expect("Failed to read metadata");
    let value = read.handled().flatten().expect("Metadata should exist");
    assert_eq!(value.get("state"), Some(&Value::from("NV")));

    assert_eq!(
        registry.read(4, "pt_location").expect("Failed to read metadata"),
        Intercept::Handled(None)
    );

    assert_eq!(
        registry.delete(3, "pt_location").expect("Failed to delete metadata"),
        Intercept::Handled(WriteOutcome::Applied(1))
    );
    assert_eq!(
        registry.read(3, "pt_location").expect("Failed to read metadata"),
        Intercept::Handled(None)
    );
    assert_eq!(
        registry.delete(3, "pt_location").expect("Failed to delete metadata"),
        Intercept::Handled(WriteOutcome::NoMatch)
    );
}

#[test]
fn test_other_keys_pass_through() {
    let (table, registry) = setup();

    assert_eq!(registry.read(1, "_edit_lock").expect("read"), Intercept::Pass);
    assert_eq!(
        registry.write(1, "location", row([("city", "Reno")])).expect("write"),
        Intercept::Pass
    );
    assert_eq!(registry.delete(1, "pt_locations").expect("delete"), Intercept::Pass);
    assert!(table.search(&ListQuery::new()).expect("Failed to list").is_empty());

    assert_eq!(table.read_metadata(1, "_edit_lock").expect("read"), Intercept::Pass);
}

#[test]
fn test_invalid_item_ids_are_skipped() {
    let (_table, registry) = setup();

    assert_eq!(
        registry.write(0, "pt_location", row([("city", "Reno")])).expect("write"),
        Intercept::Handled(WriteOutcome::Skipped)
    );
    assert_eq!(
        registry.read(-1, "pt_location").expect("read"),
        Intercept::Handled(None)
    );
}

#[test]
fn test_meta_key_follows_prefix() {
    let storage: Arc<dyn StorageAdapter> =
        Arc::new(SqliteStorage::in_memory().expect("Failed to open in-memory database"));
    let settings = TablesConfig {
        table_prefix: String::new(),
        meta_key_prefix: "_".to_string(),
    };
    let table = PartnerTable::open(
        LocationTable,
        storage,
        Arc::new(InMemoryContentSource::new()),
        Arc::new(InMemoryVersionMarkers::new()),
        &settings,
    )
    .expect("Failed to open location table");

    assert_eq!(MetadataInterceptor::meta_key(&table), "_location");
    assert_eq!(
        table
            .write_metadata(5, "_location", row([("city", "Reno")]))
            .expect("write"),
        Intercept::Handled(WriteOutcome::Applied(1))
    );
    assert_eq!(table.write_metadata(5, "pt_location", row([("city", "Reno")])).expect("write"), Intercept::Pass);
}
