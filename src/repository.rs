use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::db::StorageAdapter;
use crate::error::{PartnerTableError, Result};
use crate::models::{ContentItem, Row, Value};
use crate::schema::{id_list_param, id_list_sql, items, quote_ident};

/// Something side-table columns can be merged onto
pub trait Attachable {
    /// Id referenced by the side table's foreign key
    fn item_id(&self) -> i64;

    /// Content type tag
    fn item_type(&self) -> &str;

    /// Set (or overwrite) a field
    fn merge_field(&mut self, name: &str, value: Value);
}

impl Attachable for ContentItem {
    fn item_id(&self) -> i64 {
        self.id
    }

    fn item_type(&self) -> &str {
        &self.item_type
    }

    fn merge_field(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }
}

/// Fetches host content items by id
#[cfg_attr(test, mockall::automock)]
pub trait ContentSource: Send + Sync {
    /// Items for `ids`, in the order requested; unknown ids are skipped
    fn fetch_batch(&self, ids: &[i64]) -> Result<Vec<ContentItem>>;

    /// A single item
    fn fetch(&self, id: i64) -> Result<Option<ContentItem>> {
        Ok(self.fetch_batch(&[id])?.into_iter().next())
    }
}

/// Content items held in memory
#[derive(Debug, Default)]
pub struct InMemoryContentSource {
    items: RwLock<BTreeMap<i64, ContentItem>>,
}

impl InMemoryContentSource {
    /// Empty source
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an item
    pub fn insert(&self, item: ContentItem) -> Result<()> {
        let mut items = self
            .items
            .write()
            .map_err(|_| PartnerTableError::ContentSource("content lock poisoned".to_string()))?;
        items.insert(item.id, item);
        Ok(())
    }
}

impl FromIterator<ContentItem> for InMemoryContentSource {
    fn from_iter<I: IntoIterator<Item = ContentItem>>(items: I) -> Self {
        Self {
            items: RwLock::new(items.into_iter().map(|item| (item.id, item)).collect()),
        }
    }
}

impl ContentSource for InMemoryContentSource {
    fn fetch_batch(&self, ids: &[i64]) -> Result<Vec<ContentItem>> {
        let items = self
            .items
            .read()
            .map_err(|_| PartnerTableError::ContentSource("content lock poisoned".to_string()))?;
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }
}

/// Content items read from a host table with `id` and `item_type` columns;
/// every other column becomes a field.
pub struct SqliteContentSource {
    storage: Arc<dyn StorageAdapter>,
    table: String,
}

impl SqliteContentSource {
    /// Read items from `table`
    pub fn new(storage: Arc<dyn StorageAdapter>, table: impl Into<String>) -> Self {
        Self {
            storage,
            table: table.into(),
        }
    }

    /// Create the items table if it doesn't exist
    pub fn ensure_table(&self) -> Result<()> {
        self.storage.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                {id} INTEGER PRIMARY KEY AUTOINCREMENT,
                {item_type} TEXT NOT NULL,
                {title} TEXT NOT NULL DEFAULT ''
            );",
            table = quote_ident(&self.table),
            id = quote_ident(items::ID),
            item_type = quote_ident(items::ITEM_TYPE),
            title = quote_ident(items::TITLE),
        ))
    }

    /// Add an item, returning its id
    pub fn add_item(&self, item_type: &str, title: &str) -> Result<i64> {
        if item_type.trim().is_empty() {
            return Err(PartnerTableError::InvalidArgument("item_type cannot be empty".to_string()));
        }
        let outcome = self.storage.execute(
            &format!(
                "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
                quote_ident(&self.table),
                quote_ident(items::ITEM_TYPE),
                quote_ident(items::TITLE)
            ),
            &[Value::from(item_type), Value::from(title)],
        )?;
        Ok(outcome.last_insert_id)
    }

    fn to_item(mut row: Row) -> Result<ContentItem> {
        let id = row
            .remove(items::ID)
            .and_then(|value| value.as_i64())
            .ok_or_else(|| PartnerTableError::ContentSource("item row without an integer id".to_string()))?;
        let item_type = match row.remove(items::ITEM_TYPE) {
            Some(Value::Text(item_type)) => item_type,
            _ => return Err(PartnerTableError::ContentSource(format!("item {id} has no item_type"))),
        };

        Ok(ContentItem {
            id,
            item_type,
            fields: row,
        })
    }
}

impl ContentSource for SqliteContentSource {
    fn fetch_batch(&self, ids: &[i64]) -> Result<Vec<ContentItem>> {
        let unique: BTreeSet<i64> = ids.iter().copied().collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.storage.query(
            &format!(
                "SELECT * FROM {} WHERE {} IN {}",
                quote_ident(&self.table),
                quote_ident(items::ID),
                id_list_sql(1)
            ),
            &[id_list_param(&unique)?],
        )?;

        let mut by_id = HashMap::with_capacity(rows.len());
        for row in rows {
            let item = Self::to_item(row)?;
            by_id.insert(item.id, item);
        }

        Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
    }
}
