//! Location side table: city, state, zipcode and coordinates for posts and pages.

use crate::db::StorageAdapter;
use crate::descriptor::TableDescriptor;
use crate::engine::PartnerTable;
use crate::error::Result;
use crate::models::{row, Column, ColumnType, ContentItem, Row, Value};
use crate::schema::{self, quote_ident};

/// Descriptor for the `location` partner table
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationTable;

impl TableDescriptor for LocationTable {
    fn name(&self) -> &str {
        "location"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn primary_key(&self) -> &str {
        "id"
    }

    fn foreign_key(&self) -> &str {
        "post_id"
    }

    fn columns(&self) -> Vec<Column> {
        vec![
            Column::new("id", ColumnType::Integer),
            Column::new("post_id", ColumnType::Integer),
            Column::new("city", ColumnType::Text),
            Column::new("state", ColumnType::Text),
            Column::new("zipcode", ColumnType::Text),
            Column::new("lat", ColumnType::Float),
            Column::new("long", ColumnType::Float),
        ]
    }

    fn column_defaults(&self) -> Row {
        row([
            ("post_id", Value::Integer(0)),
            ("city", Value::from("")),
            ("state", Value::from("")),
            ("zipcode", Value::from("")),
            ("lat", Value::from("")),
            ("long", Value::from("")),
        ])
    }

    fn item_types(&self) -> Vec<String> {
        vec!["page".to_string(), "post".to_string()]
    }

    fn auto_join(&self) -> bool {
        true
    }

    fn install(&self, storage: &dyn StorageAdapter, table_name: &str) -> Result<()> {
        let table = quote_ident(table_name);
        storage.execute_batch(&format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
                "id" INTEGER PRIMARY KEY AUTOINCREMENT,
                "post_id" INTEGER NOT NULL,
                "city" TEXT NOT NULL,
                "state" TEXT NOT NULL,
                "zipcode" TEXT NOT NULL,
                "lat" REAL NOT NULL,
                "long" REAL NOT NULL
            );
            {index}"#,
            index = schema::foreign_key_index_sql(self, table_name),
        ))?;
        schema::add_missing_columns(storage, self, table_name)?;
        Ok(())
    }
}

impl PartnerTable<LocationTable> {
    /// Content items with a location in `zipcode`, each joined with its row
    pub fn items_by_zipcode(&self, zipcode: &str) -> Result<Vec<ContentItem>> {
        self.items_by("zipcode", zipcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::validate_descriptor;

    #[test]
    fn test_location_descriptor_is_valid() {
        assert!(validate_descriptor(&LocationTable).is_ok());
    }

    #[test]
    fn test_location_attaches_to_posts_and_pages() {
        assert!(LocationTable.accepts_item_type("post"));
        assert!(LocationTable.accepts_item_type("page"));
        assert!(!LocationTable.accepts_item_type("attachment"));
        assert!(LocationTable.auto_join());
    }
}
