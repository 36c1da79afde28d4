//! Table descriptors
//!
//! A descriptor is the static declaration of one side table. Implement it
//! once per table; the engine does everything else.

use std::collections::HashSet;

use crate::db::StorageAdapter;
use crate::error::{PartnerTableError, Result};
use crate::models::{Column, ColumnType, Row};
use crate::schema;
use crate::validation::InputValidator;

/// Static declaration of a side table's schema
pub trait TableDescriptor: Send + Sync {
    /// Suffix used to form the physical table name and the metadata key
    fn name(&self) -> &str;

    /// Schema version, compared against the persisted marker
    fn version(&self) -> &str;

    /// Primary key column
    fn primary_key(&self) -> &str;

    /// Column holding the content item id
    fn foreign_key(&self) -> &str;

    /// Declared columns, in table order
    fn columns(&self) -> Vec<Column>;

    /// Default values applied on insert; never includes the primary key
    fn column_defaults(&self) -> Row;

    /// Content types this table attaches to
    fn item_types(&self) -> Vec<String>;

    /// Merge rows into every fetch of eligible items
    fn auto_join(&self) -> bool {
        false
    }

    /// Create or upgrade the physical table. Must be idempotent.
    fn install(&self, storage: &dyn StorageAdapter, table_name: &str) -> Result<()> {
        schema::install_table(storage, self, table_name)
    }

    /// Case-insensitive column lookup
    fn column(&self, name: &str) -> Option<Column> {
        self.columns().into_iter().find(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Whether items of this content type are eligible
    fn accepts_item_type(&self, item_type: &str) -> bool {
        self.item_types().iter().any(|t| t == item_type)
    }
}

/// Check a descriptor's invariants
pub fn validate_descriptor<D: TableDescriptor + ?Sized>(descriptor: &D) -> Result<()> {
    let invalid = |reason: String| PartnerTableError::InvalidDescriptor {
        name: descriptor.name().to_string(),
        reason,
    };

    InputValidator::validate_identifier(descriptor.name()).map_err(|e| invalid(e.to_string()))?;
    InputValidator::validate_version(descriptor.version()).map_err(|e| invalid(e.to_string()))?;

    let columns = descriptor.columns();
    if columns.is_empty() {
        return Err(invalid("no columns declared".to_string()));
    }

    let mut seen = HashSet::new();
    for column in &columns {
        InputValidator::validate_identifier(&column.name).map_err(|e| invalid(e.to_string()))?;
        if !seen.insert(column.name.to_ascii_lowercase()) {
            return Err(invalid(format!("duplicate column `{}`", column.name)));
        }
    }

    let declared = |name: &str| columns.iter().find(|column| column.name == name);

    match declared(descriptor.primary_key()) {
        Some(column) if column.column_type == ColumnType::Integer => {},
        Some(_) => return Err(invalid("primary key must be an integer column".to_string())),
        None => return Err(invalid(format!("primary key `{}` is not a declared column", descriptor.primary_key()))),
    }

    if declared(descriptor.foreign_key()).is_none() {
        return Err(invalid(format!(
            "foreign key `{}` is not a declared column",
            descriptor.foreign_key()
        )));
    }

    if descriptor.primary_key() == descriptor.foreign_key() {
        return Err(invalid("primary and foreign key must differ".to_string()));
    }

    for name in descriptor.column_defaults().keys() {
        if declared(name).is_none() {
            return Err(invalid(format!("default for undeclared column `{name}`")));
        }
        if name == descriptor.primary_key() {
            return Err(invalid("primary key cannot have a default".to_string()));
        }
    }

    Ok(())
}
