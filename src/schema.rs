//! Database schema definitions and DDL helpers
//!
//! Constants for the library's own tables, plus the generic "create or
//! upgrade" DDL that descriptors use to install their side tables. Every
//! statement here is additive and safe to run against an existing table.

use crate::db::StorageAdapter;
use crate::descriptor::TableDescriptor;
use crate::error::Result;
use crate::models::Value;

/// Version marker table schema
pub mod versions {
    /// Table name
    pub const TABLE: &str = "partner_table_versions";
    /// Physical partner table name, primary key
    pub const TABLE_NAME: &str = "table_name";
    /// Installed descriptor version
    pub const VERSION: &str = "version";
    /// RFC 3339 timestamp of the last marker write
    pub const UPDATED_AT: &str = "updated_at";
}

/// Host content items table schema (used by the SQLite content source)
pub mod items {
    /// Primary key column
    pub const ID: &str = "id";
    /// Content type tag column
    pub const ITEM_TYPE: &str = "item_type";
    /// Display title column
    pub const TITLE: &str = "title";
}

/// Quote an identifier for SQL text
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `?{start}, ?{start+1}, ...` for `count` parameters
#[must_use]
pub fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `IN` operand matching any id in a JSON array bound at `?{param}`.
///
/// Pairs with [`id_list_param`]; the set binds as one parameter, so its size
/// is not capped by SQLite's host parameter limit.
#[must_use]
pub fn id_list_sql(param: usize) -> String {
    format!("(SELECT value FROM json_each(?{param}))")
}

/// Serialize ids as the JSON array [`id_list_sql`] expects
pub fn id_list_param<'a>(ids: impl IntoIterator<Item = &'a i64>) -> Result<Value> {
    let ids: Vec<i64> = ids.into_iter().copied().collect();
    Ok(Value::Text(serde_json::to_string(&ids)?))
}

/// Render a value as an SQL literal, for DDL defaults only
#[must_use]
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format!("{f:?}"),
        Value::Float(_) => "NULL".to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn column_definition<D: TableDescriptor + ?Sized>(descriptor: &D, name: &str) -> Option<String> {
    let column = descriptor.column(name)?;
    let mut definition = format!("{} {}", quote_ident(&column.name), column.column_type.sql_type());

    if column.name == descriptor.primary_key() {
        definition.push_str(" PRIMARY KEY AUTOINCREMENT");
    } else if let Some(default) = descriptor.column_defaults().get(&column.name) {
        if *default != Value::Null {
            definition.push_str(" NOT NULL");
        }
        definition.push_str(" DEFAULT ");
        definition.push_str(&sql_literal(default));
    }

    Some(definition)
}

/// `CREATE TABLE IF NOT EXISTS` for a descriptor, plus an index on the
/// foreign key so batched joins stay cheap.
#[must_use]
pub fn create_table_sql<D: TableDescriptor + ?Sized>(descriptor: &D, table_name: &str) -> String {
    let definitions: Vec<String> = descriptor
        .columns()
        .iter()
        .filter_map(|column| column_definition(descriptor, &column.name))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n  {columns}\n);\n{index}",
        table = quote_ident(table_name),
        columns = definitions.join(",\n  "),
        index = foreign_key_index_sql(descriptor, table_name),
    )
}

/// `CREATE INDEX IF NOT EXISTS` on the descriptor's foreign key
#[must_use]
pub fn foreign_key_index_sql<D: TableDescriptor + ?Sized>(descriptor: &D, table_name: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {table} ({fk});",
        index = quote_ident(&format!("idx_{table_name}_{}", descriptor.foreign_key())),
        table = quote_ident(table_name),
        fk = quote_ident(descriptor.foreign_key()),
    )
}

/// Column names currently present on a physical table
pub fn existing_columns(storage: &dyn StorageAdapter, table_name: &str) -> Result<Vec<String>> {
    let rows = storage.query(&format!("PRAGMA table_info({})", quote_ident(table_name)), &[])?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str).map(ToString::to_string))
        .collect())
}

/// Add every declared column missing from an existing table.
///
/// Returns the number of columns added.
pub fn add_missing_columns<D: TableDescriptor + ?Sized>(
    storage: &dyn StorageAdapter,
    descriptor: &D,
    table_name: &str,
) -> Result<usize> {
    let existing = existing_columns(storage, table_name)?;
    let mut added = 0;

    for column in descriptor.columns() {
        if existing.iter().any(|name| name.eq_ignore_ascii_case(&column.name)) {
            continue;
        }
        // SQLite cannot add a primary key to an existing table
        if column.name == descriptor.primary_key() {
            continue;
        }
        if let Some(definition) = column_definition(descriptor, &column.name) {
            let alter = format!("ALTER TABLE {} ADD COLUMN {definition};", quote_ident(table_name));
            if let Err(e) = storage.execute_batch(&alter) {
                // Another installer may have added it since the table was read
                let present = existing_columns(storage, table_name)?
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&column.name));
                if !present {
                    return Err(e);
                }
                tracing::debug!(table = table_name, column = %column.name, "Column added concurrently");
                continue;
            }
            tracing::info!(table = table_name, column = %column.name, "Added partner table column");
            added += 1;
        }
    }

    Ok(added)
}

/// Create the table if absent, then add any newly declared columns
pub fn install_table<D: TableDescriptor + ?Sized>(
    storage: &dyn StorageAdapter,
    descriptor: &D,
    table_name: &str,
) -> Result<()> {
    storage.execute_batch(&create_table_sql(descriptor, table_name))?;
    add_missing_columns(storage, descriptor, table_name)?;
    Ok(())
}
