//! Partner table engine
//!
//! [`PartnerTable`] turns a [`TableDescriptor`] into a working side table:
//! schema install guarded by a version marker, whitelisted CRUD with bound
//! parameters, batched join-on-read onto content items, and the metadata
//! view used by [`crate::metadata`].
//!
//! Nothing here takes locks around CRUD. Two concurrent metadata writes for
//! the same item can both see "no row" and both insert; add a unique index
//! on the foreign key at the storage layer if that matters.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::TablesConfig;
use crate::db::StorageAdapter;
use crate::descriptor::{validate_descriptor, TableDescriptor};
use crate::error::{PartnerTableError, Result};
use crate::events::{InsertEvent, InsertObserver, Observers};
use crate::metrics::MetricsCollector;
use crate::models::{ContentItem, ListQuery, Operator, Row, SchemaStatus, Value, WriteOutcome};
use crate::repository::{Attachable, ContentSource};
use crate::schema::{id_list_param, id_list_sql, placeholders, quote_ident};
use crate::validation::InputValidator;
use crate::version::{is_older, VersionMarkerStore};

/// A side table bound to its storage, content source and version markers
pub struct PartnerTable<D: TableDescriptor> {
    descriptor: D,
    table_name: String,
    meta_key: String,
    storage: Arc<dyn StorageAdapter>,
    content: Arc<dyn ContentSource>,
    markers: Arc<dyn VersionMarkerStore>,
    observers: Observers,
    metrics: MetricsCollector,
    schema_ready: AtomicBool,
    install_lock: Mutex<()>,
}

impl<D: TableDescriptor> PartnerTable<D> {
    /// Bind a descriptor to its collaborators without touching the schema
    pub fn new(
        descriptor: D,
        storage: Arc<dyn StorageAdapter>,
        content: Arc<dyn ContentSource>,
        markers: Arc<dyn VersionMarkerStore>,
        settings: &TablesConfig,
    ) -> Result<Self> {
        validate_descriptor(&descriptor)?;

        let table_name = format!("{}pt_{}", settings.table_prefix, descriptor.name());
        InputValidator::validate_identifier(&table_name)
            .map_err(|e| PartnerTableError::InvalidConfig(e.to_string()))?;
        let meta_key = format!("{}{}", settings.meta_key_prefix, descriptor.name());

        Ok(Self {
            descriptor,
            table_name,
            meta_key,
            storage,
            content,
            markers,
            observers: Observers::new(),
            metrics: MetricsCollector::new(),
            schema_ready: AtomicBool::new(false),
            install_lock: Mutex::new(()),
        })
    }

    /// [`new`](Self::new) followed by [`ensure_schema`](Self::ensure_schema)
    pub fn open(
        descriptor: D,
        storage: Arc<dyn StorageAdapter>,
        content: Arc<dyn ContentSource>,
        markers: Arc<dyn VersionMarkerStore>,
        settings: &TablesConfig,
    ) -> Result<Self> {
        let table = Self::new(descriptor, storage, content, markers, settings)?;
        table.ensure_schema()?;
        Ok(table)
    }

    /// Builder-style [`subscribe`](Self::subscribe)
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn InsertObserver>) -> Self {
        self.subscribe(observer);
        self
    }

    /// Receive pre/post insert events
    pub fn subscribe(&mut self, observer: Arc<dyn InsertObserver>) {
        self.observers.subscribe(observer);
    }

    /// The descriptor this table was built from
    pub const fn descriptor(&self) -> &D {
        &self.descriptor
    }

    /// Physical table name, e.g. `wp_pt_location`
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Metadata key this table answers to, e.g. `pt_location`
    pub fn meta_key(&self) -> &str {
        &self.meta_key
    }

    /// Operation counters for this table
    pub const fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Install or upgrade the schema if the persisted marker is missing or
    /// older than the descriptor version.
    ///
    /// The marker is written only after a successful install, so a failure
    /// leaves the next call free to retry. Once the schema is known to be
    /// current, later calls return immediately.
    pub fn ensure_schema(&self) -> Result<SchemaStatus> {
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(SchemaStatus::Current);
        }

        let _guard = self
            .install_lock
            .lock()
            .map_err(|_| PartnerTableError::Other("schema install lock poisoned".to_string()))?;
        if self.schema_ready.load(Ordering::Acquire) {
            return Ok(SchemaStatus::Current);
        }

        let target = self.descriptor.version();
        let installed = self.markers.get(&self.table_name)?;
        if !installed.as_deref().map_or(true, |version| is_older(version, target)) {
            debug!(table = %self.table_name, version = target, "Partner table schema is current");
            self.schema_ready.store(true, Ordering::Release);
            return Ok(SchemaStatus::Current);
        }

        info!(
            table = %self.table_name,
            from = installed.as_deref().unwrap_or("none"),
            to = target,
            "Installing partner table schema"
        );

        if let Err(source) = self.descriptor.install(self.storage.as_ref(), &self.table_name) {
            self.metrics.record_error(&self.table_name, "install");
            error!(table = %self.table_name, version = target, error = %source, "Schema install failed");
            return Err(PartnerTableError::SchemaInstall {
                table: self.table_name.clone(),
                version: target.to_string(),
                source: Box::new(source),
            });
        }

        self.markers.set(&self.table_name, target)?;
        self.schema_ready.store(true, Ordering::Release);
        self.metrics.record_schema_install(&self.table_name);

        Ok(SchemaStatus::Installed {
            previous: installed,
            version: target.to_string(),
        })
    }

    /// Row by primary key
    pub fn get(&self, row_id: i64) -> Result<Option<Row>> {
        if !InputValidator::is_valid_row_id(row_id) {
            return Ok(None);
        }
        self.instrumented("get", || self.select_one(self.descriptor.primary_key(), Value::Integer(row_id)))
    }

    /// First row whose `column` equals `value`
    pub fn get_by(&self, column: &str, value: impl Into<Value>) -> Result<Option<Row>> {
        let column = self.resolve_column(column)?;
        let value = self.coerce_for(&column, value.into());
        self.instrumented("get_by", || self.select_one(&column, value))
    }

    /// One column of the row with primary key `row_id`
    pub fn get_column(&self, column: &str, row_id: i64) -> Result<Option<Value>> {
        let column = self.resolve_column(column)?;
        if !InputValidator::is_valid_row_id(row_id) {
            return Ok(None);
        }
        self.instrumented("get_column", || {
            self.select_scalar(&column, self.descriptor.primary_key(), Value::Integer(row_id))
        })
    }

    /// One column of the first row whose `where_column` equals `where_value`
    pub fn get_column_by(&self, column: &str, where_column: &str, where_value: impl Into<Value>) -> Result<Option<Value>> {
        let column = self.resolve_column(column)?;
        let where_column = self.resolve_column(where_column)?;
        let where_value = self.coerce_for(&where_column, where_value.into());
        self.instrumented("get_column_by", || self.select_scalar(&column, &where_column, where_value))
    }

    /// Insert a row and return its primary key.
    ///
    /// `data` is whitelisted against the declared columns (keys matched
    /// case-insensitively, unknown keys dropped) and merged over the column
    /// defaults, explicit values winning.
    pub fn insert(&self, data: Row) -> Result<i64> {
        self.instrumented("insert", || {
            let mut row = self.whitelist(self.descriptor.column_defaults());
            row.extend(self.whitelist(data));

            self.observers.emit(&InsertEvent::PreInsert {
                table: self.descriptor.name().to_string(),
                data: row.clone(),
            });

            let table = quote_ident(&self.table_name);
            let sql = if row.is_empty() {
                format!("INSERT INTO {table} DEFAULT VALUES")
            } else {
                let columns: Vec<String> = row.keys().map(|column| quote_ident(column)).collect();
                format!(
                    "INSERT INTO {table} ({}) VALUES ({})",
                    columns.join(", "),
                    placeholders(1, row.len())
                )
            };
            let params: Vec<Value> = row.values().cloned().collect();

            let id = self.storage.execute(&sql, &params)?.last_insert_id;
            debug!(table = %self.table_name, id, columns = row.len(), "Inserted partner table row");

            self.observers.emit(&InsertEvent::PostInsert {
                table: self.descriptor.name().to_string(),
                id,
                data: row,
            });

            Ok(id)
        })
    }

    /// Update the row with primary key `row_id`
    pub fn update(&self, row_id: i64, data: Row) -> Result<WriteOutcome> {
        self.update_by(self.descriptor.primary_key(), row_id, data)
    }

    /// Update rows whose `where_column` equals `row_id`.
    ///
    /// Returns `Skipped` without touching storage when `row_id` is not
    /// positive, `where_column` is undeclared, or nothing in `data` survives
    /// the whitelist; `NoMatch` when no row matched.
    pub fn update_by(&self, where_column: &str, row_id: i64, data: Row) -> Result<WriteOutcome> {
        if !InputValidator::is_valid_row_id(row_id) {
            warn!(table = %self.table_name, row_id, "Refusing update with a non-positive id");
            return Ok(WriteOutcome::Skipped);
        }
        let Some(where_column) = self.descriptor.column(where_column) else {
            warn!(table = %self.table_name, column = where_column, "Refusing update on an undeclared column");
            return Ok(WriteOutcome::Skipped);
        };
        let data = self.whitelist(data);
        if data.is_empty() {
            warn!(table = %self.table_name, row_id, "Nothing to update after whitelisting");
            return Ok(WriteOutcome::Skipped);
        }

        self.instrumented("update", || {
            let assignments: Vec<String> = data
                .keys()
                .enumerate()
                .map(|(idx, column)| format!("{} = ?{}", quote_ident(column), idx + 1))
                .collect();
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?{}",
                quote_ident(&self.table_name),
                assignments.join(", "),
                quote_ident(&where_column.name),
                data.len() + 1
            );

            let mut params: Vec<Value> = data.values().cloned().collect();
            params.push(Value::Integer(row_id));

            let outcome = self.storage.execute(&sql, &params)?;
            debug!(table = %self.table_name, row_id, affected = outcome.affected_rows, "Updated partner table row");
            Ok(WriteOutcome::from_affected(outcome.affected_rows))
        })
    }

    /// Delete the row with primary key `row_id`
    pub fn delete(&self, row_id: i64) -> Result<WriteOutcome> {
        if !InputValidator::is_valid_row_id(row_id) {
            warn!(table = %self.table_name, row_id, "Refusing delete with a non-positive id");
            return Ok(WriteOutcome::Skipped);
        }
        self.instrumented("delete", || self.delete_where(self.descriptor.primary_key(), Value::Integer(row_id)))
    }

    /// Delete every row whose `column` equals `value`
    pub fn delete_by(&self, column: &str, value: impl Into<Value>) -> Result<WriteOutcome> {
        let value = value.into();
        if value.is_empty() {
            warn!(table = %self.table_name, column, "Refusing delete with an empty value");
            return Ok(WriteOutcome::Skipped);
        }
        let Some(column) = self.descriptor.column(column) else {
            warn!(table = %self.table_name, column, "Refusing delete on an undeclared column");
            return Ok(WriteOutcome::Skipped);
        };
        let value = column.column_type.coerce(value);
        self.instrumented("delete_by", || self.delete_where(&column.name, value))
    }

    /// Merge side-table columns onto every eligible item in `items`.
    ///
    /// Issues a single query for the whole batch, or none when no item has
    /// an eligible type. When several rows share a foreign key the last one
    /// returned wins. Primary and foreign key columns are not merged.
    /// Returns how many items received data.
    pub fn attach_to_items<T: Attachable>(&self, items: &mut [T]) -> Result<usize> {
        let item_types = self.descriptor.item_types();
        let eligible = |item: &T| item_types.iter().any(|t| t == item.item_type());

        let ids: BTreeSet<i64> = items.iter().filter(|item| eligible(item)).map(|item| item.item_id()).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        self.instrumented("attach", || {
            let foreign_key = self.descriptor.foreign_key();
            let sql = format!(
                "SELECT * FROM {} WHERE {} IN {}",
                quote_ident(&self.table_name),
                quote_ident(foreign_key),
                id_list_sql(1)
            );
            let rows = self.storage.query(&sql, &[id_list_param(&ids)?])?;

            let mut by_item: HashMap<i64, Row> = HashMap::with_capacity(rows.len());
            for row in rows {
                if let Some(item_id) = row.get(foreign_key).and_then(Value::as_i64) {
                    by_item.insert(item_id, row);
                }
            }

            let mut joined = 0;
            for item in items.iter_mut() {
                if !eligible(item) {
                    continue;
                }
                if let Some(row) = by_item.get(&item.item_id()) {
                    self.join_row(item, row);
                    joined += 1;
                }
            }

            self.metrics.record_join(&self.table_name, ids.len(), joined);
            debug!(table = %self.table_name, eligible = ids.len(), joined, "Attached partner table rows");
            Ok(joined)
        })
    }

    /// Fetch items from the content source, joining rows when the
    /// descriptor asks for auto-join.
    pub fn fetch_items(&self, ids: &[i64]) -> Result<Vec<ContentItem>> {
        let mut items = self.content.fetch_batch(ids)?;
        if self.descriptor.auto_join() {
            self.attach_to_items(&mut items)?;
        }
        Ok(items)
    }

    /// Content items whose side-table `column` equals `value`, one per
    /// matching row, each joined with that row.
    pub fn items_by(&self, column: &str, value: impl Into<Value>) -> Result<Vec<ContentItem>> {
        let column = self.resolve_column(column)?;
        let value = self.coerce_for(&column, value.into());

        self.instrumented("items_by", || {
            let rows = self.storage.query(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?1",
                    quote_ident(&self.table_name),
                    quote_ident(&column)
                ),
                &[value],
            )?;

            let foreign_key = self.descriptor.foreign_key();
            let mut ids: Vec<i64> = Vec::with_capacity(rows.len());
            for id in rows.iter().filter_map(|row| row.get(foreign_key).and_then(Value::as_i64)) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            if ids.is_empty() {
                return Ok(Vec::new());
            }

            let by_id: HashMap<i64, ContentItem> = self
                .content
                .fetch_batch(&ids)?
                .into_iter()
                .map(|item| (item.id, item))
                .collect();

            let mut joined = Vec::with_capacity(rows.len());
            for row in &rows {
                let Some(item) = row
                    .get(foreign_key)
                    .and_then(Value::as_i64)
                    .and_then(|id| by_id.get(&id))
                else {
                    continue;
                };
                let mut item = item.clone();
                self.join_row(&mut item, row);
                joined.push(item);
            }

            Ok(joined)
        })
    }

    /// Rows matching `query`. Filter and ordering columns must be declared.
    pub fn search(&self, query: &ListQuery) -> Result<Vec<Row>> {
        let mut clauses = Vec::with_capacity(query.filters.len());
        let mut params = Vec::with_capacity(query.filters.len() + 2);

        for filter in &query.filters {
            let column = self.resolve_column(&filter.column)?;
            let value = if filter.operator == Operator::Like {
                filter.value.clone()
            } else {
                self.coerce_for(&column, filter.value.clone())
            };
            params.push(value);
            clauses.push(format!("{} {} ?{}", quote_ident(&column), filter.operator.as_sql(), params.len()));
        }

        let mut sql = format!("SELECT * FROM {}", quote_ident(&self.table_name));
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if let Some(order_by) = &query.order_by {
            let column = self.resolve_column(order_by)?;
            sql.push_str(&format!(" ORDER BY {} {}", quote_ident(&column), query.order.as_sql()));
        }

        let as_param = |n: usize| Value::Integer(i64::try_from(n).unwrap_or(i64::MAX));
        match (query.limit, query.offset) {
            (Some(limit), offset) => {
                params.push(as_param(limit));
                sql.push_str(&format!(" LIMIT ?{}", params.len()));
                if let Some(offset) = offset {
                    params.push(as_param(offset));
                    sql.push_str(&format!(" OFFSET ?{}", params.len()));
                }
            },
            (None, Some(offset)) => {
                params.push(as_param(offset));
                sql.push_str(&format!(" LIMIT -1 OFFSET ?{}", params.len()));
            },
            (None, None) => {},
        }

        self.instrumented("search", || self.storage.query(&sql, &params))
    }

    /// The row attached to a content item, as a metadata value
    pub fn read_meta(&self, item_id: i64) -> Result<Option<Row>> {
        if !InputValidator::is_valid_row_id(item_id) {
            return Ok(None);
        }
        self.get_by(self.descriptor.foreign_key(), item_id)
    }

    /// Write a content item's row: update it when one exists, insert it
    /// otherwise. The foreign key is always `item_id` and the primary key
    /// cannot be set through this path.
    pub fn write_meta(&self, item_id: i64, value: Row) -> Result<WriteOutcome> {
        if !InputValidator::is_valid_row_id(item_id) {
            warn!(table = %self.table_name, item_id, "Refusing metadata write with a non-positive item id");
            return Ok(WriteOutcome::Skipped);
        }

        let primary_key = self.descriptor.primary_key();
        let foreign_key = self.descriptor.foreign_key();
        let mut data: Row = value
            .into_iter()
            .filter(|(key, _)| !key.eq_ignore_ascii_case(primary_key) && !key.eq_ignore_ascii_case(foreign_key))
            .collect();

        if self.read_meta(item_id)?.is_some() {
            self.update_by(foreign_key, item_id, data)
        } else {
            data.insert(foreign_key.to_string(), Value::Integer(item_id));
            self.insert(data)?;
            Ok(WriteOutcome::Applied(1))
        }
    }

    /// Delete every row attached to a content item
    pub fn delete_meta(&self, item_id: i64) -> Result<WriteOutcome> {
        if !InputValidator::is_valid_row_id(item_id) {
            warn!(table = %self.table_name, item_id, "Refusing metadata delete with a non-positive item id");
            return Ok(WriteOutcome::Skipped);
        }
        self.delete_by(self.descriptor.foreign_key(), item_id)
    }

    fn instrumented<T>(&self, operation: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let result = f();
        self.metrics
            .record_operation(&self.table_name, operation, start.elapsed(), result.is_ok());
        if let Err(e) = &result {
            warn!(table = %self.table_name, operation, error = %e, "Partner table operation failed");
        }
        result
    }

    fn select_one(&self, column: &str, value: Value) -> Result<Option<Row>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1 LIMIT 1",
            quote_ident(&self.table_name),
            quote_ident(column)
        );
        Ok(self.storage.query(&sql, &[value])?.into_iter().next())
    }

    fn select_scalar(&self, column: &str, where_column: &str, value: Value) -> Result<Option<Value>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
            quote_ident(column),
            quote_ident(&self.table_name),
            quote_ident(where_column)
        );
        Ok(self
            .storage
            .query(&sql, &[value])?
            .into_iter()
            .next()
            .and_then(|row| row.into_values().next()))
    }

    fn delete_where(&self, column: &str, value: Value) -> Result<WriteOutcome> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(&self.table_name),
            quote_ident(column)
        );
        let outcome = self.storage.execute(&sql, &[value])?;
        debug!(table = %self.table_name, column, affected = outcome.affected_rows, "Deleted partner table rows");
        Ok(WriteOutcome::from_affected(outcome.affected_rows))
    }

    /// Keep declared columns only, under their declared spelling, coerced to
    /// the declared type.
    fn whitelist(&self, data: Row) -> Row {
        let columns = self.descriptor.columns();
        let mut clean = Row::new();
        for (key, value) in data {
            match columns.iter().find(|column| column.name.eq_ignore_ascii_case(&key)) {
                Some(column) => {
                    clean.insert(column.name.clone(), column.column_type.coerce(value));
                },
                None => debug!(table = %self.table_name, column = %key, "Dropping undeclared column"),
            }
        }
        clean
    }

    fn resolve_column(&self, column: &str) -> Result<String> {
        self.descriptor
            .column(column)
            .map(|column| column.name)
            .ok_or_else(|| PartnerTableError::UnknownColumn {
                table: self.table_name.clone(),
                column: column.to_string(),
            })
    }

    fn coerce_for(&self, column: &str, value: Value) -> Value {
        match self.descriptor.column(column) {
            Some(column) => column.column_type.coerce(value),
            None => value,
        }
    }

    fn join_row<T: Attachable>(&self, item: &mut T, row: &Row) {
        let primary_key = self.descriptor.primary_key();
        let foreign_key = self.descriptor.foreign_key();
        for (column, value) in row {
            if column == primary_key || column == foreign_key {
                continue;
            }
            item.merge_field(column, value.clone());
        }
    }
}
