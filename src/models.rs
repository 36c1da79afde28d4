//! Data models for partner tables
//!
//! This module contains the value and row types shared by the engine, the
//! storage adapter and content sources, plus the small query model used by
//! `search`.

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    Text(String),
}

/// `f` as an integer when it is whole and inside the `i64` range
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn whole_i64(f: f64) -> Option<i64> {
    // i64::MAX rounds up to 2^63 as f64, so the upper bound is exclusive
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then(|| f as i64)
}

impl Value {
    /// Whether this value counts as "empty" for a required argument
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Integer(i) => *i == 0,
            Self::Float(f) => *f == 0.0,
            Self::Text(s) => s.trim().is_empty(),
        }
    }

    /// Interpret the value as an integer id, if it is one
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => whole_i64(*f),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow the text, if this is a text value
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a command-line style literal: integers and floats are recognised,
    /// everything else is text.
    #[must_use]
    pub fn parse_literal(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            Self::Integer(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            Self::Float(f)
        } else {
            Self::Text(raw.to_string())
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Self::Integer(i) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*i)),
            Self::Float(f) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Float(f),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Self::Text(String::from_utf8_lossy(bytes).into_owned())
            },
        })
    }
}

/// A side-table row, or any set of column values
pub type Row = BTreeMap<String, Value>;

/// Build a [`Row`] from column/value pairs
pub fn row<K, V, I>(pairs: I) -> Row
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

/// Primitive column type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// Whole numbers (`%d`)
    Integer,
    /// Floating point numbers (`%f`)
    Float,
    /// Strings (`%s`)
    Text,
}

impl ColumnType {
    /// printf-style format tag for this type
    #[must_use]
    pub const fn format_tag(&self) -> &'static str {
        match self {
            Self::Integer => "%d",
            Self::Float => "%f",
            Self::Text => "%s",
        }
    }

    /// SQL type used when generating DDL
    #[must_use]
    pub const fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "REAL",
            Self::Text => "TEXT",
        }
    }

    /// Convert a value into this column's type where it can be done losslessly.
    ///
    /// Blank text is left untouched so text defaults on numeric columns
    /// survive a round trip.
    #[must_use]
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (Self::Integer, Value::Text(s)) if !s.trim().is_empty() => match s.trim().parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => Value::Text(s),
            },
            (Self::Integer, Value::Float(f)) => whole_i64(f).map_or(Value::Float(f), Value::Integer),
            (Self::Float, Value::Text(s)) if !s.trim().is_empty() => match s.trim().parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => Value::Text(s),
            },
            #[allow(clippy::cast_precision_loss)]
            (Self::Float, Value::Integer(i)) => Value::Float(i as f64),
            (Self::Text, Value::Integer(i)) => Value::Text(i.to_string()),
            (Self::Text, Value::Float(f)) => Value::Text(f.to_string()),
            (_, other) => other,
        }
    }
}

/// A declared column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name, lower case by convention
    pub name: String,
    /// Primitive type
    pub column_type: ColumnType,
}

impl Column {
    /// Declare a column
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A host content item that side-table data can be attached to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Item id, referenced by side-table foreign keys
    pub id: i64,
    /// Content type tag (e.g. "post", "page")
    pub item_type: String,
    /// Item fields, including any merged side-table columns
    pub fields: Row,
}

impl ContentItem {
    /// Create an item with no fields
    pub fn new(id: i64, item_type: impl Into<String>) -> Self {
        Self {
            id,
            item_type: item_type.into(),
            fields: Row::new(),
        }
    }

    /// Builder-style field setter
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Look up a field
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Result of an update or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteOutcome {
    /// The statement ran and touched this many rows
    Applied(usize),
    /// The statement ran but no row matched its predicate
    NoMatch,
    /// Nothing was sent to storage because the arguments were unusable
    Skipped,
}

impl WriteOutcome {
    /// Whether at least one row was written
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub(crate) const fn from_affected(rows: usize) -> Self {
        if rows == 0 {
            Self::NoMatch
        } else {
            Self::Applied(rows)
        }
    }
}

/// What `ensure_schema` did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SchemaStatus {
    /// The installed schema already matches the descriptor
    Current,
    /// The schema was installed or upgraded
    Installed {
        /// Version recorded before the install, if any
        previous: Option<String>,
        /// Version now recorded
        version: String,
    },
}

/// Query model for listing rows
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Filters, combined with AND
    pub filters: Vec<Filter>,
    /// Column to order results by
    pub order_by: Option<String>,
    /// Sort direction
    pub order: SortOrder,
    /// Maximum number of results to return
    pub limit: Option<usize>,
    /// Number of results to skip
    pub offset: Option<usize>,
}

impl ListQuery {
    /// Create an empty query
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter condition
    #[must_use]
    pub fn filter(mut self, column: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            operator,
            value: value.into(),
        });
        self
    }

    /// Set the ordering column and direction
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some(column.into());
        self.order = order;
        self
    }

    /// Set the maximum number of results
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the number of results to skip
    #[must_use]
    pub const fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A filter condition
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Column name to filter on
    pub column: String,
    /// Comparison operator
    pub operator: Operator,
    /// Value to compare against
    pub value: Value,
}

/// Comparison operators for filters
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operator {
    /// Equality (=)
    Equal,
    /// Inequality (!=)
    NotEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal (>=)
    GreaterThanOrEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal (<=)
    LessThanOrEqual,
    /// Pattern matching (LIKE)
    Like,
}

impl Operator {
    /// SQL spelling of the operator
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Like => "LIKE",
        }
    }
}

/// Sort direction
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

impl SortOrder {
    /// SQL keyword
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_numeric_text() {
        assert_eq!(ColumnType::Integer.coerce(Value::from("42")), Value::Integer(42));
        assert_eq!(ColumnType::Float.coerce(Value::from("39.5")), Value::Float(39.5));
        assert_eq!(ColumnType::Float.coerce(Value::Integer(2)), Value::Float(2.0));
    }

    #[test]
    fn test_coerce_keeps_blank_and_unparseable_text() {
        assert_eq!(ColumnType::Float.coerce(Value::from("")), Value::from(""));
        assert_eq!(ColumnType::Integer.coerce(Value::from("abc")), Value::from("abc"));
    }

    #[test]
    fn test_coerce_leaves_out_of_range_floats() {
        assert_eq!(ColumnType::Integer.coerce(Value::Float(1e20)), Value::Float(1e20));
        assert_eq!(ColumnType::Integer.coerce(Value::Float(-1e20)), Value::Float(-1e20));
        assert_eq!(ColumnType::Integer.coerce(Value::Float(2.5)), Value::Float(2.5));
        assert_eq!(ColumnType::Integer.coerce(Value::Float(-4.0)), Value::Integer(-4));
        assert_eq!(Value::Float(1e20).as_i64(), None);
        assert_eq!(Value::Float(f64::NAN).as_i64(), None);
    }

    #[test]
    fn test_value_is_empty() {
        assert!(Value::Null.is_empty());
        assert!(Value::Integer(0).is_empty());
        assert!(Value::from("  ").is_empty());
        assert!(!Value::from("Reno").is_empty());
        assert!(!Value::Integer(7).is_empty());
    }

    #[test]
    fn test_value_json_is_untagged() {
        let json = serde_json::to_string(&row([("city", Value::from("Reno")), ("post_id", Value::from(42))]))
            .unwrap();
        assert_eq!(json, r#"{"city":"Reno","post_id":42}"#);
    }

    #[test]
    fn test_write_outcome_from_affected() {
        assert_eq!(WriteOutcome::from_affected(0), WriteOutcome::NoMatch);
        assert_eq!(WriteOutcome::from_affected(2), WriteOutcome::Applied(2));
        assert!(!WriteOutcome::Skipped.is_success());
    }
}
