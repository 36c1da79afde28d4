//! Error types for the partner-tables library.
//!
//! This module provides custom error types using `thiserror`. "Not found" is
//! never an error: reads return `Ok(None)` and writes report
//! [`WriteOutcome`](crate::models::WriteOutcome) values instead.

use thiserror::Error;

/// Errors that can occur while working with partner tables.
#[derive(Error, Debug)]
pub enum PartnerTableError {
    /// Backend query or execute failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Connection pool failure
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A caller supplied an argument the engine cannot use
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A column name that is not declared by the table descriptor
    #[error("Unknown column `{column}` for table {table}")]
    UnknownColumn {
        /// Physical table name
        table: String,
        /// Column name as supplied by the caller
        column: String,
    },

    /// A table descriptor that breaks its own invariants
    #[error("Invalid table descriptor `{name}`: {reason}")]
    InvalidDescriptor {
        /// Descriptor name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Schema install or upgrade failed; the version marker was not updated
    #[error("Schema install failed for {table} at version {version}: {source}")]
    SchemaInstall {
        /// Physical table name
        table: String,
        /// Version that was being installed
        version: String,
        /// Underlying failure
        #[source]
        source: Box<PartnerTableError>,
    },

    /// The content source could not supply items
    #[error("Content source error: {0}")]
    ContentSource(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with PartnerTableError
pub type Result<T> = std::result::Result<T, PartnerTableError>;

impl From<anyhow::Error> for PartnerTableError {
    fn from(err: anyhow::Error) -> Self {
        PartnerTableError::Other(err.to_string())
    }
}

impl From<config::ConfigError> for PartnerTableError {
    fn from(err: config::ConfigError) -> Self {
        PartnerTableError::InvalidConfig(err.to_string())
    }
}
