//! Partner Tables - typed side tables for content items
//!
//! A Rust library for attaching strongly-typed relational tables to content
//! items that would otherwise only carry loose key/value metadata.
//!
//! # Features
//!
//! - Declarative table descriptors with versioned, additive schema installs
//! - Whitelisted CRUD with bound parameters
//! - Batched join-on-read onto content items
//! - Presenting a side table as a single metadata key
//! - Insert observers, metrics and structured logging

/// Configuration management
pub mod config;
/// Storage adapter and connection pooling
pub mod db;
/// Table descriptors
pub mod descriptor;
/// The partner table engine
pub mod engine;
/// Error types
pub mod error;
/// Insert observers
pub mod events;
/// The bundled location table
pub mod location;
/// Logging setup and utilities
pub mod logging;
/// Metadata interception
pub mod metadata;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Content items and where they come from
pub mod repository;
/// SQL helpers and DDL generation
pub mod schema;
/// Input validation
pub mod validation;
/// Schema versions and their markers
pub mod version;

// Re-export key components for easier access
pub use db::{SqliteStorage, StorageAdapter};
pub use descriptor::TableDescriptor;
pub use engine::PartnerTable;
pub use error::{PartnerTableError, Result};
pub use location::LocationTable;
pub use metadata::{Intercept, MetadataInterceptor, MetadataRegistry};
pub use models::{Column, ColumnType, ContentItem, ListQuery, Row, SchemaStatus, Value, WriteOutcome};
pub use repository::{Attachable, ContentSource};
