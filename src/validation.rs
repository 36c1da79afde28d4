use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::OnceLock;

use crate::version::parse_version;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static identifier pattern"))
}

fn prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]*$").expect("static prefix pattern"))
}

/// Validation utilities for names and settings that end up in SQL text
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a table or column identifier
    pub fn validate_identifier(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(anyhow!("Identifier cannot be empty"));
        }

        if name.len() > 64 {
            return Err(anyhow!("Identifier too long (max 64 characters): {name}"));
        }

        if !identifier_pattern().is_match(name) {
            return Err(anyhow!(
                "Identifier must start with a letter or underscore and contain only letters, digits and underscores: {name:?}"
            ));
        }

        Ok(())
    }

    /// Validate a table or metadata key prefix (may be empty)
    pub fn validate_table_prefix(prefix: &str) -> Result<()> {
        if prefix.len() > 32 {
            return Err(anyhow!("Prefix too long (max 32 characters)"));
        }

        if !prefix_pattern().is_match(prefix) {
            return Err(anyhow!("Prefix contains invalid characters: {prefix:?}"));
        }

        Ok(())
    }

    /// Validate a schema version string
    pub fn validate_version(version: &str) -> Result<()> {
        if version.trim().is_empty() {
            return Err(anyhow!("Version cannot be empty"));
        }

        if version.len() > 50 {
            return Err(anyhow!("Version too long (max 50 characters)"));
        }

        if parse_version(version).is_none() {
            return Err(anyhow!("Version must be dotted numbers with an optional suffix: {version:?}"));
        }

        Ok(())
    }

    /// Row ids are positive integers
    #[must_use]
    pub const fn is_valid_row_id(row_id: i64) -> bool {
        row_id > 0
    }

    /// Validate database URL
    pub fn validate_database_url(url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(anyhow!("Database URL cannot be empty"));
        }

        if url.contains("://") && !url.starts_with("sqlite://") {
            return Err(anyhow!("Only SQLite databases are supported"));
        }

        if url.len() > 1000 {
            return Err(anyhow!("Database URL too long"));
        }

        Ok(())
    }
}
