//! Metadata masquerade
//!
//! Lets a partner table stand in for one per-item metadata key. The host
//! asks a [`MetadataRegistry`] first; if no interceptor claims the key it
//! gets [`Intercept::Pass`] back and falls through to its own store.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::descriptor::TableDescriptor;
use crate::engine::PartnerTable;
use crate::error::Result;
use crate::models::{Row, WriteOutcome};

/// Result of offering a metadata call to an interceptor
#[derive(Debug, Clone, PartialEq)]
pub enum Intercept<T> {
    /// The interceptor owns the key and produced this result
    Handled(T),
    /// Not ours; the host should use its own metadata store
    Pass,
}

impl<T> Intercept<T> {
    /// Whether the call was handled
    pub const fn is_handled(&self) -> bool {
        matches!(self, Self::Handled(_))
    }

    /// The handled value, if any
    pub fn handled(self) -> Option<T> {
        match self {
            Self::Handled(value) => Some(value),
            Self::Pass => None,
        }
    }
}

/// Answers metadata reads and writes for the keys it owns
pub trait MetadataInterceptor: Send + Sync {
    /// Key this interceptor answers to
    fn meta_key(&self) -> &str;

    /// Value stored for `item_id` under `key`
    fn read_metadata(&self, item_id: i64, key: &str) -> Result<Intercept<Option<Row>>>;

    /// Store `value` for `item_id` under `key`
    fn write_metadata(&self, item_id: i64, key: &str, value: Row) -> Result<Intercept<WriteOutcome>>;

    /// Remove whatever is stored for `item_id` under `key`
    fn delete_metadata(&self, item_id: i64, key: &str) -> Result<Intercept<WriteOutcome>>;
}

impl<D: TableDescriptor> MetadataInterceptor for PartnerTable<D> {
    fn meta_key(&self) -> &str {
        PartnerTable::meta_key(self)
    }

    fn read_metadata(&self, item_id: i64, key: &str) -> Result<Intercept<Option<Row>>> {
        if key != PartnerTable::meta_key(self) {
            return Ok(Intercept::Pass);
        }
        Ok(Intercept::Handled(self.read_meta(item_id)?))
    }

    fn write_metadata(&self, item_id: i64, key: &str, value: Row) -> Result<Intercept<WriteOutcome>> {
        if key != PartnerTable::meta_key(self) {
            return Ok(Intercept::Pass);
        }
        Ok(Intercept::Handled(self.write_meta(item_id, value)?))
    }

    fn delete_metadata(&self, item_id: i64, key: &str) -> Result<Intercept<WriteOutcome>> {
        if key != PartnerTable::meta_key(self) {
            return Ok(Intercept::Pass);
        }
        Ok(Intercept::Handled(self.delete_meta(item_id)?))
    }
}

/// Ordered set of interceptors; the first to handle a key wins
#[derive(Clone, Default)]
pub struct MetadataRegistry {
    interceptors: Vec<Arc<dyn MetadataInterceptor>>,
}

impl MetadataRegistry {
    /// Registry with no interceptors
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interceptor after the existing ones
    pub fn register(&mut self, interceptor: Arc<dyn MetadataInterceptor>) {
        debug!(key = interceptor.meta_key(), "Registered metadata interceptor");
        self.interceptors.push(interceptor);
    }

    /// Keys claimed by registered interceptors, in registration order
    pub fn keys(&self) -> Vec<String> {
        self.interceptors.iter().map(|i| i.meta_key().to_string()).collect()
    }

    fn claimants<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Arc<dyn MetadataInterceptor>> + 'a {
        self.interceptors.iter().filter(move |interceptor| interceptor.meta_key() == key)
    }

    /// Read `key` for an item, or [`Intercept::Pass`] when no interceptor claims it
    pub fn read(&self, item_id: i64, key: &str) -> Result<Intercept<Option<Row>>> {
        for interceptor in self.claimants(key) {
            if let handled @ Intercept::Handled(_) = interceptor.read_metadata(item_id, key)? {
                return Ok(handled);
            }
        }
        Ok(Intercept::Pass)
    }

    /// Write `key` for an item through the first interceptor that handles it
    pub fn write(&self, item_id: i64, key: &str, value: Row) -> Result<Intercept<WriteOutcome>> {
        for interceptor in self.claimants(key) {
            if let handled @ Intercept::Handled(_) = interceptor.write_metadata(item_id, key, value.clone())? {
                return Ok(handled);
            }
        }
        Ok(Intercept::Pass)
    }

    /// Delete `key` for an item through the first interceptor that handles it
    pub fn delete(&self, item_id: i64, key: &str) -> Result<Intercept<WriteOutcome>> {
        for interceptor in self.claimants(key) {
            if let handled @ Intercept::Handled(_) = interceptor.delete_metadata(item_id, key)? {
                return Ok(handled);
            }
        }
        Ok(Intercept::Pass)
    }

    /// Number of registered interceptors
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataRegistry").field("keys", &self.keys()).finish()
    }
}
