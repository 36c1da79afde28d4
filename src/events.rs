//! Insert notifications
//!
//! The engine announces every insert twice: once with the final column set
//! before the write and once with the generated id after it. Observers are
//! fire-and-forget; nothing they do can change or fail the insert.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::models::Row;

/// An insert notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum InsertEvent {
    /// About to insert `data` into `table`
    PreInsert {
        /// Descriptor name
        table: String,
        /// Whitelisted columns, defaults applied
        data: Row,
    },
    /// Inserted `data` into `table` as row `id`
    PostInsert {
        /// Descriptor name
        table: String,
        /// Generated primary key
        id: i64,
        /// Whitelisted columns, defaults applied
        data: Row,
    },
}

impl InsertEvent {
    /// Hook name, e.g. `partner_table_post_insert_location`
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::PreInsert { table, .. } => format!("partner_table_pre_insert_{table}"),
            Self::PostInsert { table, .. } => format!("partner_table_post_insert_{table}"),
        }
    }

    /// The column set carried by the event
    #[must_use]
    pub const fn data(&self) -> &Row {
        match self {
            Self::PreInsert { data, .. } | Self::PostInsert { data, .. } => data,
        }
    }
}

/// Receives insert notifications
pub trait InsertObserver: Send + Sync {
    /// Called synchronously on the inserting thread
    fn notify(&self, event: &InsertEvent);
}

impl<F> InsertObserver for F
where
    F: Fn(&InsertEvent) + Send + Sync,
{
    fn notify(&self, event: &InsertEvent) {
        self(event);
    }
}

/// Fan-out list of observers
#[derive(Clone, Default)]
pub struct Observers {
    observers: Vec<Arc<dyn InsertObserver>>,
}

impl Observers {
    /// Empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn subscribe(&mut self, observer: Arc<dyn InsertObserver>) {
        self.observers.push(observer);
    }

    /// Deliver an event to every observer, in subscription order
    pub fn emit(&self, event: &InsertEvent) {
        for observer in &self.observers {
            observer.notify(event);
        }
    }

    /// Number of subscribed observers
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether nobody is listening
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("len", &self.observers.len()).finish()
    }
}

/// Logs every event at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl InsertObserver for TracingObserver {
    fn notify(&self, event: &InsertEvent) {
        match event {
            InsertEvent::PreInsert { data, .. } => {
                debug!(hook = %event.name(), columns = data.len(), "partner table insert starting");
            },
            InsertEvent::PostInsert { id, data, .. } => {
                debug!(hook = %event.name(), id, columns = data.len(), "partner table insert finished");
            },
        }
    }
}
