use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names published through the `metrics` facade
pub mod names {
    /// Engine operations, labelled by table, operation and status
    pub const OPERATIONS_TOTAL: &str = "partner_tables_operations_total";
    /// Engine operation latency in seconds
    pub const OPERATION_DURATION: &str = "partner_tables_operation_duration_seconds";
    /// Failed engine operations
    pub const ERRORS_TOTAL: &str = "partner_tables_errors_total";
    /// Items that received side-table columns
    pub const ROWS_JOINED_TOTAL: &str = "partner_tables_rows_joined_total";
    /// Size of the last attach batch
    pub const ATTACH_BATCH_SIZE: &str = "partner_tables_attach_batch_size";
    /// Schema installs and upgrades
    pub const SCHEMA_INSTALLS_TOTAL: &str = "partner_tables_schema_installs_total";
}

/// Point-in-time copy of the local counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Storage operations attempted
    pub operations_total: u64,
    /// Operations that returned an error
    pub errors_total: u64,
    /// Items that received side-table data
    pub rows_joined_total: u64,
    /// Installs and upgrades that completed
    pub schema_installs_total: u64,
}

/// Metrics collection for one partner table.
///
/// Everything is forwarded to the global `metrics` recorder (a no-op until
/// the host installs one) and also counted locally so callers can inspect
/// totals without a recorder.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    operations_total: AtomicU64,
    errors_total: AtomicU64,
    rows_joined_total: AtomicU64,
    schema_installs_total: AtomicU64,
}

impl MetricsCollector {
    /// Empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an engine operation
    pub fn record_operation(&self, table: &str, operation: &'static str, duration: Duration, success: bool) {
        let status = if success { "success" } else { "error" };

        self.operations_total.fetch_add(1, Ordering::Relaxed);
        counter!(
            names::OPERATIONS_TOTAL,
            "table" => table.to_string(),
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        histogram!(names::OPERATION_DURATION, "table" => table.to_string(), "operation" => operation)
            .record(duration.as_secs_f64());

        if !success {
            self.record_error(table, operation);
        }
    }

    /// Record a failed operation
    pub fn record_error(&self, table: &str, operation: &'static str) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        counter!(names::ERRORS_TOTAL, "table" => table.to_string(), "operation" => operation).increment(1);
    }

    /// Record an attach batch: `batch` eligible items, `joined` of them matched
    pub fn record_join(&self, table: &str, batch: usize, joined: usize) {
        self.rows_joined_total.fetch_add(joined as u64, Ordering::Relaxed);
        counter!(names::ROWS_JOINED_TOTAL, "table" => table.to_string()).increment(joined as u64);
        #[allow(clippy::cast_precision_loss)]
        let batch = batch as f64;
        gauge!(names::ATTACH_BATCH_SIZE, "table" => table.to_string()).set(batch);
    }

    /// Record a schema install or upgrade
    pub fn record_schema_install(&self, table: &str) {
        self.schema_installs_total.fetch_add(1, Ordering::Relaxed);
        counter!(names::SCHEMA_INSTALLS_TOTAL, "table" => table.to_string()).increment(1);
    }

    /// Current local totals
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations_total: self.operations_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            rows_joined_total: self.rows_joined_total.load(Ordering::Relaxed),
            schema_installs_total: self.schema_installs_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.snapshot(), MetricsSnapshot::default());
        assert_eq!(names::OPERATIONS_TOTAL, "partner_tables_operations_total");
    }

    #[test]
    fn test_failed_operation_counts_as_error() {
        let collector = MetricsCollector::new();
        collector.record_operation("pt_location", "get", Duration::from_millis(3), true);
        collector.record_operation("pt_location", "update", Duration::from_millis(3), false);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.operations_total, 2);
        assert_eq!(snapshot.errors_total, 1);
    }
}
