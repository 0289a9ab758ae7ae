//! In-process connectors.
//!
//! [`MemorySource`] serves a fixed record list; [`MemoryDestination`] keeps
//! written batches keyed by `(migration, start offset)`. Both can inject
//! latency and transient failures so retry and cancellation paths can be
//! exercised without external systems.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::core::schema::ColumnDefinition;
use crate::core::traits::{
    BatchWrite, DestinationWriter, SourceInfo, SourceReader, WriteOutcome,
};
use crate::core::value::{Record, Row};
use crate::error::{MigrateError, Result};

/// Take one unit from a failure budget. Returns true while budget remains.
fn consume(budget: &AtomicU32) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// A source backed by a record vector.
pub struct MemorySource {
    table: String,
    records: Vec<Record>,
    columns: Option<Vec<ColumnDefinition>>,
    reported_rows: Option<u64>,
    countable: bool,
    read_delay: Duration,
    transient_failures: AtomicU32,
    unreachable: AtomicBool,
}

impl MemorySource {
    /// Schemaless source; reports its record count.
    pub fn new(table: impl Into<String>, records: Vec<Record>) -> Self {
        let reported_rows = Some(records.len() as u64);
        Self {
            table: table.into(),
            records,
            columns: None,
            reported_rows,
            countable: true,
            read_delay: Duration::ZERO,
            transient_failures: AtomicU32::new(0),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Attach a declared schema.
    pub fn with_columns(mut self, columns: Vec<ColumnDefinition>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Override the row count reported by introspection.
    pub fn with_reported_rows(mut self, rows: Option<u64>) -> Self {
        self.reported_rows = rows;
        self
    }

    /// Report no row count anywhere, so the total stays unknown until the
    /// source is exhausted.
    pub fn without_count(mut self) -> Self {
        self.reported_rows = None;
        self.countable = false;
        self
    }

    /// Sleep before every read.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Fail the next `n` reads with `SourceUnreachable`.
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Toggle whether every call fails.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MigrateError::SourceUnreachable(format!(
                "{} is unreachable",
                self.describe()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn introspect(&self) -> Result<SourceInfo> {
        self.check_reachable()?;
        Ok(SourceInfo {
            columns: self.columns.clone(),
            row_count: self.reported_rows,
            estimated_size_mb: None,
        })
    }

    async fn count_rows(&self) -> Result<Option<u64>> {
        self.check_reachable()?;
        Ok(self.countable.then_some(self.records.len() as u64))
    }

    async fn read_records(&self, offset: u64, limit: usize) -> Result<Vec<Record>> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.check_reachable()?;
        if consume(&self.transient_failures) {
            return Err(MigrateError::SourceUnreachable(format!(
                "{}: injected read failure at offset {}",
                self.describe(),
                offset
            )));
        }
        let start = (offset as usize).min(self.records.len());
        let end = start.saturating_add(limit).min(self.records.len());
        Ok(self.records[start..end].to_vec())
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.table)
    }
}

#[derive(Debug, Clone)]
struct StoredBatch {
    end_offset: u64,
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct StoredTable {
    ddl: Option<String>,
    batches: BTreeMap<(Uuid, u64), StoredBatch>,
}

/// A destination that keeps everything in memory.
pub struct MemoryDestination {
    tables: Mutex<HashMap<String, StoredTable>>,
    latency: Duration,
    transient_failures: AtomicU32,
    always_fail: AtomicBool,
    applied: AtomicU64,
    duplicates: AtomicU64,
}

impl Default for MemoryDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            latency: Duration::ZERO,
            transient_failures: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            applied: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Sleep before every DDL or batch write.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `n` batch writes with `DestinationUnavailable`.
    pub fn with_transient_failures(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Toggle whether every write fails.
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// DDL recorded by `ensure_table`.
    pub fn ddl(&self, table: &str) -> Option<String> {
        self.tables.lock().get(table).and_then(|t| t.ddl.clone())
    }

    /// All stored rows of `table`, in `(migration, offset)` order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.batches.values().flat_map(|b| b.rows.clone()).collect())
            .unwrap_or_default()
    }

    /// Column list of the first stored batch.
    pub fn columns(&self, table: &str) -> Vec<String> {
        self.tables
            .lock()
            .get(table)
            .and_then(|t| t.batches.values().next().map(|b| b.columns.clone()))
            .unwrap_or_default()
    }

    /// Number of distinct batches stored for `table`.
    pub fn batch_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.batches.len())
            .unwrap_or(0)
    }

    /// Writes that changed state.
    pub fn applied_writes(&self) -> u64 {
        self.applied.load(Ordering::SeqCst)
    }

    /// Writes ignored because the range was already applied.
    pub fn duplicate_writes(&self) -> u64 {
        self.duplicates.load(Ordering::SeqCst)
    }

    /// Apply a batch directly, bypassing latency and failure injection.
    pub fn apply(&self, batch: &BatchWrite) -> WriteOutcome {
        let mut tables = self.tables.lock();
        let table = tables.entry(batch.table.clone()).or_default();
        let key = (batch.migration_id, batch.start_offset);

        if let Some(existing) = table.batches.get(&key) {
            if existing.end_offset == batch.end_offset {
                self.duplicates.fetch_add(1, Ordering::SeqCst);
                return WriteOutcome::AlreadyApplied;
            }
        }

        // A replay with a different range supersedes whatever overlaps it.
        table.batches.retain(|(id, start), stored| {
            *id != batch.migration_id
                || stored.end_offset <= batch.start_offset
                || *start >= batch.end_offset
        });
        table.batches.insert(
            key,
            StoredBatch {
                end_offset: batch.end_offset,
                columns: batch.columns.clone(),
                rows: batch.rows.clone(),
            },
        );
        self.applied.fetch_add(1, Ordering::SeqCst);
        WriteOutcome::Applied {
            rows: batch.rows.len(),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(MigrateError::DestinationUnavailable(
                "memory destination is failing all writes".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationWriter for MemoryDestination {
    async fn ensure_table(&self, table: &str, ddl: &str) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check_available()?;
        let mut tables = self.tables.lock();
        let entry = tables.entry(table.to_string()).or_default();
        if entry.ddl.is_none() {
            debug!("memory destination: created {}", table);
            entry.ddl = Some(ddl.to_string());
        }
        Ok(())
    }

    async fn write_batch(&self, batch: &BatchWrite) -> Result<WriteOutcome> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check_available()?;
        if consume(&self.transient_failures) {
            return Err(MigrateError::DestinationUnavailable(format!(
                "injected write failure for rows {}..{}",
                batch.start_offset, batch.end_offset
            )));
        }
        Ok(self.apply(batch))
    }

    async fn row_count(&self, table: &str) -> Result<u64> {
        Ok(self.rows(table).len() as u64)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::SqlValue;

    fn batch(id: Uuid, start: u64, end: u64) -> BatchWrite {
        BatchWrite {
            migration_id: id,
            table: "people".into(),
            columns: vec!["id".into()],
            start_offset: start,
            end_offset: end,
            rows: (start..end).map(|i| vec![SqlValue::Int(i as i64)]).collect(),
        }
    }

    #[tokio::test]
    async fn test_source_pages_and_exhausts() {
        let records = (0..5)
            .map(|i| Record::new().with("id", SqlValue::Int(i)))
            .collect();
        let source = MemorySource::new("users", records);
        assert_eq!(source.read_records(0, 2).await.unwrap().len(), 2);
        assert_eq!(source.read_records(4, 2).await.unwrap().len(), 1);
        assert!(source.read_records(9, 2).await.unwrap().is_empty());
        assert_eq!(source.count_rows().await.unwrap(), Some(5));
        assert_eq!(source.without_count().count_rows().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_source_transient_failures_run_out() {
        let source = MemorySource::new("users", Vec::new()).with_transient_failures(2);
        assert!(source.read_records(0, 1).await.is_err());
        assert!(source.read_records(0, 1).await.is_err());
        assert!(source.read_records(0, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_destination_ignores_replayed_range() {
        let dest = MemoryDestination::new();
        let id = Uuid::new_v4();
        assert_eq!(
            dest.write_batch(&batch(id, 0, 3)).await.unwrap(),
            WriteOutcome::Applied { rows: 3 }
        );
        assert_eq!(
            dest.write_batch(&batch(id, 0, 3)).await.unwrap(),
            WriteOutcome::AlreadyApplied
        );
        assert_eq!(dest.rows("people").len(), 3);
        assert_eq!(dest.duplicate_writes(), 1);
    }

    #[tokio::test]
    async fn test_destination_replaces_overlapping_range() {
        let dest = MemoryDestination::new();
        let id = Uuid::new_v4();
        dest.write_batch(&batch(id, 0, 4)).await.unwrap();
        dest.write_batch(&batch(id, 0, 2)).await.unwrap();
        dest.write_batch(&batch(id, 2, 4)).await.unwrap();
        assert_eq!(dest.rows("people").len(), 4);
        assert_eq!(dest.batch_count("people"), 2);
    }

    #[tokio::test]
    async fn test_destination_failure_injection() {
        let dest = MemoryDestination::new().with_transient_failures(1);
        let id = Uuid::new_v4();
        assert!(dest.write_batch(&batch(id, 0, 1)).await.is_err());
        assert!(dest.write_batch(&batch(id, 0, 1)).await.is_ok());

        dest.set_always_fail(true);
        let err = dest.ensure_table("people", "CREATE TABLE people (id BIGINT)").await;
        assert!(matches!(err, Err(MigrateError::DestinationUnavailable(_))));
    }
}
