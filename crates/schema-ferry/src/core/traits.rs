//! Connector traits.
//!
//! - [`SourceReader`]: introspects a source table and pages through its records
//! - [`DestinationWriter`]: creates the destination table and applies batches
//!
//! Batches are addressed by source offset. A destination must treat a
//! [`BatchWrite`] whose `(migration_id, start_offset, end_offset)` range it
//! has already applied as a no-op; the executor relies on this to replay the
//! last uncommitted batch after a restart.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

use super::schema::ColumnDefinition;
use super::value::{Record, Row};

/// What a source can say about itself without reading data.
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    /// Declared columns, if the source carries a schema.
    pub columns: Option<Vec<ColumnDefinition>>,
    pub row_count: Option<u64>,
    pub estimated_size_mb: Option<f64>,
}

/// A transformed batch, tagged with the source range it came from.
#[derive(Debug, Clone)]
pub struct BatchWrite {
    pub migration_id: Uuid,
    pub table: String,
    /// Destination column names; every row is aligned with this list.
    pub columns: Vec<String>,
    /// First source offset in the batch.
    pub start_offset: u64,
    /// One past the last source offset in the batch.
    pub end_offset: u64,
    /// Rows that transformed cleanly. May be shorter than the range when
    /// rows were rejected.
    pub rows: Vec<Row>,
}

/// Outcome of [`DestinationWriter::write_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The batch was written.
    Applied { rows: usize },
    /// This range was already applied for this migration; nothing changed.
    AlreadyApplied,
}

/// Read access to one source table.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Declared schema and size hints.
    async fn introspect(&self) -> Result<SourceInfo>;

    /// Exact record count, when the source can produce one cheaply.
    async fn count_rows(&self) -> Result<Option<u64>>;

    /// Up to `limit` records starting at `offset`, in stable source order.
    /// An empty result means the source is exhausted.
    async fn read_records(&self, offset: u64, limit: usize) -> Result<Vec<Record>>;

    /// Human-readable identity for logs.
    fn describe(&self) -> String;
}

/// Write access to one destination.
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    /// Create `table` with `ddl` if it does not exist yet.
    async fn ensure_table(&self, table: &str, ddl: &str) -> Result<()>;

    /// Apply a batch. Must be idempotent per `(migration_id, range)`.
    async fn write_batch(&self, batch: &BatchWrite) -> Result<WriteOutcome>;

    /// Rows currently stored in `table`.
    async fn row_count(&self, table: &str) -> Result<u64>;

    /// Human-readable identity for logs.
    fn describe(&self) -> String;
}
