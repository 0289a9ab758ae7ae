//! Progress ledger: durable record of every migration.
//!
//! - [`Migration`]: one ledger entry, mutated only by the executor
//! - [`LedgerBackend`]: storage strategy ([`MemoryLedger`], [`FileLedger`])
//! - [`ProgressLedger`]: live view over a backend with per-migration commit
//!   locks and `watch` channels for readers

pub mod backend;
pub mod file;
pub mod ledger;
pub mod memory;

pub use backend::{status_to_str, str_to_status, LedgerBackend};
pub use file::{FileLedger, LedgerFile};
pub use ledger::ProgressLedger;
pub use memory::MemoryLedger;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::schema::{DestinationDescriptor, FieldMapping, SourceDescriptor, TableSchema};

/// Migration lifecycle state.
///
/// `pending → running → {succeeded, failed, cancelled}`. An entry becomes
/// `running` when its first batch begins, after connectors are opened and
/// the destination table is created. A failure in that setup step moves it
/// straight from `pending` to `failed`, with `started_at` left unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl MigrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Succeeded | MigrationStatus::Failed | MigrationStatus::Cancelled
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(status_to_str(*self))
    }
}

/// Progress counters.
///
/// `processed_records` counts rows written to the destination and never
/// decreases. `percentage` stays 0 until the total is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationProgress {
    pub total_records: u64,
    pub processed_records: u64,
    pub percentage: f64,
    /// False while the source has not reported a count.
    pub total_known: bool,
    /// Batches committed so far.
    pub current_batch: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_batches: Option<u64>,
}

impl MigrationProgress {
    pub fn new(total: Option<u64>, batch_size: usize) -> Self {
        let mut progress = Self {
            total_records: 0,
            processed_records: 0,
            percentage: 0.0,
            total_known: false,
            current_batch: 0,
            total_batches: None,
        };
        if let Some(total) = total {
            progress.set_total(total, batch_size);
        }
        progress
    }

    /// Set a known total and refresh derived fields.
    pub fn set_total(&mut self, total: u64, batch_size: usize) {
        self.total_records = total;
        self.total_known = true;
        let batch_size = batch_size.max(1) as u64;
        self.total_batches = Some(total.div_ceil(batch_size));
        self.recompute();
    }

    pub fn recompute(&mut self) {
        self.percentage = if self.total_known && self.total_records > 0 {
            let pct = self.processed_records as f64 / self.total_records as f64 * 100.0;
            (pct * 100.0).round() / 100.0
        } else {
            0.0
        };
    }
}

/// A row that failed transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// Absolute source offset.
    pub row: u64,
    pub column: String,
    pub message: String,
}

/// One ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub id: Uuid,

    /// Ledger insertion sequence; later entries have higher values.
    pub seq: u64,

    pub source: SourceDescriptor,
    pub destination: DestinationDescriptor,
    pub schema: TableSchema,
    pub mappings: Vec<FieldMapping>,
    pub ddl: String,

    /// Whether the executor issues the DDL before the first batch.
    #[serde(default)]
    pub create_table: bool,

    /// Hash of the configuration the migration was accepted under.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub config_hash: String,

    pub status: MigrationStatus,
    pub progress: MigrationProgress,

    /// Source offset up to which every record has been handled.
    pub committed_offset: u64,

    /// First recorded row errors.
    #[serde(default)]
    pub row_errors: Vec<RowError>,

    /// Every row error, recorded or not.
    #[serde(default)]
    pub row_error_count: u64,

    /// Failure detail for `failed` migrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Migration {
    /// Create a pending migration. `seq` is assigned by the ledger.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: SourceDescriptor,
        destination: DestinationDescriptor,
        schema: TableSchema,
        mappings: Vec<FieldMapping>,
        ddl: String,
        create_table: bool,
        progress: MigrationProgress,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            seq: 0,
            source,
            destination,
            schema,
            mappings,
            ddl,
            create_table,
            config_hash: String::new(),
            status: MigrationStatus::Pending,
            progress,
            committed_offset: 0,
            row_errors: Vec::new(),
            row_error_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            description: None,
            created_by: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = MigrationStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_succeeded(&mut self) {
        self.status = MigrationStatus::Succeeded;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, detail: impl Into<String>) {
        self.status = MigrationStatus::Failed;
        self.error = Some(detail.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = MigrationStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Count row errors, keeping the first `max_recorded` verbatim.
    pub fn record_row_errors(&mut self, errors: Vec<RowError>, max_recorded: usize) {
        self.row_error_count += errors.len() as u64;
        let room = max_recorded.saturating_sub(self.row_errors.len());
        self.row_errors.extend(errors.into_iter().take(room));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migration() -> Migration {
        Migration::new(
            SourceDescriptor::memory("crm", "users"),
            DestinationDescriptor::memory("wh", "people"),
            TableSchema {
                table: "users".into(),
                schema: None,
                columns: Vec::new(),
                row_count: None,
                estimated_size_mb: None,
            },
            Vec::new(),
            String::new(),
            true,
            MigrationProgress::new(None, 10),
        )
    }

    #[test]
    fn test_progress_percentage_needs_known_total() {
        let mut p = MigrationProgress::new(None, 10);
        p.processed_records = 5;
        p.recompute();
        assert_eq!(p.percentage, 0.0);
        assert_eq!(p.total_batches, None);

        p.set_total(15, 10);
        assert_eq!(p.percentage, 33.33);
        assert_eq!(p.total_batches, Some(2));

        let empty = MigrationProgress::new(Some(0), 10);
        assert_eq!(empty.percentage, 0.0);
        assert_eq!(empty.total_batches, Some(0));
    }

    #[test]
    fn test_row_errors_are_capped_but_counted() {
        let mut m = migration();
        let errors: Vec<_> = (0..5)
            .map(|row| RowError {
                row,
                column: "id".into(),
                message: "bad".into(),
            })
            .collect();
        m.record_row_errors(errors.clone(), 3);
        m.record_row_errors(errors, 3);
        assert_eq!(m.row_errors.len(), 3);
        assert_eq!(m.row_error_count, 10);
    }

    #[test]
    fn test_status_transitions_stamp_times() {
        let mut m = migration();
        assert_eq!(m.status, MigrationStatus::Pending);
        m.mark_running();
        let started = m.started_at;
        assert!(started.is_some());
        m.mark_running();
        assert_eq!(m.started_at, started);
        m.mark_failed("boom");
        assert!(m.status.is_terminal());
        assert_eq!(m.error.as_deref(), Some("boom"));
        assert!(m.completed_at.is_some());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&MigrationStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
        assert_eq!(MigrationStatus::Cancelled.to_string(), "cancelled");
    }
}
