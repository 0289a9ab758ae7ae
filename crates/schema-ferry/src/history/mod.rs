//! Status and history queries over the progress ledger.
//!
//! History pages are ordered newest first and pinned to a ledger snapshot:
//! the first page records the ledger's visible `seq` watermark, and later
//! pages passing that snapshot back never include entries created after it,
//! so offset pagination stays stable while new migrations are accepted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MigrateError, Result};
use crate::state::{Migration, MigrationStatus, ProgressLedger};

/// Largest page `get_history` returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// History page request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Page size, clamped to `1..=100` (default: 20).
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Only entries with this status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MigrationStatus>,
    /// Ledger snapshot from a previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<u64>,
}

fn default_limit() -> usize {
    20
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
            status: None,
            snapshot: None,
        }
    }
}

impl HistoryQuery {
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit,
            offset,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: MigrationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn at_snapshot(mut self, snapshot: u64) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// One page of history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub migrations: Vec<Migration>,
    /// Matching entries in the snapshot, across all pages.
    pub total: usize,
    /// Pass back as `HistoryQuery::snapshot` for the next page.
    pub snapshot: u64,
}

/// Latest committed snapshot of one migration.
pub fn get_status(ledger: &ProgressLedger, id: &Uuid) -> Result<Migration> {
    ledger
        .get(id)
        .ok_or_else(|| MigrateError::NotFound(id.to_string()))
}

/// Page through the ledger, newest first.
pub fn get_history(ledger: &ProgressLedger, query: &HistoryQuery) -> HistoryPage {
    let snapshot = query.snapshot.unwrap_or_else(|| ledger.visible_seq());
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);

    let mut matching: Vec<Migration> = ledger
        .list()
        .into_iter()
        .filter(|m| m.seq <= snapshot)
        .filter(|m| query.status.map_or(true, |s| m.status == s))
        .collect();
    matching.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.seq.cmp(&a.seq))
    });

    let total = matching.len();
    let migrations = matching
        .into_iter()
        .skip(query.offset)
        .take(limit)
        .collect();

    HistoryPage {
        migrations,
        total,
        snapshot,
    }
}
