//! Ledger backend trait for migration record storage.
//!
//! The [`LedgerBackend`] trait defines how ledger entries are persisted:
//!
//! - **Memory**: [`MemoryLedger`](super::MemoryLedger), process-local
//! - **File**: [`FileLedger`](super::FileLedger), signed JSON file
//!
//! The executor never talks to a backend directly; it goes through
//! [`ProgressLedger`](super::ProgressLedger), which serializes commits and
//! writes every change through to the backend before publishing it.

use async_trait::async_trait;

use super::{Migration, MigrationStatus};
use crate::error::Result;

/// Trait for ledger persistence backends.
///
/// Implementations must be `Send + Sync` to allow sharing across tasks.
///
/// ```rust,ignore
/// let backend: Arc<dyn LedgerBackend> = Arc::new(FileLedger::new(path));
/// backend.init().await?;
/// let seq = backend.insert(&migration).await?;
/// backend.save(&migration).await?;
/// let all = backend.load_all().await?;
/// ```
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Prepare storage. Idempotent.
    async fn init(&self) -> Result<()>;

    /// Store a new entry under the next free `seq` and return that `seq`.
    /// The `seq` carried by `migration` is ignored. Backends shared between
    /// processes must allocate it against what is already stored.
    async fn insert(&self, migration: &Migration) -> Result<u64>;

    /// Insert or replace the entry with `migration.id`.
    async fn save(&self, migration: &Migration) -> Result<()>;

    /// Every stored entry, in insertion (`seq`) order.
    async fn load_all(&self) -> Result<Vec<Migration>>;

    /// Backend type name for logging.
    fn backend_type(&self) -> &'static str;
}

/// Convert a status to its stored string form.
pub fn status_to_str(status: MigrationStatus) -> &'static str {
    match status {
        MigrationStatus::Pending => "pending",
        MigrationStatus::Running => "running",
        MigrationStatus::Succeeded => "succeeded",
        MigrationStatus::Failed => "failed",
        MigrationStatus::Cancelled => "cancelled",
    }
}

/// Parse a status from its string form.
pub fn str_to_status(s: &str) -> Result<MigrationStatus> {
    use crate::error::MigrateError;
    match s {
        "pending" => Ok(MigrationStatus::Pending),
        "running" => Ok(MigrationStatus::Running),
        "succeeded" => Ok(MigrationStatus::Succeeded),
        "failed" => Ok(MigrationStatus::Failed),
        "cancelled" => Ok(MigrationStatus::Cancelled),
        _ => Err(MigrateError::validation(format!(
            "invalid migration status: {}",
            s
        ))),
    }
}
