//! Migration executor.
//!
//! Accepts execute requests, records them on the ledger, and drives each
//! accepted migration on its own task through the [`TransferEngine`]. At
//! most one task runs per migration id.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::catalog::DriverCatalog;
use crate::core::identifier::validate_table_name;
use crate::core::schema::{DestinationDescriptor, FieldMapping, SourceDescriptor, TableSchema};
use crate::error::{MigrateError, Result};
use crate::mapping;
use crate::state::{Migration, MigrationProgress, MigrationStatus, ProgressLedger};
use crate::transfer::{TransferEngine, TransferJob, TransferOutcome};
use crate::transform::RowTransformer;

/// Request to start (or resume) a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Resume this ledger entry instead of creating a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_id: Option<Uuid>,
    pub schema: TableSchema,
    pub mappings: Vec<FieldMapping>,
    pub source: SourceDescriptor,
    pub destination: DestinationDescriptor,
    /// Issue the generated DDL before the first batch.
    #[serde(default = "default_create_table")]
    pub create_table: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

fn default_create_table() -> bool {
    true
}

impl ExecuteRequest {
    pub fn new(
        schema: TableSchema,
        mappings: Vec<FieldMapping>,
        source: SourceDescriptor,
        destination: DestinationDescriptor,
    ) -> Self {
        Self {
            migration_id: None,
            schema,
            mappings,
            source,
            destination,
            create_table: true,
            description: None,
            created_by: None,
        }
    }

    /// Request resumption of an existing ledger entry.
    pub fn resume(id: Uuid, existing: &Migration) -> Self {
        Self {
            migration_id: Some(id),
            ..Self::new(
                existing.schema.clone(),
                existing.mappings.clone(),
                existing.source.clone(),
                existing.destination.clone(),
            )
        }
    }
}

struct ActiveTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Runs migrations against a catalog and a ledger.
pub struct Executor {
    config: EngineConfig,
    catalog: Arc<DriverCatalog>,
    ledger: Arc<ProgressLedger>,
    active: Arc<Mutex<HashMap<Uuid, ActiveTask>>>,
    shutdown: CancellationToken,
    config_hash: String,
}

impl Executor {
    pub fn new(config: EngineConfig, catalog: Arc<DriverCatalog>, ledger: Arc<ProgressLedger>) -> Self {
        Self {
            config,
            catalog,
            ledger,
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            config_hash: String::new(),
        }
    }

    /// Stamp new migrations with `hash` and flag resumes under another one.
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    pub fn ledger(&self) -> &Arc<ProgressLedger> {
        &self.ledger
    }

    pub fn catalog(&self) -> &Arc<DriverCatalog> {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate and accept a request, returning the `pending` entry (or the
    /// resumed entry) without waiting for the transfer.
    ///
    /// With `migration_id` set: `NotFound` for an unknown id,
    /// `AlreadyRunning` when a task holds it, `InvalidState` when terminal,
    /// otherwise the stored entry is resumed from its committed offset.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<Migration> {
        if self.shutdown.is_cancelled() {
            return Err(MigrateError::InvalidState(
                "executor is shutting down".to_string(),
            ));
        }

        if let Some(id) = request.migration_id {
            let existing = self
                .ledger
                .get(&id)
                .ok_or_else(|| MigrateError::NotFound(id.to_string()))?;
            if self.is_active(&id) {
                return Err(MigrateError::AlreadyRunning(id.to_string()));
            }
            if existing.status.is_terminal() {
                return Err(MigrateError::InvalidState(format!(
                    "migration {} is {} and cannot be resumed",
                    id, existing.status
                )));
            }
            info!(
                "Resuming migration {} at offset {}",
                id, existing.committed_offset
            );
            self.check_config(&existing);
            self.spawn(&existing)?;
            return Ok(existing);
        }

        validate_table_name(&request.destination.table)?;
        mapping::validate(&request.schema, &request.mappings)?;
        let ddl = mapping::render_ddl(
            &request.schema,
            &request.mappings,
            &request.destination.table,
        )?;
        // Fail fast on mappings the transformer cannot compile.
        RowTransformer::compile(
            &request.schema,
            &request.mappings,
            self.config.truncate_hard_limit,
        )?;

        let progress = MigrationProgress::new(request.schema.row_count, self.config.batch_size);
        let mut migration = Migration::new(
            request.source,
            request.destination,
            request.schema,
            request.mappings,
            ddl,
            request.create_table,
            progress,
        );
        migration.description = request.description;
        migration.created_by = request.created_by;
        migration.config_hash = self.config_hash.clone();

        let migration = self.ledger.insert(migration).await?;
        info!(
            "Accepted migration {}: {} -> {}",
            migration.id, migration.source, migration.destination
        );
        self.spawn(&migration)?;
        Ok(migration)
    }

    /// Latest snapshot of `id`.
    pub fn status(&self, id: &Uuid) -> Result<Migration> {
        self.ledger
            .get(id)
            .ok_or_else(|| MigrateError::NotFound(id.to_string()))
    }

    /// Request cancellation of a running migration. The task stops after
    /// its in-flight batch and the entry ends `cancelled`.
    pub fn cancel(&self, id: &Uuid) -> Result<Migration> {
        let migration = self.status(id)?;
        if migration.status != MigrationStatus::Running {
            return Err(MigrateError::InvalidState(format!(
                "migration {} is {}, only running migrations can be cancelled",
                id, migration.status
            )));
        }
        match self.active.lock().get(id) {
            Some(task) => task.cancel.cancel(),
            None => {
                return Err(MigrateError::InvalidState(format!(
                    "migration {} is not executing in this process",
                    id
                )))
            }
        }
        info!("Cancellation requested for migration {}", id);
        Ok(migration)
    }

    /// Resume every non-terminal entry without a task. Returns the ids
    /// resumed, in ledger order.
    pub fn recover(&self) -> Result<Vec<Uuid>> {
        let mut pending: Vec<Migration> = self
            .ledger
            .list()
            .into_iter()
            .filter(|m| !m.status.is_terminal())
            .collect();
        pending.sort_by_key(|m| m.seq);

        let mut resumed = Vec::new();
        for migration in pending {
            if self.is_active(&migration.id) {
                continue;
            }
            info!(
                "Recovering migration {} ({}) at offset {}",
                migration.id, migration.status, migration.committed_offset
            );
            self.check_config(&migration);
            self.spawn(&migration)?;
            resumed.push(migration.id);
        }
        Ok(resumed)
    }

    /// Wait until `id` reaches a terminal state.
    pub async fn wait(&self, id: &Uuid) -> Result<Migration> {
        let mut rx = self
            .ledger
            .subscribe(id)
            .ok_or_else(|| MigrateError::NotFound(id.to_string()))?;
        let migration = rx
            .wait_for(|m| m.status.is_terminal())
            .await
            .map_err(|e| MigrateError::Ledger(format!("ledger channel closed: {}", e)))?
            .clone();
        Ok(migration)
    }

    /// Number of migrations with a live task.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_active(&self, id: &Uuid) -> bool {
        self.active.lock().contains_key(id)
    }

    /// Stop every task after its in-flight batch and wait for them to exit.
    /// Entries keep their non-terminal status so `recover` can resume them.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .active
            .lock()
            .values_mut()
            .filter_map(|t| t.handle.take())
            .collect();
        info!("Shutting down, waiting for {} migrations", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Migration task ended abnormally: {}", e);
            }
        }
    }

    /// Resumed migrations continue under the current configuration.
    fn check_config(&self, migration: &Migration) {
        if !migration.config_hash.is_empty()
            && !self.config_hash.is_empty()
            && migration.config_hash != self.config_hash
        {
            warn!(
                "Migration {} was accepted under a different configuration; \
                 continuing with the current one",
                migration.id
            );
        }
    }

    fn spawn(&self, migration: &Migration) -> Result<()> {
        let id = migration.id;
        let cancel = CancellationToken::new();
        {
            let mut active = self.active.lock();
            if active.contains_key(&id) {
                return Err(MigrateError::AlreadyRunning(id.to_string()));
            }
            active.insert(
                id,
                ActiveTask {
                    cancel: cancel.clone(),
                    handle: None,
                },
            );
        }

        let engine = TransferEngine::new(self.config.clone(), self.ledger.clone());
        let catalog = self.catalog.clone();
        let ledger = self.ledger.clone();
        let active = self.active.clone();
        let shutdown = self.shutdown.clone();
        let truncate_hard_limit = self.config.truncate_hard_limit;
        let migration = migration.clone();

        let handle = tokio::spawn(async move {
            let result = async {
                let job = prepare(&catalog, &migration, truncate_hard_limit).await?;
                engine.run(job, &cancel, &shutdown).await
            }
            .await;

            match result {
                Ok(TransferOutcome::Succeeded) => info!("Migration {} succeeded", id),
                Ok(TransferOutcome::Failed(detail)) => warn!("Migration {} failed: {}", id, detail),
                Ok(TransferOutcome::Cancelled) => info!("Migration {} cancelled", id),
                Ok(TransferOutcome::Interrupted) => {
                    info!("Migration {} interrupted, left for recovery", id)
                }
                Err(e) => {
                    error!("Migration {} failed: {}", id, e);
                    let detail = e.to_string();
                    if let Err(e) = ledger.update(&id, |m| m.mark_failed(detail)).await {
                        error!("Failed to record failure of migration {}: {}", id, e);
                    }
                }
            }
            active.lock().remove(&id);
        });

        if let Some(task) = self.active.lock().get_mut(&id) {
            task.handle = Some(handle);
        }
        Ok(())
    }
}

async fn prepare(
    catalog: &DriverCatalog,
    migration: &Migration,
    truncate_hard_limit: usize,
) -> Result<TransferJob> {
    let source = catalog.open_source(&migration.source).await?;
    let destination = catalog.open_destination(&migration.destination).await?;
    let transformer =
        RowTransformer::compile(&migration.schema, &migration.mappings, truncate_hard_limit)?;
    Ok(TransferJob {
        migration_id: migration.id,
        source,
        destination,
        transformer,
        table: migration.destination.table.clone(),
        ddl: migration.ddl.clone(),
        create_table: migration.create_table,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnDefinition;
    use crate::core::value::{Record, SqlValue};
    use crate::drivers::{MemoryDestination, MemorySource};
    use std::time::Duration;

    fn users(n: i64) -> Vec<Record> {
        (0..n)
            .map(|i| {
                Record::new()
                    .with("id", SqlValue::Int(i))
                    .with("name", SqlValue::Text(format!("user{}", i)))
            })
            .collect()
    }

    fn schema(rows: u64) -> TableSchema {
        TableSchema {
            table: "users".into(),
            schema: None,
            columns: vec![
                ColumnDefinition::new("id", "integer64").primary_key(),
                ColumnDefinition::new("name", "text"),
            ],
            row_count: Some(rows),
            estimated_size_mb: None,
        }
    }

    fn executor(dest: MemoryDestination, rows: i64) -> (Executor, Arc<MemoryDestination>) {
        let dest = Arc::new(dest);
        let mut catalog = DriverCatalog::new();
        catalog.register_source("crm", Arc::new(MemorySource::new("users", users(rows))));
        catalog.register_destination("wh", dest.clone());
        let config = EngineConfig {
            batch_size: 2,
            retry_backoff_ms: 1,
            ..EngineConfig::default()
        };
        (
            Executor::new(config, Arc::new(catalog), Arc::new(ProgressLedger::in_memory())),
            dest,
        )
    }

    fn request(rows: u64) -> ExecuteRequest {
        let schema = schema(rows);
        let mappings = mapping::suggest(&schema, "people").unwrap().mappings;
        ExecuteRequest::new(
            schema,
            mappings,
            SourceDescriptor::memory("crm", "users"),
            DestinationDescriptor::memory("wh", "people"),
        )
    }

    #[tokio::test]
    async fn test_execute_runs_to_completion() {
        let (executor, dest) = executor(MemoryDestination::new(), 5);
        let accepted = executor.execute(request(5)).await.unwrap();
        assert_eq!(accepted.status, MigrationStatus::Pending);

        let done = executor.wait(&accepted.id).await.unwrap();
        assert_eq!(done.status, MigrationStatus::Succeeded);
        assert_eq!(done.progress.processed_records, 5);
        assert_eq!(dest.rows("people").len(), 5);
        assert_eq!(
            dest.ddl("people").as_deref(),
            Some("CREATE TABLE people (id BIGINT NOT NULL PRIMARY KEY, name TEXT)")
        );
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_mappings() {
        let (executor, _dest) = executor(MemoryDestination::new(), 1);
        let mut req = request(1);
        req.mappings[0].skip = true;
        let err = executor.execute(req).await.unwrap_err();
        assert!(matches!(err, MigrateError::ValidationFailed(_)));
        assert!(executor.ledger().list().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_requires_running() {
        let (executor, _dest) =
            executor(MemoryDestination::new().with_latency(Duration::from_millis(200)), 4);
        let accepted = executor.execute(request(4)).await.unwrap();
        let err = executor.cancel(&accepted.id).unwrap_err();
        assert!(matches!(err, MigrateError::InvalidState(_)));

        let err = executor.cancel(&Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, MigrateError::NotFound(_)));
        executor.wait(&accepted.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_resume_of_active_or_terminal_entry() {
        let (executor, _dest) =
            executor(MemoryDestination::new().with_latency(Duration::from_millis(50)), 4);
        let accepted = executor.execute(request(4)).await.unwrap();
        let again = ExecuteRequest::resume(accepted.id, &accepted);
        let err = executor.execute(again.clone()).await.unwrap_err();
        assert!(matches!(err, MigrateError::AlreadyRunning(_)));

        executor.wait(&accepted.id).await.unwrap();
        // The task deregisters right after publishing the terminal state.
        while executor.is_active(&accepted.id) {
            tokio::task::yield_now().await;
        }
        let err = executor.execute(again).await.unwrap_err();
        assert!(matches!(err, MigrateError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_unreachable_destination_fails_migration() {
        let (executor, _dest) = executor(MemoryDestination::new(), 2);
        let mut req = request(2);
        req.destination = DestinationDescriptor::memory("nowhere", "people");
        let accepted = executor.execute(req).await.unwrap();
        let done = executor.wait(&accepted.id).await.unwrap();
        assert_eq!(done.status, MigrationStatus::Failed);
        assert!(done.started_at.is_none());
        assert!(done.error.unwrap().contains("nowhere"));
    }

    #[tokio::test]
    async fn test_create_table_failure_goes_from_pending_to_failed() {
        let (executor, dest) = executor(MemoryDestination::new(), 2);
        dest.set_always_fail(true);
        let accepted = executor.execute(request(2)).await.unwrap();
        let done = executor.wait(&accepted.id).await.unwrap();
        assert_eq!(done.status, MigrationStatus::Failed);
        assert!(done.started_at.is_none());
        assert_eq!(done.committed_offset, 0);
        assert!(dest.ddl("people").is_none());
    }
}
