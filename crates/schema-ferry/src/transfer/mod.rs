//! Batch transfer engine.
//!
//! A [`TransferJob`] moves one migration's rows from its source to its
//! destination in strictly sequential batches:
//!
//! 1. read `batch_size` records at the committed offset
//! 2. transform them, collecting row errors
//! 3. write the batch tagged with its `(migration, start, end)` range
//! 4. commit offset, counters and row errors to the ledger
//!
//! A crash between 3 and 4 replays the same range on resume; destinations
//! ignore ranges they already applied, so rows are neither lost nor
//! duplicated. Source and destination calls run under `io_timeout` and
//! transient failures are retried with exponential backoff.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::traits::{BatchWrite, DestinationWriter, SourceReader, WriteOutcome};
use crate::error::{MigrateError, Result};
use crate::state::{Migration, ProgressLedger, RowError};
use crate::transform::RowTransformer;

/// Everything needed to run one migration's transfer.
pub struct TransferJob {
    pub migration_id: Uuid,
    pub source: Arc<dyn SourceReader>,
    pub destination: Arc<dyn DestinationWriter>,
    pub transformer: RowTransformer,
    pub table: String,
    pub ddl: String,
    pub create_table: bool,
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// All rows written, no row errors.
    Succeeded,
    /// Ended `failed` because of row errors.
    Failed(String),
    /// Stopped by `cancel`; ledger entry is `cancelled`.
    Cancelled,
    /// Stopped by shutdown; ledger entry left `running` for recovery.
    Interrupted,
}

/// Runs transfer jobs against a shared ledger.
pub struct TransferEngine {
    config: EngineConfig,
    ledger: Arc<ProgressLedger>,
}

impl TransferEngine {
    pub fn new(config: EngineConfig, ledger: Arc<ProgressLedger>) -> Self {
        Self { config, ledger }
    }

    /// Run `job` from its committed offset until exhaustion, cancellation,
    /// shutdown, or a fatal error.
    ///
    /// Fatal errors are returned; the caller records them on the ledger
    /// entry. Every other ending is recorded here.
    pub async fn run(
        &self,
        job: TransferJob,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Result<TransferOutcome> {
        let id = job.migration_id;
        let current = self
            .ledger
            .get(&id)
            .ok_or_else(|| MigrateError::NotFound(id.to_string()))?;

        if job.create_table {
            self.with_retry("create table", || {
                job.destination.ensure_table(&job.table, &job.ddl)
            })
            .await?;
        }

        let counted = if current.progress.total_known {
            None
        } else {
            self.count_rows(job.source.as_ref()).await
        };

        let batch_size = self.config.batch_size;
        let migration = self
            .ledger
            .update(&id, |m| {
                m.mark_running();
                if let Some(total) = counted {
                    m.progress.set_total(total, batch_size);
                }
            })
            .await?;

        info!(
            "Migration {}: {} -> {} from offset {} ({} rows total)",
            id,
            job.source.describe(),
            job.destination.describe(),
            migration.committed_offset,
            if migration.progress.total_known {
                migration.progress.total_records.to_string()
            } else {
                "unknown".to_string()
            }
        );

        let columns = job.transformer.destination_columns();
        let mut offset = migration.committed_offset;

        loop {
            if cancel.is_cancelled() {
                info!("Migration {}: cancelled at offset {}", id, offset);
                self.ledger.update(&id, |m| m.mark_cancelled()).await?;
                return Ok(TransferOutcome::Cancelled);
            }
            if shutdown.is_cancelled() {
                info!("Migration {}: interrupted at offset {}", id, offset);
                return Ok(TransferOutcome::Interrupted);
            }

            let records = self
                .with_retry("read", || job.source.read_records(offset, batch_size))
                .await
                .map_err(|e| context(e, &format!("read at offset {}", offset)))?;
            if records.is_empty() {
                break;
            }

            let end = offset + records.len() as u64;
            let mut rows = Vec::with_capacity(records.len());
            let mut errors = Vec::new();
            for (i, record) in records.iter().enumerate() {
                match job.transformer.transform(offset + i as u64, record) {
                    Ok(row) => rows.push(row),
                    Err(MigrateError::RowTransform {
                        row,
                        column,
                        message,
                    }) => errors.push(RowError {
                        row,
                        column,
                        message,
                    }),
                    Err(e) => return Err(e),
                }
            }

            let batch = BatchWrite {
                migration_id: id,
                table: job.table.clone(),
                columns: columns.clone(),
                start_offset: offset,
                end_offset: end,
                rows,
            };
            let outcome = self
                .with_retry("write", || job.destination.write_batch(&batch))
                .await
                .map_err(|e| context(e, &format!("write rows {}..{}", offset, end)))?;
            if outcome == WriteOutcome::AlreadyApplied {
                debug!(
                    "Migration {}: rows {}..{} already applied, committing",
                    id, offset, end
                );
            }

            let written = batch.rows.len() as u64;
            let new_errors = errors.len();
            let max_recorded = self.config.max_recorded_row_errors;
            let committed = self
                .ledger
                .update(&id, |m| {
                    m.committed_offset = end;
                    m.progress.processed_records += written;
                    m.progress.current_batch += 1;
                    if m.progress.total_known && end > m.progress.total_records {
                        m.progress.total_records = end;
                    }
                    m.progress.recompute();
                    m.record_row_errors(errors, max_recorded);
                })
                .await?;
            offset = end;

            debug!(
                "Migration {}: committed offset {} ({} written, {} row errors)",
                id, end, written, new_errors
            );

            if let Some(detail) = self.error_rate_exceeded(&committed) {
                warn!("Migration {}: {}", id, detail);
                self.ledger.update(&id, |m| m.mark_failed(detail.clone())).await?;
                return Ok(TransferOutcome::Failed(detail));
            }
        }

        // Source exhausted: the true total is the committed offset.
        let finished = self
            .ledger
            .update(&id, |m| {
                m.progress.set_total(m.committed_offset, batch_size);
                if m.row_error_count == 0
                    && m.progress.processed_records == m.progress.total_records
                {
                    m.mark_succeeded();
                } else {
                    m.mark_failed(format!(
                        "{} rows failed transformation",
                        m.row_error_count
                    ));
                }
            })
            .await?;

        info!(
            "Migration {}: {} after {} rows",
            id, finished.status, finished.progress.processed_records
        );
        Ok(match finished.error {
            Some(detail) => TransferOutcome::Failed(detail),
            None => TransferOutcome::Succeeded,
        })
    }

    /// Row errors above `max_error_rate` of the rows seen so far (or of the
    /// known total, whichever is larger).
    fn error_rate_exceeded(&self, m: &Migration) -> Option<String> {
        if m.row_error_count == 0 {
            return None;
        }
        let basis = if m.progress.total_known {
            m.committed_offset.max(m.progress.total_records)
        } else {
            m.committed_offset
        };
        let allowed = self.config.max_error_rate * basis as f64;
        (m.row_error_count as f64 > allowed).then(|| {
            format!(
                "row error rate exceeded: {} of {} rows failed (max rate {})",
                m.row_error_count, m.committed_offset, self.config.max_error_rate
            )
        })
    }

    async fn count_rows(&self, source: &dyn SourceReader) -> Option<u64> {
        match tokio::time::timeout(self.config.io_timeout(), source.count_rows()).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!("Row count failed, total unknown: {}", e);
                None
            }
            Err(_) => {
                warn!("Row count timed out, total unknown");
                None
            }
        }
    }

    /// Run `op` under the I/O deadline, retrying transient failures.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.config.io_timeout(), op()).await {
                Ok(result) => result,
                Err(_) => Err(MigrateError::Timeout {
                    operation: operation.to_string(),
                    seconds: self.config.io_timeout_secs,
                }),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        self.config.max_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn context(e: MigrateError, what: &str) -> MigrateError {
    match e {
        MigrateError::SourceUnreachable(msg) => {
            MigrateError::SourceUnreachable(format!("{}: {}", what, msg))
        }
        MigrateError::DestinationUnavailable(msg) => {
            MigrateError::DestinationUnavailable(format!("{}: {}", what, msg))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{
        ColumnDefinition, DestinationDescriptor, FieldMapping, SourceDescriptor, TableSchema,
    };
    use crate::core::value::{Record, SqlValue};
    use crate::drivers::{MemoryDestination, MemorySource};
    use crate::state::{MigrationProgress, MigrationStatus};
    use std::time::Duration;

    fn schema(row_count: Option<u64>) -> TableSchema {
        TableSchema {
            table: "users".into(),
            schema: None,
            columns: vec![ColumnDefinition::new("id", "integer32").primary_key()],
            row_count,
            estimated_size_mb: None,
        }
    }

    fn mappings() -> Vec<FieldMapping> {
        vec![FieldMapping {
            source_field: "id".into(),
            source_type: "integer32".into(),
            destination_field: "id".into(),
            destination_type: "integer16".into(),
            transformation: Some("narrow_integer".into()),
            skip: false,
        }]
    }

    fn config() -> EngineConfig {
        EngineConfig {
            batch_size: 2,
            retry_backoff_ms: 1,
            max_backoff_ms: 2,
            io_timeout_secs: 1,
            ..EngineConfig::default()
        }
    }

    async fn setup(
        values: Vec<i64>,
        source: impl FnOnce(MemorySource) -> MemorySource,
        dest: Arc<MemoryDestination>,
        config: EngineConfig,
        row_count: Option<u64>,
    ) -> (TransferEngine, TransferJob, Arc<ProgressLedger>) {
        let records = values
            .into_iter()
            .map(|v| Record::new().with("id", SqlValue::Int(v)))
            .collect();
        let source = Arc::new(source(MemorySource::new("users", records)));
        let ledger = Arc::new(ProgressLedger::in_memory());
        let schema = schema(row_count);
        let migration = ledger
            .insert(Migration::new(
                SourceDescriptor::memory("crm", "users"),
                DestinationDescriptor::memory("wh", "people"),
                schema.clone(),
                mappings(),
                "CREATE TABLE people (id SMALLINT NOT NULL PRIMARY KEY)".into(),
                true,
                MigrationProgress::new(row_count, config.batch_size),
            ))
            .await
            .unwrap();
        let job = TransferJob {
            migration_id: migration.id,
            source,
            destination: dest,
            transformer: RowTransformer::compile(&schema, &mappings(), 100).unwrap(),
            table: "people".into(),
            ddl: migration.ddl.clone(),
            create_table: true,
        };
        (TransferEngine::new(config, ledger.clone()), job, ledger)
    }

    #[tokio::test]
    async fn test_runs_to_success() {
        let dest = Arc::new(MemoryDestination::new());
        let (engine, job, ledger) =
            setup(vec![1, 2, 3, 4, 5], |s| s, dest.clone(), config(), Some(5)).await;
        let id = job.migration_id;
        let outcome = engine
            .run(job, &CancellationToken::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Succeeded);

        let m = ledger.get(&id).unwrap();
        assert_eq!(m.status, MigrationStatus::Succeeded);
        assert_eq!(m.progress.processed_records, 5);
        assert_eq!(m.progress.percentage, 100.0);
        assert_eq!(m.progress.current_batch, 3);
        assert_eq!(m.progress.total_batches, Some(3));
        assert_eq!(dest.rows("people").len(), 5);
        assert!(dest.ddl("people").is_some());
    }

    #[tokio::test]
    async fn test_unknown_total_becomes_known_at_exhaustion() {
        let dest = Arc::new(MemoryDestination::new());
        let (engine, job, ledger) =
            setup(vec![1, 2, 3], |s| s.without_count(), dest, config(), None).await;
        let id = job.migration_id;
        let mut rx = ledger.subscribe(&id).unwrap();
        let watcher = tokio::spawn(async move {
            let mut percentages = Vec::new();
            while rx.changed().await.is_ok() {
                let m = rx.borrow().clone();
                percentages.push((m.progress.total_known, m.progress.percentage));
                if m.status.is_terminal() {
                    break;
                }
            }
            percentages
        });
        engine
            .run(job, &CancellationToken::new(), &CancellationToken::new())
            .await
            .unwrap();
        let seen = watcher.await.unwrap();
        for (known, pct) in &seen[..seen.len() - 1] {
            assert!(!known);
            assert_eq!(*pct, 0.0);
        }
        let m = ledger.get(&id).unwrap();
        assert!(m.progress.total_known);
        assert_eq!(m.progress.total_records, 3);
        assert_eq!(m.status, MigrationStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_stale_total_is_reconciled() {
        let dest = Arc::new(MemoryDestination::new());
        let (engine, job, ledger) =
            setup(vec![1, 2, 3, 4], |s| s, dest, config(), Some(2)).await;
        let id = job.migration_id;
        engine
            .run(job, &CancellationToken::new(), &CancellationToken::new())
            .await
            .unwrap();
        let m = ledger.get(&id).unwrap();
        assert_eq!(m.progress.total_records, 4);
        assert_eq!(m.progress.processed_records, 4);
        assert_eq!(m.status, MigrationStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dest = Arc::new(MemoryDestination::new().with_transient_failures(2));
        let (engine, job, ledger) = setup(
            vec![1, 2, 3],
            |s| s.with_transient_failures(2),
            dest.clone(),
            config(),
            Some(3),
        )
        .await;
        let id = job.migration_id;
        let outcome = engine
            .run(job, &CancellationToken::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Succeeded);
        assert_eq!(ledger.get(&id).unwrap().progress.processed_records, 3);
        assert_eq!(dest.rows("people").len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_fatal() {
        let dest = Arc::new(MemoryDestination::new().with_transient_failures(10));
        let (engine, job, _ledger) = setup(vec![1], |s| s, dest, config(), Some(1)).await;
        let err = engine
            .run(job, &CancellationToken::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::DestinationUnavailable(_)));
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let dest = Arc::new(MemoryDestination::new());
        let cfg = EngineConfig {
            max_retries: 0,
            ..config()
        };
        let (engine, job, _ledger) = setup(
            vec![1],
            |s| s.with_read_delay(Duration::from_millis(1500)),
            dest,
            cfg,
            Some(1),
        )
        .await;
        let err = engine
            .run(job, &CancellationToken::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_row_errors_under_threshold_end_failed() {
        let dest = Arc::new(MemoryDestination::new());
        let cfg = EngineConfig {
            max_error_rate: 0.5,
            ..config()
        };
        let (engine, job, ledger) =
            setup(vec![1, 70_000, 3, 4], |s| s, dest.clone(), cfg, Some(4)).await;
        let id = job.migration_id;
        let outcome = engine
            .run(job, &CancellationToken::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TransferOutcome::Failed("1 rows failed transformation".into())
        );
        let m = ledger.get(&id).unwrap();
        assert_eq!(m.progress.processed_records, 3);
        assert_eq!(m.row_error_count, 1);
        assert_eq!(m.row_errors[0].row, 1);
        assert_eq!(m.row_errors[0].column, "id");
        assert_eq!(dest.rows("people").len(), 3);
    }

    #[tokio::test]
    async fn test_row_error_rate_aborts_early() {
        let dest = Arc::new(MemoryDestination::new());
        let (engine, job, ledger) = setup(
            vec![70_000, 70_001, 1, 2, 3, 4],
            |s| s,
            dest,
            config(),
            Some(6),
        )
        .await;
        let id = job.migration_id;
        let outcome = engine
            .run(job, &CancellationToken::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, TransferOutcome::Failed(ref d) if d.contains("row error rate")));
        let m = ledger.get(&id).unwrap();
        assert_eq!(m.status, MigrationStatus::Failed);
        assert_eq!(m.committed_offset, 2);
    }

    #[tokio::test]
    async fn test_cancel_and_shutdown_stop_between_batches() {
        let dest = Arc::new(MemoryDestination::new());
        let (engine, job, ledger) =
            setup(vec![1, 2, 3, 4], |s| s, dest.clone(), config(), Some(4)).await;
        let id = job.migration_id;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = engine.run(job, &cancel, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, TransferOutcome::Cancelled);
        assert_eq!(ledger.get(&id).unwrap().status, MigrationStatus::Cancelled);

        let (engine, job, ledger) =
            setup(vec![1, 2, 3, 4], |s| s, dest, config(), Some(4)).await;
        let id = job.migration_id;
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let outcome = engine.run(job, &CancellationToken::new(), &shutdown).await.unwrap();
        assert_eq!(outcome, TransferOutcome::Interrupted);
        assert_eq!(ledger.get(&id).unwrap().status, MigrationStatus::Running);
    }
}
