//! Service facade: the request/response surface of the engine.
//!
//! [`MigrationService`] bundles the analyzer, suggester, executor, and
//! history queries behind one type. Every operation returns
//! [`ApiError`] on failure, which carries a stable snake-case code and
//! serializes cleanly for callers across a process boundary.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::analyzer::SchemaAnalyzer;
use crate::config::{Config, LedgerBackendKind};
use crate::core::catalog::DriverCatalog;
use crate::core::schema::{SourceDescriptor, TableSchema};
use crate::error::{MigrateError, Result};
use crate::history::{self, HistoryPage, HistoryQuery};
use crate::mapping::{self, Suggestion};
use crate::orchestrator::{ExecuteRequest, Executor};
use crate::state::{FileLedger, LedgerBackend, MemoryLedger, Migration, MigrationStatus, ProgressLedger};

/// Serializable error returned by every service operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub detail: String,
    /// Individual problems for `validation_failed`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
    #[serde(skip)]
    exit_code: u8,
}

impl ApiError {
    /// Process exit code for the CLI (1 when unknown).
    pub fn exit_code(&self) -> u8 {
        self.exit_code.max(1)
    }
}

impl From<MigrateError> for ApiError {
    fn from(e: MigrateError) -> Self {
        let problems = match &e {
            MigrateError::ValidationFailed(problems) => problems.clone(),
            _ => Vec::new(),
        };
        Self {
            code: e.code().to_string(),
            detail: e.to_string(),
            problems,
            exit_code: e.exit_code(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl std::error::Error for ApiError {}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Reply to an accepted execute request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub migration_id: Uuid,
    pub status: MigrationStatus,
}

/// Engine facade.
pub struct MigrationService {
    analyzer: SchemaAnalyzer,
    executor: Executor,
}

impl MigrationService {
    pub fn new(config: &Config, catalog: Arc<DriverCatalog>, ledger: Arc<ProgressLedger>) -> Self {
        Self {
            analyzer: SchemaAnalyzer::new(catalog.clone(), config.engine.sample_size),
            executor: Executor::new(config.engine.clone(), catalog, ledger)
                .with_config_hash(config.hash()),
        }
    }

    /// Build a service whose ledger backend comes from `config.ledger`.
    pub async fn open(config: &Config, catalog: Arc<DriverCatalog>) -> Result<Self> {
        let backend: Arc<dyn LedgerBackend> = match config.ledger.backend {
            LedgerBackendKind::Memory => Arc::new(MemoryLedger::new()),
            LedgerBackendKind::File => {
                let path = config.ledger.path.clone().ok_or_else(|| {
                    MigrateError::Config("ledger.path is required for the file backend".into())
                })?;
                Arc::new(FileLedger::new(path))
            }
        };
        let ledger = Arc::new(ProgressLedger::open(backend).await?);
        info!("Using {} ledger", ledger.backend_type());
        Ok(Self::new(config, catalog, ledger))
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub async fn analyze_source(&self, source: &SourceDescriptor) -> ApiResult<TableSchema> {
        Ok(self.analyzer.analyze(source).await?)
    }

    pub fn suggest_mapping(
        &self,
        schema: &TableSchema,
        destination_table: &str,
    ) -> ApiResult<Suggestion> {
        Ok(mapping::suggest(schema, destination_table)?)
    }

    pub async fn execute(&self, request: ExecuteRequest) -> ApiResult<ExecuteResponse> {
        let migration = self.executor.execute(request).await?;
        Ok(ExecuteResponse {
            migration_id: migration.id,
            status: migration.status,
        })
    }

    pub fn status(&self, id: &Uuid) -> ApiResult<Migration> {
        Ok(history::get_status(self.executor.ledger(), id)?)
    }

    pub fn history(&self, query: &HistoryQuery) -> HistoryPage {
        history::get_history(self.executor.ledger(), query)
    }

    pub fn cancel(&self, id: &Uuid) -> ApiResult<ExecuteResponse> {
        let migration = self.executor.cancel(id)?;
        Ok(ExecuteResponse {
            migration_id: migration.id,
            status: migration.status,
        })
    }

    /// Push channel of committed snapshots for `id`.
    pub fn subscribe(&self, id: &Uuid) -> ApiResult<watch::Receiver<Migration>> {
        self.executor
            .ledger()
            .subscribe(id)
            .ok_or_else(|| MigrateError::NotFound(id.to_string()).into())
    }

    pub async fn wait(&self, id: &Uuid) -> ApiResult<Migration> {
        Ok(self.executor.wait(id).await?)
    }

    /// Resume interrupted migrations left in the ledger.
    pub fn recover(&self) -> ApiResult<Vec<Uuid>> {
        Ok(self.executor.recover()?)
    }

    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}
