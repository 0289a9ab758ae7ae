//! # schema-ferry
//!
//! Schema mapping and resumable batch migration engine.
//!
//! Given a description of a source table, this library infers a normalized
//! schema, suggests a field-level mapping to a fixed set of destination
//! column types (with coercion risks and warnings), generates DDL, and then
//! executes the data transfer with:
//!
//! - **Bounded batches** committed to a progress ledger
//! - **Idempotent restart** from the last committed offset
//! - **Retries with backoff** for unreachable connectors
//! - **Row-level error accounting** with a configurable error rate
//! - **Stable history pagination** over ledger snapshots
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use schema_ferry::{Config, DestinationDescriptor, DriverCatalog, ExecuteRequest,
//!     MigrationService, SourceDescriptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.yaml")?;
//!     let service = MigrationService::open(&config, Arc::new(DriverCatalog::new())).await?;
//!
//!     let source = SourceDescriptor::jsonl("users.jsonl", "users");
//!     let schema = service.analyze_source(&source).await?;
//!     let suggestion = service.suggest_mapping(&schema, "people")?;
//!     let accepted = service
//!         .execute(ExecuteRequest::new(
//!             schema,
//!             suggestion.mappings,
//!             source,
//!             DestinationDescriptor::jsonl("out", "people"),
//!         ))
//!         .await?;
//!     let done = service.wait(&accepted.migration_id).await?;
//!     println!("Migrated {} rows", done.progress.processed_records);
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod history;
pub mod mapping;
pub mod orchestrator;
pub mod service;
pub mod state;
pub mod transfer;
pub mod transform;
pub mod typemap;

// Re-exports for convenient access
pub use analyzer::SchemaAnalyzer;
pub use config::{Config, EngineConfig, LedgerBackendKind, LedgerConfig};
pub use crate::core::{
    ColumnDefinition, ConnectorKind, DestinationDescriptor, DriverCatalog, FieldMapping, Record,
    SourceDescriptor, SqlValue, TableSchema,
};
pub use error::{MigrateError, Result};
pub use history::{HistoryPage, HistoryQuery};
pub use mapping::Suggestion;
pub use orchestrator::{ExecuteRequest, Executor};
pub use service::{ApiError, ExecuteResponse, MigrationService};
pub use state::{Migration, MigrationProgress, MigrationStatus, ProgressLedger, RowError};
pub use transfer::{TransferEngine, TransferJob, TransferOutcome};
pub use typemap::{Coercion, Risk};
