//! Error types for the migration engine.

use thiserror::Error;

/// Main error type for analysis, mapping, and migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, out-of-range values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The source could not be opened, introspected, or read.
    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),

    /// Column types could not be resolved unambiguously.
    #[error("Schema ambiguous: {0}")]
    SchemaAmbiguous(String),

    /// A primary-key column has no allowed destination type.
    #[error("Primary key column {column} (type {source_type}) has no allowed destination type")]
    UnmappablePrimaryKey { column: String, source_type: String },

    /// The mapping set or request is malformed.
    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    /// A task is already executing this migration id.
    #[error("Migration {0} is already running")]
    AlreadyRunning(String),

    /// No migration with this id exists in the ledger.
    #[error("Migration {0} not found")]
    NotFound(String),

    /// A single row could not be transformed. Accumulated by the executor,
    /// never returned from public operations.
    #[error("Row {row}: column {column}: {message}")]
    RowTransform {
        row: u64,
        column: String,
        message: String,
    },

    /// The destination rejected or failed a write.
    #[error("Destination unavailable: {0}")]
    DestinationUnavailable(String),

    /// Operation not permitted in the migration's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Batch I/O exceeded its deadline.
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Progress ledger persistence error.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a row transformation error.
    pub fn row(row: u64, column: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::RowTransform {
            row,
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a validation error from a single problem.
    pub fn validation(message: impl Into<String>) -> Self {
        MigrateError::ValidationFailed(vec![message.into()])
    }

    /// Whether a batch that hit this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MigrateError::SourceUnreachable(_)
                | MigrateError::DestinationUnavailable(_)
                | MigrateError::Timeout { .. }
                | MigrateError::Io(_)
        )
    }

    /// Stable snake-case code used by the service layer.
    pub fn code(&self) -> &'static str {
        match self {
            MigrateError::Config(_) => "config",
            MigrateError::SourceUnreachable(_) => "source_unreachable",
            MigrateError::SchemaAmbiguous(_) => "schema_ambiguous",
            MigrateError::UnmappablePrimaryKey { .. } => "unmappable_primary_key",
            MigrateError::ValidationFailed(_) => "validation_failed",
            MigrateError::AlreadyRunning(_) => "already_running",
            MigrateError::NotFound(_) => "not_found",
            MigrateError::RowTransform { .. } => "row_transform_error",
            MigrateError::DestinationUnavailable(_) => "destination_unavailable",
            MigrateError::InvalidState(_) => "invalid_state",
            MigrateError::Timeout { .. } => "timeout",
            MigrateError::Ledger(_) => "ledger",
            MigrateError::Io(_) => "io",
            MigrateError::Yaml(_) => "yaml",
            MigrateError::Json(_) => "json",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::ValidationFailed(_)
            | MigrateError::UnmappablePrimaryKey { .. }
            | MigrateError::SchemaAmbiguous(_) => 3,
            MigrateError::SourceUnreachable(_)
            | MigrateError::DestinationUnavailable(_)
            | MigrateError::Timeout { .. } => 4,
            MigrateError::NotFound(_)
            | MigrateError::AlreadyRunning(_)
            | MigrateError::InvalidState(_) => 5,
            _ => 1,
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
