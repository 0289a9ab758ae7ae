//! Core abstractions shared by every stage of a migration.
//!
//! - [`schema`]: table, column, mapping and descriptor types
//! - [`value`]: cell values and records
//! - [`identifier`]: destination name derivation and validation
//! - [`traits`]: source and destination connector traits
//! - [`catalog`]: connector registry for dependency injection

pub mod catalog;
pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

// Re-export commonly used types for convenience
pub use catalog::DriverCatalog;
pub use schema::{
    ColumnDefinition, ConnectorKind, DestinationDescriptor, FieldMapping, SourceDescriptor,
    TableSchema,
};
pub use traits::{BatchWrite, DestinationWriter, SourceInfo, SourceReader, WriteOutcome};
pub use value::{Record, Row, SqlValue};
