//! Built-in connector implementations.
//!
//! - [`memory`]: in-process source and destination, with fault injection
//! - [`jsonl`]: JSON-lines files on disk
//!
//! Connectors are resolved from descriptors by
//! [`DriverCatalog`](crate::core::DriverCatalog). To add a new connector
//! family, implement [`SourceReader`](crate::core::SourceReader) and/or
//! [`DestinationWriter`](crate::core::DestinationWriter), add a
//! [`ConnectorKind`](crate::core::ConnectorKind) variant, and handle it in
//! the catalog's `open_*` methods.

pub mod jsonl;
pub mod memory;

pub use jsonl::{JsonlDestination, JsonlSource};
pub use memory::{MemoryDestination, MemorySource};
