//! Connector catalog for explicit dependency injection.
//!
//! The [`DriverCatalog`] turns serializable descriptors into live connectors.
//! It is constructed by the caller and handed to the analyzer and executor;
//! there is no global registry. In-memory connectors are registered under a
//! name and addressed by `location`; file connectors are opened on demand.
//!
//! ```rust,ignore
//! let mut catalog = DriverCatalog::new();
//! catalog.register_source("crm", Arc::new(MemorySource::new("users", records)));
//! catalog.register_destination("warehouse", Arc::new(MemoryDestination::new()));
//! let executor = Executor::new(config, Arc::new(catalog), ledger);
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::drivers::{JsonlDestination, JsonlSource, MemoryDestination, MemorySource};
use crate::error::{MigrateError, Result};

use super::schema::{ConnectorKind, DestinationDescriptor, SourceDescriptor};
use super::traits::{DestinationWriter, SourceReader};

/// Registry of named connectors plus factories for file-backed ones.
#[derive(Default)]
pub struct DriverCatalog {
    sources: HashMap<String, Arc<MemorySource>>,
    destinations: HashMap<String, Arc<MemoryDestination>>,
}

impl DriverCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-memory source under `location`.
    pub fn register_source(&mut self, location: impl Into<String>, source: Arc<MemorySource>) {
        self.sources.insert(location.into(), source);
    }

    /// Register an in-memory destination under `location`.
    pub fn register_destination(
        &mut self,
        location: impl Into<String>,
        destination: Arc<MemoryDestination>,
    ) {
        self.destinations.insert(location.into(), destination);
    }

    /// Check if a memory source is registered.
    pub fn has_source(&self, location: &str) -> bool {
        self.sources.contains_key(location)
    }

    /// Open a reader for a source descriptor.
    pub async fn open_source(&self, desc: &SourceDescriptor) -> Result<Arc<dyn SourceReader>> {
        match desc.kind {
            ConnectorKind::Memory => {
                let source = self.sources.get(&desc.location).ok_or_else(|| {
                    MigrateError::SourceUnreachable(format!(
                        "no memory source registered as '{}'",
                        desc.location
                    ))
                })?;
                Ok(source.clone() as Arc<dyn SourceReader>)
            }
            ConnectorKind::Jsonl => {
                let reader = JsonlSource::open(PathBuf::from(&desc.location)).await?;
                Ok(Arc::new(reader))
            }
        }
    }

    /// Open a writer for a destination descriptor.
    pub async fn open_destination(
        &self,
        desc: &DestinationDescriptor,
    ) -> Result<Arc<dyn DestinationWriter>> {
        match desc.kind {
            ConnectorKind::Memory => {
                let dest = self.destinations.get(&desc.location).ok_or_else(|| {
                    MigrateError::DestinationUnavailable(format!(
                        "no memory destination registered as '{}'",
                        desc.location
                    ))
                })?;
                Ok(dest.clone() as Arc<dyn DestinationWriter>)
            }
            ConnectorKind::Jsonl => {
                let writer = JsonlDestination::open(PathBuf::from(&desc.location)).await?;
                Ok(Arc::new(writer))
            }
        }
    }
}

impl std::fmt::Debug for DriverCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sources: Vec<_> = self.sources.keys().collect();
        sources.sort();
        let mut destinations: Vec<_> = self.destinations.keys().collect();
        destinations.sort();
        f.debug_struct("DriverCatalog")
            .field("sources", &sources)
            .field("destinations", &destinations)
            .finish()
    }
}
