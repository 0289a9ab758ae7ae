//! Type vocabularies on both sides of a migration.
//!
//! - [`canonical`]: source type names normalized to [`CanonicalType`]
//! - [`destination`]: the fixed set of [`DestinationType`]s and their DDL spelling

pub mod canonical;
pub mod destination;

pub use canonical::{declared_length, CanonicalType};
pub use destination::DestinationType;
