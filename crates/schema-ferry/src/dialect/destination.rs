//! The fixed set of destination column types and their DDL spelling.

use std::fmt;
use std::str::FromStr;

use crate::error::MigrateError;

/// Destination column type.
///
/// The declaration order is the tie-break order the suggester uses when
/// two candidates carry the same risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DestinationType {
    Boolean,
    Integer16,
    Integer32,
    Integer64,
    Float32,
    Float64,
    Decimal,
    Varchar,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Binary,
}

impl DestinationType {
    /// Every destination type, in declaration order.
    pub const ALL: [DestinationType; 16] = [
        DestinationType::Boolean,
        DestinationType::Integer16,
        DestinationType::Integer32,
        DestinationType::Integer64,
        DestinationType::Float32,
        DestinationType::Float64,
        DestinationType::Decimal,
        DestinationType::Varchar,
        DestinationType::Text,
        DestinationType::Date,
        DestinationType::Time,
        DestinationType::Timestamp,
        DestinationType::TimestampTz,
        DestinationType::Uuid,
        DestinationType::Json,
        DestinationType::Binary,
    ];

    /// Name used in [`FieldMapping::destination_type`](crate::core::FieldMapping).
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::Boolean => "boolean",
            DestinationType::Integer16 => "integer16",
            DestinationType::Integer32 => "integer32",
            DestinationType::Integer64 => "integer64",
            DestinationType::Float32 => "float32",
            DestinationType::Float64 => "float64",
            DestinationType::Decimal => "decimal",
            DestinationType::Varchar => "varchar",
            DestinationType::Text => "text",
            DestinationType::Date => "date",
            DestinationType::Time => "time",
            DestinationType::Timestamp => "timestamp",
            DestinationType::TimestampTz => "timestamptz",
            DestinationType::Uuid => "uuid",
            DestinationType::Json => "json",
            DestinationType::Binary => "binary",
        }
    }

    /// SQL type for the column clause of generated DDL.
    pub fn sql_type(&self, max_length: Option<u32>) -> String {
        match self {
            DestinationType::Boolean => "BOOLEAN".to_string(),
            DestinationType::Integer16 => "SMALLINT".to_string(),
            DestinationType::Integer32 => "INTEGER".to_string(),
            DestinationType::Integer64 => "BIGINT".to_string(),
            DestinationType::Float32 => "REAL".to_string(),
            DestinationType::Float64 => "DOUBLE PRECISION".to_string(),
            DestinationType::Decimal => "NUMERIC".to_string(),
            DestinationType::Varchar => match max_length {
                Some(len) if len > 0 => format!("VARCHAR({})", len),
                _ => "TEXT".to_string(),
            },
            DestinationType::Text => "TEXT".to_string(),
            DestinationType::Date => "DATE".to_string(),
            DestinationType::Time => "TIME".to_string(),
            DestinationType::Timestamp => "TIMESTAMP".to_string(),
            DestinationType::TimestampTz => "TIMESTAMP WITH TIME ZONE".to_string(),
            DestinationType::Uuid => "UUID".to_string(),
            DestinationType::Json => "JSON".to_string(),
            DestinationType::Binary => "BYTEA".to_string(),
        }
    }

    /// Whether values are character data subject to `max_length`.
    pub fn is_bounded_text(&self) -> bool {
        matches!(self, DestinationType::Varchar)
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DestinationType {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        DestinationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| MigrateError::validation(format!("unknown destination type: {}", s)))
    }
}
