//! Schema, mapping, and connector descriptor types.
//!
//! These are the structured inputs and outputs exchanged with callers: the
//! analyzer produces a [`TableSchema`], the suggester turns it into
//! [`FieldMapping`]s, and the executor consumes both together with a
//! [`SourceDescriptor`] and [`DestinationDescriptor`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized description of a source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub table: String,

    /// Namespace the table lives in, when the source has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Columns in source order.
    pub columns: Vec<ColumnDefinition>,

    /// Row count, when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,

    /// Approximate on-disk size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_size_mb: Option<f64>,
}

impl TableSchema {
    /// Look up a column by exact name.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of primary-key columns, in column order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Fully qualified name for logs.
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }

    /// First column name that repeats case-insensitively, if any.
    pub fn duplicate_column(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.columns
            .iter()
            .find(|c| !seen.insert(c.name.to_lowercase()))
            .map(|c| c.name.as_str())
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,

    /// Source-system type name (canonical after analysis).
    #[serde(rename = "type")]
    pub data_type: String,

    /// Whether NULL is allowed.
    pub nullable: bool,

    /// Part of the primary key.
    #[serde(default)]
    pub primary_key: bool,

    /// Default expression as reported by the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    /// Maximum character length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
}

impl ColumnDefinition {
    /// Create a nullable, non-key column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key: false,
            default_value: None,
            max_length: None,
        }
    }

    /// Mark as primary key (which also makes it non-nullable).
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Mark as NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the maximum length.
    pub fn max_length(mut self, len: u32) -> Self {
        self.max_length = Some(len);
        self
    }
}

/// How one source column lands in the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub source_type: String,
    pub destination_field: String,
    pub destination_type: String,

    /// Named coercion; `None` is identity.
    #[serde(default)]
    pub transformation: Option<String>,

    /// Excluded from the destination.
    #[serde(default)]
    pub skip: bool,
}

/// Connector family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    /// Registered in-process connector, addressed by `location`.
    Memory,
    /// JSON-lines files; `location` is a file (source) or directory (destination).
    Jsonl,
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectorKind::Memory => write!(f, "memory"),
            ConnectorKind::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Where to read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: ConnectorKind,
    pub location: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl SourceDescriptor {
    pub fn memory(location: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            kind: ConnectorKind::Memory,
            location: location.into(),
            table: table.into(),
            schema: None,
        }
    }

    pub fn jsonl(path: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            kind: ConnectorKind::Jsonl,
            location: path.into(),
            table: table.into(),
            schema: None,
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.kind, self.location, self.table)
    }
}

/// Where to write to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationDescriptor {
    pub kind: ConnectorKind,
    pub location: String,
    pub table: String,
}

impl DestinationDescriptor {
    pub fn memory(location: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            kind: ConnectorKind::Memory,
            location: location.into(),
            table: table.into(),
        }
    }

    pub fn jsonl(dir: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            kind: ConnectorKind::Jsonl,
            location: dir.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for DestinationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.kind, self.location, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_definition_json_uses_type_key() {
        let col = ColumnDefinition::new("ID", "int64").primary_key();
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["type"], "int64");
        assert_eq!(json["nullable"], false);
        assert_eq!(json["primary_key"], true);
    }

    #[test]
    fn test_table_schema_from_client_json() {
        let json = r#"{"table":"users","columns":[
            {"name":"ID","type":"int64","nullable":false,"primary_key":true},
            {"name":"Bio","type":"text","nullable":true,"max_length":5000}]}"#;
        let schema: TableSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(schema.primary_key(), vec!["ID"]);
        assert_eq!(schema.columns[1].max_length, Some(5000));
        assert!(!schema.columns[1].primary_key);
        assert_eq!(schema.full_name(), "users");
    }

    #[test]
    fn test_duplicate_column_is_case_insensitive() {
        let schema = TableSchema {
            table: "t".into(),
            schema: None,
            columns: vec![
                ColumnDefinition::new("Name", "text"),
                ColumnDefinition::new("name", "text"),
            ],
            row_count: None,
            estimated_size_mb: None,
        };
        assert_eq!(schema.duplicate_column(), Some("name"));
    }

    #[test]
    fn test_field_mapping_defaults() {
        let json = r#"{"source_field":"a","source_type":"text","destination_field":"a","destination_type":"text"}"#;
        let mapping: FieldMapping = serde_json::from_str(json).unwrap();
        assert!(!mapping.skip);
        assert!(mapping.transformation.is_none());
    }
}
