//! Source schema analysis.
//!
//! [`SchemaAnalyzer::analyze`] produces a normalized [`TableSchema`] for a
//! source. Sources that declare their columns are normalized through the
//! canonical type vocabulary. Schemaless sources are sampled and their
//! field types inferred from the values seen.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::catalog::DriverCatalog;
use crate::core::schema::{ColumnDefinition, SourceDescriptor, TableSchema};
use crate::core::traits::SourceReader;
use crate::core::value::{Record, SqlValue};
use crate::dialect::{declared_length, CanonicalType};
use crate::error::{MigrateError, Result};
use crate::transform::parse_naive_timestamp;

/// Inspects sources and produces normalized schemas. Read-only.
pub struct SchemaAnalyzer {
    catalog: Arc<DriverCatalog>,
    sample_size: usize,
}

impl SchemaAnalyzer {
    pub fn new(catalog: Arc<DriverCatalog>, sample_size: usize) -> Self {
        Self {
            catalog,
            sample_size: sample_size.max(1),
        }
    }

    /// Analyze the table behind `desc`.
    pub async fn analyze(&self, desc: &SourceDescriptor) -> Result<TableSchema> {
        let reader = self.catalog.open_source(desc).await.map_err(unreachable(desc))?;
        let info = reader.introspect().await.map_err(unreachable(desc))?;

        let columns = match info.columns {
            Some(declared) => {
                debug!("{}: normalizing {} declared columns", desc, declared.len());
                declared.into_iter().map(normalize_column).collect()
            }
            None => {
                let mut sample = reader
                    .read_records(0, self.sample_size)
                    .await
                    .map_err(unreachable(desc))?;
                let read = sample.len();
                sample.retain(|r| r.defect().is_none());
                if sample.len() < read {
                    warn!(
                        "{}: ignoring {} undecodable records in sample",
                        desc,
                        read - sample.len()
                    );
                }
                if sample.is_empty() {
                    return Err(MigrateError::SchemaAmbiguous(format!(
                        "{}: no schema declared and no records to infer one from",
                        desc
                    )));
                }
                debug!("{}: inferring types from {} sampled records", desc, sample.len());
                infer_columns(&sample)?
            }
        };

        let row_count = match info.row_count {
            Some(n) => Some(n),
            None => reader.count_rows().await.map_err(unreachable(desc))?,
        };

        let schema = TableSchema {
            table: desc.table.clone(),
            schema: desc.schema.clone(),
            columns,
            row_count,
            estimated_size_mb: info.estimated_size_mb,
        };

        if let Some(dup) = schema.duplicate_column() {
            return Err(MigrateError::SchemaAmbiguous(format!(
                "duplicate column name (case-insensitive): {}",
                dup
            )));
        }

        info!(
            "Analyzed {}: {} columns, {} rows",
            schema.full_name(),
            schema.columns.len(),
            schema
                .row_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".into())
        );
        Ok(schema)
    }
}

/// Any failure while opening or reading a source surfaces as `SourceUnreachable`.
fn unreachable(desc: &SourceDescriptor) -> impl Fn(MigrateError) -> MigrateError + '_ {
    move |e| {
        if matches!(e, MigrateError::SourceUnreachable(_)) {
            e
        } else {
            MigrateError::SourceUnreachable(format!("{}: {}", desc, e))
        }
    }
}

/// Canonicalize a declared column. Primary keys are never nullable.
pub fn normalize_column(mut column: ColumnDefinition) -> ColumnDefinition {
    if column.max_length.is_none() {
        column.max_length = declared_length(&column.data_type);
    }
    column.data_type = CanonicalType::parse(&column.data_type).name().to_string();
    if column.primary_key {
        column.nullable = false;
    }
    column
}

/// What one sampled field has looked like so far.
#[derive(Debug, Default)]
struct FieldObservation {
    name: String,
    nullable: bool,
    seen: usize,
    boolean: bool,
    integer: bool,
    float: bool,
    decimal: bool,
    string: bool,
    object: bool,
    array: bool,
    binary: bool,
    // Non-string typed values the source handed out directly.
    typed: Option<CanonicalType>,
    conflicting_typed: bool,
    // String refinement: true while every string seen parses as the type.
    all_uuid: bool,
    all_date: bool,
    all_timestamptz: bool,
    all_timestamp: bool,
}

impl FieldObservation {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            all_uuid: true,
            all_date: true,
            all_timestamptz: true,
            all_timestamp: true,
            ..Default::default()
        }
    }

    fn observe(&mut self, value: &SqlValue) {
        match value {
            SqlValue::Null => self.nullable = true,
            SqlValue::Bool(_) => self.boolean = true,
            SqlValue::Int(_) => self.integer = true,
            SqlValue::Float(_) => self.float = true,
            SqlValue::Decimal(_) => self.decimal = true,
            SqlValue::Text(s) => {
                self.string = true;
                let s = s.trim();
                self.all_uuid &= Uuid::parse_str(s).is_ok();
                self.all_date &= NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok();
                self.all_timestamptz &= DateTime::parse_from_rfc3339(s).is_ok();
                self.all_timestamp &= parse_naive_timestamp(s).is_some();
            }
            SqlValue::Bytes(_) => self.binary = true,
            SqlValue::Json(v) if v.is_array() => self.array = true,
            SqlValue::Json(_) => self.object = true,
            SqlValue::Date(_) => self.typed(CanonicalType::Date),
            SqlValue::Time(_) => self.typed(CanonicalType::Time),
            SqlValue::Timestamp(_) => self.typed(CanonicalType::Timestamp),
            SqlValue::TimestampTz(_) => self.typed(CanonicalType::TimestampTz),
            SqlValue::Uuid(_) => self.typed(CanonicalType::Uuid),
        }
        if !value.is_null() {
            self.seen += 1;
        }
    }

    fn typed(&mut self, t: CanonicalType) {
        match &self.typed {
            Some(existing) if *existing != t => self.conflicting_typed = true,
            _ => self.typed = Some(t),
        }
    }

    fn kinds(&self) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        for (flag, name) in [
            (self.boolean, "boolean"),
            (self.integer, "integer"),
            (self.float, "float"),
            (self.decimal, "decimal"),
            (self.string, "string"),
            (self.object, "object"),
            (self.array, "array"),
            (self.binary, "binary"),
        ] {
            if flag {
                kinds.push(name);
            }
        }
        if let Some(t) = &self.typed {
            kinds.push(match t {
                CanonicalType::Date => "date",
                CanonicalType::Time => "time",
                CanonicalType::Timestamp => "timestamp",
                CanonicalType::TimestampTz => "timestamptz",
                _ => "uuid",
            });
        }
        kinds
    }

    fn resolve(&self) -> Result<CanonicalType> {
        let numeric_only = !(self.boolean
            || self.string
            || self.object
            || self.array
            || self.binary
            || self.typed.is_some());

        if self.seen == 0 {
            return Ok(CanonicalType::Text);
        }
        if self.conflicting_typed {
            return Err(self.ambiguous());
        }

        let kinds = self.kinds();
        if kinds.len() == 1 {
            return Ok(match kinds[0] {
                "boolean" => CanonicalType::Boolean,
                "integer" => CanonicalType::Integer64,
                "float" => CanonicalType::Float64,
                "decimal" => CanonicalType::Decimal,
                "string" => self.refine_string(),
                "object" => CanonicalType::Json,
                "array" => CanonicalType::Array,
                "binary" => CanonicalType::Binary,
                _ => self.typed.clone().unwrap_or(CanonicalType::Text),
            });
        }

        // Mixed numbers widen.
        if numeric_only {
            if self.float {
                return Ok(CanonicalType::Float64);
            }
            return Ok(CanonicalType::Decimal);
        }

        Err(self.ambiguous())
    }

    fn refine_string(&self) -> CanonicalType {
        if self.all_uuid {
            CanonicalType::Uuid
        } else if self.all_date {
            CanonicalType::Date
        } else if self.all_timestamptz {
            CanonicalType::TimestampTz
        } else if self.all_timestamp {
            CanonicalType::Timestamp
        } else {
            CanonicalType::Text
        }
    }

    fn ambiguous(&self) -> MigrateError {
        MigrateError::SchemaAmbiguous(format!(
            "field {} has conflicting types: {}",
            self.name,
            self.kinds().join(", ")
        ))
    }
}

/// Infer columns from sampled records, in first-appearance order.
pub fn infer_columns(sample: &[Record]) -> Result<Vec<ColumnDefinition>> {
    let mut fields: Vec<FieldObservation> = Vec::new();

    for (i, record) in sample.iter().enumerate() {
        for (name, value) in record.fields() {
            let idx = match fields.iter().position(|f| f.name == name) {
                Some(idx) => idx,
                None => {
                    let mut field = FieldObservation::new(name);
                    // Absent from every earlier record.
                    field.nullable = i > 0;
                    fields.push(field);
                    fields.len() - 1
                }
            };
            fields[idx].observe(value);
        }
        for field in fields.iter_mut() {
            if record.get(&field.name).is_none() {
                field.nullable = true;
            }
        }
    }

    fields
        .iter()
        .map(|field| {
            let data_type = field.resolve()?;
            let mut column = ColumnDefinition::new(&field.name, data_type.name());
            column.nullable = field.nullable || field.seen == 0;
            Ok(column)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::MemorySource;
    use serde_json::json;

    fn records(values: Vec<serde_json::Value>) -> Vec<Record> {
        values
            .into_iter()
            .map(|v| Record::from_json(v).unwrap())
            .collect()
    }

    fn analyzer(location: &str, source: MemorySource) -> SchemaAnalyzer {
        let mut catalog = DriverCatalog::new();
        catalog.register_source(location, Arc::new(source));
        SchemaAnalyzer::new(Arc::new(catalog), 1000)
    }

    #[test]
    fn test_infer_first_appearance_order_and_nullability() {
        let sample = records(vec![
            json!({"id": 1, "name": "ada"}),
            json!({"id": 2, "name": null, "joined": "2024-01-02"}),
            json!({"id": 3, "name": "grace", "joined": "2024-02-03"}),
        ]);
        let columns = infer_columns(&sample).unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "joined"]);
        assert_eq!(columns[0].data_type, "integer64");
        assert!(!columns[0].nullable);
        assert_eq!(columns[1].data_type, "text");
        assert!(columns[1].nullable);
        assert_eq!(columns[2].data_type, "date");
        assert!(columns[2].nullable);
    }

    #[test]
    fn test_infer_widening_and_refinement() {
        let sample = records(vec![
            json!({"n": 1, "u": "6f1c1d7e-8d3a-4a8e-9c3f-2b1f5c6d7e8f", "t": "2024-01-01T10:00:00Z", "doc": {"a": 1}, "tags": [1]}),
            json!({"n": 2.5, "u": "0b6c1a2e-1111-4222-8333-944455556666", "t": "2024-01-01T11:00:00+02:00", "doc": {"b": 2}, "tags": []}),
            json!({"n": 3, "empty": null}),
        ]);
        let columns = infer_columns(&sample).unwrap();
        let types: Vec<_> = columns.iter().map(|c| c.data_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["float64", "uuid", "timestamptz", "json", "array", "text"]
        );
    }

    #[test]
    fn test_mixed_strings_fall_back_to_text() {
        let sample = records(vec![json!({"v": "2024-01-01"}), json!({"v": "soon"})]);
        assert_eq!(infer_columns(&sample).unwrap()[0].data_type, "text");
    }

    #[test]
    fn test_integer_and_string_is_ambiguous() {
        let sample = records(vec![json!({"v": 1}), json!({"v": "one"})]);
        let err = infer_columns(&sample).unwrap_err();
        assert!(matches!(err, MigrateError::SchemaAmbiguous(_)));
        assert!(err.to_string().contains("integer, string"));
    }

    #[tokio::test]
    async fn test_declared_columns_are_normalized() {
        let mut id = ColumnDefinition::new("ID", "INT8");
        id.primary_key = true;
        let source = MemorySource::new("users", Vec::new()).with_columns(vec![
            id,
            ColumnDefinition::new("Name", "nvarchar(80)"),
            ColumnDefinition::new("Shape", "geometry"),
        ]);
        let schema = analyzer("crm", source)
            .analyze(&SourceDescriptor::memory("crm", "users"))
            .await
            .unwrap();
        assert_eq!(schema.columns[0].data_type, "integer64");
        assert!(!schema.columns[0].nullable);
        assert_eq!(schema.columns[1].data_type, "varchar");
        assert_eq!(schema.columns[1].max_length, Some(80));
        assert_eq!(schema.columns[2].data_type, "geometry");
        assert_eq!(schema.row_count, Some(0));
    }

    #[tokio::test]
    async fn test_case_insensitive_duplicates_rejected() {
        let source = MemorySource::new("users", Vec::new()).with_columns(vec![
            ColumnDefinition::new("Email", "text"),
            ColumnDefinition::new("EMAIL", "text"),
        ]);
        let err = analyzer("crm", source)
            .analyze(&SourceDescriptor::memory("crm", "users"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::SchemaAmbiguous(_)));
    }

    #[tokio::test]
    async fn test_unreachable_source() {
        let source = MemorySource::new("users", Vec::new());
        source.set_unreachable(true);
        let err = analyzer("crm", source)
            .analyze(&SourceDescriptor::memory("crm", "users"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::SourceUnreachable(_)));

        let err = analyzer("crm", MemorySource::new("users", Vec::new()))
            .analyze(&SourceDescriptor::memory("elsewhere", "users"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::SourceUnreachable(_)));
    }

    #[tokio::test]
    async fn test_sample_size_bounds_inference() {
        let mut values: Vec<_> = (0..5).map(|i| json!({"v": i})).collect();
        values.push(json!({"v": "late string"}));
        let source = MemorySource::new("events", records(values));
        let mut catalog = DriverCatalog::new();
        catalog.register_source("logs", Arc::new(source));
        let analyzer = SchemaAnalyzer::new(Arc::new(catalog), 5);
        let schema = analyzer
            .analyze(&SourceDescriptor::memory("logs", "events"))
            .await
            .unwrap();
        assert_eq!(schema.columns[0].data_type, "integer64");
        assert_eq!(schema.row_count, Some(6));
    }

    #[tokio::test]
    async fn test_empty_schemaless_source_is_ambiguous() {
        let err = analyzer("crm", MemorySource::new("users", Vec::new()))
            .analyze(&SourceDescriptor::memory("crm", "users"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::SchemaAmbiguous(_)));
    }

    #[tokio::test]
    async fn test_undecodable_records_are_not_sampled() {
        let mut sample = records(vec![json!({"id": 1}), json!({"id": 2})]);
        sample.insert(1, Record::malformed("invalid JSON"));
        let schema = analyzer("crm", MemorySource::new("users", sample))
            .analyze(&SourceDescriptor::memory("crm", "users"))
            .await
            .unwrap();
        assert_eq!(schema.columns.len(), 1);
        assert!(!schema.columns[0].nullable);

        let only_bad = vec![Record::malformed("invalid JSON")];
        let err = analyzer("crm", MemorySource::new("users", only_bad))
            .analyze(&SourceDescriptor::memory("crm", "users"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::SchemaAmbiguous(_)));
    }
}
