//! Mapping suggestion, validation and DDL generation.
//!
//! [`suggest`] walks a [`TableSchema`] in column order and proposes one
//! [`FieldMapping`] per column, together with `CREATE TABLE` DDL and
//! human-readable warnings. Output depends only on the inputs: the same
//! schema and table name always produce byte-identical mappings, DDL and
//! warnings.
//!
//! [`validate`] checks a (possibly hand-edited) mapping set before the
//! executor accepts it, and reports every problem at once.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::identifier::{
    destination_name, is_valid_identifier, safe_identifier, validate_table_name,
    MAX_IDENTIFIER_LENGTH,
};
use crate::core::schema::{FieldMapping, TableSchema};
use crate::dialect::{declared_length, CanonicalType, DestinationType};
use crate::error::{MigrateError, Result};
use crate::transform::Transformation;
use crate::typemap::{self, Risk};

/// Suggested mapping set for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub mappings: Vec<FieldMapping>,
    pub ddl: String,
    pub warnings: Vec<String>,
}

/// Propose mappings and DDL for copying `schema` into `destination_table`.
pub fn suggest(schema: &TableSchema, destination_table: &str) -> Result<Suggestion> {
    validate_table_name(destination_table)?;
    if let Some(dup) = schema.duplicate_column() {
        return Err(MigrateError::validation(format!(
            "duplicate source column (case-insensitive): {}",
            dup
        )));
    }

    let mut mappings = Vec::with_capacity(schema.columns.len());
    let mut warnings = Vec::new();
    let mut used = HashSet::new();

    for column in &schema.columns {
        let canonical = CanonicalType::parse(&column.data_type);
        let Some(coercion) = typemap::best(&canonical) else {
            if column.primary_key {
                return Err(MigrateError::UnmappablePrimaryKey {
                    column: column.name.clone(),
                    source_type: column.data_type.clone(),
                });
            }
            warnings.push(format!("column {}: no safe destination type", column.name));
            mappings.push(FieldMapping {
                source_field: column.name.clone(),
                source_type: column.data_type.clone(),
                destination_field: safe_identifier(&destination_name(&column.name)),
                destination_type: String::new(),
                transformation: None,
                skip: true,
            });
            continue;
        };

        let destination_field = unique_name(&column.name, &mut used, &mut warnings);

        if matches!(coercion.risk, Risk::Lossy | Risk::Truncating) {
            warnings.push(format!(
                "column {}: {} conversion from {} to {}",
                column.name, coercion.risk, canonical, coercion.destination
            ));
        }

        mappings.push(FieldMapping {
            source_field: column.name.clone(),
            source_type: column.data_type.clone(),
            destination_field,
            destination_type: coercion.destination.as_str().to_string(),
            transformation: coercion.transformation.map(|t| t.as_str().to_string()),
            skip: false,
        });
    }

    if mappings.iter().all(|m| m.skip) {
        return Err(MigrateError::validation(format!(
            "no mappable columns in {}",
            schema.full_name()
        )));
    }

    let ddl = render_ddl(schema, &mappings, destination_table)?;
    debug!(
        "Suggested {} mappings for {} -> {} ({} warnings)",
        mappings.len(),
        schema.full_name(),
        destination_table,
        warnings.len()
    );

    Ok(Suggestion {
        mappings,
        ddl,
        warnings,
    })
}

/// Derive a destination name not yet in `used`, suffixing `_2`, `_3`, ...
fn unique_name(source: &str, used: &mut HashSet<String>, warnings: &mut Vec<String>) -> String {
    let derived = destination_name(source);
    let base = safe_identifier(&derived);
    if base != derived {
        warnings.push(format!(
            "column {}: {:?} is not a valid identifier, using {}",
            source, derived, base
        ));
    }
    let mut name = base.clone();
    let mut n = 2;
    while used.contains(&name) {
        let suffix = format!("_{}", n);
        let keep = base.len().min(MAX_IDENTIFIER_LENGTH - suffix.len());
        name = format!("{}{}", &base[..keep], suffix);
        n += 1;
    }
    if name != base {
        warnings.push(format!(
            "column {}: destination name {} already taken, using {}",
            source, base, name
        ));
    }
    used.insert(name.clone());
    name
}

/// Render `CREATE TABLE` for the non-skipped mappings, in mapping order.
///
/// A single primary-key column is marked inline; a composite key gets a
/// trailing `PRIMARY KEY (...)` clause.
pub fn render_ddl(
    schema: &TableSchema,
    mappings: &[FieldMapping],
    destination_table: &str,
) -> Result<String> {
    let active: Vec<&FieldMapping> = mappings.iter().filter(|m| !m.skip).collect();
    let key_columns: Vec<&str> = active
        .iter()
        .filter(|m| schema.column(&m.source_field).is_some_and(|c| c.primary_key))
        .map(|m| m.destination_field.as_str())
        .collect();
    let inline_key = key_columns.len() == 1;

    let mut clauses = Vec::with_capacity(active.len() + 1);
    for mapping in &active {
        let column = schema.column(&mapping.source_field).ok_or_else(|| {
            MigrateError::validation(format!("unknown source field: {}", mapping.source_field))
        })?;
        let dest = DestinationType::from_str(&mapping.destination_type)?;

        let max_length = column
            .max_length
            .or_else(|| declared_length(&column.data_type));
        let mut clause = format!(
            "{} {}",
            mapping.destination_field,
            dest.sql_type(max_length)
        );
        if !column.nullable || column.primary_key {
            clause.push_str(" NOT NULL");
        }
        if column.primary_key && inline_key {
            clause.push_str(" PRIMARY KEY");
        }
        clauses.push(clause);
    }
    if key_columns.len() > 1 {
        clauses.push(format!("PRIMARY KEY ({})", key_columns.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        destination_table,
        clauses.join(", ")
    ))
}

/// Check a mapping set against its schema. Every problem found is reported
/// in one `ValidationFailed`.
pub fn validate(schema: &TableSchema, mappings: &[FieldMapping]) -> Result<()> {
    let mut problems = Vec::new();
    let mut seen = HashSet::new();
    let mut active = 0usize;

    for mapping in mappings {
        let column = schema.column(&mapping.source_field);
        if column.is_none() {
            problems.push(format!("unknown source field: {}", mapping.source_field));
        }

        if mapping.skip {
            if column.is_some_and(|c| c.primary_key) {
                problems.push(format!(
                    "primary key column cannot be skipped: {}",
                    mapping.source_field
                ));
            }
            continue;
        }
        active += 1;

        if !is_valid_identifier(&mapping.destination_field) {
            problems.push(format!(
                "invalid destination field name: {}",
                mapping.destination_field
            ));
        }
        if !seen.insert(mapping.destination_field.to_lowercase()) {
            problems.push(format!(
                "duplicate destination field: {}",
                mapping.destination_field
            ));
        }
        if DestinationType::from_str(&mapping.destination_type).is_err() {
            problems.push(format!(
                "unknown destination type: {}",
                mapping.destination_type
            ));
        }
        if let Some(t) = &mapping.transformation {
            if Transformation::from_str(t).is_err() {
                problems.push(format!("unknown transformation: {}", t));
            }
        }
    }

    for key in schema.primary_key() {
        if !mappings.iter().any(|m| m.source_field == key) {
            problems.push(format!("primary key column is not mapped: {}", key));
        }
    }
    if active == 0 {
        problems.push("at least one field must not be skipped".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(MigrateError::ValidationFailed(problems))
    }
}
