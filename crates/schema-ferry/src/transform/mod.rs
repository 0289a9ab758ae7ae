//! Per-field coercions applied while rows move to the destination.
//!
//! A [`FieldMapping`] names at most one [`Transformation`]. The executor
//! compiles an approved mapping set into a [`RowTransformer`] once, then runs
//! every source record through it. Each cell goes through three steps:
//!
//! 1. null handling (NULL into a NOT NULL column is replaced by the type's
//!    zero value; NULL into a primary key is a row error)
//! 2. the named transformation, if any
//! 3. conformance to the destination type (parsing text, range checks,
//!    `max_length`)
//!
//! Failures come back as [`MigrateError::RowTransform`]; the executor records
//! them against the row instead of failing the batch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::core::schema::{FieldMapping, TableSchema};
use crate::core::value::{Record, Row, SqlValue};
use crate::dialect::{declared_length, DestinationType};
use crate::error::{MigrateError, Result};

/// Named coercion functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transformation {
    WidenInteger,
    NarrowInteger,
    IntegerToFloat,
    WidenFloat,
    NarrowFloat,
    ToDecimal,
    DecimalToFloat,
    ToText,
    TruncateText,
    BoolToInteger,
    DateToTimestamp,
    TimestampToDate,
    AssumeUtc,
    DropTimezone,
    ToJson,
}

impl Transformation {
    pub const ALL: [Transformation; 15] = [
        Transformation::WidenInteger,
        Transformation::NarrowInteger,
        Transformation::IntegerToFloat,
        Transformation::WidenFloat,
        Transformation::NarrowFloat,
        Transformation::ToDecimal,
        Transformation::DecimalToFloat,
        Transformation::ToText,
        Transformation::TruncateText,
        Transformation::BoolToInteger,
        Transformation::DateToTimestamp,
        Transformation::TimestampToDate,
        Transformation::AssumeUtc,
        Transformation::DropTimezone,
        Transformation::ToJson,
    ];

    /// Identifier stored in [`FieldMapping::transformation`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Transformation::WidenInteger => "widen_integer",
            Transformation::NarrowInteger => "narrow_integer",
            Transformation::IntegerToFloat => "integer_to_float",
            Transformation::WidenFloat => "widen_float",
            Transformation::NarrowFloat => "narrow_float",
            Transformation::ToDecimal => "to_decimal",
            Transformation::DecimalToFloat => "decimal_to_float",
            Transformation::ToText => "to_text",
            Transformation::TruncateText => "truncate_text",
            Transformation::BoolToInteger => "bool_to_integer",
            Transformation::DateToTimestamp => "date_to_timestamp",
            Transformation::TimestampToDate => "timestamp_to_date",
            Transformation::AssumeUtc => "assume_utc",
            Transformation::DropTimezone => "drop_timezone",
            Transformation::ToJson => "to_json",
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transformation {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        Transformation::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| MigrateError::validation(format!("unknown transformation: {}", s)))
    }
}

/// One destination column, compiled from a non-skipped mapping.
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub source_field: String,
    pub destination_field: String,
    pub destination_type: DestinationType,
    pub transformation: Option<Transformation>,
    pub nullable: bool,
    pub primary_key: bool,
    pub max_length: Option<u32>,
}

/// Compiled mapping set.
#[derive(Debug, Clone)]
pub struct RowTransformer {
    columns: Vec<ColumnPlan>,
    truncate_hard_limit: usize,
}

impl RowTransformer {
    /// Compile non-skipped mappings against their schema.
    ///
    /// Expects a mapping set that already passed validation; any leftover
    /// inconsistency is reported as `ValidationFailed`.
    pub fn compile(
        schema: &TableSchema,
        mappings: &[FieldMapping],
        truncate_hard_limit: usize,
    ) -> Result<Self> {
        let mut columns = Vec::new();
        for mapping in mappings.iter().filter(|m| !m.skip) {
            let column = schema.column(&mapping.source_field).ok_or_else(|| {
                MigrateError::validation(format!(
                    "unknown source field: {}",
                    mapping.source_field
                ))
            })?;
            let transformation = mapping
                .transformation
                .as_deref()
                .map(Transformation::from_str)
                .transpose()?;
            columns.push(ColumnPlan {
                source_field: mapping.source_field.clone(),
                destination_field: mapping.destination_field.clone(),
                destination_type: mapping.destination_type.parse()?,
                transformation,
                nullable: column.nullable && !column.primary_key,
                primary_key: column.primary_key,
                max_length: column
                    .max_length
                    .or_else(|| declared_length(&column.data_type)),
            });
        }
        Ok(Self {
            columns,
            truncate_hard_limit,
        })
    }

    pub fn columns(&self) -> &[ColumnPlan] {
        &self.columns
    }

    /// Destination column names in write order.
    pub fn destination_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.destination_field.clone())
            .collect()
    }

    /// Transform one source record. `row` is its absolute source offset.
    pub fn transform(&self, row: u64, record: &Record) -> Result<Row> {
        if let Some(reason) = record.defect() {
            return Err(MigrateError::row(row, "*", reason));
        }
        self.columns
            .iter()
            .map(|plan| {
                let value = record.get(&plan.source_field).cloned().unwrap_or(SqlValue::Null);
                self.apply(plan, value)
                    .map_err(|message| MigrateError::row(row, &plan.destination_field, message))
            })
            .collect()
    }

    fn apply(&self, plan: &ColumnPlan, value: SqlValue) -> std::result::Result<SqlValue, String> {
        if value.is_null() {
            if plan.nullable {
                return Ok(SqlValue::Null);
            }
            if plan.primary_key {
                return Err("null value in primary key column".to_string());
            }
            return Ok(zero_value(plan.destination_type));
        }

        let value = match plan.transformation {
            Some(t) => self.pre_apply(t, plan, value)?,
            None => value,
        };
        conform(value, plan.destination_type, plan.max_length)
    }

    fn pre_apply(
        &self,
        t: Transformation,
        plan: &ColumnPlan,
        value: SqlValue,
    ) -> std::result::Result<SqlValue, String> {
        match t {
            Transformation::ToText => Ok(match value {
                SqlValue::Text(s) => SqlValue::Text(s),
                other => SqlValue::Text(other.to_string()),
            }),
            Transformation::TruncateText => {
                let text = match value {
                    SqlValue::Text(s) => s,
                    other => other.to_string(),
                };
                let len = text.chars().count();
                if len > self.truncate_hard_limit {
                    return Err(format!(
                        "value length {} exceeds truncation hard limit {}",
                        len, self.truncate_hard_limit
                    ));
                }
                Ok(match plan.max_length {
                    Some(max) if len > max as usize => {
                        SqlValue::Text(text.chars().take(max as usize).collect())
                    }
                    _ => SqlValue::Text(text),
                })
            }
            Transformation::BoolToInteger => match value {
                SqlValue::Bool(b) => Ok(SqlValue::Int(i64::from(b))),
                other => Ok(other),
            },
            Transformation::DateToTimestamp => match parse_date(value)? {
                SqlValue::Date(d) => Ok(SqlValue::Timestamp(d.and_time(NaiveTime::default()))),
                other => Ok(other),
            },
            Transformation::TimestampToDate => match value {
                SqlValue::Timestamp(ts) => Ok(SqlValue::Date(ts.date())),
                SqlValue::TimestampTz(ts) => Ok(SqlValue::Date(ts.naive_utc().date())),
                SqlValue::Text(s) => match parse_naive_timestamp(&s) {
                    Some(ts) => Ok(SqlValue::Date(ts.date())),
                    None => Ok(SqlValue::Text(s)),
                },
                other => Ok(other),
            },
            Transformation::AssumeUtc => match value {
                SqlValue::Timestamp(ts) => Ok(SqlValue::TimestampTz(
                    Utc.from_utc_datetime(&ts).fixed_offset(),
                )),
                SqlValue::Text(s) => match parse_naive_timestamp(&s) {
                    Some(ts) => Ok(SqlValue::TimestampTz(
                        Utc.from_utc_datetime(&ts).fixed_offset(),
                    )),
                    None => Ok(SqlValue::Text(s)),
                },
                other => Ok(other),
            },
            Transformation::DropTimezone => match value {
                SqlValue::TimestampTz(ts) => Ok(SqlValue::Timestamp(ts.naive_utc())),
                SqlValue::Text(s) => match DateTime::parse_from_rfc3339(s.trim()) {
                    Ok(ts) => Ok(SqlValue::Timestamp(ts.naive_utc())),
                    Err(_) => Ok(SqlValue::Text(s)),
                },
                other => Ok(other),
            },
            Transformation::ToJson => Ok(match value {
                SqlValue::Json(v) => SqlValue::Json(v),
                SqlValue::Text(s) => SqlValue::Json(
                    serde_json::from_str(&s).unwrap_or(JsonValue::String(s)),
                ),
                other => SqlValue::Json(other.to_json()),
            }),
            // Numeric widening and narrowing are range-checked by `conform`.
            Transformation::WidenInteger
            | Transformation::NarrowInteger
            | Transformation::IntegerToFloat
            | Transformation::WidenFloat
            | Transformation::NarrowFloat
            | Transformation::ToDecimal
            | Transformation::DecimalToFloat => Ok(value),
        }
    }
}

/// Coerce a non-null value into the representation of `dest`.
pub fn conform(
    value: SqlValue,
    dest: DestinationType,
    max_length: Option<u32>,
) -> std::result::Result<SqlValue, String> {
    let kind = value.kind();
    let mismatch = || format!("cannot coerce {} value to {}", kind, dest);

    match dest {
        DestinationType::Boolean => match value {
            SqlValue::Bool(b) => Ok(SqlValue::Bool(b)),
            SqlValue::Int(0) => Ok(SqlValue::Bool(false)),
            SqlValue::Int(1) => Ok(SqlValue::Bool(true)),
            SqlValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "t" | "yes" | "1" => Ok(SqlValue::Bool(true)),
                "false" | "f" | "no" | "0" => Ok(SqlValue::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        DestinationType::Integer16 => integer_in_range(&value, i16::MIN as i64, i16::MAX as i64, dest),
        DestinationType::Integer32 => integer_in_range(&value, i32::MIN as i64, i32::MAX as i64, dest),
        DestinationType::Integer64 => integer_in_range(&value, i64::MIN, i64::MAX, dest),
        DestinationType::Float32 => {
            let v = numeric_f64(&value).ok_or_else(mismatch)?;
            if v.is_finite() && v.abs() > f32::MAX as f64 {
                return Err(format!("value {} out of range for {}", v, dest));
            }
            Ok(SqlValue::Float(v as f32 as f64))
        }
        DestinationType::Float64 => numeric_f64(&value).map(SqlValue::Float).ok_or_else(mismatch),
        DestinationType::Decimal => match value {
            SqlValue::Bool(_) => Err(mismatch()),
            other => other.as_decimal().map(SqlValue::Decimal).ok_or_else(mismatch),
        },
        DestinationType::Varchar | DestinationType::Text => match value {
            SqlValue::Text(s) => {
                if let (DestinationType::Varchar, Some(max)) = (dest, max_length) {
                    let len = s.chars().count();
                    if len > max as usize {
                        return Err(format!("value length {} exceeds max_length {}", len, max));
                    }
                }
                Ok(SqlValue::Text(s))
            }
            _ => Err(mismatch()),
        },
        DestinationType::Date => match parse_date(value)? {
            v @ SqlValue::Date(_) => Ok(v),
            _ => Err(mismatch()),
        },
        DestinationType::Time => match value {
            SqlValue::Time(t) => Ok(SqlValue::Time(t)),
            SqlValue::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M"))
                .map(SqlValue::Time)
                .map_err(|_| format!("invalid time: {:?}", s)),
            _ => Err(mismatch()),
        },
        DestinationType::Timestamp => match value {
            SqlValue::Timestamp(ts) => Ok(SqlValue::Timestamp(ts)),
            SqlValue::Text(s) => parse_naive_timestamp(&s)
                .map(SqlValue::Timestamp)
                .ok_or_else(|| format!("invalid timestamp: {:?}", s)),
            _ => Err(mismatch()),
        },
        DestinationType::TimestampTz => match value {
            SqlValue::TimestampTz(ts) => Ok(SqlValue::TimestampTz(ts)),
            SqlValue::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(SqlValue::TimestampTz)
                .map_err(|_| format!("invalid timestamp with time zone: {:?}", s)),
            _ => Err(mismatch()),
        },
        DestinationType::Uuid => match value {
            SqlValue::Uuid(u) => Ok(SqlValue::Uuid(u)),
            SqlValue::Text(s) => Uuid::parse_str(s.trim())
                .map(SqlValue::Uuid)
                .map_err(|_| format!("invalid uuid: {:?}", s)),
            _ => Err(mismatch()),
        },
        DestinationType::Json => match value {
            SqlValue::Json(v) => Ok(SqlValue::Json(v)),
            SqlValue::Text(s) => serde_json::from_str(&s)
                .map(SqlValue::Json)
                .map_err(|_| format!("invalid json: {:?}", s)),
            _ => Err(mismatch()),
        },
        DestinationType::Binary => match value {
            SqlValue::Bytes(b) => Ok(SqlValue::Bytes(b)),
            SqlValue::Text(s) => match s.strip_prefix("\\x") {
                Some(hex_str) => hex::decode(hex_str)
                    .map(SqlValue::Bytes)
                    .map_err(|_| format!("invalid hex bytes: {:?}", s)),
                None => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
    }
}

/// Value substituted for NULL in a NOT NULL destination column.
pub fn zero_value(dest: DestinationType) -> SqlValue {
    match dest {
        DestinationType::Boolean => SqlValue::Bool(false),
        DestinationType::Integer16 | DestinationType::Integer32 | DestinationType::Integer64 => {
            SqlValue::Int(0)
        }
        DestinationType::Float32 | DestinationType::Float64 => SqlValue::Float(0.0),
        DestinationType::Decimal => SqlValue::Decimal(Decimal::ZERO),
        DestinationType::Varchar | DestinationType::Text => SqlValue::Text(String::new()),
        DestinationType::Date => SqlValue::Date(NaiveDate::default()),
        DestinationType::Time => SqlValue::Time(NaiveTime::default()),
        DestinationType::Timestamp => SqlValue::Timestamp(NaiveDateTime::default()),
        DestinationType::TimestampTz => {
            SqlValue::TimestampTz(Utc.from_utc_datetime(&NaiveDateTime::default()).fixed_offset())
        }
        DestinationType::Uuid => SqlValue::Uuid(Uuid::nil()),
        DestinationType::Json => SqlValue::Json(JsonValue::Null),
        DestinationType::Binary => SqlValue::Bytes(Vec::new()),
    }
}

fn integer_in_range(
    value: &SqlValue,
    min: i64,
    max: i64,
    dest: DestinationType,
) -> std::result::Result<SqlValue, String> {
    let v = match value {
        SqlValue::Bool(_) => None,
        other => other.as_i64(),
    }
    .ok_or_else(|| format!("cannot coerce {} value {} to {}", value.kind(), value, dest))?;
    if v < min || v > max {
        return Err(format!("value {} out of range for {}", v, dest));
    }
    Ok(SqlValue::Int(v))
}

fn numeric_f64(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Bool(_) => None,
        other => other.as_f64(),
    }
}

fn parse_date(value: SqlValue) -> std::result::Result<SqlValue, String> {
    match value {
        SqlValue::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(SqlValue::Date)
            .map_err(|_| format!("invalid date: {:?}", s)),
        other => Ok(other),
    }
}

/// Parse an ISO-8601 timestamp without offset (`T` or space separated).
pub(crate) fn parse_naive_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}
