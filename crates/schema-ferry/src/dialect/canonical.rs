//! Canonical source type vocabulary.
//!
//! Sources describe columns in their own dialect (`int4`, `nvarchar(50)`,
//! `Nullable(Int64)`, `uniqueidentifier`, ...). Everything downstream of the
//! analyzer works on [`CanonicalType`], so each vendor spelling is resolved
//! exactly once, here.
//!
//! ```text
//! int / int4 / integer / serial      →  integer32
//! bigint / int8 / int64 / bigserial  →  integer64
//! nvarchar(50)                       →  varchar   (max_length 50)
//! timestamp with time zone           →  timestamptz
//! ```
//!
//! Parsing is idempotent: a canonical name parses back to itself.

use std::fmt;

/// Dialect-neutral column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalType {
    // ===== Boolean =====
    Boolean,

    // ===== Integer Types =====
    /// 8-bit signed integer.
    Integer8,
    /// 16-bit signed integer.
    Integer16,
    /// 32-bit signed integer.
    Integer32,
    /// 64-bit signed integer.
    Integer64,

    // ===== Floating Point =====
    Float32,
    Float64,

    // ===== Exact Numeric =====
    Decimal,

    // ===== String Types =====
    /// Fixed-length character string.
    Char,
    /// Bounded variable-length character string.
    Varchar,
    /// Unbounded text.
    Text,

    // ===== Date/Time Types =====
    Date,
    Time,
    /// Date and time without timezone.
    Timestamp,
    /// Date and time with timezone.
    TimestampTz,
    Interval,

    // ===== Special Types =====
    Uuid,
    Json,
    Binary,
    Array,

    /// Anything else, kept as its lower-cased source spelling.
    Unknown(String),
}

impl CanonicalType {
    /// Normalize a source type name.
    pub fn parse(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        let lower = lower.as_str();

        if lower.ends_with("[]") || lower.starts_with("array") {
            return CanonicalType::Array;
        }

        // ClickHouse wrappers carry the real type inside.
        for wrapper in ["nullable(", "lowcardinality("] {
            if let Some(inner) = lower.strip_prefix(wrapper).and_then(|s| s.strip_suffix(')')) {
                return Self::parse(inner);
            }
        }

        let (base, params) = split_params(lower);

        match base {
            // Boolean
            "bool" | "boolean" | "bit" => CanonicalType::Boolean,

            // Integer types
            "tinyint" | "int1" | "integer8" | "i8" | "byte" => CanonicalType::Integer8,
            "smallint" | "int2" | "int16" | "integer16" | "smallserial" | "serial2" | "i16"
            | "short" | "uint8" | "year" => CanonicalType::Integer16,
            "int" | "integer" | "int4" | "int32" | "integer32" | "serial" | "serial4"
            | "mediumint" | "i32" | "uint16" => CanonicalType::Integer32,
            "bigint" | "int8" | "int64" | "integer64" | "bigserial" | "serial8" | "long"
            | "i64" | "uint32" => CanonicalType::Integer64,

            // Floating point
            "real" | "float4" | "float32" | "f32" => CanonicalType::Float32,
            "float" => match params.and_then(|p| p.parse::<u32>().ok()) {
                Some(p) if p <= 24 => CanonicalType::Float32,
                _ => CanonicalType::Float64,
            },
            "double" | "double precision" | "float8" | "float64" | "f64" => {
                CanonicalType::Float64
            }

            // Exact numeric
            "numeric" | "decimal" | "money" | "smallmoney" | "number" | "decimal32"
            | "decimal64" | "decimal128" | "decimal256" => CanonicalType::Decimal,

            // Strings
            "char" | "character" | "nchar" | "bpchar" | "fixedstring" => CanonicalType::Char,
            "varchar" | "character varying" | "nvarchar" | "varchar2" | "nvarchar2" => {
                CanonicalType::Varchar
            }
            "text" | "ntext" | "tinytext" | "mediumtext" | "longtext" | "clob" | "string"
            | "citext" | "xml" => CanonicalType::Text,

            // Date/time
            "date" | "date32" => CanonicalType::Date,
            "time" | "time without time zone" | "timetz" | "time with time zone" => {
                CanonicalType::Time
            }
            "timestamp" | "timestamp without time zone" | "datetime" | "datetime2"
            | "smalldatetime" | "datetime64" => CanonicalType::Timestamp,
            "timestamptz" | "timestamp with time zone" | "datetimeoffset" => {
                CanonicalType::TimestampTz
            }
            "interval" => CanonicalType::Interval,

            // Special
            "uuid" | "uniqueidentifier" | "guid" => CanonicalType::Uuid,
            "json" | "jsonb" | "object" => CanonicalType::Json,
            "bytea" | "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob"
            | "longblob" | "image" | "bytes" => CanonicalType::Binary,
            "array" => CanonicalType::Array,

            other => CanonicalType::Unknown(other.to_string()),
        }
    }

    /// Canonical spelling.
    pub fn name(&self) -> &str {
        match self {
            CanonicalType::Boolean => "boolean",
            CanonicalType::Integer8 => "integer8",
            CanonicalType::Integer16 => "integer16",
            CanonicalType::Integer32 => "integer32",
            CanonicalType::Integer64 => "integer64",
            CanonicalType::Float32 => "float32",
            CanonicalType::Float64 => "float64",
            CanonicalType::Decimal => "decimal",
            CanonicalType::Char => "char",
            CanonicalType::Varchar => "varchar",
            CanonicalType::Text => "text",
            CanonicalType::Date => "date",
            CanonicalType::Time => "time",
            CanonicalType::Timestamp => "timestamp",
            CanonicalType::TimestampTz => "timestamptz",
            CanonicalType::Interval => "interval",
            CanonicalType::Uuid => "uuid",
            CanonicalType::Json => "json",
            CanonicalType::Binary => "binary",
            CanonicalType::Array => "array",
            CanonicalType::Unknown(raw) => raw,
        }
    }

    /// Character types whose length is meaningful.
    pub fn is_character(&self) -> bool {
        matches!(
            self,
            CanonicalType::Char | CanonicalType::Varchar | CanonicalType::Text
        )
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Length declared inline in a character type, e.g. `varchar(255)`.
///
/// `varchar(max)` and non-character types yield `None`.
pub fn declared_length(raw: &str) -> Option<u32> {
    let lower = raw.trim().to_lowercase();
    if !CanonicalType::parse(&lower).is_character() {
        return None;
    }
    let (_, params) = split_params(&lower);
    params.and_then(|p| p.trim().parse::<u32>().ok())
}

/// Split `base(params)` into its parts. Parameters are returned verbatim.
fn split_params(lower: &str) -> (&str, Option<&str>) {
    match lower.find('(') {
        Some(open) => {
            let base = lower[..open].trim_end();
            let rest = &lower[open + 1..];
            let params = rest.find(')').map(|close| rest[..close].trim());
            // `timestamp(3) with time zone` keeps its suffix meaningful.
            let suffix = rest.find(')').map(|close| rest[close + 1..].trim());
            match (base, suffix) {
                ("timestamp", Some("with time zone")) => ("timestamp with time zone", params),
                ("timestamp", Some("without time zone")) => {
                    ("timestamp without time zone", params)
                }
                _ => (base, params),
            }
        }
        None => (lower, None),
    }
}
