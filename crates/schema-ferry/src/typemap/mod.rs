//! Type coercion table: which canonical source types may land in which
//! destination types, and at what risk.
//!
//! The table is plain data keyed by a `(CanonicalType, DestinationType)`
//! pair. Entries for one source type are listed in preference order, which
//! is what [`candidates`] yields and what the mapping suggester walks.
//! [`lookup`] is total: any pair not listed is [`Risk::Unsupported`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dialect::{CanonicalType, DestinationType};
use crate::transform::Transformation;

/// How much a conversion can lose. Ordered from safest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    /// Every source value is represented exactly.
    None,
    /// Values survive but may lose precision or metadata.
    Lossy,
    /// Some values cannot fit and fail or get cut.
    Truncating,
    /// Not convertible.
    Unsupported,
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Risk::None => write!(f, "none"),
            Risk::Lossy => write!(f, "lossy"),
            Risk::Truncating => write!(f, "truncating"),
            Risk::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Result of a table lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coercion {
    pub destination: DestinationType,
    pub allowed: bool,
    pub risk: Risk,
    /// Named coercion to apply; `None` is identity.
    pub transformation: Option<Transformation>,
}

impl Coercion {
    fn unsupported(destination: DestinationType) -> Self {
        Self {
            destination,
            allowed: false,
            risk: Risk::Unsupported,
            transformation: None,
        }
    }
}

/// Source-side key. Unknown source types have no entries at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKey {
    Boolean,
    Integer8,
    Integer16,
    Integer32,
    Integer64,
    Float32,
    Float64,
    Decimal,
    Char,
    Varchar,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
    Json,
    Binary,
    Array,
}

impl SourceKey {
    fn of(t: &CanonicalType) -> Option<Self> {
        Some(match t {
            CanonicalType::Boolean => SourceKey::Boolean,
            CanonicalType::Integer8 => SourceKey::Integer8,
            CanonicalType::Integer16 => SourceKey::Integer16,
            CanonicalType::Integer32 => SourceKey::Integer32,
            CanonicalType::Integer64 => SourceKey::Integer64,
            CanonicalType::Float32 => SourceKey::Float32,
            CanonicalType::Float64 => SourceKey::Float64,
            CanonicalType::Decimal => SourceKey::Decimal,
            CanonicalType::Char => SourceKey::Char,
            CanonicalType::Varchar => SourceKey::Varchar,
            CanonicalType::Text => SourceKey::Text,
            CanonicalType::Date => SourceKey::Date,
            CanonicalType::Time => SourceKey::Time,
            CanonicalType::Timestamp => SourceKey::Timestamp,
            CanonicalType::TimestampTz => SourceKey::TimestampTz,
            CanonicalType::Interval => SourceKey::Interval,
            CanonicalType::Uuid => SourceKey::Uuid,
            CanonicalType::Json => SourceKey::Json,
            CanonicalType::Binary => SourceKey::Binary,
            CanonicalType::Array => SourceKey::Array,
            CanonicalType::Unknown(_) => return None,
        })
    }
}

type Entry = (SourceKey, DestinationType, Risk, Option<Transformation>);

use DestinationType as D;
use Risk as R;
use SourceKey as S;
use Transformation as T;

/// The coercion table, grouped by source type in preference order.
static COERCIONS: &[Entry] = &[
    // Boolean
    (S::Boolean, D::Boolean, R::None, None),
    (S::Boolean, D::Integer16, R::None, Some(T::BoolToInteger)),
    (S::Boolean, D::Text, R::None, Some(T::ToText)),
    // Integers
    (S::Integer8, D::Integer16, R::None, Some(T::WidenInteger)),
    (S::Integer8, D::Integer32, R::None, Some(T::WidenInteger)),
    (S::Integer8, D::Integer64, R::None, Some(T::WidenInteger)),
    (S::Integer8, D::Decimal, R::None, Some(T::ToDecimal)),
    (S::Integer8, D::Text, R::None, Some(T::ToText)),
    (S::Integer16, D::Integer16, R::None, None),
    (S::Integer16, D::Integer32, R::None, Some(T::WidenInteger)),
    (S::Integer16, D::Integer64, R::None, Some(T::WidenInteger)),
    (S::Integer16, D::Float32, R::None, Some(T::IntegerToFloat)),
    (S::Integer16, D::Decimal, R::None, Some(T::ToDecimal)),
    (S::Integer16, D::Text, R::None, Some(T::ToText)),
    (S::Integer32, D::Integer32, R::None, None),
    (S::Integer32, D::Integer64, R::None, Some(T::WidenInteger)),
    (S::Integer32, D::Float64, R::None, Some(T::IntegerToFloat)),
    (S::Integer32, D::Decimal, R::None, Some(T::ToDecimal)),
    (S::Integer32, D::Integer16, R::Truncating, Some(T::NarrowInteger)),
    (S::Integer32, D::Text, R::None, Some(T::ToText)),
    (S::Integer64, D::Integer64, R::None, None),
    (S::Integer64, D::Decimal, R::None, Some(T::ToDecimal)),
    (S::Integer64, D::Float64, R::Lossy, Some(T::IntegerToFloat)),
    (S::Integer64, D::Integer32, R::Truncating, Some(T::NarrowInteger)),
    (S::Integer64, D::Integer16, R::Truncating, Some(T::NarrowInteger)),
    (S::Integer64, D::Text, R::None, Some(T::ToText)),
    // Floating point and exact numeric
    (S::Float32, D::Float32, R::None, None),
    (S::Float32, D::Float64, R::None, Some(T::WidenFloat)),
    (S::Float32, D::Decimal, R::Lossy, Some(T::ToDecimal)),
    (S::Float32, D::Text, R::None, Some(T::ToText)),
    (S::Float64, D::Float64, R::None, None),
    (S::Float64, D::Float32, R::Lossy, Some(T::NarrowFloat)),
    (S::Float64, D::Decimal, R::Lossy, Some(T::ToDecimal)),
    (S::Float64, D::Text, R::None, Some(T::ToText)),
    (S::Decimal, D::Decimal, R::None, None),
    (S::Decimal, D::Float64, R::Lossy, Some(T::DecimalToFloat)),
    (S::Decimal, D::Text, R::None, Some(T::ToText)),
    // Character data
    (S::Char, D::Varchar, R::None, None),
    (S::Char, D::Text, R::None, None),
    (S::Varchar, D::Varchar, R::None, None),
    (S::Varchar, D::Text, R::None, None),
    (S::Text, D::Text, R::None, None),
    (S::Text, D::Varchar, R::Truncating, Some(T::TruncateText)),
    // Date/time
    (S::Date, D::Date, R::None, None),
    (S::Date, D::Timestamp, R::None, Some(T::DateToTimestamp)),
    (S::Date, D::Text, R::None, Some(T::ToText)),
    (S::Time, D::Time, R::None, None),
    (S::Time, D::Text, R::None, Some(T::ToText)),
    (S::Timestamp, D::Timestamp, R::None, None),
    (S::Timestamp, D::TimestampTz, R::None, Some(T::AssumeUtc)),
    (S::Timestamp, D::Date, R::Truncating, Some(T::TimestampToDate)),
    (S::Timestamp, D::Text, R::None, Some(T::ToText)),
    (S::TimestampTz, D::TimestampTz, R::None, None),
    (S::TimestampTz, D::Timestamp, R::Lossy, Some(T::DropTimezone)),
    (S::TimestampTz, D::Text, R::None, Some(T::ToText)),
    (S::Interval, D::Text, R::Lossy, Some(T::ToText)),
    // Special
    (S::Uuid, D::Uuid, R::None, None),
    (S::Uuid, D::Text, R::None, Some(T::ToText)),
    (S::Json, D::Json, R::None, None),
    (S::Json, D::Text, R::None, Some(T::ToText)),
    (S::Binary, D::Binary, R::None, None),
    (S::Binary, D::Text, R::Lossy, Some(T::ToText)),
    (S::Array, D::Json, R::None, Some(T::ToJson)),
    (S::Array, D::Text, R::Lossy, Some(T::ToText)),
];

fn to_coercion(&(_, destination, risk, transformation): &Entry) -> Coercion {
    Coercion {
        destination,
        allowed: true,
        risk,
        transformation,
    }
}

/// Look up a single `(source, destination)` pair.
pub fn lookup(source: &CanonicalType, destination: DestinationType) -> Coercion {
    let Some(key) = SourceKey::of(source) else {
        return Coercion::unsupported(destination);
    };
    COERCIONS
        .iter()
        .find(|(s, d, _, _)| *s == key && *d == destination)
        .map(to_coercion)
        .unwrap_or_else(|| Coercion::unsupported(destination))
}

/// Allowed destinations for a source type, in preference order.
pub fn candidates(source: &CanonicalType) -> Vec<Coercion> {
    match SourceKey::of(source) {
        Some(key) => COERCIONS
            .iter()
            .filter(|(s, _, _, _)| *s == key)
            .map(to_coercion)
            .collect(),
        None => Vec::new(),
    }
}

/// Pick the preferred destination: the first `Risk::None` candidate, else
/// the least risky one (earlier entries win ties). `None` when nothing is
/// allowed.
pub fn best(source: &CanonicalType) -> Option<Coercion> {
    // min_by_key keeps the first of equal elements, preserving table order.
    candidates(source).into_iter().min_by_key(|c| c.risk)
}
