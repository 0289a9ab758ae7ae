//! Destination identifier derivation and validation.
//!
//! Destination column names are derived from source names and must be safe
//! to splice into generated DDL unquoted: ASCII letters, digits and `_`,
//! not starting with a digit.

use crate::error::{MigrateError, Result};

/// Maximum identifier length (PostgreSQL's limit is the tightest we target).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Derive a destination field name from a source column name.
///
/// Lower-cases the name and collapses every run of characters that are not
/// ASCII alphanumeric into a single `_`.
///
/// ```
/// use schema_ferry::core::identifier::destination_name;
/// assert_eq!(destination_name("First Name"), "first_name");
/// assert_eq!(destination_name("a--b..c"), "a_b_c");
/// ```
pub fn destination_name(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut in_gap = false;
    for ch in source.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            in_gap = false;
        } else if !in_gap {
            out.push('_');
            in_gap = true;
        }
    }
    out
}

/// Force a derived name into identifier shape: a leading digit or an empty
/// name gets a `_` prefix, and the result is cut to
/// [`MAX_IDENTIFIER_LENGTH`]. Expects the output of [`destination_name`].
///
/// ```
/// use schema_ferry::core::identifier::safe_identifier;
/// assert_eq!(safe_identifier("2fa"), "_2fa");
/// assert_eq!(safe_identifier(""), "_");
/// ```
pub fn safe_identifier(name: &str) -> String {
    let mut out = match name.chars().next() {
        Some(c) if !c.is_ascii_digit() => name.to_string(),
        _ => format!("_{}", name),
    };
    // ASCII only, so byte truncation stays on a char boundary.
    out.truncate(MAX_IDENTIFIER_LENGTH);
    out
}

/// Check that a name is usable unquoted in generated DDL.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LENGTH && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a destination table name.
///
/// Table names are caller-supplied, so they are rejected rather than
/// rewritten when unsafe.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::validation("destination table name is empty"));
    }
    // Allow one schema qualifier: `analytics.people`.
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| is_valid_identifier(p)) {
        return Err(MigrateError::validation(format!(
            "invalid destination table name: {:?}",
            name
        )));
    }
    Ok(())
}
