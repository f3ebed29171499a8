//! Field validation shared by the catalog and tenant stores.
//!
//! Every check returns the cleaned value so callers store exactly what was
//! validated.

use thiserror::Error;

/// Longest accepted database name, page title, or workspace name.
pub const MAX_NAME_LEN: usize = 255;

/// Longest accepted block type tag.
pub const MAX_BLOCK_TYPE_LEN: usize = 32;

/// A malformed or missing field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {field}: {reason}")]
pub struct InvalidField {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidField {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Validate a human-facing name (database name, page title, workspace name).
///
/// Leading and trailing whitespace is trimmed; the result must be non-empty,
/// at most [`MAX_NAME_LEN`] characters, and free of control characters.
pub fn name(field: &'static str, raw: &str) -> Result<String, InvalidField> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InvalidField::new(field, "must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(InvalidField::new(
            field,
            format!("longer than {MAX_NAME_LEN} characters"),
        ));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(InvalidField::new(field, "contains control characters"));
    }
    Ok(trimmed.to_string())
}

/// Validate a block type tag: `[a-z0-9_-]{1,32}`.
pub fn block_type(raw: &str) -> Result<String, InvalidField> {
    if raw.is_empty() {
        return Err(InvalidField::new("block_type", "must not be empty"));
    }
    if raw.len() > MAX_BLOCK_TYPE_LEN {
        return Err(InvalidField::new(
            "block_type",
            format!("longer than {MAX_BLOCK_TYPE_LEN} characters"),
        ));
    }
    let ok = raw
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if !ok {
        return Err(InvalidField::new(
            "block_type",
            format!("'{raw}' may only use a-z, 0-9, '_' and '-'"),
        ));
    }
    Ok(raw.to_string())
}
