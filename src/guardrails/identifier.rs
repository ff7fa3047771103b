//! Identifier sanitizing for names interpolated into generated SQL.
//!
//! View, table and column names cannot be bound as driver parameters, so this
//! check is the only thing standing between a caller-supplied name and the
//! composed statement text.

use crate::error::{GuardError, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Returns the identifier unchanged if it matches `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn sanitize_identifier<'a>(identifier: &'a str, field_name: &str) -> Result<&'a str> {
    if IDENTIFIER_RE.is_match(identifier) {
        Ok(identifier)
    } else {
        Err(GuardError::invalid_identifier(field_name, identifier))
    }
}

pub fn is_valid_identifier(identifier: &str) -> bool {
    IDENTIFIER_RE.is_match(identifier)
}
