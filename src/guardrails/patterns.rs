//! Deny-list of exfiltration and side-effecting sub-patterns.

use crate::error::{GuardError, Result};
use crate::guardrails::lexer::{has_stacked_statements, Token};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FORBIDDEN_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("INTO OUTFILE", Regex::new(r"(?i)INTO\s+OUTFILE").unwrap()),
        ("INTO DUMPFILE", Regex::new(r"(?i)INTO\s+DUMPFILE").unwrap()),
        ("EXEC", Regex::new(r"(?i)\bEXEC(UTE)?\b").unwrap()),
        ("CALL", Regex::new(r"(?i)\bCALL\b").unwrap()),
        ("LOAD_FILE", Regex::new(r"(?i)LOAD_FILE").unwrap()),
    ];
}

pub const MULTIPLE_STATEMENTS: &str = "multiple statements";

/// Scan the raw statement text, comments and literals included.
pub fn scan_forbidden_patterns(sql: &str) -> Result<()> {
    for (name, pattern) in FORBIDDEN_PATTERNS.iter() {
        if pattern.is_match(sql) {
            return Err(GuardError::ForbiddenPattern { pattern: name });
        }
    }
    Ok(())
}

pub fn scan_stacked_statements(tokens: &[Token<'_>]) -> Result<()> {
    if has_stacked_statements(tokens) {
        return Err(GuardError::ForbiddenPattern {
            pattern: MULTIPLE_STATEMENTS,
        });
    }
    Ok(())
}
