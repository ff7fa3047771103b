use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest slice of caller input echoed back inside an error message.
const MAX_ECHO_CHARS: usize = 64;

/// Stable reason attached to execution failures.
///
/// Raw driver text never leaves the connector; callers only ever see one of
/// these codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Auth,
    Permission,
    Syntax,
    NotFound,
    Unavailable,
    Cancelled,
    Internal,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Auth => "auth",
            ReasonCode::Permission => "permission",
            ReasonCode::Syntax => "syntax",
            ReasonCode::NotFound => "not_found",
            ReasonCode::Unavailable => "unavailable",
            ReasonCode::Cancelled => "cancelled",
            ReasonCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Invalid identifier for {field}: '{value}'")]
    InvalidIdentifier { field: String, value: String },

    #[error("Statement type {actual} is not allowed (required: {required})")]
    DisallowedStatementType { required: String, actual: String },

    #[error("Statement contains forbidden pattern: {pattern}")]
    ForbiddenPattern { pattern: &'static str },

    #[error("Catalog {0} is not in allowlist")]
    CatalogNotAllowed(String),

    #[error("Schema {schema} is not in allowlist for catalog {catalog}")]
    SchemaNotAllowed { catalog: String, schema: String },

    #[error("Table reference '{0}' must be fully qualified as catalog.schema.table")]
    UnqualifiedReference(String),

    #[error("Invalid metric_type '{metric}'. Must be one of: {allowed}")]
    UnsupportedMetric { metric: String, allowed: String },

    #[error("Too many concurrent queries (limit {limit}); retry later")]
    TooManyConcurrentQueries { limit: usize },

    #[error("Query timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Query execution failed ({reason})")]
    ExecutionFailed { reason: ReasonCode },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GuardError {
    pub fn invalid_identifier(field: &str, value: &str) -> Self {
        GuardError::InvalidIdentifier {
            field: field.to_string(),
            value: truncate_echo(value),
        }
    }

    pub fn disallowed(required: impl Into<String>, actual: &str) -> Self {
        GuardError::DisallowedStatementType {
            required: required.into(),
            actual: truncate_echo(actual),
        }
    }

    pub fn unqualified(name: &str) -> Self {
        GuardError::UnqualifiedReference(truncate_echo(name))
    }

    pub fn catalog_not_allowed(catalog: &str) -> Self {
        GuardError::CatalogNotAllowed(truncate_echo(catalog))
    }

    pub fn schema_not_allowed(catalog: &str, schema: &str) -> Self {
        GuardError::SchemaNotAllowed {
            catalog: truncate_echo(catalog),
            schema: truncate_echo(schema),
        }
    }

    /// Stable snake_case code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::InvalidIdentifier { .. } => "invalid_identifier",
            GuardError::DisallowedStatementType { .. } => "disallowed_statement_type",
            GuardError::ForbiddenPattern { .. } => "forbidden_pattern",
            GuardError::CatalogNotAllowed(_) => "catalog_not_allowed",
            GuardError::SchemaNotAllowed { .. } => "schema_not_allowed",
            GuardError::UnqualifiedReference(_) => "unqualified_reference",
            GuardError::UnsupportedMetric { .. } => "unsupported_metric",
            GuardError::TooManyConcurrentQueries { .. } => "too_many_concurrent_queries",
            GuardError::Timeout { .. } => "timeout",
            GuardError::ExecutionFailed { .. } => "execution_failed",
            GuardError::Config(_) => "config",
        }
    }

    /// Guardrail failures are raised before any warehouse contact.
    pub fn is_guardrail(&self) -> bool {
        !matches!(
            self,
            GuardError::Timeout { .. } | GuardError::ExecutionFailed { .. } | GuardError::Config(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GuardError::TooManyConcurrentQueries { .. } | GuardError::Timeout { .. }
        )
    }

    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            GuardError::ExecutionFailed { reason } => Some(*reason),
            _ => None,
        }
    }
}

/// Error payload returned to tool callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    pub request_id: String,
}

impl ErrorResponse {
    pub fn from_error(error: &GuardError, request_id: &str) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
            reason: error.reason(),
            request_id: request_id.to_string(),
        }
    }
}

fn truncate_echo(value: &str) -> String {
    let mut out: String = value.chars().take(MAX_ECHO_CHARS).collect();
    if value.chars().count() > MAX_ECHO_CHARS {
        out.push_str("...");
    }
    out.escape_debug().to_string()
}

pub type Result<T> = std::result::Result<T, GuardError>;
