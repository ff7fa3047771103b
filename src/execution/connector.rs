//! Warehouse Connector Trait
//!
//! Minimal contract between the executor and a remote warehouse. The executor
//! never sees driver text: every `DriverError` is reduced to a `ReasonCode`
//! before it leaves this layer.

use crate::error::ReasonCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Row = Vec<serde_json::Value>;

/// Raw result of a warehouse call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// First value of the first row, if any.
    pub fn scalar(&self) -> Option<&serde_json::Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// Per-call options passed to the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Correlation tag used to cancel the call later.
    pub tag: String,

    /// Native row limit pushed to the warehouse.
    pub row_limit: Option<usize>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Warehouse returned HTTP {status}: {message}")]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Statement failed ({code:?}): {message}")]
    Failed { code: Option<String>, message: String },

    #[error("Statement was cancelled")]
    Cancelled,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode warehouse response: {0}")]
    Decode(String),
}

impl DriverError {
    /// Stable reason code for the caller.
    pub fn reason(&self) -> ReasonCode {
        match self {
            DriverError::Auth(_) => ReasonCode::Auth,
            DriverError::Status { status, code, message } => match status {
                401 => ReasonCode::Auth,
                403 => ReasonCode::Permission,
                404 => ReasonCode::NotFound,
                429 | 500..=599 => ReasonCode::Unavailable,
                _ => classify(code.as_deref(), message),
            },
            DriverError::Failed { code, message } => classify(code.as_deref(), message),
            DriverError::Cancelled => ReasonCode::Cancelled,
            DriverError::Transport(_) => ReasonCode::Unavailable,
            DriverError::Decode(_) => ReasonCode::Internal,
        }
    }
}

/// Classify a warehouse error code and message into a reason code.
pub fn classify(code: Option<&str>, message: &str) -> ReasonCode {
    let text = format!("{} {}", code.unwrap_or_default(), message).to_lowercase();

    if text.contains("unauthenticated") || text.contains("invalid access token") || text.contains("credential") {
        return ReasonCode::Auth;
    }

    if text.contains("permission") || text.contains("insufficient_privileges") || text.contains("not authorized") {
        return ReasonCode::Permission;
    }

    if text.contains("not_found") || text.contains("not found") || text.contains("does not exist") {
        return ReasonCode::NotFound;
    }

    if text.contains("syntax") || text.contains("parse") || text.contains("unresolved_column") {
        return ReasonCode::Syntax;
    }

    if text.contains("unavailable") || text.contains("resource_exhausted") || text.contains("throttl") {
        return ReasonCode::Unavailable;
    }

    if text.contains("cancel") {
        return ReasonCode::Cancelled;
    }

    ReasonCode::Internal
}

/// Remote warehouse the executor talks to.
#[async_trait]
pub trait WarehouseConnector: Send + Sync {
    /// Connector name for logs (e.g., "databricks")
    fn name(&self) -> &'static str;

    /// Run one statement to completion.
    async fn run(&self, sql: &str, options: RunOptions) -> Result<RowSet, DriverError>;

    /// Best-effort cancel of the call started with `tag`.
    async fn cancel(&self, tag: &str) -> Result<(), DriverError>;
}
