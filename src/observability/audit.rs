//! Audit Log
//!
//! One structured event per governed request. Events carry names only: no row
//! contents, no statement text, no driver error text.

use crate::error::GuardError;
use crate::guardrails::{Reference, StatementKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Rejected by a guardrail before warehouse contact
    Denied,
    Executed,
    /// Reached the warehouse and failed or timed out
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Denied => "denied",
            Outcome::Executed => "executed",
            Outcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub tool: String,
    pub statement_kind: Option<String>,
    pub references: Vec<String>,
    pub outcome: Outcome,
    pub elapsed_ms: u64,
    pub truncated: bool,
    pub row_count: Option<usize>,
    pub error_code: Option<String>,
}

impl AuditEvent {
    pub fn new(request_id: &str, tool: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            tool: tool.to_string(),
            statement_kind: None,
            references: Vec::new(),
            outcome: Outcome::Executed,
            elapsed_ms: 0,
            truncated: false,
            row_count: None,
            error_code: None,
        }
    }

    /// Record what was validated; names only.
    pub fn set_statement(&mut self, kind: &StatementKind, references: &[Reference]) {
        self.statement_kind = Some(kind.to_string());
        self.references = references.iter().map(|r| r.to_string()).collect();
    }

    pub fn executed(mut self, elapsed_ms: u64, row_count: usize, truncated: bool) -> Self {
        self.outcome = Outcome::Executed;
        self.elapsed_ms = elapsed_ms;
        self.row_count = Some(row_count);
        self.truncated = truncated;
        self
    }

    /// Guardrail errors are denials; everything else is a failure.
    pub fn errored(mut self, error: &GuardError, elapsed_ms: u64) -> Self {
        self.outcome = if error.is_guardrail() {
            Outcome::Denied
        } else {
            Outcome::Failed
        };
        self.elapsed_ms = elapsed_ms;
        self.error_code = Some(error.code().to_string());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        let references = event.references.join(",");
        let kind = event.statement_kind.as_deref().unwrap_or("");
        let error_code = event.error_code.as_deref().unwrap_or("");
        match event.outcome {
            Outcome::Executed => info!(
                target: "audit",
                request_id = %event.request_id,
                tool = %event.tool,
                statement_kind = kind,
                references = %references,
                outcome = event.outcome.as_str(),
                elapsed_ms = event.elapsed_ms,
                truncated = event.truncated,
                row_count = event.row_count.unwrap_or(0),
                "Request executed"
            ),
            Outcome::Denied | Outcome::Failed => warn!(
                target: "audit",
                request_id = %event.request_id,
                tool = %event.tool,
                statement_kind = kind,
                references = %references,
                outcome = event.outcome.as_str(),
                elapsed_ms = event.elapsed_ms,
                error_code = error_code,
                "Request not executed"
            ),
        }
    }
}

/// Keeps the most recent events in memory.
#[derive(Debug)]
pub struct MemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<AuditEvent> {
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push_back(event.clone());
        while events.len() > self.capacity {
            events.pop_front();
        }
    }
}

/// Appends events as JSON lines to a file.
#[derive(Debug)]
pub struct JsonLinesAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonLinesAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, event: &AuditEvent) -> std::io::Result<()> {
        let line = serde_json::to_string(event)?;
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.append(event) {
            warn!(path = %self.path.display(), error = %e, "Failed to write audit event");
        }
    }
}

/// Fans one event out to several sinks.
pub struct AuditSinks(pub Vec<Box<dyn AuditSink>>);

impl AuditSink for AuditSinks {
    fn record(&self, event: &AuditEvent) {
        for sink in &self.0 {
            sink.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReasonCode;

    #[test]
    fn test_memory_sink_is_bounded() {
        let sink = MemoryAuditSink::new(2);
        for id in ["a", "b", "c"] {
            sink.record(&AuditEvent::new(id, "run_query"));
        }
        let ids: Vec<String> = sink.events().into_iter().map(|e| e.request_id).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_outcome_from_error_kind() {
        let denied = AuditEvent::new("r", "run_query").errored(&GuardError::CatalogNotAllowed("x".into()), 0);
        assert_eq!(denied.outcome, Outcome::Denied);
        assert_eq!(denied.error_code.as_deref(), Some("catalog_not_allowed"));

        let failed = AuditEvent::new("r", "run_query")
            .errored(&GuardError::ExecutionFailed { reason: ReasonCode::Syntax }, 12);
        assert_eq!(failed.outcome, Outcome::Failed);
        assert_eq!(failed.elapsed_ms, 12);
    }

    #[test]
    fn test_references_recorded_as_names() {
        let mut event = AuditEvent::new("r", "run_query");
        event.set_statement(&StatementKind::Select, &[Reference::new("main", "sales", "orders")]);
        assert_eq!(event.statement_kind.as_deref(), Some("SELECT"));
        assert_eq!(event.references, vec!["main.sales.orders".to_string()]);
    }

    #[test]
    fn test_json_lines_sink_appends() {
        let path = std::env::temp_dir().join(format!("audit-{}.jsonl", uuid::Uuid::new_v4()));
        let sink = JsonLinesAuditSink::new(&path);
        sink.record(&AuditEvent::new("one", "run_query"));
        sink.record(&AuditEvent::new("two", "preview_query"));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let first: AuditEvent = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first.request_id, "one");
        let _ = std::fs::remove_file(&path);
    }
}
