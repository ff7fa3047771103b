#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warehouse_guard::execution::{
    ConcurrencyLimiter, DriverError, QueryExecutor, RowSet, RunOptions, WarehouseConnector,
};
use warehouse_guard::guardrails::{ScopeRegistry, StatementKind, StatementValidator};
use warehouse_guard::observability::MemoryAuditSink;
use warehouse_guard::{EngineLimits, GovernedEngine};

/// Call-counting warehouse stand-in.
#[derive(Default)]
pub struct StubConnector {
    rows: usize,
    delay: Duration,
    failure: Option<DriverError>,
    scalar: Option<Value>,
    responses: Vec<(String, RowSet)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    statements: Mutex<Vec<String>>,
    row_limits: Mutex<Vec<Option<usize>>>,
    cancels: Mutex<Vec<String>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_failure(mut self, failure: DriverError) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Every non-CREATE statement returns this single value.
    pub fn with_scalar(mut self, value: Value) -> Self {
        self.scalar = Some(value);
        self
    }

    /// Statements containing `needle` return this result; first match wins.
    pub fn with_response(mut self, needle: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        self.responses.push((needle.to_string(), RowSet::new(columns, rows)));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn row_limits(&self) -> Vec<Option<usize>> {
        self.row_limits.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl WarehouseConnector for StubConnector {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn run(&self, sql: &str, options: RunOptions) -> Result<RowSet, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.statements.lock().unwrap().push(sql.to_string());
        self.row_limits.lock().unwrap().push(options.row_limit);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if let Some((_, rows)) = self.responses.iter().find(|(needle, _)| sql.contains(needle.as_str())) {
            return Ok(rows.clone());
        }
        if sql.starts_with("CREATE") {
            return Ok(RowSet::default());
        }
        if let Some(value) = &self.scalar {
            return Ok(RowSet::new(vec!["value".to_string()], vec![vec![value.clone()]]));
        }

        let count = options.row_limit.map_or(self.rows, |limit| limit.min(self.rows));
        let rows = (0..count)
            .map(|i| vec![json!(i), json!(format!("row-{}", i))])
            .collect();
        Ok(RowSet::new(vec!["id".to_string(), "name".to_string()], rows))
    }

    async fn cancel(&self, tag: &str) -> Result<(), DriverError> {
        self.cancels.lock().unwrap().push(tag.to_string());
        Ok(())
    }
}

pub fn registry() -> Arc<ScopeRegistry> {
    Arc::new(
        ScopeRegistry::new(vec![
            ("main", vec!["default", "sales"]),
            ("analytics", vec!["reporting"]),
        ])
        .unwrap(),
    )
}

pub struct Harness {
    pub engine: Arc<GovernedEngine>,
    pub connector: Arc<StubConnector>,
    pub audit: Arc<MemoryAuditSink>,
}

pub struct HarnessOptions {
    pub slots: usize,
    pub admission_timeout: Option<Duration>,
    pub limits: EngineLimits,
    pub allowed: Vec<StatementKind>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            slots: 5,
            admission_timeout: Some(Duration::from_secs(5)),
            limits: EngineLimits {
                max_rows: 100,
                sample_max_rows: 10,
                query_timeout_seconds: 60,
            },
            allowed: vec![StatementKind::Select],
        }
    }
}

pub fn harness_with(connector: StubConnector, options: HarnessOptions) -> Harness {
    let connector = Arc::new(connector);
    let audit = Arc::new(MemoryAuditSink::default());
    let engine = GovernedEngine::new(
        StatementValidator::new(registry(), options.allowed),
        ConcurrencyLimiter::new(options.slots, options.admission_timeout).unwrap(),
        QueryExecutor::new(connector.clone()),
        options.limits,
        audit.clone(),
    );
    Harness {
        engine: Arc::new(engine),
        connector,
        audit,
    }
}

pub fn harness(connector: StubConnector) -> Harness {
    harness_with(connector, HarnessOptions::default())
}
