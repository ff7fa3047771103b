//! Query Executor
//!
//! Issues a validated statement to the connector under a wall-clock deadline
//! and a row cap. The connector is asked for `cap + 1` rows so the executor can
//! tell "exactly cap" apart from "more than cap" without a second round trip.

use crate::error::{GuardError, Result};
use crate::execution::budget::ExecutionBudget;
use crate::execution::connector::{RunOptions, WarehouseConnector};
use crate::execution::result::ExecutionResult;
use crate::guardrails::ValidatedStatement;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct QueryExecutor {
    connector: Arc<dyn WarehouseConnector>,
}

/// Spawns a warehouse cancel for `tag` unless disarmed first.
///
/// Covers both the deadline path and a caller dropping the future mid-call.
struct CancelOnDrop {
    connector: Arc<dyn WarehouseConnector>,
    tag: String,
    armed: bool,
}

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(tag = %self.tag, "No runtime available to cancel in-flight statement");
                return;
            }
        };
        let connector = self.connector.clone();
        let tag = std::mem::take(&mut self.tag);
        handle.spawn(async move {
            match connector.cancel(&tag).await {
                Ok(()) => debug!(tag = %tag, "Cancelled in-flight statement"),
                Err(e) => warn!(tag = %tag, reason = %e.reason(), "Failed to cancel in-flight statement"),
            }
        });
    }
}

impl QueryExecutor {
    pub fn new(connector: Arc<dyn WarehouseConnector>) -> Self {
        Self { connector }
    }

    pub fn connector_name(&self) -> &'static str {
        self.connector.name()
    }

    /// Run the statement within `budget`, tagging the warehouse call with `tag`.
    pub async fn execute(
        &self,
        statement: &ValidatedStatement,
        budget: &ExecutionBudget,
        tag: &str,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let options = RunOptions {
            tag: tag.to_string(),
            row_limit: budget.row_cap.map(|cap| cap.saturating_add(1)),
        };

        let mut guard = CancelOnDrop {
            connector: self.connector.clone(),
            tag: tag.to_string(),
            armed: true,
        };

        let call = self.connector.run(statement.sql(), options);
        let outcome = match budget.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let millis = limit.as_millis() as u64;
                    warn!(tag = %tag, timeout_ms = millis, "Statement exceeded its deadline");
                    // Dropping the armed guard spawns the warehouse cancel.
                    drop(guard);
                    return Err(GuardError::Timeout { millis });
                }
            },
            None => call.await,
        };
        guard.disarm();

        let mut rowset = outcome.map_err(|e| {
            let reason = e.reason();
            warn!(tag = %tag, connector = self.connector.name(), reason = %reason, "Warehouse call failed");
            GuardError::ExecutionFailed { reason }
        })?;

        let truncated = match budget.row_cap {
            Some(cap) if rowset.rows.len() > cap => {
                rowset.rows.truncate(cap);
                true
            }
            _ => false,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(
            tag = %tag,
            rows = rowset.rows.len(),
            truncated,
            elapsed_ms,
            "Statement completed"
        );

        Ok(ExecutionResult {
            columns: rowset.columns,
            rows: rowset.rows,
            truncated,
            limit_applied: budget.row_cap,
            elapsed_ms,
        })
    }
}
