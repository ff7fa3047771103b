//! Execution Budget
//!
//! Effective row and time limits for a single statement. Server ceilings use
//! `-1` for "no ceiling", in which case the caller's value (if any) applies.

use std::time::Duration;

/// Server-side value meaning "no ceiling".
pub const UNLIMITED: i64 = -1;

/// Resolve the row cap for a request against the server ceiling.
pub fn clamp_limit(requested: Option<usize>, ceiling: i64) -> Option<usize> {
    let ceiling = match usize::try_from(ceiling) {
        Ok(ceiling) => ceiling,
        Err(_) => return requested,
    };
    Some(match requested {
        Some(requested) => requested.min(ceiling),
        None => ceiling,
    })
}

/// Resolve the timeout for a request against the server ceiling, in seconds.
pub fn effective_timeout(requested: Option<u64>, ceiling: i64) -> Option<u64> {
    let ceiling = match u64::try_from(ceiling) {
        Ok(ceiling) => ceiling,
        Err(_) => return requested,
    };
    Some(match requested {
        Some(requested) => requested.min(ceiling),
        None => ceiling,
    })
}

/// Limits applied by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionBudget {
    /// Maximum rows returned; `None` returns everything.
    pub row_cap: Option<usize>,

    /// Wall-clock limit for the warehouse call; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl ExecutionBudget {
    pub fn new(row_cap: Option<usize>, timeout: Option<Duration>) -> Self {
        Self { row_cap, timeout }
    }

    /// Budget for a caller request against server ceilings.
    pub fn resolve(
        requested_rows: Option<usize>,
        max_rows: i64,
        requested_timeout_seconds: Option<u64>,
        max_timeout_seconds: i64,
    ) -> Self {
        Self {
            row_cap: clamp_limit(requested_rows, max_rows),
            timeout: effective_timeout(requested_timeout_seconds, max_timeout_seconds)
                .map(Duration::from_secs),
        }
    }

    /// Single-row statements (aggregates, counts) keep the timeout only.
    pub fn scalar(timeout: Option<Duration>) -> Self {
        Self {
            row_cap: Some(1),
            timeout,
        }
    }

    /// Statements with no result set, such as `CREATE TEMPORARY VIEW`.
    pub fn statement(timeout: Option<Duration>) -> Self {
        Self {
            row_cap: None,
            timeout,
        }
    }

    pub fn timeout_millis(&self) -> Option<u64> {
        self.timeout.map(|t| t.as_millis() as u64)
    }
}
