//! Execution Result - rows returned by the executor after truncation

use crate::execution::connector::Row;
use serde::Serialize;

/// Never cached and never logged in full.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    /// Column names in result order
    pub columns: Vec<String>,

    /// Rows, at most `limit_applied` of them
    pub rows: Vec<Row>,

    /// More rows were available than the cap allowed
    pub truncated: bool,

    /// Effective row cap, if any
    pub limit_applied: Option<usize>,

    /// Wall-clock time of the warehouse call in milliseconds
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First value of the first row, if any.
    pub fn scalar(&self) -> Option<&serde_json::Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Rows as objects keyed by column name.
    pub fn records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_keep_column_order() {
        let result = ExecutionResult {
            columns: vec!["b".to_string(), "a".to_string()],
            rows: vec![vec![json!(1), json!("x")]],
            truncated: false,
            limit_applied: Some(10),
            elapsed_ms: 3,
        };
        let records = result.records();
        assert_eq!(records.len(), 1);
        let keys: Vec<&String> = records[0].keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(result.scalar(), Some(&json!(1)));
    }
}
