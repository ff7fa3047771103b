//! Result Projector
//!
//! Shapes executor output into per-tool responses. Row values pass through
//! untouched and are never logged here.

use crate::execution::ExecutionResult;
use crate::guardrails::MetricType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DERIVED_VIEW_STATUS: &str = "created";
pub const DERIVED_VIEW_SCOPE: &str = "session";
const DERIVED_VIEW_NOTE: &str = "This temporary view is session-scoped and is dropped when the \
     warehouse session ends. Connections without session affinity, such as the SQL Statement \
     Execution API, may run later statements in another session where the view is not_found";

/// Plain and preview query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub request_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub truncated: bool,
    pub limit_applied: Option<usize>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResponse {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub metric_type: MetricType,
    pub metric_column: String,
    pub metric_value: Value,
    pub predicate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproxCountResponse {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub approx_count: Value,
    pub predicate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedViewResponse {
    pub name: String,
    pub row_count: Value,
    pub status: String,
    pub scope: String,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub table_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablesResponse {
    pub tables: Vec<TableInfo>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: Option<String>,
    pub data_type: Option<String>,
    /// `information_schema` text, `YES` or `NO`.
    pub nullable: Option<String>,
    pub comment: Option<String>,
    pub ordinal_position: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadataResponse {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub table_type: Option<String>,
    pub columns: Vec<ColumnMetadata>,
    pub primary_keys: Vec<String>,
    pub partition_columns: Vec<String>,
    pub row_count: Value,
    pub view_definition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStatistics {
    pub row_count: Value,
    pub size_in_bytes: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfoResponse {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub partition_columns: Vec<String>,
    pub statistics: PartitionStatistics,
}

/// Raw lookups gathered for one `table_metadata` call.
///
/// Views have a definition and no storage detail; tables the reverse.
#[derive(Debug, Clone)]
pub struct TableMetadataResults {
    pub table_type: ExecutionResult,
    pub view: Option<ExecutionResult>,
    pub columns: ExecutionResult,
    pub primary_keys: ExecutionResult,
    pub detail: Option<ExecutionResult>,
}

pub fn project_rows(request_id: &str, result: ExecutionResult) -> QueryResponse {
    let rows = result.records();
    QueryResponse {
        request_id: request_id.to_string(),
        row_count: rows.len(),
        rows,
        columns: result.columns,
        truncated: result.truncated,
        limit_applied: result.limit_applied,
        elapsed_ms: result.elapsed_ms,
    }
}

pub fn project_aggregate(
    catalog: &str,
    schema: &str,
    table: &str,
    metric_type: MetricType,
    metric_column: &str,
    predicate: Option<&str>,
    result: &ExecutionResult,
) -> AggregateResponse {
    AggregateResponse {
        catalog: catalog.to_string(),
        schema: schema.to_string(),
        table: table.to_string(),
        metric_type,
        metric_column: metric_column.to_string(),
        metric_value: result.scalar().cloned().unwrap_or(Value::Null),
        predicate: predicate.map(str::to_string),
    }
}

/// An empty result counts as zero.
pub fn project_count(
    catalog: &str,
    schema: &str,
    table: &str,
    predicate: Option<&str>,
    result: &ExecutionResult,
) -> ApproxCountResponse {
    ApproxCountResponse {
        catalog: catalog.to_string(),
        schema: schema.to_string(),
        table: table.to_string(),
        approx_count: result.scalar().cloned().unwrap_or_else(|| Value::from(0)),
        predicate: predicate.map(str::to_string),
    }
}

pub fn project_derived_view(name: &str, count: &ExecutionResult) -> DerivedViewResponse {
    DerivedViewResponse {
        name: name.to_string(),
        row_count: count.scalar().cloned().unwrap_or_else(|| Value::from(0)),
        status: DERIVED_VIEW_STATUS.to_string(),
        scope: DERIVED_VIEW_SCOPE.to_string(),
        note: DERIVED_VIEW_NOTE.to_string(),
    }
}

pub fn project_tables(result: &ExecutionResult) -> TablesResponse {
    let text = |record: &Map<String, Value>, key: &str| -> Option<String> {
        record.get(key).and_then(|v| v.as_str()).map(str::to_string)
    };
    let tables = result
        .records()
        .iter()
        .map(|record| TableInfo {
            catalog: text(record, "table_catalog"),
            schema: text(record, "table_schema"),
            name: text(record, "table_name"),
            table_type: text(record, "table_type"),
        })
        .collect();
    TablesResponse {
        tables,
        truncated: result.truncated,
    }
}

/// Text of `key` in the first row.
pub fn first_text(result: &ExecutionResult, key: &str) -> Option<String> {
    result
        .records()
        .first()
        .and_then(|record| record.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn first_value(result: Option<&ExecutionResult>, key: &str) -> Value {
    result
        .and_then(|r| r.records().into_iter().next())
        .and_then(|record| record.get(key).cloned())
        .unwrap_or(Value::Null)
}

/// `partitionColumns` arrives as a JSON array, or as its text under the
/// JSON_ARRAY result format.
fn partition_columns(detail: Option<&ExecutionResult>) -> Vec<String> {
    let names = |items: Vec<Value>| -> Vec<String> {
        items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    };
    match first_value(detail, "partitionColumns") {
        Value::Array(items) => names(items),
        Value::String(text) => serde_json::from_str::<Vec<Value>>(&text)
            .map(names)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

pub fn project_table_metadata(
    catalog: &str,
    schema: &str,
    table: &str,
    results: &TableMetadataResults,
) -> TableMetadataResponse {
    let text = |record: &Map<String, Value>, key: &str| -> Option<String> {
        record.get(key).and_then(Value::as_str).map(str::to_string)
    };
    let columns = results
        .columns
        .records()
        .iter()
        .map(|record| ColumnMetadata {
            name: text(record, "column_name"),
            data_type: text(record, "data_type"),
            nullable: text(record, "is_nullable"),
            comment: text(record, "comment"),
            ordinal_position: record.get("ordinal_position").cloned().unwrap_or(Value::Null),
        })
        .collect();
    let primary_keys = results
        .primary_keys
        .records()
        .iter()
        .filter_map(|record| text(record, "column_name"))
        .collect();

    TableMetadataResponse {
        catalog: catalog.to_string(),
        schema: schema.to_string(),
        table: table.to_string(),
        table_type: first_text(&results.table_type, "table_type"),
        columns,
        primary_keys,
        partition_columns: partition_columns(results.detail.as_ref()),
        row_count: first_value(results.detail.as_ref(), "numRows"),
        view_definition: results
            .view
            .as_ref()
            .and_then(|view| first_text(view, "view_definition")),
    }
}

pub fn project_partition_info(
    catalog: &str,
    schema: &str,
    table: &str,
    detail: &ExecutionResult,
) -> PartitionInfoResponse {
    PartitionInfoResponse {
        catalog: catalog.to_string(),
        schema: schema.to_string(),
        table: table.to_string(),
        partition_columns: partition_columns(Some(detail)),
        statistics: PartitionStatistics {
            row_count: first_value(Some(detail), "numRows"),
            size_in_bytes: first_value(Some(detail), "sizeInBytes"),
        },
    }
}
