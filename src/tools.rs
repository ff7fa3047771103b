//! Tool Surface
//!
//! Typed tool calls and their dispatch onto the engine. Each call resolves one
//! request id up front; it is echoed in successful row responses and in every
//! error payload.

use crate::engine::{new_request_id, GovernedEngine};
use crate::error::{ErrorResponse, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Longest caller-supplied request id that is propagated as-is.
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    ListCatalogs {
        request_id: Option<String>,
    },
    ListSchemas {
        catalog: String,
        request_id: Option<String>,
    },
    ListTables {
        catalog: String,
        schema: String,
        request_id: Option<String>,
    },
    TableMetadata {
        catalog: String,
        schema: String,
        table: String,
        request_id: Option<String>,
    },
    PartitionInfo {
        catalog: String,
        schema: String,
        table: String,
        request_id: Option<String>,
    },
    PreviewQuery {
        sql: String,
        limit: Option<usize>,
        timeout_seconds: Option<u64>,
        request_id: Option<String>,
    },
    RunQuery {
        sql: String,
        limit: Option<usize>,
        timeout_seconds: Option<u64>,
        request_id: Option<String>,
    },
    ApproxCount {
        catalog: String,
        schema: String,
        table: String,
        predicate: Option<String>,
        request_id: Option<String>,
    },
    AggregateMetric {
        catalog: String,
        schema: String,
        table: String,
        metric_type: String,
        metric_column: String,
        predicate: Option<String>,
        request_id: Option<String>,
    },
    /// Creates a session-scoped temporary view. Over a connector without
    /// session affinity (the Databricks Statement Execution API) each
    /// statement may land in a different session, so the follow-up row count
    /// and later queries can fail with `not_found`.
    CreateTempTable {
        temp_table_name: String,
        sql_query: String,
        request_id: Option<String>,
    },
}

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ListCatalogs { .. } => "list_catalogs",
            ToolCall::ListSchemas { .. } => "list_schemas",
            ToolCall::ListTables { .. } => "list_tables",
            ToolCall::TableMetadata { .. } => "table_metadata",
            ToolCall::PartitionInfo { .. } => "partition_info",
            ToolCall::PreviewQuery { .. } => "preview_query",
            ToolCall::RunQuery { .. } => "run_query",
            ToolCall::ApproxCount { .. } => "approx_count",
            ToolCall::AggregateMetric { .. } => "aggregate_metric",
            ToolCall::CreateTempTable { .. } => "create_temp_table",
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ToolCall::ListCatalogs { request_id }
            | ToolCall::ListSchemas { request_id, .. }
            | ToolCall::ListTables { request_id, .. }
            | ToolCall::TableMetadata { request_id, .. }
            | ToolCall::PartitionInfo { request_id, .. }
            | ToolCall::PreviewQuery { request_id, .. }
            | ToolCall::RunQuery { request_id, .. }
            | ToolCall::ApproxCount { request_id, .. }
            | ToolCall::AggregateMetric { request_id, .. }
            | ToolCall::CreateTempTable { request_id, .. } => request_id.as_deref(),
        }
    }
}

pub struct ToolDispatcher {
    engine: Arc<GovernedEngine>,
    propagate_request_ids: bool,
}

impl ToolDispatcher {
    pub fn new(engine: Arc<GovernedEngine>, propagate_request_ids: bool) -> Self {
        Self {
            engine,
            propagate_request_ids,
        }
    }

    pub fn engine(&self) -> &Arc<GovernedEngine> {
        &self.engine
    }

    /// Caller ids are kept when propagation is on and the id is short,
    /// printable ASCII; otherwise a fresh UUID is issued.
    pub fn resolve_request_id(&self, supplied: Option<&str>) -> String {
        match supplied {
            Some(id)
                if self.propagate_request_ids
                    && !id.is_empty()
                    && id.len() <= MAX_REQUEST_ID_LEN
                    && id.chars().all(|c| c.is_ascii_graphic()) =>
            {
                id.to_string()
            }
            _ => new_request_id(),
        }
    }

    pub async fn dispatch(&self, call: ToolCall) -> std::result::Result<Value, ErrorResponse> {
        let request_id = self.resolve_request_id(call.request_id());
        debug!(tool = call.name(), request_id = %request_id, "Dispatching tool call");
        self.execute(call, &request_id)
            .await
            .map_err(|e| ErrorResponse::from_error(&e, &request_id))
    }

    async fn execute(&self, call: ToolCall, request_id: &str) -> Result<Value> {
        let engine = &self.engine;
        let value = match call {
            ToolCall::ListCatalogs { .. } => to_value(engine.list_catalogs()),
            ToolCall::ListSchemas { catalog, .. } => to_value(engine.list_schemas(&catalog)?),
            ToolCall::ListTables { catalog, schema, .. } => {
                to_value(engine.list_tables(&catalog, &schema, request_id).await?)
            }
            ToolCall::TableMetadata {
                catalog,
                schema,
                table,
                ..
            } => to_value(
                engine
                    .table_metadata(&catalog, &schema, &table, request_id)
                    .await?,
            ),
            ToolCall::PartitionInfo {
                catalog,
                schema,
                table,
                ..
            } => to_value(
                engine
                    .partition_info(&catalog, &schema, &table, request_id)
                    .await?,
            ),
            ToolCall::PreviewQuery {
                sql,
                limit,
                timeout_seconds,
                ..
            } => to_value(
                engine
                    .preview_query(&sql, limit, timeout_seconds, request_id)
                    .await?,
            ),
            ToolCall::RunQuery {
                sql,
                limit,
                timeout_seconds,
                ..
            } => to_value(engine.run_query(&sql, limit, timeout_seconds, request_id).await?),
            ToolCall::ApproxCount {
                catalog,
                schema,
                table,
                predicate,
                ..
            } => to_value(
                engine
                    .approx_count(&catalog, &schema, &table, predicate.as_deref(), request_id)
                    .await?,
            ),
            ToolCall::AggregateMetric {
                catalog,
                schema,
                table,
                metric_type,
                metric_column,
                predicate,
                ..
            } => to_value(
                engine
                    .run_aggregate(
                        &catalog,
                        &schema,
                        &table,
                        &metric_type,
                        &metric_column,
                        predicate.as_deref(),
                        request_id,
                    )
                    .await?,
            ),
            ToolCall::CreateTempTable {
                temp_table_name,
                sql_query,
                ..
            } => to_value(
                engine
                    .create_derived_view(&temp_table_name, &sql_query, request_id)
                    .await?,
            ),
        };
        Ok(value)
    }
}

/// Responses are plain data structs; serialization cannot fail.
fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_wire_shape() {
        let call: ToolCall = serde_json::from_value(json!({
            "tool": "aggregate_metric",
            "arguments": {
                "catalog": "main",
                "schema": "sales",
                "table": "orders",
                "metric_type": "sum",
                "metric_column": "amount"
            }
        }))
        .unwrap();
        assert_eq!(call.name(), "aggregate_metric");
        assert_eq!(call.request_id(), None);
        match call {
            ToolCall::AggregateMetric { predicate, .. } => assert_eq!(predicate, None),
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let parsed = serde_json::from_value::<ToolCall>(json!({"tool": "drop_everything", "arguments": {}}));
        assert!(parsed.is_err());
    }
}
