//! Tool dispatch and request-id propagation.

mod common;

use common::{harness, StubConnector};
use serde_json::json;
use uuid::Uuid;
use warehouse_guard::{ToolCall, ToolDispatcher};

fn run_query(sql: &str, request_id: Option<&str>) -> ToolCall {
    ToolCall::RunQuery {
        sql: sql.to_string(),
        limit: None,
        timeout_seconds: None,
        request_id: request_id.map(str::to_string),
    }
}

#[tokio::test]
async fn test_caller_request_id_is_echoed() {
    let h = harness(StubConnector::new().with_rows(1));
    let dispatcher = ToolDispatcher::new(h.engine.clone(), true);

    let value = dispatcher
        .dispatch(run_query("SELECT * FROM main.sales.orders", Some("trace-123")))
        .await
        .unwrap();
    assert_eq!(value["request_id"], json!("trace-123"));
    assert_eq!(value["row_count"], json!(1));
    assert_eq!(h.audit.last().unwrap().request_id, "trace-123");
}

#[tokio::test]
async fn test_error_payload_carries_request_id() {
    let h = harness(StubConnector::new());
    let dispatcher = ToolDispatcher::new(h.engine.clone(), true);

    let response = dispatcher
        .dispatch(run_query("SELECT * FROM forbidden.x.y", Some("trace-9")))
        .await
        .unwrap_err();
    assert_eq!(response.request_id, "trace-9");
    assert_eq!(response.code, "catalog_not_allowed");
    assert!(!response.retryable);
    assert_eq!(response.reason, None);
}

#[tokio::test]
async fn test_request_id_replaced_when_propagation_disabled() {
    let h = harness(StubConnector::new().with_rows(1));
    let dispatcher = ToolDispatcher::new(h.engine.clone(), false);

    let value = dispatcher
        .dispatch(run_query("SELECT * FROM main.sales.orders", Some("trace-123")))
        .await
        .unwrap();
    let issued = value["request_id"].as_str().unwrap();
    assert_ne!(issued, "trace-123");
    assert!(Uuid::parse_str(issued).is_ok());
}

#[test]
fn test_malformed_request_ids_not_propagated() {
    let h = harness(StubConnector::new());
    let dispatcher = ToolDispatcher::new(h.engine.clone(), true);

    assert_eq!(dispatcher.resolve_request_id(Some("abc-1")), "abc-1");
    let long = "x".repeat(129);
    for bad in ["", "has space", "line\nbreak", long.as_str()] {
        let issued = dispatcher.resolve_request_id(Some(bad));
        assert!(Uuid::parse_str(&issued).is_ok(), "{:?} should be replaced", bad);
    }
    assert!(Uuid::parse_str(&dispatcher.resolve_request_id(None)).is_ok());
}

#[tokio::test]
async fn test_wire_call_dispatches_aggregate() {
    let h = harness(StubConnector::new().with_scalar(json!(42)));
    let dispatcher = ToolDispatcher::new(h.engine.clone(), true);

    let call: ToolCall = serde_json::from_value(json!({
        "tool": "aggregate_metric",
        "arguments": {
            "catalog": "main",
            "schema": "sales",
            "table": "orders",
            "metric_type": "avg",
            "metric_column": "amount",
            "request_id": "agg-1"
        }
    }))
    .unwrap();

    let value = dispatcher.dispatch(call).await.unwrap();
    assert_eq!(value["metric_type"], json!("AVG"));
    assert_eq!(value["metric_value"], json!(42));
    assert_eq!(value["metric_column"], json!("amount"));
}

#[tokio::test]
async fn test_catalog_tools_answer_locally() {
    let h = harness(StubConnector::new());
    let dispatcher = ToolDispatcher::new(h.engine.clone(), true);

    let catalogs = dispatcher
        .dispatch(ToolCall::ListCatalogs { request_id: None })
        .await
        .unwrap();
    assert_eq!(catalogs, json!(["analytics", "main"]));

    let response = dispatcher
        .dispatch(ToolCall::ListSchemas {
            catalog: "secret".to_string(),
            request_id: Some("s-1".to_string()),
        })
        .await
        .unwrap_err();
    assert_eq!(response.code, "catalog_not_allowed");
    assert_eq!(response.request_id, "s-1");
    assert_eq!(h.connector.calls(), 0);
}

#[tokio::test]
async fn test_wire_call_dispatches_partition_info() {
    let h = harness(StubConnector::new().with_response(
        "DESCRIBE DETAIL",
        &["partitionColumns", "numRows", "sizeInBytes"],
        vec![vec![json!(["day"]), json!(10), json!(2048)]],
    ));
    let dispatcher = ToolDispatcher::new(h.engine.clone(), true);

    let call: ToolCall = serde_json::from_value(json!({
        "tool": "partition_info",
        "arguments": {"catalog": "main", "schema": "sales", "table": "orders"}
    }))
    .unwrap();
    assert_eq!(call.name(), "partition_info");

    let value = dispatcher.dispatch(call).await.unwrap();
    assert_eq!(value["partition_columns"], json!(["day"]));
    assert_eq!(value["statistics"]["size_in_bytes"], json!(2048));

    let response = dispatcher
        .dispatch(ToolCall::TableMetadata {
            catalog: "secret".to_string(),
            schema: "hr".to_string(),
            table: "salaries".to_string(),
            request_id: Some("m-1".to_string()),
        })
        .await
        .unwrap_err();
    assert_eq!(response.code, "catalog_not_allowed");
    assert_eq!(response.request_id, "m-1");
    assert_eq!(h.connector.calls(), 1);
}
