//! Databricks SQL Connector
//!
//! Runs statements through the SQL Statement Execution REST API:
//! submit with `POST /api/2.0/sql/statements`, poll
//! `GET /api/2.0/sql/statements/{id}`, follow result chunks, and cancel with
//! `POST /api/2.0/sql/statements/{id}/cancel`.
//!
//! The API has no session affinity, so a temporary view is only visible to
//! statements that land in the warehouse session that created it.

use crate::auth::TokenProvider;
use crate::error::{GuardError, Result};
use crate::execution::connector::{DriverError, Row, RowSet, RunOptions, WarehouseConnector};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SERVER_ERROR_RETRIES: u32 = 3;

pub struct DatabricksConnector {
    api: StatementApi,
    warehouse_id: String,
    /// Submission state per executor tag, for cancellation.
    in_flight: Arc<DashMap<String, Tracked>>,
    poll_interval: Duration,
}

/// Where a tagged statement is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Tracked {
    /// Submit POST sent, statement id not yet known.
    Submitting,
    /// Cancel arrived before the statement id; the submit task cancels on arrival.
    CancelRequested,
    Running(String),
}

/// HTTP half of the connector, cloneable into detached submit tasks.
#[derive(Clone)]
struct StatementApi {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

#[derive(Debug, Serialize)]
struct SubmitRequest {
    statement: String,
    warehouse_id: String,
    wait_timeout: &'static str,
    on_wait_timeout: &'static str,
    disposition: &'static str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: String,
    status: StatementStatus,
    manifest: Option<Manifest>,
    result: Option<ResultChunk>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    error: Option<ServiceError>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceError {
    error_code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    schema: Option<ManifestSchema>,
}

#[derive(Debug, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ColumnInfo>,
}

#[derive(Debug, Deserialize)]
struct ColumnInfo {
    name: String,
    type_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultChunk {
    data_array: Option<Vec<Vec<Option<String>>>>,
    next_chunk_internal_link: Option<String>,
}

impl DatabricksConnector {
    /// `host` may be given with or without a scheme; `https` is assumed.
    pub fn new(host: &str, warehouse_id: &str, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| GuardError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(client, host, warehouse_id, tokens))
    }

    pub fn with_client(client: Client, host: &str, warehouse_id: &str, tokens: Arc<dyn TokenProvider>) -> Self {
        let host = host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        Self {
            api: StatementApi {
                client,
                base_url,
                tokens,
            },
            warehouse_id: warehouse_id.to_string(),
            in_flight: Arc::new(DashMap::new()),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Submit on a detached task.
    ///
    /// Dropping the caller does not abort the POST, so a statement the
    /// warehouse accepted always reaches [`claim`] and can be cancelled.
    async fn submit(&self, sql: &str, options: &RunOptions) -> std::result::Result<StatementResponse, DriverError> {
        let body = SubmitRequest {
            statement: sql.to_string(),
            warehouse_id: self.warehouse_id.clone(),
            wait_timeout: "0s",
            on_wait_timeout: "CONTINUE",
            disposition: "INLINE",
            format: "JSON_ARRAY",
            row_limit: options.row_limit,
        };
        let api = self.api.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let tag = options.tag.clone();
        in_flight.insert(tag.clone(), Tracked::Submitting);

        let task = tokio::spawn(async move {
            let submitted = match api.submit(&body).await {
                Ok(submitted) => submitted,
                Err(e) => {
                    in_flight.remove(&tag);
                    return Err(e);
                }
            };
            if claim(&in_flight, &tag, &submitted.statement_id) {
                return Ok(submitted);
            }
            if let Err(e) = api.cancel(&submitted.statement_id).await {
                warn!(tag = %tag, error = %e, "Cancel after submit failed");
            }
            info!(tag = %tag, statement_id = %submitted.statement_id, "Cancelled on submit");
            Err(DriverError::Cancelled)
        });

        task.await
            .map_err(|e| DriverError::Transport(format!("submit task failed: {}", e)))?
    }

    async fn wait_for_completion(&self, mut statement: StatementResponse) -> std::result::Result<StatementResponse, DriverError> {
        let mut interval = self.poll_interval;
        while matches!(statement.status.state.as_str(), "PENDING" | "RUNNING") {
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
            statement = self.api.poll(&statement.statement_id).await?;
        }
        Ok(statement)
    }

    async fn collect(&self, statement: StatementResponse, row_limit: Option<usize>) -> std::result::Result<RowSet, DriverError> {
        let columns: Vec<ColumnInfo> = statement
            .manifest
            .and_then(|m| m.schema)
            .map(|s| s.columns)
            .unwrap_or_default();

        let mut rows: Vec<Row> = Vec::new();
        let mut chunk = statement.result;
        while let Some(current) = chunk.take() {
            for raw in current.data_array.unwrap_or_default() {
                rows.push(convert_row(raw, &columns));
            }
            if row_limit.map_or(false, |limit| rows.len() >= limit) {
                break;
            }
            if let Some(link) = current.next_chunk_internal_link {
                chunk = Some(self.api.fetch_chunk(&link).await?);
            }
        }
        if let Some(limit) = row_limit {
            rows.truncate(limit);
        }

        Ok(RowSet {
            columns: columns.into_iter().map(|c| c.name).collect(),
            rows,
        })
    }

    /// Mark `tag` for cancellation, returning the statement id when it is known.
    fn request_cancel(&self, tag: &str) -> Option<String> {
        let mut entry = self.in_flight.get_mut(tag)?;
        let running = match &*entry {
            Tracked::Running(id) => Some(id.clone()),
            Tracked::Submitting | Tracked::CancelRequested => None,
        };
        if running.is_none() {
            *entry = Tracked::CancelRequested;
            return None;
        }
        drop(entry);
        self.in_flight.remove(tag);
        running
    }
}

/// Record the statement id for `tag`; false when a cancel already arrived.
fn claim(in_flight: &DashMap<String, Tracked>, tag: &str, statement_id: &str) -> bool {
    if let Some(mut entry) = in_flight.get_mut(tag) {
        if *entry == Tracked::Submitting {
            *entry = Tracked::Running(statement_id.to_string());
            return true;
        }
    }
    in_flight.remove(tag);
    false
}

impl StatementApi {
    async fn authorized(&self, request: RequestBuilder) -> std::result::Result<RequestBuilder, DriverError> {
        let token = self.tokens.token().await?;
        Ok(request.bearer_auth(token))
    }

    /// Send a request. Idempotent reads retry transient server errors; a
    /// retried POST could start the statement twice.
    async fn send(&self, build: impl Fn() -> RequestBuilder, idempotent: bool) -> std::result::Result<Response, DriverError> {
        let mut retries = if idempotent { SERVER_ERROR_RETRIES } else { 0 };
        loop {
            let response = self
                .authorized(build())
                .await?
                .send()
                .await
                .map_err(|e| DriverError::Transport(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if should_retry(status, retries) {
                retries -= 1;
                warn!(status = status.as_u16(), retries, "Warehouse server error, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }

            let body: ServiceError = response.json().await.unwrap_or_default();
            return Err(DriverError::Status {
                status: status.as_u16(),
                code: body.error_code,
                message: body.message.unwrap_or_default(),
            });
        }
    }

    async fn submit(&self, body: &SubmitRequest) -> std::result::Result<StatementResponse, DriverError> {
        let url = format!("{}{}", self.base_url, STATEMENTS_PATH);
        let response = self.send(|| self.client.post(&url).json(body), false).await?;
        response
            .json()
            .await
            .map_err(|e| DriverError::Decode(e.to_string()))
    }

    async fn poll(&self, statement_id: &str) -> std::result::Result<StatementResponse, DriverError> {
        let url = format!("{}{}/{}", self.base_url, STATEMENTS_PATH, statement_id);
        let response = self.send(|| self.client.get(&url), true).await?;
        response
            .json()
            .await
            .map_err(|e| DriverError::Decode(e.to_string()))
    }

    async fn fetch_chunk(&self, link: &str) -> std::result::Result<ResultChunk, DriverError> {
        let url = format!("{}{}", self.base_url, link);
        let response = self.send(|| self.client.get(&url), true).await?;
        response
            .json()
            .await
            .map_err(|e| DriverError::Decode(e.to_string()))
    }

    async fn cancel(&self, statement_id: &str) -> std::result::Result<(), DriverError> {
        let url = format!("{}{}/{}/cancel", self.base_url, STATEMENTS_PATH, statement_id);
        self.send(|| self.client.post(&url), false).await?;
        Ok(())
    }
}

fn should_retry(status: StatusCode, retries_left: u32) -> bool {
    status.is_server_error() && retries_left > 0
}

fn convert_row(raw: Vec<Option<String>>, columns: &[ColumnInfo]) -> Row {
    raw.into_iter()
        .enumerate()
        .map(|(idx, value)| {
            let type_name = columns
                .get(idx)
                .and_then(|c| c.type_name.as_deref())
                .unwrap_or("STRING");
            convert_value(value, type_name)
        })
        .collect()
}

/// JSON_ARRAY results carry every value as a string; restore the column type.
fn convert_value(value: Option<String>, type_name: &str) -> Value {
    let text = match value {
        Some(text) => text,
        None => return Value::Null,
    };
    match type_name.to_ascii_uppercase().as_str() {
        "BYTE" | "SHORT" | "INT" | "LONG" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(Value::String(text)),
        "FLOAT" | "DOUBLE" | "DECIMAL" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(text)),
        "BOOLEAN" => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        _ => Value::String(text),
    }
}

#[async_trait]
impl WarehouseConnector for DatabricksConnector {
    fn name(&self) -> &'static str {
        "databricks"
    }

    async fn run(&self, sql: &str, options: RunOptions) -> std::result::Result<RowSet, DriverError> {
        let submitted = self.submit(sql, &options).await?;
        debug!(tag = %options.tag, statement_id = %submitted.statement_id, "Statement submitted");

        let finished = self.wait_for_completion(submitted).await;
        self.in_flight.remove(&options.tag);
        let finished = finished?;

        match finished.status.state.as_str() {
            "SUCCEEDED" => self.collect(finished, options.row_limit).await,
            "CANCELED" | "CLOSED" => Err(DriverError::Cancelled),
            _ => {
                let error = finished.status.error.unwrap_or_default();
                Err(DriverError::Failed {
                    code: error.error_code,
                    message: error.message.unwrap_or_default(),
                })
            }
        }
    }

    async fn cancel(&self, tag: &str) -> std::result::Result<(), DriverError> {
        let statement_id = match self.request_cancel(tag) {
            Some(id) => id,
            None => return Ok(()),
        };
        self.api.cancel(&statement_id).await?;
        info!(tag = %tag, statement_id = %statement_id, "Cancel requested");
        Ok(())
    }
}
