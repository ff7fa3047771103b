//! guardctl - run governed warehouse tools from the command line
//!
//! Output is pretty JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warehouse_guard::auth::OAuthTokenProvider;
use warehouse_guard::execution::DatabricksConnector;
use warehouse_guard::guardrails::{Intent, StatementRequest, StatementValidator};
use warehouse_guard::observability::{AuditSink, AuditSinks, JsonLinesAuditSink, TracingAuditSink};
use warehouse_guard::{AppConfig, ErrorResponse, GovernedEngine, ToolCall, ToolDispatcher};

#[derive(Parser)]
#[command(name = "guardctl")]
#[command(about = "Governed SQL execution against an allowlisted warehouse")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "warehouse-guard.toml")]
    config: PathBuf,

    /// Request id to propagate (when enabled in configuration)
    #[arg(long, global = true)]
    request_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum IntentArg {
    Query,
    Aggregate,
    DerivedView,
}

impl From<IntentArg> for Intent {
    fn from(arg: IntentArg) -> Self {
        match arg {
            IntentArg::Query => Intent::Query,
            IntentArg::Aggregate => Intent::Aggregate,
            IntentArg::DerivedView => Intent::DerivedView,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Check a statement against the guardrails without contacting the warehouse
    Validate {
        sql: String,
        #[arg(long, value_enum, default_value = "query")]
        intent: IntentArg,
    },
    /// List allowlisted catalogs
    Catalogs,
    /// List allowlisted schemas of a catalog
    Schemas { catalog: String },
    /// List tables in an allowlisted schema
    Tables { catalog: String, schema: String },
    /// Show columns, primary keys and storage detail of a table
    Metadata {
        catalog: String,
        schema: String,
        table: String,
    },
    /// Show partition columns and size statistics of a table
    Partitions {
        catalog: String,
        schema: String,
        table: String,
    },
    /// Run a query under the sample row ceiling
    Preview {
        sql: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Run a query under the full row ceiling
    Query {
        sql: String,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Count rows of a table, optionally filtered
    Count {
        catalog: String,
        schema: String,
        table: String,
        #[arg(long)]
        predicate: Option<String>,
    },
    /// Compute COUNT, SUM, AVG, MIN or MAX over one column
    Aggregate {
        catalog: String,
        schema: String,
        table: String,
        metric_type: String,
        metric_column: String,
        #[arg(long)]
        predicate: Option<String>,
    },
    /// Create a session-scoped temporary view from a SELECT
    ///
    /// The Statement Execution API has no session affinity, so the view may
    /// not be visible to the row count or to later commands.
    CreateView { name: String, sql: String },
}

impl Command {
    fn into_tool_call(self, request_id: Option<String>) -> Option<ToolCall> {
        Some(match self {
            Command::Validate { .. } => return None,
            Command::Catalogs => ToolCall::ListCatalogs { request_id },
            Command::Schemas { catalog } => ToolCall::ListSchemas { catalog, request_id },
            Command::Tables { catalog, schema } => ToolCall::ListTables {
                catalog,
                schema,
                request_id,
            },
            Command::Metadata {
                catalog,
                schema,
                table,
            } => ToolCall::TableMetadata {
                catalog,
                schema,
                table,
                request_id,
            },
            Command::Partitions {
                catalog,
                schema,
                table,
            } => ToolCall::PartitionInfo {
                catalog,
                schema,
                table,
                request_id,
            },
            Command::Preview { sql, limit, timeout } => ToolCall::PreviewQuery {
                sql,
                limit,
                timeout_seconds: timeout,
                request_id,
            },
            Command::Query { sql, limit, timeout } => ToolCall::RunQuery {
                sql,
                limit,
                timeout_seconds: timeout,
                request_id,
            },
            Command::Count {
                catalog,
                schema,
                table,
                predicate,
            } => ToolCall::ApproxCount {
                catalog,
                schema,
                table,
                predicate,
                request_id,
            },
            Command::Aggregate {
                catalog,
                schema,
                table,
                metric_type,
                metric_column,
                predicate,
            } => ToolCall::AggregateMetric {
                catalog,
                schema,
                table,
                metric_type,
                metric_column,
                predicate,
                request_id,
            },
            Command::CreateView { name, sql } => ToolCall::CreateTempTable {
                temp_table_name: name,
                sql_query: sql,
                request_id,
            },
        })
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fail(response: ErrorResponse) -> Result<()> {
    print_json(&serde_json::to_value(&response)?)?;
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let config = AppConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.to_ascii_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Command::Validate { sql, intent } = &args.command {
        let validator = StatementValidator::new(
            Arc::new(config.scope_registry()?),
            config.statement_kinds()?,
        );
        let request = StatementRequest::new(sql.as_str(), (*intent).into());
        return match validator.validate(&request) {
            Ok(statement) => print_json(&json!({
                "statement_kind": statement.kind(),
                "references": statement.references(),
            })),
            Err(e) => fail(ErrorResponse::from_error(&e, "offline")),
        };
    }

    let mut sinks: Vec<Box<dyn AuditSink>> = vec![Box::new(TracingAuditSink)];
    if let Some(path) = &config.observability.audit_log_path {
        sinks.push(Box::new(JsonLinesAuditSink::new(path)));
    }

    let oauth = &config.auth.oauth;
    let tokens = Arc::new(OAuthTokenProvider::new(
        reqwest::Client::new(),
        oauth.token_url.as_str(),
        oauth.client_id.as_str(),
        oauth.client_secret.as_str(),
        oauth.scope.clone(),
    ));
    let connector = Arc::new(DatabricksConnector::new(
        &config.warehouse.host,
        &config.warehouse.warehouse_id,
        tokens,
    )?);
    let engine = GovernedEngine::from_config(&config, connector, Arc::new(AuditSinks(sinks)))?;
    let dispatcher = ToolDispatcher::new(Arc::new(engine), config.observability.propagate_request_ids);

    let call = match args.command.into_tool_call(args.request_id) {
        Some(call) => call,
        None => return Ok(()),
    };
    info!(tool = call.name(), "Running tool");
    match dispatcher.dispatch(call).await {
        Ok(value) => print_json(&value),
        Err(response) => fail(response),
    }
}
