//! Governed Engine
//!
//! Validates a request, takes a concurrency slot, runs the statement under its
//! budget, releases the slot, and projects the result. Any guardrail failure
//! returns before the limiter is touched, so it never reaches the warehouse.
//! Every request produces exactly one audit event.

use crate::config::AppConfig;
use crate::error::{GuardError, Result};
use crate::execution::{
    effective_timeout, ConcurrencyLimiter, ExecutionBudget, ExecutionResult, QueryExecutor,
    WarehouseConnector,
};
use crate::guardrails::{
    sanitize_identifier, Intent, MetricType, Reference, ScopeRegistry, StatementKind,
    StatementRequest, StatementValidator, ValidatedStatement,
};
use crate::observability::{AuditEvent, AuditSink};
use crate::projector::{
    self, AggregateResponse, ApproxCountResponse, DerivedViewResponse, PartitionInfoResponse,
    QueryResponse, TableMetadataResponse, TableMetadataResults, TablesResponse,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

/// Server ceilings; `-1` means no ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_rows: i64,
    pub sample_max_rows: i64,
    pub query_timeout_seconds: i64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            sample_max_rows: 1_000,
            query_timeout_seconds: 60,
        }
    }
}

impl EngineLimits {
    fn preview_rows(&self) -> i64 {
        if self.sample_max_rows == -1 {
            self.max_rows
        } else {
            self.sample_max_rows
        }
    }

    fn default_timeout(&self) -> Option<Duration> {
        effective_timeout(None, self.query_timeout_seconds).map(Duration::from_secs)
    }
}

pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct GovernedEngine {
    validator: StatementValidator,
    limiter: ConcurrencyLimiter,
    executor: QueryExecutor,
    limits: EngineLimits,
    audit: Arc<dyn AuditSink>,
}

/// Per-request audit bookkeeping.
struct Audit<'a> {
    sink: &'a dyn AuditSink,
    started: Instant,
    event: AuditEvent,
}

impl<'a> Audit<'a> {
    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn statement(&mut self, kind: &StatementKind, references: &[Reference]) {
        self.event.set_statement(kind, references);
    }

    fn fail<T>(self, error: GuardError) -> Result<T> {
        let elapsed = self.elapsed_ms();
        self.sink.record(&self.event.errored(&error, elapsed));
        Err(error)
    }

    fn done(self, result: &ExecutionResult) {
        let elapsed = self.elapsed_ms();
        self.sink
            .record(&self.event.executed(elapsed, result.row_count(), result.truncated));
    }
}

impl GovernedEngine {
    pub fn new(
        validator: StatementValidator,
        limiter: ConcurrencyLimiter,
        executor: QueryExecutor,
        limits: EngineLimits,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            validator,
            limiter,
            executor,
            limits,
            audit,
        }
    }

    /// Wire the engine from validated configuration.
    pub fn from_config(
        config: &AppConfig,
        connector: Arc<dyn WarehouseConnector>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let registry = Arc::new(config.scope_registry()?);
        let validator = StatementValidator::new(registry, config.statement_kinds()?);
        let limiter = ConcurrencyLimiter::new(config.max_concurrent_queries(), config.admission_timeout())?;
        let limits = EngineLimits {
            max_rows: config.limits.max_rows,
            sample_max_rows: config.limits.sample_max_rows,
            query_timeout_seconds: config.limits.query_timeout_seconds,
        };
        Ok(Self::new(validator, limiter, QueryExecutor::new(connector), limits, audit))
    }

    pub fn registry(&self) -> &ScopeRegistry {
        self.validator.registry()
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn limits(&self) -> &EngineLimits {
        &self.limits
    }

    fn begin(&self, tool: &str, request_id: &str) -> Audit<'_> {
        Audit {
            sink: self.audit.as_ref(),
            started: Instant::now(),
            event: AuditEvent::new(request_id, tool),
        }
    }

    /// Validate, admit and execute one request under the given row ceiling.
    async fn governed(
        &self,
        tool: &str,
        request: &StatementRequest,
        request_id: &str,
        max_rows: i64,
    ) -> Result<ExecutionResult> {
        let mut audit = self.begin(tool, request_id);
        let statement = match self.validator.validate(request) {
            Ok(statement) => statement,
            Err(e) => return audit.fail(e),
        };
        audit.statement(statement.kind(), statement.references());

        let budget = ExecutionBudget::resolve(
            request.limit,
            max_rows,
            request.timeout_seconds,
            self.limits.query_timeout_seconds,
        );
        match self.admit_and_run(&statement, &budget).await {
            Ok(result) => {
                audit.done(&result);
                Ok(result)
            }
            Err(e) => audit.fail(e),
        }
    }

    async fn admit_and_run(
        &self,
        statement: &ValidatedStatement,
        budget: &ExecutionBudget,
    ) -> Result<ExecutionResult> {
        let _slot = self.limiter.acquire().await?;
        self.executor.execute(statement, budget, &new_request_id()).await
    }

    /// Run a request under the `max_rows` ceiling.
    pub async fn run_governed(&self, request: &StatementRequest) -> Result<ExecutionResult> {
        let request_id = request.request_id.clone().unwrap_or_else(new_request_id);
        self.governed("run_governed", request, &request_id, self.limits.max_rows)
            .await
    }

    pub async fn run_query(
        &self,
        sql: &str,
        limit: Option<usize>,
        timeout_seconds: Option<u64>,
        request_id: &str,
    ) -> Result<QueryResponse> {
        let request = StatementRequest::query(sql)
            .with_request_id(request_id)
            .with_limit(limit)
            .with_timeout_seconds(timeout_seconds);
        let result = self
            .governed("run_query", &request, request_id, self.limits.max_rows)
            .await?;
        Ok(projector::project_rows(request_id, result))
    }

    /// Like [`run_query`](Self::run_query) under the sample ceiling.
    pub async fn preview_query(
        &self,
        sql: &str,
        limit: Option<usize>,
        timeout_seconds: Option<u64>,
        request_id: &str,
    ) -> Result<QueryResponse> {
        let request = StatementRequest::query(sql)
            .with_request_id(request_id)
            .with_limit(limit)
            .with_timeout_seconds(timeout_seconds);
        let result = self
            .governed("preview_query", &request, request_id, self.limits.preview_rows())
            .await?;
        Ok(projector::project_rows(request_id, result))
    }

    /// Scope-check and sanitize a `catalog.schema.table` target.
    fn target(&self, catalog: &str, schema: &str, table: &str) -> Result<String> {
        self.registry().check(catalog, schema)?;
        let table = sanitize_identifier(table, "table")?;
        Ok(format!("`{}`.`{}`.`{}`", catalog, schema, table))
    }

    /// Scope-check and sanitize a target for catalog lookups, lowercased the
    /// way `information_schema` stores names.
    fn lookup_target(&self, catalog: &str, schema: &str, table: &str) -> Result<Reference> {
        self.registry().check(catalog, schema)?;
        let table = sanitize_identifier(table, "table")?;
        Ok(Reference::new(
            &catalog.to_ascii_lowercase(),
            &schema.to_ascii_lowercase(),
            &table.to_ascii_lowercase(),
        ))
    }

    /// Run an engine-composed `system.information_schema` query while the
    /// caller holds a slot.
    async fn lookup(&self, sql: String, view: &str, budget: &ExecutionBudget, tag: &str) -> Result<ExecutionResult> {
        let statement = ValidatedStatement::composed(
            sql,
            StatementKind::Select,
            vec![Reference::new("system", "information_schema", view)],
        );
        self.executor.execute(&statement, budget, tag).await
    }

    async fn describe_detail(&self, target: &Reference, tag: &str) -> Result<ExecutionResult> {
        let statement = ValidatedStatement::composed(
            format!(
                "DESCRIBE DETAIL `{}`.`{}`.`{}`",
                target.catalog, target.schema, target.table
            ),
            describe_kind(),
            vec![target.clone()],
        );
        let budget = ExecutionBudget::scalar(self.limits.default_timeout());
        self.executor.execute(&statement, &budget, tag).await
    }

    /// Run an engine-composed single-row SELECT through the aggregate intent.
    async fn scalar(&self, tool: &str, sql: String, predicate: Option<&str>, request_id: &str) -> Result<ExecutionResult> {
        let request = StatementRequest::new(sql, Intent::Aggregate)
            .with_request_id(request_id)
            .with_predicate(predicate.map(str::to_string));
        let mut audit = self.begin(tool, request_id);
        let statement = match self.validator.validate(&request) {
            Ok(statement) => statement,
            Err(e) => return audit.fail(e),
        };
        audit.statement(statement.kind(), statement.references());

        let budget = ExecutionBudget::scalar(self.limits.default_timeout());
        match self.admit_and_run(&statement, &budget).await {
            Ok(result) => {
                audit.done(&result);
                Ok(result)
            }
            Err(e) => audit.fail(e),
        }
    }

    pub async fn run_aggregate(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
        metric_type: &str,
        metric_column: &str,
        predicate: Option<&str>,
        request_id: &str,
    ) -> Result<AggregateResponse> {
        let composed = self.target(catalog, schema, table).and_then(|target| {
            let metric: MetricType = metric_type.parse()?;
            let column = if metric == MetricType::Count && metric_column.trim() == "*" {
                "*"
            } else {
                sanitize_identifier(metric_column, "column")?
            };
            Ok((metric, aggregate_sql(metric, column, &target, predicate)))
        });
        let (metric, sql) = match composed {
            Ok(composed) => composed,
            Err(e) => return self.begin("aggregate_metric", request_id).fail(e),
        };

        let result = self.scalar("aggregate_metric", sql, predicate, request_id).await?;
        Ok(projector::project_aggregate(
            catalog,
            schema,
            table,
            metric,
            metric_column,
            predicate,
            &result,
        ))
    }

    pub async fn approx_count(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
        predicate: Option<&str>,
        request_id: &str,
    ) -> Result<ApproxCountResponse> {
        let target = match self.target(catalog, schema, table) {
            Ok(target) => target,
            Err(e) => return self.begin("approx_count", request_id).fail(e),
        };
        let sql = format!(
            "SELECT COUNT(*) AS approx_count FROM {}{}",
            target,
            where_clause(predicate)
        );
        let result = self.scalar("approx_count", sql, predicate, request_id).await?;
        Ok(projector::project_count(catalog, schema, table, predicate, &result))
    }

    /// Create a session-scoped temporary view over a validated SELECT body and
    /// report its row count.
    ///
    /// Both statements share one slot and one executor tag, but only a
    /// connector with session affinity keeps them in the same warehouse
    /// session. Over the Statement Execution API the count, and any later
    /// query naming the view, can fail with `not_found`.
    pub async fn create_derived_view(
        &self,
        name: &str,
        select_body: &str,
        request_id: &str,
    ) -> Result<DerivedViewResponse> {
        let mut audit = self.begin("create_temp_table", request_id);
        let name = match sanitize_identifier(name, "temp_table_name") {
            Ok(name) => name,
            Err(e) => return audit.fail(e),
        };
        let body = StatementRequest::new(select_body, Intent::DerivedView).with_request_id(request_id);
        let validated = match self.validator.validate(&body) {
            Ok(validated) => validated,
            Err(e) => return audit.fail(e),
        };
        audit.statement(&StatementKind::Create, validated.references());

        let create = ValidatedStatement::composed(
            format!(
                "CREATE TEMPORARY VIEW {} AS {}",
                name,
                strip_terminator(validated.sql())
            ),
            StatementKind::Create,
            validated.into_references(),
        );
        let count = ValidatedStatement::composed(
            format!("SELECT COUNT(*) AS row_count FROM {}", name),
            StatementKind::Select,
            Vec::new(),
        );

        let timeout = self.limits.default_timeout();
        let outcome = async {
            let _slot = self.limiter.acquire().await?;
            let tag = new_request_id();
            self.executor
                .execute(&create, &ExecutionBudget::statement(timeout), &tag)
                .await?;
            self.executor
                .execute(&count, &ExecutionBudget::scalar(timeout), &tag)
                .await
        }
        .await;

        match outcome {
            Ok(result) => {
                info!(request_id = %request_id, view = %name, "Temporary view created");
                let response = projector::project_derived_view(name, &result);
                audit.done(&result);
                Ok(response)
            }
            Err(e) => audit.fail(e),
        }
    }

    /// Allowlisted catalogs, answered without warehouse contact.
    pub fn list_catalogs(&self) -> Vec<String> {
        self.registry().catalogs()
    }

    pub fn list_schemas(&self, catalog: &str) -> Result<Vec<String>> {
        self.registry().schemas(catalog)
    }

    pub async fn list_tables(&self, catalog: &str, schema: &str, request_id: &str) -> Result<TablesResponse> {
        let mut audit = self.begin("list_tables", request_id);
        if let Err(e) = self.registry().check(catalog, schema) {
            return audit.fail(e);
        }
        // Both names matched the allowlist, so they are plain identifiers.
        let statement = ValidatedStatement::composed(
            format!(
                "SELECT table_catalog, table_schema, table_name, table_type \
                 FROM system.information_schema.tables \
                 WHERE table_catalog = '{}' AND table_schema = '{}' \
                 ORDER BY table_name",
                catalog.to_ascii_lowercase(),
                schema.to_ascii_lowercase()
            ),
            StatementKind::Select,
            vec![Reference::new("system", "information_schema", "tables")],
        );
        audit.statement(statement.kind(), statement.references());

        let budget = ExecutionBudget::resolve(
            None,
            self.limits.max_rows,
            None,
            self.limits.query_timeout_seconds,
        );
        match self.admit_and_run(&statement, &budget).await {
            Ok(result) => {
                audit.done(&result);
                Ok(projector::project_tables(&result))
            }
            Err(e) => audit.fail(e),
        }
    }

    /// Column, key and storage metadata for one allowlisted table or view.
    ///
    /// All lookups run under a single slot.
    pub async fn table_metadata(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
        request_id: &str,
    ) -> Result<TableMetadataResponse> {
        let mut audit = self.begin("table_metadata", request_id);
        let target = match self.lookup_target(catalog, schema, table) {
            Ok(target) => target,
            Err(e) => return audit.fail(e),
        };
        audit.statement(&StatementKind::Select, std::slice::from_ref(&target));

        let single = ExecutionBudget::scalar(self.limits.default_timeout());
        let listing = ExecutionBudget::resolve(
            None,
            self.limits.max_rows,
            None,
            self.limits.query_timeout_seconds,
        );
        let filter = table_filter(&target, "");
        let outcome = async {
            let _slot = self.limiter.acquire().await?;
            let tag = new_request_id();
            let table_type = self
                .lookup(
                    format!("SELECT table_type FROM system.information_schema.tables WHERE {}", filter),
                    "tables",
                    &single,
                    &tag,
                )
                .await?;
            let is_view = projector::first_text(&table_type, "table_type")
                .map_or(false, |t| t.eq_ignore_ascii_case("VIEW"));

            let view = if is_view {
                let sql = format!(
                    "SELECT view_definition FROM system.information_schema.views WHERE {}",
                    filter
                );
                Some(self.lookup(sql, "views", &single, &tag).await?)
            } else {
                None
            };
            let columns = self
                .lookup(
                    format!(
                        "SELECT column_name, data_type, is_nullable, comment, ordinal_position \
                         FROM system.information_schema.columns WHERE {} ORDER BY ordinal_position",
                        filter
                    ),
                    "columns",
                    &listing,
                    &tag,
                )
                .await?;
            let primary_keys = self
                .lookup(primary_key_sql(&target), "key_column_usage", &listing, &tag)
                .await?;
            let detail = if is_view {
                None
            } else {
                Some(self.describe_detail(&target, &tag).await?)
            };
            Ok::<_, GuardError>(TableMetadataResults {
                table_type,
                view,
                columns,
                primary_keys,
                detail,
            })
        }
        .await;

        match outcome {
            Ok(results) => {
                audit.done(&results.columns);
                Ok(projector::project_table_metadata(catalog, schema, table, &results))
            }
            Err(e) => audit.fail(e),
        }
    }

    /// Partition columns and storage statistics from `DESCRIBE DETAIL`.
    pub async fn partition_info(
        &self,
        catalog: &str,
        schema: &str,
        table: &str,
        request_id: &str,
    ) -> Result<PartitionInfoResponse> {
        let mut audit = self.begin("partition_info", request_id);
        let target = match self.lookup_target(catalog, schema, table) {
            Ok(target) => target,
            Err(e) => return audit.fail(e),
        };
        audit.statement(&describe_kind(), std::slice::from_ref(&target));

        let outcome = async {
            let _slot = self.limiter.acquire().await?;
            self.describe_detail(&target, &new_request_id()).await
        }
        .await;

        match outcome {
            Ok(detail) => {
                audit.done(&detail);
                Ok(projector::project_partition_info(catalog, schema, table, &detail))
            }
            Err(e) => audit.fail(e),
        }
    }
}

fn describe_kind() -> StatementKind {
    StatementKind::Other("DESCRIBE".to_string())
}

/// Equality filter on an `information_schema` row. Names come from
/// [`GovernedEngine::lookup_target`], so they are plain identifiers.
fn table_filter(target: &Reference, alias: &str) -> String {
    format!(
        "{a}table_catalog = '{}' AND {a}table_schema = '{}' AND {a}table_name = '{}'",
        target.catalog,
        target.schema,
        target.table,
        a = alias
    )
}

fn primary_key_sql(target: &Reference) -> String {
    format!(
        "SELECT kcu.column_name \
         FROM system.information_schema.table_constraints tc \
         JOIN system.information_schema.key_column_usage kcu \
         ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
         WHERE {} AND tc.constraint_type = 'PRIMARY KEY' \
         ORDER BY kcu.ordinal_position",
        table_filter(target, "tc.")
    )
}

fn where_clause(predicate: Option<&str>) -> String {
    match predicate.map(str::trim) {
        Some(p) if !p.is_empty() => format!(" WHERE {}", p),
        _ => String::new(),
    }
}

fn aggregate_sql(metric: MetricType, column: &str, target: &str, predicate: Option<&str>) -> String {
    format!(
        "SELECT {}({}) AS metric_value FROM {}{}",
        metric,
        column,
        target,
        where_clause(predicate)
    )
}

/// Drop trailing `;` so the body can be embedded in a larger statement.
fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}
