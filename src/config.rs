//! Configuration
//!
//! TOML file with `${VAR}` placeholders resolved from the environment after
//! parsing. Every limit is either positive or `-1` for "no server ceiling",
//! except `max_concurrent_queries`, which must always be bounded.

use crate::error::{GuardError, Result};
use crate::guardrails::{ScopeRegistry, StatementKind};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static! {
    static ref ENV_PLACEHOLDER: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub warehouse: WarehouseConfig,
    pub auth: AuthConfig,
    pub scopes: ScopesConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub host: String,
    pub warehouse_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub oauth: OAuthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Catalog name to allowlisted schemas.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScopesConfig {
    #[serde(default)]
    pub catalogs: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_rows")]
    pub max_rows: i64,
    #[serde(default = "default_sample_max_rows")]
    pub sample_max_rows: i64,
    #[serde(default = "default_query_timeout_seconds")]
    pub query_timeout_seconds: i64,
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: i64,
    #[serde(default = "default_admission_timeout_seconds")]
    pub admission_timeout_seconds: i64,
    #[serde(default = "default_allow_statement_types")]
    pub allow_statement_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub propagate_request_ids: bool,
    /// JSON-lines audit file, in addition to the tracing audit target.
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,
}

fn default_max_rows() -> i64 {
    10_000
}

fn default_sample_max_rows() -> i64 {
    1_000
}

fn default_query_timeout_seconds() -> i64 {
    60
}

fn default_max_concurrent_queries() -> i64 {
    5
}

fn default_admission_timeout_seconds() -> i64 {
    30
}

fn default_allow_statement_types() -> Vec<String> {
    vec!["SELECT".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_rows: default_max_rows(),
            sample_max_rows: default_sample_max_rows(),
            query_timeout_seconds: default_query_timeout_seconds(),
            max_concurrent_queries: default_max_concurrent_queries(),
            admission_timeout_seconds: default_admission_timeout_seconds(),
            allow_statement_types: default_allow_statement_types(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            propagate_request_ids: true,
            audit_log_path: None,
        }
    }
}

impl AppConfig {
    /// Load, resolve `${VAR}` placeholders from the process environment, and validate.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            GuardError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content, |key| std::env::var(key).ok())
    }

    /// Parse TOML text, resolving placeholders through `env`.
    pub fn from_toml_str<F>(content: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: toml::Value = toml::from_str(content)
            .map_err(|e| GuardError::Config(format!("Failed to parse config file: {}", e)))?;
        let resolved = resolve_env(raw, &env)?;
        let mut config: AppConfig = resolved
            .try_into()
            .map_err(|e: toml::de::Error| GuardError::Config(format!("Invalid config: {}", e)))?;
        config.finalize()?;
        Ok(config)
    }

    /// Normalize statement types and validate every section.
    pub fn finalize(&mut self) -> Result<()> {
        self.limits.allow_statement_types = self
            .statement_kinds()?
            .iter()
            .map(|kind| kind.to_string())
            .collect();
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        require(&self.warehouse.host, "warehouse.host")?;
        require(&self.warehouse.warehouse_id, "warehouse.warehouse_id")?;
        require(&self.auth.oauth.client_id, "auth.oauth.client_id")?;
        require(&self.auth.oauth.client_secret, "auth.oauth.client_secret")?;
        require(&self.auth.oauth.token_url, "auth.oauth.token_url")?;

        positive_or_unlimited(self.limits.max_rows, "max_rows")?;
        positive_or_unlimited(self.limits.sample_max_rows, "sample_max_rows")?;
        positive_or_unlimited(self.limits.query_timeout_seconds, "query_timeout_seconds")?;
        positive_or_unlimited(self.limits.admission_timeout_seconds, "admission_timeout_seconds")?;
        positive_or_unlimited(self.limits.max_concurrent_queries, "max_concurrent_queries")?;
        if self.limits.max_concurrent_queries == -1 {
            return Err(GuardError::Config(
                "max_concurrent_queries cannot be unlimited".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.observability.log_level.to_ascii_lowercase().as_str()) {
            return Err(GuardError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.observability.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        self.statement_kinds()?;
        self.scope_registry()?;
        Ok(())
    }

    /// Allowed statement kinds, upper-cased and deduplicated; empty means `SELECT`.
    pub fn statement_kinds(&self) -> Result<Vec<StatementKind>> {
        if self.limits.allow_statement_types.is_empty() {
            return Ok(vec![StatementKind::Select]);
        }
        let kinds: Vec<StatementKind> = self
            .limits
            .allow_statement_types
            .iter()
            .map(|s| s.parse::<StatementKind>())
            .collect::<Result<_>>()?;
        Ok(kinds.into_iter().unique().collect())
    }

    pub fn scope_registry(&self) -> Result<ScopeRegistry> {
        ScopeRegistry::new(self.scopes.catalogs.iter().map(|(c, s)| (c.as_str(), s.clone())))
    }

    pub fn admission_timeout(&self) -> Option<Duration> {
        u64::try_from(self.limits.admission_timeout_seconds)
            .ok()
            .map(Duration::from_secs)
    }

    /// Concurrency bound; validation guarantees it is positive.
    pub fn max_concurrent_queries(&self) -> usize {
        usize::try_from(self.limits.max_concurrent_queries).unwrap_or(1)
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GuardError::Config(format!("{} is required", field)));
    }
    Ok(())
}

fn positive_or_unlimited(value: i64, field: &str) -> Result<()> {
    if value == -1 || value > 0 {
        Ok(())
    } else {
        Err(GuardError::Config(format!(
            "{} must be greater than 0 or -1 for no limit",
            field
        )))
    }
}

fn resolve_env<F>(value: toml::Value, env: &F) -> Result<toml::Value>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(match value {
        toml::Value::String(s) => toml::Value::String(expand(&s, env)?),
        toml::Value::Array(items) => toml::Value::Array(
            items
                .into_iter()
                .map(|item| resolve_env(item, env))
                .collect::<Result<_>>()?,
        ),
        toml::Value::Table(table) => toml::Value::Table(
            table
                .into_iter()
                .map(|(k, v)| resolve_env(v, env).map(|v| (k, v)))
                .collect::<Result<_>>()?,
        ),
        other => other,
    })
}

fn expand<F>(text: &str, env: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = None;
    let expanded = ENV_PLACEHOLDER.replace_all(text, |caps: &Captures| {
        let key = &caps[1];
        env(key).unwrap_or_else(|| {
            missing.get_or_insert_with(|| key.to_string());
            String::new()
        })
    });
    match missing {
        Some(key) => Err(GuardError::Config(format!(
            "Environment variable {} is required but not set",
            key
        ))),
        None => Ok(expanded.into_owned()),
    }
}
