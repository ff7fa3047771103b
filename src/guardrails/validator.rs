//! Statement validation.
//!
//! Runs entirely before any warehouse contact. The order is fixed: statement
//! kind, forbidden patterns, stacked statements, reference extraction,
//! qualification of every reference, then scope of each reference in textual
//! order. The first failure is reported.

use crate::error::{GuardError, Result};
use crate::guardrails::lexer::{leading_keyword, tokenize};
use crate::guardrails::patterns::{scan_forbidden_patterns, scan_stacked_statements};
use crate::guardrails::references::{extract_relations, Reference, Relation};
use crate::guardrails::scope::ScopeRegistry;
use crate::guardrails::statement::{Intent, StatementKind};
use itertools::Itertools;
use std::sync::Arc;
use tracing::debug;

/// A caller request as submitted. Never mutated once validation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRequest {
    pub sql: String,
    pub intent: Intent,
    pub request_id: Option<String>,
    pub limit: Option<usize>,
    pub timeout_seconds: Option<u64>,
    pub predicate: Option<String>,
}

impl StatementRequest {
    pub fn new(sql: impl Into<String>, intent: Intent) -> Self {
        Self {
            sql: sql.into(),
            intent,
            request_id: None,
            limit: None,
            timeout_seconds: None,
            predicate: None,
        }
    }

    pub fn query(sql: impl Into<String>) -> Self {
        Self::new(sql, Intent::Query)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: Option<u64>) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_predicate(mut self, predicate: Option<String>) -> Self {
        self.predicate = predicate;
        self
    }
}

/// A statement that passed every guardrail, with its distinct references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedStatement {
    sql: String,
    kind: StatementKind,
    references: Vec<Reference>,
}

impl ValidatedStatement {
    /// Wrap engine-composed text around an already validated body.
    pub(crate) fn composed(sql: String, kind: StatementKind, references: Vec<Reference>) -> Self {
        Self {
            sql,
            kind,
            references,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn into_references(self) -> Vec<Reference> {
        self.references
    }
}

#[derive(Debug, Clone)]
pub struct StatementValidator {
    registry: Arc<ScopeRegistry>,
    allowed: Vec<StatementKind>,
}

impl StatementValidator {
    /// `allowed` empty means the default `SELECT`-only set.
    pub fn new(registry: Arc<ScopeRegistry>, allowed: Vec<StatementKind>) -> Self {
        let allowed = if allowed.is_empty() {
            vec![StatementKind::Select]
        } else {
            allowed.into_iter().unique().collect()
        };
        Self { registry, allowed }
    }

    pub fn registry(&self) -> &Arc<ScopeRegistry> {
        &self.registry
    }

    pub fn allowed(&self) -> &[StatementKind] {
        &self.allowed
    }

    pub fn validate(&self, request: &StatementRequest) -> Result<ValidatedStatement> {
        let tokens = tokenize(&request.sql);
        let kind = self.check_kind(leading_keyword(&tokens), request.intent)?;

        scan_forbidden_patterns(&request.sql)?;
        scan_stacked_statements(&tokens)?;

        let relations = extract_relations(&tokens);
        let mut references = Vec::with_capacity(relations.len());
        for relation in &relations {
            match relation {
                Relation::Qualified(reference) => references.push(reference.clone()),
                Relation::Unresolved(name) => return Err(GuardError::unqualified(name)),
            }
        }
        for reference in &references {
            self.registry.check(&reference.catalog, &reference.schema)?;
        }

        let references: Vec<Reference> = references.into_iter().unique().collect();
        debug!(
            intent = request.intent.as_str(),
            kind = %kind,
            references = references.len(),
            "Statement passed guardrails"
        );

        Ok(ValidatedStatement {
            sql: request.sql.clone(),
            kind,
            references,
        })
    }

    fn check_kind(&self, keyword: Option<String>, intent: Intent) -> Result<StatementKind> {
        let required = self.required_for(intent);
        let keyword = match keyword {
            Some(keyword) => keyword,
            None => return Err(GuardError::disallowed(required, "EMPTY")),
        };
        let kind = StatementKind::from_keyword(&keyword);

        let permitted = match intent {
            Intent::Query => kind != StatementKind::Create && self.allowed.contains(&kind),
            Intent::Aggregate | Intent::DerivedView => kind == StatementKind::Select,
        };
        if permitted {
            Ok(kind)
        } else {
            Err(GuardError::disallowed(required, &keyword))
        }
    }

    fn required_for(&self, intent: Intent) -> String {
        match intent {
            Intent::Query => self
                .allowed
                .iter()
                .filter(|kind| **kind != StatementKind::Create)
                .join(", "),
            Intent::Aggregate | Intent::DerivedView => StatementKind::Select.to_string(),
        }
    }
}
