//! Guardrails applied to every statement before it can reach the warehouse.

pub mod identifier;
pub mod lexer;
pub mod metric;
pub mod patterns;
pub mod references;
pub mod scope;
pub mod statement;
pub mod validator;

pub use identifier::{is_valid_identifier, sanitize_identifier};
pub use metric::MetricType;
pub use references::Reference;
pub use scope::ScopeRegistry;
pub use statement::{Intent, StatementKind};
pub use validator::{StatementRequest, StatementValidator, ValidatedStatement};
