pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod guardrails;
pub mod observability;
pub mod projector;
pub mod tools;

pub use config::AppConfig;
pub use engine::{EngineLimits, GovernedEngine};
pub use error::{ErrorResponse, GuardError, ReasonCode, Result};
pub use tools::{ToolCall, ToolDispatcher};
