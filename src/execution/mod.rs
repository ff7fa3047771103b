pub mod budget;
pub mod connector;
pub mod databricks;
pub mod executor;
pub mod limiter;
pub mod result;

pub use budget::{clamp_limit, effective_timeout, ExecutionBudget, UNLIMITED};
pub use connector::{DriverError, Row, RowSet, RunOptions, WarehouseConnector};
pub use databricks::DatabricksConnector;
pub use executor::QueryExecutor;
pub use limiter::{ConcurrencyLimiter, ConcurrencySlot};
pub use result::ExecutionResult;
