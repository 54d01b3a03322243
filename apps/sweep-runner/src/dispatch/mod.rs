//! Batch Dispatcher.
//!
//! Sends generated configurations to a backtesting endpoint with bounded
//! concurrency, retries transient failures, and records exactly one result
//! per configuration:
//!
//! - a row in the append-only summary table ([`summary`])
//! - a detail packet for every attempted configuration ([`artifacts`])
//!
//! The endpoint sits behind the [`BacktestPort`] trait; [`HttpBacktestClient`]
//! is the production adapter.

pub mod artifacts;
pub mod error;
pub mod executor;
pub mod port;
pub mod preflight;
pub mod progress;
pub mod result;
pub mod retry;
pub mod sanitize;
pub mod summary;

pub use artifacts::{DetailStore, IndexEntry};
pub use error::{AttemptError, DispatchError, ErrorKind};
pub use executor::{DispatchOptions, Dispatcher};
#[cfg(test)]
pub use port::MockBacktestPort;
pub use port::{BacktestPort, HttpBacktestClient};
pub use preflight::PreflightPolicy;
pub use progress::{Progress, ProgressTracker};
pub use result::{BatchReport, DispatchResult, DispatchStatus};
pub use retry::{ExponentialBackoffCalculator, RetryPolicy};
pub use sanitize::{KPI_FIELDS, KpiRow, extract_kpis, parse_lenient};
pub use summary::SummaryWriter;
