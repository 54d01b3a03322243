// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Sweep Runner - Batch Backtest Orchestration Library
//!
//! Turns compact YAML parameter sweeps into concrete controller
//! configurations and runs them against an external backtesting endpoint.
//!
//! # Pipeline
//!
//! ```text
//! sweep YAML ──► sweep::expand ──► payload JSON ──► dispatch::Dispatcher ──► summary CSV
//!                                                                        └─► detail packets
//! ```
//!
//! ## Modules
//!
//! - **sweep**: the Grid/Sweep Expander
//!   - `definition`: YAML parsing and structural validation
//!   - `grid`: Cartesian product over grid axes
//!   - `expander`: deterministic expansion with labels and meta injection
//!   - `controllers`: explicit registry of per-controller fix-ups
//!   - `schema`: optional blueprint validation
//!   - `payload`, `discovery`: file boundary (payload handoff, sweep lookup, lint)
//!
//! - **dispatch**: the Batch Dispatcher
//!   - `port`: `BacktestPort` trait plus the reqwest adapter
//!   - `retry`: exponential backoff with jitter
//!   - `executor`: bounded worker pool over a shared queue
//!   - `summary`, `artifacts`: append-only summary and detail packet store
//!
//! - **config**, **telemetry**, **metrics**: ambient runner plumbing

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod dispatch;
pub mod sweep;

// =============================================================================
// Runner Plumbing
// =============================================================================

pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

mod atomic;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{RunnerConfig, load_config};
pub use dispatch::{
    BacktestPort, BatchReport, DispatchError, DispatchOptions, DispatchResult, DispatchStatus,
    Dispatcher, HttpBacktestClient,
};
pub use error::{Error, Result};
pub use sweep::{
    ExpandOptions, Expander, GeneratedConfiguration, SweepDefinition, SweepError, expand,
};
