//! Grid/Sweep Expander.
//!
//! Turns a [`SweepDefinition`] into an ordered list of
//! [`GeneratedConfiguration`] records. Expansion is pure and deterministic:
//! identical input gives identical output, labels included. File I/O only
//! happens at the edges (reading sweep files and blueprints, writing the
//! payload file).
//!
//! # Example
//!
//! ```rust,ignore
//! use sweep_runner::sweep::{SweepDefinition, expand};
//!
//! let def = SweepDefinition::from_yaml_str(
//!     "base: {stop_loss: 0.02}\nsweep: {stop_loss: [0.01, 0.03, 0.05]}",
//!     Some("pmm_dynamic_2_sweep"),
//! )?;
//! let configs = expand(&def)?;
//! assert_eq!(configs[0].label, "pmm_dynamic_2_sweep#1#stop_loss=0.01");
//! ```

pub mod controllers;
pub mod definition;
pub mod discovery;
pub mod error;
pub mod expander;
pub mod grid;
pub mod label;
pub mod meta;
pub mod payload;
pub mod schema;

/// Ordered JSON object used for controller configs.
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

pub use controllers::ControllerRegistry;
pub use definition::SweepDefinition;
pub use discovery::{
    LintReport, discover_sweep_files, lint_paths, load_meta_overrides, load_sweeps,
};
pub use error::SweepError;
pub use expander::{ExpandOptions, Expander, GeneratedConfiguration, Origin, expand};
pub use grid::ParameterGrid;
pub use meta::{Meta, TimeWindow};
pub use payload::{read_payloads, write_payloads};
pub use schema::Blueprint;
