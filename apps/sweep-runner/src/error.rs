//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::sweep::SweepError;

/// Any failure surfaced by the runner.
#[derive(Debug, Error)]
pub enum Error {
    /// Runner configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A sweep definition could not be expanded.
    #[error(transparent)]
    Sweep(#[from] SweepError),

    /// A batch could not be dispatched.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Result alias using the crate [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
