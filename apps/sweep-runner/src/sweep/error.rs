//! Error types for sweep definition parsing and expansion.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading, validating, or expanding a sweep definition.
///
/// Every variant names the offending key (and label, when one exists yet)
/// so a failing file can be fixed without guesswork.
#[derive(Debug, Error)]
pub enum SweepError {
    /// The document root is not a mapping.
    #[error("sweep definition must be a mapping with meta/base/grid/sweep sections")]
    NotAMapping,

    /// A top-level key outside the known sections.
    #[error("unknown top-level section '{key}' (expected name, meta, base, grid, sweep)")]
    UnknownSection {
        /// The unexpected key.
        key: String,
    },

    /// `base` section is absent.
    #[error("sweep definition has no 'base' section")]
    MissingBase,

    /// `base` section is present but has no keys.
    #[error("'base' section is empty")]
    EmptyBase,

    /// A section that must be a mapping holds something else.
    #[error("section '{section}' must be a mapping")]
    SectionNotAMapping {
        /// Section name.
        section: &'static str,
    },

    /// An axis in `grid` or `sweep` is not a list of candidates.
    #[error("{section}.{key} must be a list of candidate values")]
    AxisNotASequence {
        /// Section name (`grid` or `sweep`).
        section: &'static str,
        /// Parameter name.
        key: String,
    },

    /// An axis in `grid` or `sweep` has no candidates.
    #[error("{section}.{key} has an empty candidate list")]
    EmptyCandidates {
        /// Section name (`grid` or `sweep`).
        section: &'static str,
        /// Parameter name.
        key: String,
    },

    /// A meta field could not be interpreted.
    #[error("invalid meta.{field}: {reason}")]
    InvalidMeta {
        /// Meta field name.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The backtest window does not run forward in time.
    #[error("invalid window{}: start {start} must be before end {end}", .context.as_deref().map(|c| format!(" for '{c}'")).unwrap_or_default())]
    InvalidWindow {
        /// Start date as written.
        start: String,
        /// End date as written.
        end: String,
        /// Label of the configuration, when the window came from an override.
        context: Option<String>,
    },

    /// Two configurations received the same label.
    #[error("duplicate label '{label}'")]
    DuplicateLabel {
        /// The colliding label.
        label: String,
    },

    /// Two distinct labels map to the same artifact file name.
    #[error("labels '{first}' and '{second}' share artifact key '{key}'")]
    DuplicateArtifactKey {
        /// The shared artifact key.
        key: String,
        /// Label registered first.
        first: String,
        /// Label that collided.
        second: String,
    },

    /// A configuration does not fit its controller blueprint.
    #[error("configuration '{label}': key '{key}' {reason}")]
    SchemaViolation {
        /// Configuration label.
        label: String,
        /// Offending key.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Blueprint has no entry for the configuration's controller.
    #[error("configuration '{label}': unknown controller {controller_type}/{controller_name}")]
    UnknownController {
        /// Configuration label.
        label: String,
        /// Controller type from the configuration.
        controller_type: String,
        /// Controller name from the configuration.
        controller_name: String,
    },

    /// A payload file failed structural checks after loading.
    #[error("invalid payload file '{}': {reason}", .path.display())]
    InvalidPayload {
        /// Payload file path.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// YAML could not be parsed.
    #[error("failed to parse YAML{}: {source}", .path.as_ref().map(|p| format!(" '{}'", p.display())).unwrap_or_default())]
    Yaml {
        /// Source file, when known.
        path: Option<PathBuf>,
        /// Parser error.
        source: serde_yaml_bw::Error,
    },

    /// JSON could not be parsed or produced.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error at the expander boundary.
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

impl SweepError {
    /// Wrap an I/O error with the path it concerns.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
