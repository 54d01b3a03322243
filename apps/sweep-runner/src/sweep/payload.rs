//! Payload file: the JSON handoff between expansion and dispatch.

use std::collections::HashSet;
use std::path::Path;

use super::error::SweepError;
use super::expander::GeneratedConfiguration;
use crate::atomic::write_atomic;

/// Write configurations as a pretty JSON array, atomically.
pub fn write_payloads(path: &Path, configurations: &[GeneratedConfiguration]) -> Result<(), SweepError> {
    let mut bytes = serde_json::to_vec_pretty(configurations)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes).map_err(|e| SweepError::io(path, e))?;
    tracing::info!(
        path = %path.display(),
        configurations = configurations.len(),
        "Wrote payload file"
    );
    Ok(())
}

/// Load a payload file and check it is a coherent batch.
///
/// Indices must run `1..=n` in order; labels and artifact keys must be
/// unique.
pub fn read_payloads(path: &Path) -> Result<Vec<GeneratedConfiguration>, SweepError> {
    let text = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
    let configurations: Vec<GeneratedConfiguration> = serde_json::from_str(&text)?;

    let invalid = |reason: String| SweepError::InvalidPayload {
        path: path.to_path_buf(),
        reason,
    };

    let mut labels = HashSet::new();
    let mut keys = HashSet::new();
    for (position, cfg) in configurations.iter().enumerate() {
        if cfg.index != position + 1 {
            return Err(invalid(format!(
                "entry {} has index {}, expected {}",
                position,
                cfg.index,
                position + 1
            )));
        }
        if !labels.insert(cfg.label.as_str()) {
            return Err(invalid(format!("duplicate label '{}'", cfg.label)));
        }
        if !keys.insert(cfg.artifact_key.as_str()) {
            return Err(invalid(format!("duplicate artifact key '{}'", cfg.artifact_key)));
        }
    }

    Ok(configurations)
}
