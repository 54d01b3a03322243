//! Label encoding and artifact key registry.

use std::collections::HashMap;

use serde_json::Value;

use super::error::SweepError;

/// Longest value encoding kept in a label before truncation.
pub const MAX_ENCODING_LEN: usize = 64;

/// Marker appended to a truncated encoding.
const TRUNCATION_MARK: char = '~';

/// Encoding used for the unmodified base configuration.
pub const BASE_ENCODING: &str = "base";

/// Render a value for a label: strings verbatim, everything else compact JSON.
#[must_use]
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Encode the overridden parameters of one configuration.
#[must_use]
pub fn encode_overrides(overrides: &[(String, Value)]) -> String {
    if overrides.is_empty() {
        return BASE_ENCODING.to_string();
    }

    let encoded = overrides
        .iter()
        .map(|(k, v)| format!("{k}={}", encode_value(v)))
        .collect::<Vec<_>>()
        .join(",");

    if encoded.chars().count() <= MAX_ENCODING_LEN {
        encoded
    } else {
        let mut truncated: String = encoded.chars().take(MAX_ENCODING_LEN - 1).collect();
        truncated.push(TRUNCATION_MARK);
        truncated
    }
}

/// Build a label: `<name>#<ordinal>#<encoding>`.
#[must_use]
pub fn make_label(name: &str, ordinal: usize, encoding: &str) -> String {
    format!("{name}#{ordinal}#{encoding}")
}

/// File-system safe key for a label.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`.
#[must_use]
pub fn artifact_key(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Tracks labels and artifact keys handed out within one expansion.
#[derive(Debug, Clone, Default)]
pub struct LabelRegistry {
    keys: HashMap<String, String>,
    labels: HashMap<String, String>,
}

impl LabelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `label`, returning its artifact key.
    ///
    /// Fails on a repeated label, or on a new label whose artifact key is
    /// already taken by another label.
    pub fn register(&mut self, label: &str) -> Result<String, SweepError> {
        if self.labels.contains_key(label) {
            return Err(SweepError::DuplicateLabel {
                label: label.to_string(),
            });
        }

        let key = artifact_key(label);
        if let Some(first) = self.keys.get(&key) {
            return Err(SweepError::DuplicateArtifactKey {
                key,
                first: first.clone(),
                second: label.to_string(),
            });
        }

        self.keys.insert(key.clone(), label.to_string());
        self.labels.insert(label.to_string(), key.clone());
        Ok(key)
    }

    /// Number of registered labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
