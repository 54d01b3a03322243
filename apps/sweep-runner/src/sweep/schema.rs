//! Blueprint validation for generated configurations.
//!
//! A blueprint is a JSON document of the shape
//! `{controller_type: {controller_name: {key: default, ...}}}` listing every
//! key a controller config accepts together with its default value. Names
//! are matched case-insensitively.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde_json::Value;

use super::ParamMap;
use super::error::SweepError;

/// Coarse JSON kind used for type compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// `null`.
    Null,
    /// `true`/`false`.
    Bool,
    /// Integer or float.
    Number,
    /// Text.
    String,
    /// Array.
    List,
    /// Object.
    Map,
}

impl ValueKind {
    /// Kind of a JSON value.
    #[must_use]
    pub const fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::List,
            Value::Object(_) => Self::Map,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::List => "list",
            Self::Map => "map",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controller blueprints keyed by `(controller_type, controller_name)`.
#[derive(Debug, Clone, Default)]
pub struct Blueprint {
    controllers: HashMap<(String, String), ParamMap>,
}

impl Blueprint {
    /// Parse a blueprint document.
    pub fn from_json_str(text: &str) -> Result<Self, SweepError> {
        let root: Value = serde_json::from_str(text)?;
        Ok(Self::from_value(&root))
    }

    /// Load a blueprint file.
    pub fn load(path: &Path) -> Result<Self, SweepError> {
        let text = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
        let blueprint = Self::from_json_str(&text)?;
        tracing::debug!(
            path = %path.display(),
            controllers = blueprint.len(),
            "Loaded controller blueprint"
        );
        Ok(blueprint)
    }

    /// Build from a parsed document; entries that are not mappings are skipped.
    #[must_use]
    pub fn from_value(root: &Value) -> Self {
        let mut controllers = HashMap::new();
        if let Value::Object(types) = root {
            for (controller_type, names) in types {
                let Value::Object(names) = names else { continue };
                for (controller_name, template) in names {
                    if let Value::Object(template) = template {
                        controllers.insert(
                            (controller_type.to_lowercase(), controller_name.to_lowercase()),
                            template.clone(),
                        );
                    }
                }
            }
        }
        Self { controllers }
    }

    /// Number of known controllers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Whether the blueprint knows no controllers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Check one configuration against its controller template.
    pub fn validate(&self, label: &str, config: &ParamMap) -> Result<(), SweepError> {
        let field = |key: &str| {
            config
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let controller_type = field("controller_type");
        let controller_name = field("controller_name");

        let Some(template) = self
            .controllers
            .get(&(controller_type.to_lowercase(), controller_name.to_lowercase()))
        else {
            return Err(SweepError::UnknownController {
                label: label.to_string(),
                controller_type,
                controller_name,
            });
        };

        for (key, default) in template {
            let violation = |reason: String| SweepError::SchemaViolation {
                label: label.to_string(),
                key: key.clone(),
                reason,
            };

            let Some(actual) = config.get(key) else {
                return Err(violation("is missing".to_string()));
            };

            let expected = ValueKind::of(default);
            if expected == ValueKind::Null {
                continue;
            }

            let found = ValueKind::of(actual);
            if found == ValueKind::Null {
                return Err(violation(format!("is null where {expected} is expected")));
            }
            if !compatible(expected, actual) {
                return Err(violation(format!("expected {expected}, found {found}")));
            }
        }

        Ok(())
    }
}

/// Numbers and numeric strings are interchangeable; decimal fields are
/// commonly written either way.
fn compatible(expected: ValueKind, actual: &Value) -> bool {
    match (expected, actual) {
        (ValueKind::Number, Value::String(s)) => s.trim().parse::<f64>().is_ok(),
        (ValueKind::String, Value::Number(_)) => true,
        _ => expected == ValueKind::of(actual),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn blueprint() -> Blueprint {
        Blueprint::from_value(&json!({
            "market_making": {
                "pmm_dynamic_2": {
                    "controller_type": "market_making",
                    "controller_name": "pmm_dynamic_2",
                    "buy_spreads": [0.01, 0.02],
                    "order_amount": "10",
                    "macd_fast": 12,
                    "candles_connector": null
                }
            }
        }))
    }

    fn config(value: Value) -> ParamMap {
        match value {
            Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    fn valid_config() -> ParamMap {
        config(json!({
            "controller_type": "market_making",
            "controller_name": "PMM_Dynamic_2",
            "buy_spreads": [0.01],
            "order_amount": 25,
            "macd_fast": "14",
            "candles_connector": null
        }))
    }

    #[test]
    fn test_valid_config_passes() {
        blueprint().validate("pmm#1#base", &valid_config()).unwrap();
    }

    #[test]
    fn test_missing_key_reported() {
        let mut cfg = valid_config();
        cfg.shift_remove("macd_fast");
        match blueprint().validate("pmm#1#base", &cfg).unwrap_err() {
            SweepError::SchemaViolation { label, key, reason } => {
                assert_eq!(label, "pmm#1#base");
                assert_eq!(key, "macd_fast");
                assert_eq!(reason, "is missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_null_where_typed_value_expected() {
        let mut cfg = valid_config();
        cfg.insert("buy_spreads".to_string(), Value::Null);
        let err = blueprint().validate("x", &cfg).unwrap_err();
        assert!(err.to_string().contains("is null where list is expected"));
    }

    #[test]
    fn test_kind_mismatch() {
        let mut cfg = valid_config();
        cfg.insert("buy_spreads".to_string(), json!({"a": 1}));
        let err = blueprint().validate("x", &cfg).unwrap_err();
        assert!(err.to_string().contains("expected list, found map"));
    }

    #[test]
    fn test_unknown_controller() {
        let mut cfg = valid_config();
        cfg.insert("controller_name".to_string(), json!("nope"));
        let err = blueprint().validate("x", &cfg).unwrap_err();
        assert!(matches!(err, SweepError::UnknownController { .. }));
    }
}
