//! Sweep definition parsing and structural validation.
//!
//! A sweep file is a YAML mapping:
//!
//! ```yaml
//! name: pmm_dynamic_2_sweep      # optional
//! meta: { start: 2024-03-11, end: 2024-03-13, resolution: 3m, fee: 0.001 }
//! base: { controller_name: pmm_dynamic_2, buy_spreads: 0.001, ... }
//! grid: { buy_spreads: [0.001, 0.002], sell_spreads: [0.001, 0.002] }
//! sweep: { stop_loss: [0.01, 0.03, 0.05] }
//! ```
//!
//! Axes keep their source order; that order drives expansion order.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;

use super::ParamMap;
use super::error::SweepError;
use super::meta::{Meta, is_reserved};

/// Top-level keys accepted in a sweep file.
const SECTIONS: [&str; 5] = ["name", "meta", "base", "grid", "sweep"];

/// Ordered parameter axes: parameter name to candidate values.
pub type Axes = IndexMap<String, Vec<Value>>;

/// A validated sweep definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepDefinition {
    /// Sweep source name used as the label prefix.
    pub name: String,
    /// Scan-wide constants.
    pub meta: Meta,
    /// Default controller configuration.
    pub base: ParamMap,
    /// Cartesian axes.
    pub grid: Axes,
    /// Univariate axes.
    pub sweep: Axes,
}

impl SweepDefinition {
    /// Parse a definition from YAML text.
    ///
    /// `fallback_name` is used when the document has no `name` key; after
    /// that the name falls back to `base.controller_name`, then `sweep`.
    pub fn from_yaml_str(text: &str, fallback_name: Option<&str>) -> Result<Self, SweepError> {
        let root: Value = serde_yaml_bw::from_str(text)
            .map_err(|source| SweepError::Yaml { path: None, source })?;
        Self::from_value(root, fallback_name)
    }

    /// Load a definition from a file; the file stem is the fallback name.
    pub fn from_path(path: &Path) -> Result<Self, SweepError> {
        let text = std::fs::read_to_string(path).map_err(|e| SweepError::io(path, e))?;
        let root: Value = serde_yaml_bw::from_str(&text).map_err(|source| SweepError::Yaml {
            path: Some(path.to_path_buf()),
            source,
        })?;
        let stem = super::discovery::sweep_name_from_path(path);
        Self::from_value(root, stem.as_deref())
    }

    /// Validate an already-parsed document.
    pub fn from_value(root: Value, fallback_name: Option<&str>) -> Result<Self, SweepError> {
        let Value::Object(mut root) = root else {
            return Err(SweepError::NotAMapping);
        };

        if let Some(key) = root.keys().find(|k| !SECTIONS.contains(&k.as_str())) {
            return Err(SweepError::UnknownSection { key: key.clone() });
        }

        let base = match root.remove("base") {
            None | Some(Value::Null) => return Err(SweepError::MissingBase),
            Some(Value::Object(map)) if map.is_empty() => return Err(SweepError::EmptyBase),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(SweepError::SectionNotAMapping { section: "base" }),
        };

        let meta = match section_map(&mut root, "meta")? {
            Some(map) => Meta::from_map(&map)?,
            None => Meta::default(),
        };

        let grid = parse_axes(section_map(&mut root, "grid")?, "grid")?;
        let sweep = parse_axes(section_map(&mut root, "sweep")?, "sweep")?;

        let name = match root.remove("name") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_) | Value::Null) | None => resolve_name(fallback_name, &base),
            Some(other) => {
                return Err(SweepError::InvalidMeta {
                    field: "name".to_string(),
                    reason: format!("expected a string, got {other}"),
                });
            }
        };

        Ok(Self {
            name,
            meta,
            base,
            grid,
            sweep,
        })
    }

    /// Apply a meta-overrides mapping: reserved keys replace `meta`
    /// fields, every other key replaces the same key in `base`.
    pub fn apply_overrides(&mut self, overrides: &ParamMap) -> Result<(), SweepError> {
        for (key, value) in overrides {
            if is_reserved(key) {
                self.meta.set(key, value)?;
            } else {
                self.base.insert(key.clone(), value.clone());
            }
        }
        self.meta.check_window(None)
    }

    /// `controller_type` from `base`, lowercased.
    #[must_use]
    pub fn controller_type(&self) -> Option<String> {
        self.base
            .get("controller_type")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
    }

    /// Number of configurations this definition expands to.
    #[must_use]
    pub fn expected_count(&self) -> usize {
        let grid = if self.grid.is_empty() {
            0
        } else {
            self.grid.values().map(Vec::len).product()
        };
        let sweep: usize = self.sweep.values().map(Vec::len).sum();
        (grid + sweep).max(1)
    }

    /// Grid keys followed by sweep keys not already in the grid.
    #[must_use]
    pub fn varied_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.grid.keys().map(String::as_str).collect();
        for key in self.sweep.keys() {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
        keys
    }
}

fn resolve_name(fallback: Option<&str>, base: &ParamMap) -> String {
    fallback
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            base.get("controller_name")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "sweep".to_string())
}

fn section_map(root: &mut ParamMap, section: &'static str) -> Result<Option<ParamMap>, SweepError> {
    match root.remove(section) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(SweepError::SectionNotAMapping { section }),
    }
}

fn parse_axes(map: Option<ParamMap>, section: &'static str) -> Result<Axes, SweepError> {
    let mut axes = Axes::new();
    for (key, value) in map.unwrap_or_default() {
        let Value::Array(values) = value else {
            return Err(SweepError::AxisNotASequence { section, key });
        };
        if values.is_empty() {
            return Err(SweepError::EmptyCandidates { section, key });
        }
        axes.insert(key, values);
    }
    Ok(axes)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_full_definition() {
        let yaml = r"
meta:
  start: 2024-03-11
  end: 2024-03-13
  resolution: 1m
  fee: 0.0004
base:
  controller_name: pmm_dynamic_2
  buy_spreads: 0.001
grid:
  buy_spreads: [0.001, 0.002]
  sell_spreads: [0.001, 0.002]
sweep:
  stop_loss: [0.01, 0.03]
";
        let def = SweepDefinition::from_yaml_str(yaml, Some("pmm_dynamic_2_sweep")).unwrap();

        assert_eq!(def.name, "pmm_dynamic_2_sweep");
        assert_eq!(def.meta.resolution, "1m");
        assert_eq!(
            def.grid.keys().collect::<Vec<_>>(),
            vec!["buy_spreads", "sell_spreads"]
        );
        assert_eq!(def.sweep["stop_loss"], vec![json!(0.01), json!(0.03)]);
        assert_eq!(def.expected_count(), 6);
        assert_eq!(def.varied_keys(), vec!["buy_spreads", "sell_spreads", "stop_loss"]);
    }

    #[test]
    fn test_missing_base() {
        let err = SweepDefinition::from_yaml_str("grid: {a: [1]}", None).unwrap_err();
        assert!(matches!(err, SweepError::MissingBase));
    }

    #[test]
    fn test_empty_base() {
        let err = SweepDefinition::from_yaml_str("base: {}", None).unwrap_err();
        assert!(matches!(err, SweepError::EmptyBase));
    }

    #[test]
    fn test_scalar_axis_is_rejected() {
        let err = SweepDefinition::from_yaml_str("base: {a: 1}\ngrid: {a: 2}", None).unwrap_err();
        match err {
            SweepError::AxisNotASequence { section, key } => {
                assert_eq!(section, "grid");
                assert_eq!(key, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_candidates_name_key() {
        let err = SweepDefinition::from_yaml_str("base: {a: 1}\nsweep: {b: []}", None).unwrap_err();
        match err {
            SweepError::EmptyCandidates { section, key } => {
                assert_eq!(section, "sweep");
                assert_eq!(key, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_section_is_not_ignored() {
        let err = SweepDefinition::from_yaml_str("base: {a: 1}\nswep: {a: [1]}", None).unwrap_err();
        assert!(matches!(err, SweepError::UnknownSection { ref key } if key == "swep"));
    }

    #[test]
    fn test_name_precedence() {
        let explicit = SweepDefinition::from_yaml_str(
            "name: custom\nbase: {controller_name: dman_v3}",
            Some("file_stem"),
        )
        .unwrap();
        assert_eq!(explicit.name, "custom");

        let stem =
            SweepDefinition::from_yaml_str("base: {controller_name: dman_v3}", Some("file_stem"))
                .unwrap();
        assert_eq!(stem.name, "file_stem");

        let controller =
            SweepDefinition::from_yaml_str("base: {controller_name: dman_v3}", None).unwrap();
        assert_eq!(controller.name, "dman_v3");

        let fallback = SweepDefinition::from_yaml_str("base: {a: 1}", None).unwrap();
        assert_eq!(fallback.name, "sweep");
    }

    #[test]
    fn test_apply_overrides_splits_meta_and_base() {
        let mut def = SweepDefinition::from_yaml_str("base: {a: 1, b: 2}", None).unwrap();
        let overrides = match json!({"end": "2024-04-01", "b": 3, "c": "x"}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };

        def.apply_overrides(&overrides).unwrap();

        assert_eq!(def.meta.end.to_string(), "2024-04-01");
        assert_eq!(def.base["b"], json!(3));
        assert_eq!(def.base["c"], json!("x"));
        assert!(!def.base.contains_key("end"));
    }

    #[test]
    fn test_list_of_lists_axis_keeps_outer_elements() {
        let def = SweepDefinition::from_yaml_str(
            "base: {dca_spreads: [0.01]}\ngrid:\n  dca_spreads: [[0.01, 0.02], [0.02, 0.04]]",
            None,
        )
        .unwrap();
        assert_eq!(def.grid["dca_spreads"].len(), 2);
        assert_eq!(def.expected_count(), 2);
    }
}
