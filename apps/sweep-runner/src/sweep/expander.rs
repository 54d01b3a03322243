//! Deterministic sweep expansion.
//!
//! One definition expands to:
//!
//! - one configuration per grid combination (Cartesian, axis order), then
//! - one configuration per sweep candidate (univariate, axis then list order),
//! - or, when both are empty, the single unmodified base configuration.
//!
//! Precedence inside a configuration, lowest first: `base`, non-reserved
//! `meta` keys, the configuration's grid/sweep overrides. The reserved meta
//! keys (`start`, `end`, `resolution`, `fee`) never live in the controller
//! config; they become request fields, and an axis over one of them
//! replaces the meta value for that configuration only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::ParamMap;
use super::controllers::ControllerRegistry;
use super::definition::SweepDefinition;
use super::error::SweepError;
use super::grid::ParameterGrid;
use super::label::{LabelRegistry, encode_overrides, make_label};
use super::meta::{RESERVED_META_KEYS, is_reserved};
use super::schema::Blueprint;

/// Which axis produced a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// Unmodified base (no grid, no sweep).
    Base,
    /// One grid combination.
    Grid,
    /// One candidate of a sweep parameter.
    Sweep {
        /// The swept parameter.
        parameter: String,
    },
}

/// One concrete, fully resolved test definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedConfiguration {
    /// 1-based position in the batch.
    pub index: usize,
    /// 1-based position within its source sweep.
    pub ordinal: usize,
    /// Unique, human-readable label.
    pub label: String,
    /// File-system safe form of the label.
    pub artifact_key: String,
    /// Source sweep name.
    pub sweep: String,
    /// Axis that produced this configuration.
    pub origin: Origin,
    /// Window start, Unix seconds.
    pub start_time: i64,
    /// Window end, Unix seconds.
    pub end_time: i64,
    /// Candle resolution.
    pub resolution: String,
    /// Trade cost.
    pub fee: f64,
    /// Value of every grid and sweep key in this configuration.
    pub sweep_params: ParamMap,
    /// Controller configuration sent to the endpoint.
    pub config: ParamMap,
}

impl GeneratedConfiguration {
    /// JSON body for the backtesting endpoint.
    #[must_use]
    pub fn request_body(&self) -> Value {
        json!({
            "start_time": self.start_time,
            "end_time": self.end_time,
            "backtesting_resolution": self.resolution,
            "trade_cost": self.fee,
            "config": self.config,
        })
    }
}

/// Expansion switches.
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    /// Apply controller normalization.
    pub normalize: bool,
    /// Fix-ups used when normalizing.
    pub controllers: ControllerRegistry,
    /// Validate each configuration against a blueprint.
    pub blueprint: Option<Arc<Blueprint>>,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            normalize: true,
            controllers: ControllerRegistry::default(),
            blueprint: None,
        }
    }
}

impl ExpandOptions {
    /// Options that copy overrides verbatim with no normalization or schema.
    #[must_use]
    pub fn raw() -> Self {
        Self {
            normalize: false,
            ..Self::default()
        }
    }

    /// Attach a blueprint for schema validation.
    #[must_use]
    pub fn with_blueprint(mut self, blueprint: Arc<Blueprint>) -> Self {
        self.blueprint = Some(blueprint);
        self
    }
}

/// Expand a single definition with default options.
pub fn expand(definition: &SweepDefinition) -> Result<Vec<GeneratedConfiguration>, SweepError> {
    Expander::new(ExpandOptions::default()).expand(definition)
}

/// Expands one or more definitions into a single batch.
///
/// Labels and artifact keys are checked for uniqueness across every
/// definition fed to the same expander; batch indices continue across
/// definitions.
#[derive(Debug)]
pub struct Expander {
    options: ExpandOptions,
    registry: LabelRegistry,
    next_index: usize,
}

impl Expander {
    /// Create an expander.
    #[must_use]
    pub fn new(options: ExpandOptions) -> Self {
        Self {
            options,
            registry: LabelRegistry::new(),
            next_index: 1,
        }
    }

    /// Number of configurations produced so far.
    #[must_use]
    pub const fn produced(&self) -> usize {
        self.next_index - 1
    }

    /// Expand one definition.
    ///
    /// On error the expander is left as it was before the call.
    pub fn expand(
        &mut self,
        definition: &SweepDefinition,
    ) -> Result<Vec<GeneratedConfiguration>, SweepError> {
        let variants = variants(definition);
        let base = self.base_config(definition);
        let varied = definition.varied_keys();
        let mut registry = self.registry.clone();
        let mut next_index = self.next_index;

        let mut out = Vec::with_capacity(variants.len());
        for (offset, (origin, overrides)) in variants.into_iter().enumerate() {
            let ordinal = offset + 1;
            let label = make_label(&definition.name, ordinal, &encode_overrides(&overrides));
            let artifact_key = registry.register(&label)?;

            let mut meta = definition.meta.clone();
            let mut config = base.clone();
            for (key, value) in &overrides {
                if is_reserved(key) {
                    meta.set(key, value)?;
                } else {
                    config.insert(key.clone(), value.clone());
                }
            }
            meta.check_window(Some(&label))?;
            let window = meta.window();

            if self.options.normalize {
                self.options.controllers.normalize(&label, &mut config, window);
            }
            if let Some(blueprint) = &self.options.blueprint {
                blueprint.validate(&label, &config)?;
            }

            let sweep_params = varied
                .iter()
                .map(|key| {
                    let value = config
                        .get(*key)
                        .cloned()
                        .or_else(|| meta.reserved_value(key))
                        .unwrap_or(Value::Null);
                    ((*key).to_string(), value)
                })
                .collect();

            out.push(GeneratedConfiguration {
                index: next_index,
                ordinal,
                label,
                artifact_key,
                sweep: definition.name.clone(),
                origin,
                start_time: window.start_time,
                end_time: window.end_time,
                resolution: meta.resolution.clone(),
                fee: meta.fee,
                sweep_params,
                config,
            });
            next_index += 1;
        }
        self.registry = registry;
        self.next_index = next_index;

        tracing::debug!(
            sweep = %definition.name,
            configurations = out.len(),
            grid_axes = definition.grid.len(),
            sweep_axes = definition.sweep.len(),
            "Expanded sweep definition"
        );

        Ok(out)
    }

    /// Base config with meta extras layered on and reserved keys removed.
    fn base_config(&self, definition: &SweepDefinition) -> ParamMap {
        let mut config = definition.base.clone();
        for key in RESERVED_META_KEYS {
            if config.shift_remove(key).is_some() {
                tracing::warn!(
                    sweep = %definition.name,
                    key,
                    "Ignoring reserved key in base; meta value applies"
                );
            }
        }
        for (key, value) in &definition.meta.extra {
            config.insert(key.clone(), value.clone());
        }
        config
    }
}

fn variants(definition: &SweepDefinition) -> Vec<(Origin, Vec<(String, Value)>)> {
    let mut variants: Vec<(Origin, Vec<(String, Value)>)> =
        ParameterGrid::from_axes(definition.grid.clone())
            .combinations()
            .into_iter()
            .map(|combo| (Origin::Grid, combo))
            .collect();

    for (parameter, values) in &definition.sweep {
        for value in values {
            variants.push((
                Origin::Sweep {
                    parameter: parameter.clone(),
                },
                vec![(parameter.clone(), value.clone())],
            ));
        }
    }

    if variants.is_empty() {
        variants.push((Origin::Base, Vec::new()));
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(yaml: &str) -> SweepDefinition {
        SweepDefinition::from_yaml_str(yaml, Some("test_sweep")).unwrap()
    }

    #[test]
    fn test_base_only_yields_single_configuration() {
        let def = definition("base: {controller_name: pmm_simple, leverage: 20}");
        let configs = expand(&def).unwrap();

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].origin, Origin::Base);
        assert_eq!(configs[0].label, "test_sweep#1#base");
        assert_eq!(configs[0].config, def.base);
        assert!(configs[0].sweep_params.is_empty());
    }

    #[test]
    fn test_grid_then_sweep_order_and_labels() {
        let def = definition(
            "base: {a: 1, b: 1, stop_loss: 0.02}\ngrid: {a: [1, 2], b: [10]}\nsweep: {stop_loss: [0.01, 0.03]}",
        );
        let labels: Vec<String> = expand(&def).unwrap().into_iter().map(|c| c.label).collect();

        assert_eq!(
            labels,
            vec![
                "test_sweep#1#a=1,b=10",
                "test_sweep#2#a=2,b=10",
                "test_sweep#3#stop_loss=0.01",
                "test_sweep#4#stop_loss=0.03",
            ]
        );
    }

    #[test]
    fn test_sweep_varies_one_parameter_at_a_time() {
        let def = definition("base: {x: 1, y: 1}\nsweep: {x: [2, 3], y: [4]}");
        let configs = expand(&def).unwrap();

        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].config["x"], json!(2));
        assert_eq!(configs[0].config["y"], json!(1));
        assert_eq!(configs[2].config["x"], json!(1));
        assert_eq!(configs[2].config["y"], json!(4));
        assert_eq!(
            configs[2].origin,
            Origin::Sweep {
                parameter: "y".to_string()
            }
        );
    }

    #[test]
    fn test_meta_fields_are_injected_and_take_precedence() {
        let def = definition(
            "meta: {start: 2024-03-11, end: 2024-03-13, resolution: 1m, fee: 0.0004, leverage: 5}\nbase: {fee: 0.5, leverage: 1, a: 1}",
        );
        let config = &expand(&def).unwrap()[0];

        assert_eq!(config.start_time, 1_710_115_200);
        assert_eq!(config.end_time, 1_710_288_000);
        assert_eq!(config.resolution, "1m");
        assert!((config.fee - 0.0004).abs() < f64::EPSILON);
        assert!(!config.config.contains_key("fee"));
        assert_eq!(config.config["leverage"], json!(5));
    }

    #[test]
    fn test_axis_over_window_field_changes_only_that_configuration() {
        let def = definition(
            "meta: {start: 2024-03-01, end: 2024-03-13}\nbase: {a: 1}\nsweep: {end: [2024-03-05, 2024-03-10]}",
        );
        let configs = expand(&def).unwrap();

        assert_eq!(configs[0].end_time, 1_709_596_800);
        assert_eq!(configs[1].end_time, 1_710_028_800);
        assert!(!configs[0].config.contains_key("end"));
        assert_eq!(configs[0].sweep_params["end"], json!("2024-03-05"));
    }

    #[test]
    fn test_axis_producing_inverted_window_fails_with_label() {
        let def = definition(
            "meta: {start: 2024-03-11, end: 2024-03-13}\nbase: {a: 1}\nsweep: {end: [2024-03-01]}",
        );
        match expand(&def).unwrap_err() {
            SweepError::InvalidWindow { context, .. } => {
                assert_eq!(context.as_deref(), Some("test_sweep#1#end=2024-03-01"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_expander_keeps_indices_and_labels_unique_across_definitions() {
        let mut expander = Expander::new(ExpandOptions::default());
        let first = expander.expand(&definition("base: {a: 1}\nsweep: {a: [1, 2]}")).unwrap();
        assert_eq!(first.last().map(|c| c.index), Some(2));

        let err = expander
            .expand(&definition("base: {a: 1}\nsweep: {a: [1]}"))
            .unwrap_err();
        assert!(matches!(err, SweepError::DuplicateLabel { .. }));
        assert_eq!(expander.produced(), 2);
    }

    #[test]
    fn test_failed_expansion_leaves_expander_unchanged() {
        let mut expander = Expander::new(ExpandOptions::default());
        let err = expander
            .expand(&definition(
                "meta: {start: 2024-03-11, end: 2024-03-13}\nbase: {a: 1}\nsweep: {end: [2024-03-12, 2024-03-01]}",
            ))
            .unwrap_err();
        assert!(matches!(err, SweepError::InvalidWindow { .. }));
        assert_eq!(expander.produced(), 0);

        let configs = expander
            .expand(&definition(
                "meta: {start: 2024-03-11, end: 2024-03-13}\nbase: {a: 1}\nsweep: {end: [2024-03-12]}",
            ))
            .unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].label, "test_sweep#1#end=2024-03-12");
        assert_eq!(configs[0].index, 1);
        assert_eq!(expander.produced(), 1);
    }

    #[test]
    fn test_normalization_can_be_disabled() {
        let def = definition("base: {buy_spreads: 0.01}");
        let raw = Expander::new(ExpandOptions::raw()).expand(&def).unwrap();
        assert_eq!(raw[0].config["buy_spreads"], json!(0.01));

        let normalized = expand(&def).unwrap();
        assert_eq!(normalized[0].config["buy_spreads"], json!([0.01]));
    }

    #[test]
    fn test_request_body_shape() {
        let def = definition("meta: {resolution: 1m, fee: 0.001}\nbase: {controller_name: pmm_simple}");
        let body = expand(&def).unwrap()[0].request_body();

        assert_eq!(body["backtesting_resolution"], json!("1m"));
        assert_eq!(body["trade_cost"], json!(0.001));
        assert_eq!(body["config"]["controller_name"], json!("pmm_simple"));
        assert!(body["start_time"].is_i64());
    }

    #[test]
    fn test_blueprint_violation_fails_expansion() {
        let blueprint = Blueprint::from_value(&json!({
            "generic": {"pmm_simple": {"controller_type": "generic", "controller_name": "pmm_simple", "leverage": 20}}
        }));
        let def = definition(
            "base: {controller_type: generic, controller_name: pmm_simple, leverage: 20}\nsweep: {leverage: [10, none]}",
        );
        let err = Expander::new(ExpandOptions::default().with_blueprint(Arc::new(blueprint)))
            .expand(&def)
            .unwrap_err();
        match err {
            SweepError::SchemaViolation { label, key, .. } => {
                assert_eq!(label, "test_sweep#2#leverage=none");
                assert_eq!(key, "leverage");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
