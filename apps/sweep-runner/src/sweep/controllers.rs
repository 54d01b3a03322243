//! Controller normalization.
//!
//! Generic fix-ups apply to every configuration (spread lists, amount
//! allocation, candle windows). Controller-specific fix-ups are looked up by
//! `controller_name` in an explicit registry populated at startup.

use std::collections::HashMap;

use serde_json::{Value, json};

use super::ParamMap;
use super::meta::TimeWindow;

/// Per-controller adjustment applied after the generic fix-ups.
pub type FixUp = fn(&mut ParamMap);

/// Spread keys paired with their amount allocation keys.
const SPREAD_AMOUNT_PAIRS: [(&str, &str); 2] = [
    ("buy_spreads", "buy_amounts_pct"),
    ("sell_spreads", "sell_amounts_pct"),
];

/// Registry of controller fix-ups keyed by lowercase `controller_name`.
#[derive(Debug, Clone)]
pub struct ControllerRegistry {
    fixups: HashMap<String, FixUp>,
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("dman_maker_v2", ensure_activation_bounds);
        registry
    }
}

impl ControllerRegistry {
    /// A registry with no controller-specific fix-ups.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            fixups: HashMap::new(),
        }
    }

    /// Register (or replace) the fix-up for a controller name.
    pub fn register(&mut self, controller_name: &str, fixup: FixUp) {
        self.fixups.insert(controller_name.to_lowercase(), fixup);
    }

    /// Whether a controller has a registered fix-up.
    #[must_use]
    pub fn contains(&self, controller_name: &str) -> bool {
        self.fixups.contains_key(&controller_name.to_lowercase())
    }

    /// Normalize one configuration in place.
    pub fn normalize(&self, label: &str, config: &mut ParamMap, window: TimeWindow) {
        for (spreads, amounts) in SPREAD_AMOUNT_PAIRS {
            normalize_levels(label, config, spreads, amounts);
        }
        fill_candle_windows(config, window);

        let name = config
            .get("controller_name")
            .and_then(Value::as_str)
            .map(str::to_lowercase);
        if let Some(fixup) = name.and_then(|n| self.fixups.get(&n)) {
            fixup(config);
        }
    }
}

fn ensure_activation_bounds(config: &mut ParamMap) {
    config
        .entry("executor_activation_bounds")
        .or_insert_with(|| Value::Array(Vec::new()));
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        scalar => vec![scalar.clone()],
    }
}

fn equal_allocation(levels: usize) -> Vec<Value> {
    let share = (1.0 / levels as f64 * 1e6).round() / 1e6;
    vec![json!(share); levels]
}

fn normalize_levels(label: &str, config: &mut ParamMap, spreads_key: &str, amounts_key: &str) {
    let mut spreads = match config.get(spreads_key) {
        None | Some(Value::Null) => return,
        Some(value) => as_list(value),
    };

    let given = config.get(amounts_key).filter(|v| !v.is_null());
    let had_amounts = given.is_some();
    let mut amounts = match given {
        Some(value) => as_list(value),
        None if !spreads.is_empty() => equal_allocation(spreads.len()),
        None => Vec::new(),
    };

    if !amounts.is_empty() && amounts.len() != spreads.len() {
        let levels = spreads.len().min(amounts.len());
        tracing::warn!(
            label,
            spreads_key,
            spreads = spreads.len(),
            amounts = amounts.len(),
            kept = levels,
            "Spread/amount level mismatch, trimming to shorter list"
        );
        spreads.truncate(levels);
        amounts.truncate(levels);
    }

    config.insert(spreads_key.to_string(), Value::Array(spreads));
    // Supplied amounts are always rewritten, even when trimmed to nothing.
    if had_amounts || !amounts.is_empty() {
        config.insert(amounts_key.to_string(), Value::Array(amounts));
    }
}

fn fill_candle_windows(config: &mut ParamMap, window: TimeWindow) {
    let Some(Value::Array(entries)) = config.get_mut("candles_config") else {
        return;
    };
    for entry in entries.iter_mut() {
        if let Value::Object(candles) = entry {
            candles
                .entry("start_time")
                .or_insert_with(|| json!(window.start_time));
            candles
                .entry("end_time")
                .or_insert_with(|| json!(window.end_time));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: TimeWindow = TimeWindow {
        start_time: 1_710_115_200,
        end_time: 1_710_288_000,
    };

    fn config(value: Value) -> ParamMap {
        match value {
            Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_scalar_spreads_become_lists_with_equal_amounts() {
        let mut cfg = config(json!({"buy_spreads": 0.01, "sell_spreads": [0.01, 0.02, 0.03]}));
        ControllerRegistry::default().normalize("t", &mut cfg, WINDOW);

        assert_eq!(cfg["buy_spreads"], json!([0.01]));
        assert_eq!(cfg["buy_amounts_pct"], json!([1.0]));
        assert_eq!(cfg["sell_amounts_pct"], json!([0.333_333, 0.333_333, 0.333_333]));
    }

    #[test]
    fn test_mismatched_levels_are_trimmed() {
        let mut cfg = config(json!({
            "buy_spreads": [0.01, 0.02, 0.03],
            "buy_amounts_pct": [0.5, 0.5]
        }));
        ControllerRegistry::default().normalize("t", &mut cfg, WINDOW);

        assert_eq!(cfg["buy_spreads"], json!([0.01, 0.02]));
        assert_eq!(cfg["buy_amounts_pct"], json!([0.5, 0.5]));
    }

    #[test]
    fn test_amounts_trimmed_to_empty_are_written_back() {
        let mut cfg = config(json!({"buy_spreads": [], "buy_amounts_pct": [0.5]}));
        ControllerRegistry::default().normalize("t", &mut cfg, WINDOW);

        assert_eq!(cfg["buy_spreads"], json!([]));
        assert_eq!(cfg["buy_amounts_pct"], json!([]));
        assert!(!cfg.contains_key("sell_amounts_pct"));
    }

    #[test]
    fn test_candles_config_gets_window() {
        let mut cfg = config(json!({
            "candles_config": [
                {"connector": "binance", "interval": "1m"},
                {"connector": "binance", "interval": "5m", "start_time": 1}
            ]
        }));
        ControllerRegistry::default().normalize("t", &mut cfg, WINDOW);

        assert_eq!(cfg["candles_config"][0]["start_time"], json!(WINDOW.start_time));
        assert_eq!(cfg["candles_config"][0]["end_time"], json!(WINDOW.end_time));
        assert_eq!(cfg["candles_config"][1]["start_time"], json!(1));
    }

    #[test]
    fn test_registered_fixup_runs_by_controller_name() {
        let mut cfg = config(json!({"controller_name": "DMAN_MAKER_V2"}));
        ControllerRegistry::default().normalize("t", &mut cfg, WINDOW);
        assert_eq!(cfg["executor_activation_bounds"], json!([]));

        let mut other = config(json!({"controller_name": "pmm_simple"}));
        ControllerRegistry::default().normalize("t", &mut other, WINDOW);
        assert!(!other.contains_key("executor_activation_bounds"));
    }

    #[test]
    fn test_custom_registration() {
        fn mark(cfg: &mut ParamMap) {
            cfg.insert("marked".to_string(), json!(true));
        }

        let mut registry = ControllerRegistry::empty();
        registry.register("Custom_Ctrl", mark);
        assert!(registry.contains("custom_ctrl"));

        let mut cfg = config(json!({"controller_name": "custom_ctrl"}));
        registry.normalize("t", &mut cfg, WINDOW);
        assert_eq!(cfg["marked"], json!(true));
    }
}
