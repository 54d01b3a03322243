//! Parameter grid for Cartesian expansion.
//!
//! Axes are kept in insertion order and the first axis varies slowest, so
//! `{a: [1, 2], b: [10, 20]}` yields `(1,10), (1,20), (2,10), (2,20)`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One grid combination: `(parameter, value)` pairs in axis order.
pub type Combination = Vec<(String, Value)>;

/// A parameter grid over JSON candidate values.
///
/// Candidate values are atomic: a list-valued candidate is one value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    parameters: IndexMap<String, Vec<Value>>,
}

impl ParameterGrid {
    /// Create a new parameter grid builder.
    #[must_use]
    pub fn builder() -> ParameterGridBuilder {
        ParameterGridBuilder::new()
    }

    /// Build a grid directly from ordered axes.
    #[must_use]
    pub const fn from_axes(parameters: IndexMap<String, Vec<Value>>) -> Self {
        Self { parameters }
    }

    /// Get the total number of parameter combinations.
    ///
    /// An empty grid has no combinations.
    #[must_use]
    pub fn total_combinations(&self) -> usize {
        if self.parameters.is_empty() {
            return 0;
        }
        self.parameters.values().map(Vec::len).product()
    }

    /// Generate all parameter combinations in deterministic order.
    #[must_use]
    pub fn combinations(&self) -> Vec<Combination> {
        if self.is_empty() {
            return Vec::new();
        }

        let mut result: Vec<Combination> = vec![Vec::with_capacity(self.parameters.len())];

        for (param_name, values) in &self.parameters {
            let mut new_result = Vec::with_capacity(result.len() * values.len());
            for combo in &result {
                for value in values {
                    let mut new_combo = combo.clone();
                    new_combo.push((param_name.clone(), value.clone()));
                    new_result.push(new_combo);
                }
            }
            result = new_result;
        }

        result
    }

    /// Axis names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(String::as_str)
    }

    /// Check if grid is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_combinations() == 0
    }
}

/// Builder for parameter grids.
#[derive(Debug, Default)]
pub struct ParameterGridBuilder {
    parameters: IndexMap<String, Vec<Value>>,
}

impl ParameterGridBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an axis of arbitrary JSON values.
    #[must_use]
    pub fn add_param(mut self, name: &str, values: Vec<Value>) -> Self {
        self.parameters.insert(name.to_string(), values);
        self
    }

    /// Add float parameter values.
    #[must_use]
    pub fn add_float_param(self, name: &str, values: Vec<f64>) -> Self {
        self.add_param(name, values.into_iter().map(Value::from).collect())
    }

    /// Add string parameter values.
    #[must_use]
    pub fn add_string_param(self, name: &str, values: Vec<&str>) -> Self {
        self.add_param(name, values.into_iter().map(Value::from).collect())
    }

    /// Build the parameter grid.
    #[must_use]
    pub fn build(self) -> ParameterGrid {
        ParameterGrid {
            parameters: self.parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parameter_grid_builder() {
        let grid = ParameterGrid::builder()
            .add_string_param("interval", vec!["1m", "3m", "5m"])
            .add_float_param("stop_loss", vec![0.02, 0.05])
            .build();

        assert_eq!(grid.total_combinations(), 6);
        assert_eq!(grid.keys().collect::<Vec<_>>(), vec!["interval", "stop_loss"]);
    }

    #[test]
    fn test_parameter_grid_combinations_first_axis_slowest() {
        let grid = ParameterGrid::builder()
            .add_float_param("buy_spreads", vec![0.001, 0.002])
            .add_float_param("sell_spreads", vec![0.001, 0.002])
            .build();

        let pairs: Vec<(f64, f64)> = grid
            .combinations()
            .iter()
            .map(|c| (c[0].1.as_f64().unwrap(), c[1].1.as_f64().unwrap()))
            .collect();

        assert_eq!(
            pairs,
            vec![(0.001, 0.001), (0.001, 0.002), (0.002, 0.001), (0.002, 0.002)]
        );
    }

    #[test]
    fn test_list_values_are_atomic() {
        let grid = ParameterGrid::builder()
            .add_param("dca_spreads", vec![json!([0.01, 0.02]), json!([0.02, 0.04, 0.08])])
            .build();

        let combos = grid.combinations();
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[1][0].1, json!([0.02, 0.04, 0.08]));
    }

    #[test]
    fn test_empty_grid_has_no_combinations() {
        let grid = ParameterGrid::default();
        assert!(grid.is_empty());
        assert!(grid.combinations().is_empty());
    }
}
