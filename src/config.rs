//! Run configuration, carried explicitly through every pipeline stage.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::TraxelFilter;
use crate::model::ExportSettings;
use crate::solution::{SolverConfig, Weights};

/// Hypotheses graph construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Number of nearest neighbours linked per traxel (`k`).
    pub max_nearest_neighbors: usize,
    /// Maximum distance between linked traxels of consecutive frames.
    pub max_neighbor_distance: f64,
    pub with_divisions: bool,
    /// Division probability a traxel must exceed to become a division candidate.
    pub division_threshold: f64,
    /// Collapse unambiguous chains into tracklet nodes.
    pub with_tracklets: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_nearest_neighbors: 1,
            max_neighbor_distance: 30.0,
            with_divisions: true,
            division_threshold: 0.1,
            with_tracklets: true,
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_nearest_neighbors < 1 {
            return Err(Error::config("max_nearest_neighbors must be at least 1"));
        }
        if !(self.max_neighbor_distance.is_finite() && self.max_neighbor_distance > 0.0) {
            return Err(Error::config(format!(
                "max_neighbor_distance must be positive, got {}",
                self.max_neighbor_distance
            )));
        }
        if !(0.0..=1.0).contains(&self.division_threshold) {
            return Err(Error::config(format!(
                "division_threshold must lie in [0, 1], got {}",
                self.division_threshold
            )));
        }
        Ok(())
    }
}

/// Energy model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Largest number of objects a single detection may represent (`K`).
    pub max_num_objects: usize,
    /// Length scale of the distance-based transition prior.
    pub transition_parameter: f64,
    /// Distance from the field-of-view border at which appearance and
    /// disappearance reach their full cost. `None` disables the ramp.
    pub border_margin: Option<f64>,
    pub appearance_cost: f64,
    pub disappearance_cost: f64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            max_num_objects: 2,
            transition_parameter: 5.0,
            border_margin: None,
            appearance_cost: 1.0,
            disappearance_cost: 1.0,
        }
    }
}

impl CostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_num_objects < 1 {
            return Err(Error::config("max_num_objects must be at least 1"));
        }
        if !(self.transition_parameter.is_finite() && self.transition_parameter > 0.0) {
            return Err(Error::config(format!(
                "transition_parameter must be positive, got {}",
                self.transition_parameter
            )));
        }
        if let Some(margin) = self.border_margin {
            if !(margin.is_finite() && margin > 0.0) {
                return Err(Error::config(format!(
                    "border_margin must be positive when set, got {margin}"
                )));
            }
        }
        for (name, cost) in [
            ("appearance_cost", self.appearance_cost),
            ("disappearance_cost", self.disappearance_cost),
        ] {
            if !(cost.is_finite() && cost >= 0.0) {
                return Err(Error::config(format!(
                    "{name} must be finite and non-negative, got {cost}"
                )));
            }
        }
        Ok(())
    }

    /// Length of every state-indexed cost vector (`K + 1`).
    #[inline]
    pub fn num_states(&self) -> usize {
        self.max_num_objects + 1
    }
}

/// Model export options.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub settings: ExportSettings,
    /// Replace every cost vector by its lower convex envelope.
    pub convexify: bool,
}

/// Result file naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Digits used for the per-frame file names.
    pub zero_padding: usize,
    /// Write `man_track*` ground-truth style names instead of `mask*`/`res_track`.
    pub ground_truth: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            zero_padding: 3,
            ground_truth: false,
        }
    }
}

/// Complete configuration of a tracking run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub graph: GraphConfig,
    pub costs: CostConfig,
    pub filter: TraxelFilter,
    pub export: ExportConfig,
    pub weights: Weights,
    pub solver: SolverConfig,
    pub output: OutputConfig,
}

impl TrackingConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section; called before any graph work starts.
    pub fn validate(&self) -> Result<()> {
        self.graph.validate()?;
        self.costs.validate()?;
        self.filter.validate()?;
        self.export.settings.validate()?;
        self.weights.validate()?;
        self.solver.validate()?;
        if self.output.zero_padding == 0 {
            return Err(Error::config("output.zero_padding must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        TrackingConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_neighbors() {
        let mut config = TrackingConfig::default();
        config.graph.max_nearest_neighbors = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_non_positive_distance_and_margin() {
        let mut graph = GraphConfig::default();
        graph.max_neighbor_distance = 0.0;
        assert!(matches!(graph.validate(), Err(Error::Configuration(_))));

        let mut costs = CostConfig::default();
        costs.border_margin = Some(-1.0);
        assert!(matches!(costs.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TrackingConfig =
            serde_json::from_str(r#"{"graph": {"max_nearest_neighbors": 4}}"#).unwrap();
        assert_eq!(config.graph.max_nearest_neighbors, 4);
        assert_eq!(config.graph.max_neighbor_distance, 30.0);
        assert_eq!(config.costs.num_states(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"costs": {"max_num_objects": 1, "border_margin": 10.0}}"#)
            .unwrap();
        let config = TrackingConfig::from_json_file(&path).unwrap();
        assert_eq!(config.costs.max_num_objects, 1);
        assert_eq!(config.costs.border_margin, Some(10.0));
    }
}
