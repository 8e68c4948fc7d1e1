//! Solver-agnostic optimization model document.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ExportConfig;
use crate::error::{Error, Result};
use crate::graph::{HypothesesGraph, TraxelStore};
use crate::model::energy::CostModel;

/// Solver knobs carried in the `settings` block of the model document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportSettings {
    pub states_share_weights: bool,
    pub allow_partial_merger_appearance: bool,
    pub require_separate_children_of_division: bool,
    /// Relative MIP gap at which the optimizer stops.
    pub optimizer_ep_gap: f64,
    pub optimizer_verbose: bool,
    pub optimizer_num_threads: usize,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            states_share_weights: true,
            allow_partial_merger_appearance: false,
            require_separate_children_of_division: true,
            optimizer_ep_gap: 0.01,
            optimizer_verbose: true,
            optimizer_num_threads: 1,
        }
    }
}

impl ExportSettings {
    pub fn validate(&self) -> Result<()> {
        if self.optimizer_num_threads == 0 {
            return Err(Error::config("optimizerNumThreads must be at least 1"));
        }
        if !(self.optimizer_ep_gap.is_finite() && self.optimizer_ep_gap >= 0.0) {
            return Err(Error::config(format!(
                "optimizerEpGap must be finite and non-negative, got {}",
                self.optimizer_ep_gap
            )));
        }
        Ok(())
    }
}

/// Cost vector in document form: one single-element list per state.
pub type Features = Vec<[f64; 1]>;

fn to_features(costs: &[f64]) -> Features {
    costs.iter().map(|&c| [c]).collect()
}

/// Node record of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentationHypothesis {
    pub id: usize,
    pub features: Features,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division_features: Option<Features>,
    pub appearance_features: Features,
    pub disappearance_features: Features,
    /// `[first, last]` timestep covered by the node.
    pub timestep: [u32; 2],
}

/// Arc record of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingHypothesis {
    pub src: usize,
    pub dest: usize,
    pub features: Features,
}

/// Input of the external ILP solver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDocument {
    /// timestep -> traxel id -> node id
    #[serde(default)]
    pub traxel_to_unique_id: BTreeMap<u32, BTreeMap<u32, usize>>,
    pub segmentation_hypotheses: Vec<SegmentationHypothesis>,
    pub linking_hypotheses: Vec<LinkingHypothesis>,
    /// Reserved, always empty.
    #[serde(default)]
    pub exclusions: Vec<Vec<usize>>,
    pub settings: ExportSettings,
}

impl ModelDocument {
    /// Node id owning a traxel.
    pub fn unique_id(&self, timestep: u32, id: u32) -> Option<usize> {
        self.traxel_to_unique_id.get(&timestep)?.get(&id).copied()
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }
}

/// Turns a cost-annotated graph into a [`ModelDocument`].
#[derive(Debug, Clone)]
pub struct ModelExporter {
    config: ExportConfig,
}

impl ModelExporter {
    pub fn new(config: &ExportConfig) -> Result<Self> {
        config.settings.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    /// Node ids of the document equal graph node indices.
    pub fn export(
        &self,
        graph: &HypothesesGraph,
        store: &TraxelStore,
        costs: &CostModel,
    ) -> Result<ModelDocument> {
        if costs.nodes.len() != graph.node_count() || costs.links.len() != graph.link_count() {
            return Err(Error::invariant(format!(
                "cost model covers {} nodes and {} links, graph has {} and {}",
                costs.nodes.len(),
                costs.links.len(),
                graph.node_count(),
                graph.link_count()
            )));
        }

        let mut convexified;
        let costs = if self.config.convexify {
            convexified = costs.clone();
            convexified.convexify();
            &convexified
        } else {
            costs
        };

        let mut traxel_to_unique_id: BTreeMap<u32, BTreeMap<u32, usize>> = BTreeMap::new();
        let mut segmentation_hypotheses = Vec::with_capacity(graph.node_count());
        for ((id, node), node_costs) in graph.nodes().zip(&costs.nodes) {
            for &index in node.traxels() {
                let traxel = store.get(index);
                traxel_to_unique_id
                    .entry(traxel.timestep)
                    .or_default()
                    .insert(traxel.id, id.0);
            }
            segmentation_hypotheses.push(SegmentationHypothesis {
                id: id.0,
                features: to_features(&node_costs.detection),
                division_features: node_costs.division.as_deref().map(to_features),
                appearance_features: to_features(&node_costs.appearance),
                disappearance_features: to_features(&node_costs.disappearance),
                timestep: [node.start(), node.end()],
            });
        }

        let linking_hypotheses = graph
            .links()
            .zip(&costs.links)
            .map(|((_, link), link_costs)| LinkingHypothesis {
                src: link.source.0,
                dest: link.target.0,
                features: to_features(link_costs),
            })
            .collect::<Vec<_>>();

        tracing::info!(
            "exported model: {} segmentation and {} linking hypotheses",
            segmentation_hypotheses.len(),
            linking_hypotheses.len()
        );
        Ok(ModelDocument {
            traxel_to_unique_id,
            segmentation_hypotheses,
            linking_hypotheses,
            exclusions: Vec::new(),
            settings: self.config.settings.clone(),
        })
    }
}
