//! Energy model: state-indexed negative-log-probability cost vectors for
//! every node and link of a hypotheses graph.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::config::CostConfig;
use crate::error::{Error, Result};
use crate::graph::{
    FieldOfView, HypothesesGraph, LinkId, Node, NodeId, TimeRange, Traxel, TraxelStore,
};

/// Probabilities are clamped to this floor before taking the logarithm.
pub const PROBABILITY_FLOOR: f64 = 1e-10;

/// Element-wise `-ln(p)` with `p` clamped into `[PROBABILITY_FLOOR, 1]`.
pub fn neg_log(probabilities: &[f64]) -> Vec<f64> {
    probabilities
        .iter()
        .map(|&p| {
            let p = if p.is_nan() { PROBABILITY_FLOOR } else { p };
            -p.clamp(PROBABILITY_FLOOR, 1.0).ln()
        })
        .collect()
}

/// Trained transition classifier, supplied by the caller.
pub trait TransitionClassifier: Send + Sync {
    /// `[p(no transition), p(transition)]` for the pair, or `None` when no
    /// prediction is available for it.
    fn predict(&self, from: &Traxel, to: &Traxel) -> Option<[f64; 2]>;
}

/// Cost vectors of one node, each `K + 1` long except division (two states).
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCosts {
    pub detection: Vec<f64>,
    /// `[-ln(1 - p_div), -ln(p_div)]`, present only for division candidates.
    pub division: Option<Vec<f64>>,
    pub appearance: Vec<f64>,
    pub disappearance: Vec<f64>,
}

/// Costs for a whole graph, indexed like its nodes and links.
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    pub num_states: usize,
    pub nodes: Vec<NodeCosts>,
    pub links: Vec<Vec<f64>>,
}

impl CostModel {
    /// Apply `f` to every cost vector of the model.
    pub fn map_vectors(&mut self, mut f: impl FnMut(&mut Vec<f64>)) {
        for node in &mut self.nodes {
            f(&mut node.detection);
            if let Some(division) = node.division.as_mut() {
                f(division);
            }
            f(&mut node.appearance);
            f(&mut node.disappearance);
        }
        for link in &mut self.links {
            f(link);
        }
    }
}

/// Computes a [`CostModel`] from traxel features.
pub struct CostModelGenerator<'a> {
    config: CostConfig,
    store: &'a TraxelStore,
    fov: FieldOfView,
    classifier: Option<&'a dyn TransitionClassifier>,
    fallbacks: AtomicUsize,
}

impl<'a> CostModelGenerator<'a> {
    pub fn new(config: &CostConfig, store: &'a TraxelStore, fov: FieldOfView) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            store,
            fov,
            classifier: None,
            fallbacks: AtomicUsize::new(0),
        })
    }

    /// Use a trained classifier for transitions instead of the distance prior.
    pub fn with_classifier(mut self, classifier: &'a dyn TransitionClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Compute costs for every node and link. Any feature lookup failure
    /// aborts the whole computation.
    pub fn generate(&self, graph: &HypothesesGraph) -> Result<CostModel> {
        let num_states = self.config.num_states();
        let Some(range) = self.store.time_range() else {
            if graph.node_count() > 0 {
                return Err(Error::invariant("graph has nodes but the traxel store is empty"));
            }
            return Ok(CostModel {
                num_states,
                nodes: Vec::new(),
                links: Vec::new(),
            });
        };
        self.fallbacks.store(0, Ordering::Relaxed);

        let nodes = (0..graph.node_count())
            .into_par_iter()
            .map(|i| self.node_costs(graph.node(NodeId(i)), range))
            .collect::<Result<Vec<_>>>()?;

        let links = (0..graph.link_count())
            .into_par_iter()
            .map(|i| {
                let link = graph.link(LinkId(i));
                let from = self.store.get(graph.node(link.source).last_traxel());
                let to = self.store.get(graph.node(link.target).first_traxel());
                self.transition_costs(from, to)
            })
            .collect::<Result<Vec<_>>>()?;

        let fallbacks = self.fallbacks.load(Ordering::Relaxed);
        if fallbacks > 0 {
            tracing::warn!(
                "transition classifier had no prediction for {} traxel pairs, used the distance model instead",
                fallbacks
            );
        }
        tracing::info!(
            "cost model: {} node and {} link cost vectors with {} states",
            nodes.len(),
            links.len(),
            num_states
        );
        Ok(CostModel {
            num_states,
            nodes,
            links,
        })
    }

    fn node_costs(&self, node: &Node, range: TimeRange) -> Result<NodeCosts> {
        let num_states = self.config.num_states();
        let mut detection = vec![0.0; num_states];
        let mut previous: Option<&Traxel> = None;
        for &index in node.traxels() {
            let traxel = self.store.get(index);
            add_assign(&mut detection, &neg_log(&traxel.detection_probabilities(num_states)?));
            if let Some(prev) = previous {
                add_assign(&mut detection, &self.transition_costs(prev, traxel)?);
            }
            previous = Some(traxel);
        }

        let division = match node.division_probability() {
            Some(p) if node.is_division_candidate() => Some(neg_log(&[1.0 - p, p])),
            _ => None,
        };

        let first = self.store.get(node.first_traxel());
        let last = self.store.get(node.last_traxel());
        let appearance = self.boundary_costs(
            first,
            node.start() == range.first,
            self.config.appearance_cost,
        )?;
        let disappearance = self.boundary_costs(
            last,
            node.end() == range.last,
            self.config.disappearance_cost,
        )?;

        Ok(NodeCosts {
            detection,
            division,
            appearance,
            disappearance,
        })
    }

    /// Transition cost vector between two traxels of consecutive timesteps.
    pub fn transition_costs(&self, from: &Traxel, to: &Traxel) -> Result<Vec<f64>> {
        if let Some(classifier) = self.classifier {
            if let Some([p_off, p_on]) = classifier.predict(from, to) {
                return Ok(neg_log(&self.spread(p_off, p_on)));
            }
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "no classifier prediction for ({}, {}) -> ({}, {})",
                from.timestep,
                from.id,
                to.timestep,
                to.id
            );
        }
        let distance = nalgebra::distance(&from.position()?, &to.position()?);
        let p = (-distance / self.config.transition_parameter).exp();
        Ok(neg_log(&self.spread(1.0 - p, p)))
    }

    /// `[p_off, p_on, p_on, ...]` with `K + 1` entries.
    fn spread(&self, p_off: f64, p_on: f64) -> Vec<f64> {
        let mut probs = vec![p_on; self.config.num_states()];
        probs[0] = p_off;
        probs
    }

    /// All-zero for nodes touching the first or last timestep of the
    /// sequence, otherwise `[0, m * base, m * base, ...]` with `m` ramping
    /// with the distance to the field-of-view border.
    fn boundary_costs(&self, traxel: &Traxel, at_sequence_edge: bool, base: f64) -> Result<Vec<f64>> {
        let num_states = self.config.num_states();
        if at_sequence_edge {
            return Ok(vec![0.0; num_states]);
        }
        let mut costs = vec![self.border_multiplier(traxel)? * base; num_states];
        costs[0] = 0.0;
        Ok(costs)
    }

    /// Linear ramp from 0 at the border to 1 at the configured margin.
    pub fn border_multiplier(&self, traxel: &Traxel) -> Result<f64> {
        let Some(margin) = self.config.border_margin else {
            return Ok(1.0);
        };
        let p = traxel.position()?;
        let distance = self.fov.spatial_distance_to_border([p.x, p.y, p.z]);
        if distance > margin {
            Ok(1.0)
        } else {
            Ok((distance / margin).max(0.0))
        }
    }
}

fn add_assign(acc: &mut [f64], costs: &[f64]) {
    for (a, c) in acc.iter_mut().zip(costs) {
        *a += c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::GraphBuilder;
    use approx::assert_relative_eq;

    fn fov() -> FieldOfView {
        FieldOfView::new([0.0, 0.0, 0.0, 0.0], [3.0, 100.0, 100.0, 0.0])
    }

    fn traxel(t: u32, id: u32, x: f64, y: f64) -> Traxel {
        Traxel::builder(t, id)
            .position(x, y, 0.0)
            .detection_probabilities(vec![0.2, 0.7, 0.1])
            .division_probability(0.05)
            .build()
    }

    #[test]
    fn test_neg_log_clamps() {
        let costs = neg_log(&[0.0, 1.0, 0.5, 2.0, f64::NAN]);
        assert_relative_eq!(costs[0], -(PROBABILITY_FLOOR.ln()));
        assert_eq!(costs[1], 0.0);
        assert_relative_eq!(costs[2], std::f64::consts::LN_2);
        assert_eq!(costs[3], 0.0);
        assert!(costs.iter().all(|c| c.is_finite() && *c >= 0.0));
    }

    #[test]
    fn test_distance_transition() {
        let store = TraxelStore::from_traxels(vec![traxel(0, 1, 10.0, 10.0), traxel(1, 1, 13.0, 14.0)])
            .unwrap();
        let generator = CostModelGenerator::new(&CostConfig::default(), &store, fov()).unwrap();
        let costs = generator
            .transition_costs(store.get(0), store.get(1))
            .unwrap();
        let p = (-5.0f64 / 5.0).exp();
        assert_eq!(costs.len(), 3);
        assert_relative_eq!(costs[0], -(1.0 - p).ln(), epsilon = 1e-12);
        assert_relative_eq!(costs[1], -p.ln(), epsilon = 1e-12);
        assert_relative_eq!(costs[2], -p.ln(), epsilon = 1e-12);
    }

    struct HalfClassifier;

    impl TransitionClassifier for HalfClassifier {
        fn predict(&self, from: &Traxel, _to: &Traxel) -> Option<[f64; 2]> {
            (from.id == 1).then_some([0.25, 0.75])
        }
    }

    #[test]
    fn test_classifier_with_distance_fallback() {
        let store = TraxelStore::from_traxels(vec![
            traxel(0, 1, 10.0, 10.0),
            traxel(0, 2, 50.0, 50.0),
            traxel(1, 1, 10.0, 10.0),
        ])
        .unwrap();
        let generator = CostModelGenerator::new(&CostConfig::default(), &store, fov())
            .unwrap()
            .with_classifier(&HalfClassifier);

        let predicted = generator.transition_costs(store.get(0), store.get(2)).unwrap();
        assert_relative_eq!(predicted[1], -(0.75f64).ln());

        let fallback = generator.transition_costs(store.get(1), store.get(2)).unwrap();
        let d = (40.0f64 * 40.0 * 2.0).sqrt();
        assert_relative_eq!(fallback[1], d / 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_boundary_costs_vanish_at_sequence_edges() {
        let store = TraxelStore::from_traxels(vec![
            traxel(0, 1, 5.0, 50.0),
            traxel(1, 1, 5.0, 50.0),
            traxel(1, 2, 50.0, 50.0),
            traxel(2, 1, 5.0, 50.0),
            traxel(3, 1, 5.0, 50.0),
        ])
        .unwrap();
        let config = CostConfig {
            border_margin: Some(10.0),
            appearance_cost: 2.0,
            disappearance_cost: 2.0,
            ..CostConfig::default()
        };
        let generator = CostModelGenerator::new(&config, &store, fov()).unwrap();
        let graph = GraphBuilder::new(&GraphConfig::default())
            .unwrap()
            .build(&store)
            .unwrap();
        let range = store.time_range().unwrap();
        let singleton = |index: usize| generator.node_costs(graph.node(NodeId(index)), range).unwrap();

        // first timestep: free appearance, ramped disappearance
        let first = singleton(0);
        assert_eq!(first.appearance, vec![0.0, 0.0, 0.0]);
        assert_eq!(first.disappearance, vec![0.0, 1.0, 1.0]);

        // interior, 5 units from the border: half the base cost
        let near_border = singleton(1);
        assert_eq!(near_border.appearance, vec![0.0, 1.0, 1.0]);
        assert_eq!(near_border.disappearance, vec![0.0, 1.0, 1.0]);

        // interior, far from the border: full cost
        let centre = singleton(2);
        assert_eq!(centre.appearance, vec![0.0, 2.0, 2.0]);
        assert_eq!(centre.disappearance, vec![0.0, 2.0, 2.0]);

        // last timestep: free disappearance
        let last = singleton(4);
        assert_eq!(last.appearance, vec![0.0, 1.0, 1.0]);
        assert_eq!(last.disappearance, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_edge_nodes_are_free_without_border_margin() {
        let store = TraxelStore::from_traxels(vec![
            traxel(0, 1, 50.0, 50.0),
            traxel(1, 1, 50.0, 50.0),
            traxel(2, 1, 50.0, 50.0),
        ])
        .unwrap();
        let generator = CostModelGenerator::new(&CostConfig::default(), &store, fov()).unwrap();
        let graph = GraphBuilder::new(&GraphConfig::default())
            .unwrap()
            .build(&store)
            .unwrap();
        let model = generator.generate(&graph).unwrap();

        assert_eq!(model.nodes[0].appearance, vec![0.0, 0.0, 0.0]);
        assert_eq!(model.nodes[1].appearance, vec![0.0, 1.0, 1.0]);
        assert_eq!(model.nodes[1].disappearance, vec![0.0, 1.0, 1.0]);
        assert_eq!(model.nodes[2].disappearance, vec![0.0, 0.0, 0.0]);
        assert_eq!(model.nodes[0].disappearance, vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_division_costs_only_above_threshold() {
        let store = TraxelStore::from_traxels(vec![
            Traxel::builder(0, 1)
                .position(50.0, 50.0, 0.0)
                .detection_probabilities(vec![0.1, 0.9])
                .division_probability(0.9)
                .build(),
            traxel(0, 2, 20.0, 20.0),
            traxel(1, 1, 48.0, 50.0),
            traxel(1, 2, 52.0, 50.0),
        ])
        .unwrap();
        let graph = GraphBuilder::new(&GraphConfig::default())
            .unwrap()
            .build(&store)
            .unwrap();
        let model = CostModelGenerator::new(&CostConfig::default(), &store, fov())
            .unwrap()
            .generate(&graph)
            .unwrap();

        let division = model.nodes[0].division.as_ref().unwrap();
        assert_relative_eq!(division[0], -(0.1f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(division[1], -(0.9f64).ln(), epsilon = 1e-12);
        assert!(model.nodes[1].division.is_none());
        assert_eq!(model.links.len(), graph.link_count());
        assert_eq!(graph.outgoing(NodeId(0)).len(), 2);
        let LinkId(first) = graph.outgoing(NodeId(0))[0];
        assert_eq!(model.links[first].len(), 3);
    }

    #[test]
    fn test_missing_position_is_fatal() {
        let store = TraxelStore::from_traxels(vec![
            traxel(0, 1, 1.0, 1.0),
            Traxel::builder(1, 1)
                .detection_probabilities(vec![0.5, 0.5])
                .build(),
        ])
        .unwrap();
        let generator = CostModelGenerator::new(&CostConfig::default(), &store, fov()).unwrap();
        assert!(matches!(
            generator.transition_costs(store.get(0), store.get(1)),
            Err(Error::MissingFeature { .. })
        ));
    }
}
