//! Hypotheses graph: detection nodes and candidate transition links stored in
//! an index-addressed arena.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::config::GraphConfig;
use crate::error::{Error, Result};
use crate::graph::neighbors::{self, Candidate, NeighborQuery};
use crate::graph::traxel::TraxelStore;

/// Index of a node in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// Index of a link in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub usize);

/// Detection hypothesis covering one traxel, or a chain of traxels of
/// consecutive timesteps (a tracklet).
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Store indices, ordered by increasing timestep
    traxels: Vec<usize>,
    /// First timestep
    start: u32,
    /// Last timestep
    end: u32,
    /// Division probability of the last traxel, if known
    division_probability: Option<f64>,
    division_candidate: bool,
}

impl Node {
    fn singleton(store: &TraxelStore, index: usize, config: &GraphConfig) -> Self {
        let traxel = store.get(index);
        let division_probability = traxel.division_probability();
        let division_candidate = config.with_divisions
            && division_probability.is_some_and(|p| p > config.division_threshold);
        Self {
            traxels: vec![index],
            start: traxel.timestep,
            end: traxel.timestep,
            division_probability,
            division_candidate,
        }
    }

    /// Append the traxels of `next`, which must start right after `self` ends.
    pub(crate) fn extend_with(&mut self, next: &Node) {
        debug_assert_eq!(self.end + 1, next.start);
        self.traxels.extend_from_slice(&next.traxels);
        self.end = next.end;
        self.division_probability = next.division_probability;
        self.division_candidate = next.division_candidate;
    }

    /// Store indices of the contained traxels, earliest first.
    #[inline]
    pub fn traxels(&self) -> &[usize] {
        &self.traxels
    }

    #[inline]
    pub fn first_traxel(&self) -> usize {
        self.traxels[0]
    }

    #[inline]
    pub fn last_traxel(&self) -> usize {
        self.traxels[self.traxels.len() - 1]
    }

    #[inline]
    pub fn start(&self) -> u32 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> u32 {
        self.end
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.traxels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.traxels.is_empty()
    }

    #[inline]
    pub fn division_probability(&self) -> Option<f64> {
        self.division_probability
    }

    /// Whether the node may divide: divisions are enabled and its division
    /// probability exceeds the threshold.
    #[inline]
    pub fn is_division_candidate(&self) -> bool {
        self.division_candidate
    }
}

/// Directed candidate transition from a node ending at `t` to a node starting
/// at `t + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub source: NodeId,
    pub target: NodeId,
}

/// Graph of detection and transition hypotheses.
#[derive(Debug, Clone, Default)]
pub struct HypothesesGraph {
    nodes: Vec<Node>,
    links: Vec<Link>,
    outgoing: Vec<Vec<LinkId>>,
    incoming: Vec<Vec<LinkId>>,
    /// Store index -> owning node
    traxel_nodes: HashMap<usize, NodeId>,
}

impl HypothesesGraph {
    /// Assemble a graph from nodes and links. Link endpoints must be valid node ids.
    pub(crate) fn from_parts(nodes: Vec<Node>, links: Vec<Link>) -> Self {
        let mut outgoing = vec![Vec::new(); nodes.len()];
        let mut incoming = vec![Vec::new(); nodes.len()];
        for (i, link) in links.iter().enumerate() {
            outgoing[link.source.0].push(LinkId(i));
            incoming[link.target.0].push(LinkId(i));
        }
        let traxel_nodes = nodes
            .iter()
            .enumerate()
            .flat_map(|(n, node)| node.traxels.iter().map(move |&t| (t, NodeId(n))))
            .collect();
        Self {
            nodes,
            links,
            outgoing,
            incoming,
            traxel_nodes,
        }
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    #[inline]
    pub fn link(&self, id: LinkId) -> Link {
        self.links[id.0]
    }

    pub fn nodes(&self) -> impl ExactSizeIterator<Item = (NodeId, &Node)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn links(&self) -> impl ExactSizeIterator<Item = (LinkId, Link)> + '_ {
        self.links.iter().enumerate().map(|(i, l)| (LinkId(i), *l))
    }

    #[inline]
    pub fn outgoing(&self, id: NodeId) -> &[LinkId] {
        &self.outgoing[id.0]
    }

    #[inline]
    pub fn incoming(&self, id: NodeId) -> &[LinkId] {
        &self.incoming[id.0]
    }

    /// Node owning the traxel at a store index.
    pub fn node_of_traxel(&self, store_index: usize) -> Option<NodeId> {
        self.traxel_nodes.get(&store_index).copied()
    }

    /// Link between two nodes, if present.
    pub fn find_link(&self, source: NodeId, target: NodeId) -> Option<LinkId> {
        self.outgoing(source)
            .iter()
            .copied()
            .find(|&l| self.links[l.0].target == target)
    }

    /// Check the structural invariants: traxels are owned by exactly one node
    /// and lie within the store's time range, node spans have no gaps, and
    /// every link advances exactly one timestep.
    pub fn check_invariants(&self, store: &TraxelStore) -> Result<()> {
        let range = store.time_range();
        let mut owned = 0;
        for (id, node) in self.nodes() {
            if node.is_empty() {
                return Err(Error::invariant(format!("node {} owns no traxel", id.0)));
            }
            for (offset, &index) in node.traxels.iter().enumerate() {
                let t = store.get(index).timestep;
                if t != node.start + offset as u32 {
                    return Err(Error::invariant(format!(
                        "node {} has a gap at timestep {}",
                        id.0, t
                    )));
                }
                if !range.is_some_and(|r| r.contains(t)) {
                    return Err(Error::invariant(format!(
                        "node {} references timestep {} outside the observed range",
                        id.0, t
                    )));
                }
            }
            owned += node.len();
        }
        if owned != store.len() || self.traxel_nodes.len() != store.len() {
            return Err(Error::invariant(
                "every traxel must belong to exactly one node",
            ));
        }
        for (id, link) in self.links() {
            if self.node(link.source).end + 1 != self.node(link.target).start {
                return Err(Error::invariant(format!(
                    "link {} does not advance exactly one timestep",
                    id.0
                )));
            }
        }
        Ok(())
    }
}

/// Builds the hypotheses graph from a traxel store.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    config: GraphConfig,
}

impl GraphBuilder {
    /// Validate the parameters; fails before any graph work.
    pub fn new(config: &GraphConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    /// One node per traxel and up to `k` links per node to the closest
    /// traxels of the next frame within the distance bound. Division
    /// candidates may keep two links when `k == 1`.
    pub fn build(&self, store: &TraxelStore) -> Result<HypothesesGraph> {
        let nodes: Vec<Node> = (0..store.len())
            .map(|i| Node::singleton(store, i, &self.config))
            .collect();

        let Some(range) = store.time_range() else {
            tracing::warn!("building hypotheses graph from an empty traxel store");
            return Ok(HypothesesGraph::from_parts(nodes, Vec::new()));
        };

        let query = NeighborQuery {
            k: self.config.max_nearest_neighbors,
            max_distance: self.config.max_neighbor_distance,
        };
        let out_limit = |index: usize| {
            if nodes[index].division_candidate {
                2
            } else {
                query.k
            }
        };

        // Frames are independent; collect keeps timestep order.
        let timesteps: Vec<u32> = (range.first..range.last).collect();
        let per_frame = timesteps
            .par_iter()
            .map(|&t| neighbors::frame_candidates(store, t, query, out_limit))
            .collect::<Result<Vec<Vec<Candidate>>>>()?;

        // Singleton node ids equal store indices.
        let links: Vec<Link> = per_frame
            .into_iter()
            .flatten()
            .map(|c| Link {
                source: NodeId(c.source),
                target: NodeId(c.target),
            })
            .collect();

        let graph = HypothesesGraph::from_parts(nodes, links);
        tracing::info!(
            "hypotheses graph: {} nodes, {} links, {} division candidates",
            graph.node_count(),
            graph.link_count(),
            graph.nodes.iter().filter(|n| n.division_candidate).count()
        );
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::traxel::{TimeRange, Traxel};

    fn store(entries: &[(u32, u32, f64, Option<f64>)]) -> TraxelStore {
        let traxels = entries
            .iter()
            .map(|&(t, id, x, div)| {
                let b = Traxel::builder(t, id)
                    .position(x, 0.0, 0.0)
                    .detection_probabilities(vec![0.2, 0.8]);
                match div {
                    Some(p) => b.division_probability(p).build(),
                    None => b.build(),
                }
            })
            .collect();
        TraxelStore::from_traxels(traxels).unwrap()
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        let config = GraphConfig {
            max_nearest_neighbors: 0,
            ..GraphConfig::default()
        };
        assert!(matches!(
            GraphBuilder::new(&config),
            Err(Error::Configuration(_))
        ));
        let config = GraphConfig {
            max_neighbor_distance: -1.0,
            ..GraphConfig::default()
        };
        assert!(GraphBuilder::new(&config).is_err());
    }

    #[test]
    fn test_two_frame_single_object() {
        let store = store(&[(0, 1, 10.0, None), (1, 1, 11.0, None)]);
        let graph = GraphBuilder::new(&GraphConfig::default())
            .unwrap()
            .build(&store)
            .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.link_count(), 1);
        assert_eq!(graph.link(LinkId(0)).source, NodeId(0));
        assert_eq!(graph.link(LinkId(0)).target, NodeId(1));
        graph.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_division_candidate_keeps_two_links() {
        let store = store(&[
            (0, 1, 0.0, Some(0.9)),
            (1, 1, 2.0, None),
            (1, 2, -2.0, None),
        ]);
        let config = GraphConfig {
            max_nearest_neighbors: 1,
            ..GraphConfig::default()
        };
        let graph = GraphBuilder::new(&config).unwrap().build(&store).unwrap();
        assert!(graph.node(NodeId(0)).is_division_candidate());
        assert_eq!(graph.outgoing(NodeId(0)).len(), 2);

        let no_div = GraphConfig {
            with_divisions: false,
            ..config
        };
        let graph = GraphBuilder::new(&no_div).unwrap().build(&store).unwrap();
        assert!(!graph.node(NodeId(0)).is_division_candidate());
        assert_eq!(graph.outgoing(NodeId(0)).len(), 1);
    }

    #[test]
    fn test_threshold_is_strict() {
        let store = store(&[(0, 1, 0.0, Some(0.1)), (1, 1, 1.0, None)]);
        let graph = GraphBuilder::new(&GraphConfig::default())
            .unwrap()
            .build(&store)
            .unwrap();
        assert!(!graph.node(NodeId(0)).is_division_candidate());
    }

    #[test]
    fn test_far_objects_are_not_linked() {
        let store = store(&[(0, 1, 0.0, None), (1, 1, 100.0, None)]);
        let graph = GraphBuilder::new(&GraphConfig::default())
            .unwrap()
            .build(&store)
            .unwrap();
        assert_eq!(graph.link_count(), 0);
        assert!(graph.outgoing(NodeId(0)).is_empty());
        assert!(graph.incoming(NodeId(1)).is_empty());
    }

    #[test]
    fn test_empty_frame_breaks_links_without_failing() {
        let store = store(&[(0, 1, 0.0, None), (2, 1, 0.0, None)])
            .with_time_range(TimeRange::new(0, 3))
            .unwrap();
        let graph = GraphBuilder::new(&GraphConfig::default())
            .unwrap()
            .build(&store)
            .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.link_count(), 0);
        assert_eq!(store.empty_frames(), &[1, 3]);
        graph.check_invariants(&store).unwrap();
    }
}
