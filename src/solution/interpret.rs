//! Turn a solver assignment into tracks and a division lineage.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::graph::{HypothesesGraph, LinkId, NodeId, TraxelStore};
use crate::solution::result::SolverResult;

/// Chosen state of every node and link of one graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    node_states: Vec<u32>,
    link_states: Vec<u32>,
    /// Division decisions reported by the backend, if it reports any.
    divisions: Option<Vec<Option<bool>>>,
}

impl Solution {
    /// States indexed like the graph's nodes and links.
    pub fn new(node_states: Vec<u32>, link_states: Vec<u32>) -> Self {
        Self {
            node_states,
            link_states,
            divisions: None,
        }
    }

    /// Map a backend result onto `graph`. Nodes and links absent from the
    /// result are in state 0; ids the graph does not know are an error.
    pub fn from_result(graph: &HypothesesGraph, result: &SolverResult) -> Result<Self> {
        let mut node_states = vec![0; graph.node_count()];
        for d in &result.detection_results {
            let state = node_states
                .get_mut(d.id)
                .ok_or_else(|| Error::invariant(format!("solution refers to unknown node {}", d.id)))?;
            *state = d.value;
        }

        let mut link_states = vec![0; graph.link_count()];
        for l in &result.linking_results {
            if l.src >= graph.node_count() || l.dest >= graph.node_count() {
                return Err(Error::invariant(format!(
                    "solution refers to unknown link {} -> {}",
                    l.src, l.dest
                )));
            }
            let LinkId(id) = graph
                .find_link(NodeId(l.src), NodeId(l.dest))
                .ok_or_else(|| {
                    Error::invariant(format!("solution refers to unknown link {} -> {}", l.src, l.dest))
                })?;
            link_states[id] = l.value;
        }

        let divisions = match &result.division_results {
            Some(reported) => {
                let mut flags = vec![None; graph.node_count()];
                for d in reported {
                    let flag = flags.get_mut(d.id).ok_or_else(|| {
                        Error::invariant(format!("division result for unknown node {}", d.id))
                    })?;
                    *flag = Some(d.value);
                }
                Some(flags)
            }
            None => None,
        };

        Ok(Self {
            node_states,
            link_states,
            divisions,
        })
    }

    #[inline]
    pub fn node_state(&self, id: NodeId) -> u32 {
        self.node_states.get(id.0).copied().unwrap_or(0)
    }

    #[inline]
    pub fn link_state(&self, id: LinkId) -> u32 {
        self.link_states.get(id.0).copied().unwrap_or(0)
    }

    /// Division decision for a node, `None` when the backend reported none.
    pub fn division(&self, id: NodeId) -> Option<bool> {
        self.divisions.as_ref()?.get(id.0).copied().flatten()
    }
}

/// Maximal chain of accepted nodes sharing one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    /// Positive, unique
    pub id: u32,
    pub first_timestep: u32,
    pub last_timestep: u32,
    /// Track that divided into this one
    pub parent: Option<u32>,
}

/// All tracks of a run, ordered by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lineage {
    tracks: Vec<Track>,
}

impl Lineage {
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Track> {
        self.tracks
            .binary_search_by_key(&id, |t| t.id)
            .ok()
            .map(|i| &self.tracks[i])
    }

    /// Tracks whose parent is `id`.
    pub fn children(&self, id: u32) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |t| t.parent == Some(id))
    }

    /// Tracks without a parent.
    pub fn roots(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.parent.is_none())
    }
}

/// `(timestep, traxel id) -> track id` for every traxel of an accepted node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMapping {
    frames: BTreeMap<u32, HashMap<u32, u32>>,
}

impl TrackMapping {
    pub fn get(&self, timestep: u32, traxel_id: u32) -> Option<u32> {
        self.frames.get(&timestep)?.get(&traxel_id).copied()
    }

    /// Mapping of one frame, empty for frames without accepted traxels.
    pub fn frame(&self, timestep: u32) -> HashMap<u32, u32> {
        self.frames.get(&timestep).cloned().unwrap_or_default()
    }

    pub fn timesteps(&self) -> impl Iterator<Item = u32> + '_ {
        self.frames.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Assigns track ids from a solution, then derives the lineage.
///
/// [`Self::assign_track_ids`] must run before [`Self::lineage`] or
/// [`Self::mapping`].
pub struct SolutionInterpreter<'a> {
    graph: &'a HypothesesGraph,
    store: &'a TraxelStore,
    solution: &'a Solution,
    node_tracks: Vec<Option<u32>>,
    parents: BTreeMap<u32, u32>,
    assigned: bool,
}

impl<'a> SolutionInterpreter<'a> {
    pub fn new(graph: &'a HypothesesGraph, store: &'a TraxelStore, solution: &'a Solution) -> Self {
        Self {
            graph,
            store,
            solution,
            node_tracks: vec![None; graph.node_count()],
            parents: BTreeMap::new(),
            assigned: false,
        }
    }

    #[inline]
    pub fn is_active(&self, id: NodeId) -> bool {
        self.solution.node_state(id) >= 1
    }

    /// Accepted links leaving a node. Links out of inactive nodes never count.
    pub fn accepted_outgoing(&self, id: NodeId) -> Vec<LinkId> {
        if !self.is_active(id) {
            return Vec::new();
        }
        self.graph
            .outgoing(id)
            .iter()
            .copied()
            .filter(|&l| self.solution.link_state(l) >= 1)
            .collect()
    }

    fn accepted_incoming(&self, id: NodeId) -> Vec<LinkId> {
        self.graph
            .incoming(id)
            .iter()
            .copied()
            .filter(|&l| {
                self.solution.link_state(l) >= 1 && self.is_active(self.graph.link(l).source)
            })
            .collect()
    }

    /// A node divides when it is flagged as dividing and keeps exactly two
    /// accepted outgoing links. Without reported decisions the flag is the
    /// node's division candidacy.
    pub fn is_dividing(&self, id: NodeId) -> bool {
        let flagged = self
            .solution
            .division(id)
            .unwrap_or_else(|| self.graph.node(id).is_division_candidate());
        flagged && self.accepted_outgoing(id).len() == 2
    }

    /// Give every active node a track id, earliest nodes first.
    pub fn assign_track_ids(&mut self) -> Result<()> {
        let mut order: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|(id, _)| self.is_active(*id))
            .map(|(id, _)| id)
            .collect();
        order.sort_by_key(|&id| (self.graph.node(id).start(), id));

        self.node_tracks.iter_mut().for_each(|t| *t = None);
        self.parents.clear();
        let mut next_id: u32 = 1;
        let mut new_track = || {
            let id = next_id;
            next_id += 1;
            id
        };

        for node in order {
            let incoming = self.accepted_incoming(node);
            let dividing: Vec<NodeId> = incoming
                .iter()
                .map(|&l| self.graph.link(l).source)
                .filter(|&p| self.is_dividing(p))
                .collect();
            if dividing.len() > 1 {
                return Err(Error::invariant(format!(
                    "node {} has {} dividing predecessors",
                    node.0,
                    dividing.len()
                )));
            }

            let track = match incoming.as_slice() {
                [only] => {
                    let pred = self.graph.link(*only).source;
                    let pred_track = self.node_tracks[pred.0].ok_or_else(|| {
                        Error::invariant(format!(
                            "predecessor {} of node {} has no track id",
                            pred.0, node.0
                        ))
                    })?;
                    if self.is_dividing(pred) {
                        let track = new_track();
                        self.record_parent(track, pred_track)?;
                        track
                    } else if self.accepted_outgoing(pred).len() == 1 {
                        pred_track
                    } else {
                        new_track()
                    }
                }
                // appearance, or a merge of several predecessors
                _ => new_track(),
            };
            self.node_tracks[node.0] = Some(track);
        }

        self.assigned = true;
        tracing::info!(
            "assigned {} track ids, {} divisions",
            next_id - 1,
            self.parents.values().collect::<std::collections::BTreeSet<_>>().len()
        );
        Ok(())
    }

    fn record_parent(&mut self, track: u32, parent: u32) -> Result<()> {
        match self.parents.insert(track, parent) {
            Some(previous) if previous != parent => Err(Error::invariant(format!(
                "track {track} has conflicting parents {previous} and {parent}"
            ))),
            _ => Ok(()),
        }
    }

    /// Track id of a node, `None` for inactive nodes or before assignment.
    pub fn track_of(&self, id: NodeId) -> Option<u32> {
        self.node_tracks.get(id.0).copied().flatten()
    }

    fn ensure_assigned(&self) -> Result<()> {
        if !self.assigned {
            return Err(Error::invariant(
                "lineage requested before track ids were assigned",
            ));
        }
        if let Some((id, _)) = self
            .graph
            .nodes()
            .find(|(id, _)| self.is_active(*id) && self.node_tracks[id.0].is_none())
        {
            return Err(Error::invariant(format!(
                "active node {} has no track id",
                id.0
            )));
        }
        Ok(())
    }

    /// Per track: first and last timestep and the parent track, if any.
    pub fn lineage(&self) -> Result<Lineage> {
        self.ensure_assigned()?;
        let mut spans: BTreeMap<u32, (u32, u32)> = BTreeMap::new();
        for (id, node) in self.graph.nodes() {
            let Some(track) = self.node_tracks[id.0] else {
                continue;
            };
            spans
                .entry(track)
                .and_modify(|(first, last)| {
                    *first = (*first).min(node.start());
                    *last = (*last).max(node.end());
                })
                .or_insert((node.start(), node.end()));
        }
        let tracks = spans
            .into_iter()
            .map(|(id, (first_timestep, last_timestep))| Track {
                id,
                first_timestep,
                last_timestep,
                parent: self.parents.get(&id).copied(),
            })
            .collect();
        Ok(Lineage { tracks })
    }

    /// Track id of every traxel owned by an active node.
    pub fn mapping(&self) -> Result<TrackMapping> {
        self.ensure_assigned()?;
        let mut frames: BTreeMap<u32, HashMap<u32, u32>> = BTreeMap::new();
        for (id, node) in self.graph.nodes() {
            let Some(track) = self.node_tracks[id.0] else {
                continue;
            };
            for &index in node.traxels() {
                let traxel = self.store.get(index);
                frames
                    .entry(traxel.timestep)
                    .or_default()
                    .insert(traxel.id, track);
            }
        }
        Ok(TrackMapping { frames })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use crate::graph::{GraphBuilder, Traxel};
    use crate::solution::result::{DetectionResult, DivisionResult, LinkingResult};

    fn store(entries: &[(u32, u32, f64, f64)]) -> TraxelStore {
        TraxelStore::from_traxels(
            entries
                .iter()
                .map(|&(t, id, x, div)| {
                    Traxel::builder(t, id)
                        .position(x, 0.0, 0.0)
                        .detection_probabilities(vec![0.1, 0.9])
                        .division_probability(div)
                        .build()
                })
                .collect(),
        )
        .unwrap()
    }

    fn graph(store: &TraxelStore) -> HypothesesGraph {
        GraphBuilder::new(&GraphConfig::default())
            .unwrap()
            .build(store)
            .unwrap()
    }

    fn all_on(graph: &HypothesesGraph) -> Solution {
        Solution::new(vec![1; graph.node_count()], vec![1; graph.link_count()])
    }

    #[test]
    fn test_lineage_before_assignment_fails() {
        let store = store(&[(0, 1, 0.0, 0.0)]);
        let graph = graph(&store);
        let solution = all_on(&graph);
        let interpreter = SolutionInterpreter::new(&graph, &store, &solution);
        assert!(matches!(
            interpreter.lineage(),
            Err(Error::InvariantViolation(_))
        ));
        assert!(interpreter.mapping().is_err());
    }

    #[test]
    fn test_chain_keeps_one_id() {
        let store = store(&[(0, 1, 0.0, 0.0), (1, 1, 1.0, 0.0), (2, 3, 2.0, 0.0)]);
        let graph = graph(&store);
        let solution = all_on(&graph);
        let mut interpreter = SolutionInterpreter::new(&graph, &store, &solution);
        interpreter.assign_track_ids().unwrap();

        let lineage = interpreter.lineage().unwrap();
        assert_eq!(
            lineage.tracks(),
            &[Track {
                id: 1,
                first_timestep: 0,
                last_timestep: 2,
                parent: None
            }]
        );
        let mapping = interpreter.mapping().unwrap();
        assert_eq!(mapping.get(2, 3), Some(1));
        assert_eq!(mapping.len(), 3);
    }

    #[test]
    fn test_division_creates_two_children() {
        let store = store(&[
            (0, 1, 0.0, 0.0),
            (1, 1, 0.0, 0.9),
            (2, 1, -2.0, 0.0),
            (2, 2, 2.0, 0.0),
        ]);
        let graph = graph(&store);
        let solution = all_on(&graph);
        let mut interpreter = SolutionInterpreter::new(&graph, &store, &solution);
        assert!(interpreter.is_dividing(NodeId(1)));
        interpreter.assign_track_ids().unwrap();

        let lineage = interpreter.lineage().unwrap();
        assert_eq!(lineage.len(), 3);
        let parent = interpreter.track_of(NodeId(1)).unwrap();
        assert_eq!(interpreter.track_of(NodeId(0)), Some(parent));
        let children: Vec<&Track> = lineage.children(parent).collect();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.first_timestep == 2));
        assert_ne!(children[0].id, children[1].id);
        assert_eq!(lineage.roots().count(), 1);
    }

    #[test]
    fn test_inactive_nodes_and_links_are_ignored() {
        let store = store(&[(0, 1, 0.0, 0.0), (1, 1, 1.0, 0.0), (2, 1, 2.0, 0.0)]);
        let graph = graph(&store);
        // middle node switched off: its successor appears as a new track
        let solution = Solution::new(vec![1, 0, 1], vec![1, 1]);
        let mut interpreter = SolutionInterpreter::new(&graph, &store, &solution);
        interpreter.assign_track_ids().unwrap();
        assert_eq!(interpreter.track_of(NodeId(1)), None);
        assert_eq!(interpreter.track_of(NodeId(0)), Some(1));
        assert_eq!(interpreter.track_of(NodeId(2)), Some(2));
        assert_eq!(interpreter.mapping().unwrap().get(1, 1), None);
    }

    #[test]
    fn test_reported_division_decision_wins() {
        let store = store(&[(0, 1, 0.0, 0.9), (1, 1, -2.0, 0.0), (1, 2, 2.0, 0.0)]);
        let graph = graph(&store);
        let result = SolverResult {
            detection_results: (0..3).map(|id| DetectionResult { id, value: 1 }).collect(),
            linking_results: vec![
                LinkingResult { src: 0, dest: 1, value: 1 },
                LinkingResult { src: 0, dest: 2, value: 1 },
            ],
            division_results: Some(vec![DivisionResult { id: 0, value: false }]),
        };
        let solution = Solution::from_result(&graph, &result).unwrap();
        let mut interpreter = SolutionInterpreter::new(&graph, &store, &solution);
        assert!(!interpreter.is_dividing(NodeId(0)));
        interpreter.assign_track_ids().unwrap();
        // two accepted successors without a division: both start fresh tracks
        let lineage = interpreter.lineage().unwrap();
        assert_eq!(lineage.len(), 3);
        assert!(lineage.tracks().iter().all(|t| t.parent.is_none()));
    }

    #[test]
    fn test_unknown_ids_in_result_are_rejected() {
        let store = store(&[(0, 1, 0.0, 0.0), (1, 1, 1.0, 0.0)]);
        let graph = graph(&store);
        let result = SolverResult {
            detection_results: vec![DetectionResult { id: 9, value: 1 }],
            ..SolverResult::default()
        };
        assert!(matches!(
            Solution::from_result(&graph, &result),
            Err(Error::InvariantViolation(_))
        ));
        let result = SolverResult {
            linking_results: vec![LinkingResult { src: 1, dest: 0, value: 1 }],
            ..SolverResult::default()
        };
        assert!(Solution::from_result(&graph, &result).is_err());
    }

    #[test]
    fn test_merge_starts_new_track() {
        let store = store(&[(0, 1, -1.0, 0.0), (0, 2, 1.0, 0.0), (1, 1, 0.0, 0.0)]);
        let graph = graph(&store);
        let solution = all_on(&graph);
        let mut interpreter = SolutionInterpreter::new(&graph, &store, &solution);
        interpreter.assign_track_ids().unwrap();
        let ids: Vec<_> = (0..3).map(|i| interpreter.track_of(NodeId(i)).unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
