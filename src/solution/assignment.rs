//! In-process solver backend: frame-by-frame linear assignment.
//!
//! Each pair of consecutive timesteps is solved independently with lapjv.
//! States are restricted to 0 and 1, so merged detections are never
//! reported. The backend must be chosen explicitly; it is not part of
//! backend discovery.

use std::collections::{BTreeMap, HashMap};

use ndarray::Array2;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::model::{Features, ModelDocument};
use crate::solution::result::{DetectionResult, DivisionResult, LinkingResult, SolverResult};
use crate::solution::solver::{Solver, Weights};

/// Outcome of a rectangular assignment.
#[derive(Debug, Clone, Default)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_rows: Vec<usize>,
    pub unmatched_cols: Vec<usize>,
}

/// Minimum-cost assignment of rows to columns; a pair is kept only if its
/// cost is below `thresh`. The matrix is padded to a square with a constant
/// so any shape works.
pub fn linear_assignment(cost_matrix: &Array2<f64>, thresh: f64) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();
    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_rows: (0..num_rows).collect(),
            unmatched_cols: (0..num_cols).collect(),
        };
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), 1e6);
    padded
        .slice_mut(ndarray::s![..num_rows, ..num_cols])
        .assign(cost_matrix);

    let mut result = AssignmentResult::default();
    let mut col_free = vec![true; num_cols];
    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
                if col < num_cols && cost_matrix[[row, col]] < thresh {
                    result.matches.push((row, col));
                    col_free[col] = false;
                } else {
                    result.unmatched_rows.push(row);
                }
            }
        }
        Err(e) => {
            tracing::warn!("lapjv failed on a {}x{} matrix: {:?}", num_rows, num_cols, e);
            result.unmatched_rows = (0..num_rows).collect();
        }
    }
    result.unmatched_cols = (0..num_cols).filter(|&j| col_free[j]).collect();
    result
}

/// `costs[1] - costs[0]`: price of switching from 0 to 1 object.
fn on_minus_off(features: &Features) -> Result<f64> {
    match features.as_slice() {
        [[off], [on], ..] => Ok(on - off),
        _ => Err(Error::Solver {
            backend: AssignmentSolver::NAME.to_string(),
            message: "cost vectors need at least two states".to_string(),
        }),
    }
}

fn on_cost(features: &Features) -> Result<f64> {
    match features.as_slice() {
        [_, [on], ..] => Ok(*on),
        _ => Err(Error::Solver {
            backend: AssignmentSolver::NAME.to_string(),
            message: "cost vectors need at least two states".to_string(),
        }),
    }
}

/// Frame-by-frame linear assignment backend.
#[derive(Debug, Clone, Default)]
pub struct AssignmentSolver;

impl AssignmentSolver {
    pub const NAME: &'static str = "assignment";

    pub fn new() -> Self {
        Self
    }
}

impl Solver for AssignmentSolver {
    type Error = Error;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn solve(&mut self, model: &ModelDocument, weights: &Weights) -> Result<SolverResult> {
        let nodes = &model.segmentation_hypotheses;
        let index: HashMap<usize, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        let lookup = |id: usize| {
            index
                .get(&id)
                .copied()
                .ok_or_else(|| Error::invariant(format!("link refers to unknown node {id}")))
        };

        // A node takes part only if its detection energy favours one object.
        let active = nodes
            .iter()
            .map(|n| Ok(weights.detection * on_minus_off(&n.features)? < 0.0))
            .collect::<Result<Vec<bool>>>()?;

        let mut per_frame: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (l, link) in model.linking_hypotheses.iter().enumerate() {
            let (src, dest) = (lookup(link.src)?, lookup(link.dest)?);
            if active[src] && active[dest] {
                per_frame.entry(nodes[src].timestep[1]).or_default().push(l);
            }
        }

        let frames: Vec<Vec<usize>> = per_frame.into_values().collect();
        let accepted = frames
            .par_iter()
            .map(|links| Self::solve_frame(model, weights, links, &lookup))
            .collect::<Result<Vec<Vec<usize>>>>()?;

        let mut link_on = vec![false; model.linking_hypotheses.len()];
        for l in accepted.into_iter().flatten() {
            link_on[l] = true;
        }
        let mut out_degree = vec![0usize; nodes.len()];
        for (l, link) in model.linking_hypotheses.iter().enumerate() {
            if link_on[l] {
                out_degree[lookup(link.src)?] += 1;
            }
        }

        let result = SolverResult {
            detection_results: nodes
                .iter()
                .zip(&active)
                .map(|(n, &on)| DetectionResult {
                    id: n.id,
                    value: u32::from(on),
                })
                .collect(),
            linking_results: model
                .linking_hypotheses
                .iter()
                .zip(&link_on)
                .map(|(link, &on)| LinkingResult {
                    src: link.src,
                    dest: link.dest,
                    value: u32::from(on),
                })
                .collect(),
            division_results: Some(
                nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, n)| n.division_features.is_some())
                    .map(|(i, n)| DivisionResult {
                        id: n.id,
                        value: out_degree[i] == 2,
                    })
                    .collect(),
            ),
        };
        tracing::info!(
            "assignment solver: {} of {} nodes active, {} links accepted",
            result.active_node_count(),
            nodes.len(),
            link_on.iter().filter(|&&on| on).count()
        );
        Ok(result)
    }
}

impl AssignmentSolver {
    /// Accepted link indices among the links leaving one timestep.
    fn solve_frame(
        model: &ModelDocument,
        weights: &Weights,
        links: &[usize],
        lookup: &(impl Fn(usize) -> Result<usize> + Sync),
    ) -> Result<Vec<usize>> {
        let nodes = &model.segmentation_hypotheses;
        // Rows are nodes ending at `t` plus a second daughter slot for every
        // division candidate; columns are nodes starting at `t + 1`.
        let mut num_rows = 0;
        let mut row_of: HashMap<(usize, bool), usize> = HashMap::new();
        let mut cols: Vec<usize> = Vec::new();
        let mut col_of: HashMap<usize, usize> = HashMap::new();

        for &l in links {
            let link = &model.linking_hypotheses[l];
            let (src, dest) = (lookup(link.src)?, lookup(link.dest)?);
            let slots: &[bool] = if nodes[src].division_features.is_some() {
                &[false, true]
            } else {
                &[false]
            };
            for &second_daughter in slots {
                row_of.entry((src, second_daughter)).or_insert_with(|| {
                    num_rows += 1;
                    num_rows - 1
                });
            }
            col_of.entry(dest).or_insert_with(|| {
                cols.push(dest);
                cols.len() - 1
            });
        }

        // Net energy change of switching a link on, relative to letting the
        // source disappear and the target appear. Non-links and unfavourable
        // pairs cost nothing, which is the same as leaving them unmatched.
        let mut cost = Array2::<f64>::zeros((num_rows, cols.len()));
        let mut pair_link: HashMap<(usize, usize), usize> = HashMap::new();
        for &l in links {
            let link = &model.linking_hypotheses[l];
            let (src, dest) = (lookup(link.src)?, lookup(link.dest)?);
            let col = col_of[&dest];
            let transition = weights.transition * on_minus_off(&link.features)?;
            let appear = weights.appearance * on_cost(&nodes[dest].appearance_features)?;

            let row = row_of[&(src, false)];
            let disappear = weights.disappearance * on_cost(&nodes[src].disappearance_features)?;
            cost[[row, col]] = (transition - disappear - appear).min(0.0);
            pair_link.insert((row, col), l);

            if let Some(division) = &nodes[src].division_features {
                let row = row_of[&(src, true)];
                let divide = weights.division * on_minus_off(division)?;
                cost[[row, col]] = (transition + divide - appear).min(0.0);
                pair_link.insert((row, col), l);
            }
        }

        let assignment = linear_assignment(&cost, 0.0);
        let mut accepted: Vec<usize> = assignment
            .matches
            .iter()
            .filter_map(|pair| pair_link.get(pair).copied())
            .collect();
        accepted.sort_unstable();
        accepted.dedup();
        Ok(accepted)
    }
}
