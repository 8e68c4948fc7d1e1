//! Nearest-neighbour candidate search between consecutive frames.

use nalgebra::Point3;
use ndarray::{Array2, ArrayView1};

use crate::error::Result;
use crate::graph::traxel::TraxelStore;

/// Candidate transition between two traxels of consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Store index of the traxel at `t`
    pub source: usize,
    /// Store index of the traxel at `t + 1`
    pub target: usize,
    pub distance: f64,
}

/// Neighbour search bounds.
#[derive(Debug, Clone, Copy)]
pub struct NeighborQuery {
    pub k: usize,
    pub max_distance: f64,
}

/// Euclidean distance matrix of shape (M, N) between two point sets.
pub fn distance_matrix(from: &[Point3<f64>], to: &[Point3<f64>]) -> Array2<f64> {
    let mut dists = Array2::zeros((from.len(), to.len()));
    for (i, a) in from.iter().enumerate() {
        for (j, b) in to.iter().enumerate() {
            dists[[i, j]] = nalgebra::distance(a, b);
        }
    }
    dists
}

/// Column indices of the `limit` smallest entries not exceeding `max_distance`,
/// closest first. Ties keep column order.
pub fn nearest_within(row: ArrayView1<'_, f64>, limit: usize, max_distance: f64) -> Vec<usize> {
    let mut cols: Vec<usize> = (0..row.len()).filter(|&j| row[j] <= max_distance).collect();
    cols.sort_by(|&a, &b| row[a].total_cmp(&row[b]).then(a.cmp(&b)));
    cols.truncate(limit);
    cols
}

/// Candidates from every traxel at `t` to the traxels at `t + 1`.
///
/// `out_limit` gives the number of neighbours a traxel may keep; division
/// candidates get a larger limit than `k`.
pub fn frame_candidates(
    store: &TraxelStore,
    t: u32,
    query: NeighborQuery,
    out_limit: impl Fn(usize) -> usize,
) -> Result<Vec<Candidate>> {
    let sources = store.frame_indices(t);
    let targets = store.frame_indices(t + 1);
    if sources.is_empty() || targets.is_empty() {
        return Ok(Vec::new());
    }

    let from = sources
        .clone()
        .map(|i| store.get(i).position())
        .collect::<Result<Vec<_>>>()?;
    let to = targets
        .clone()
        .map(|i| store.get(i).position())
        .collect::<Result<Vec<_>>>()?;
    let dists = distance_matrix(&from, &to);

    let mut candidates = Vec::new();
    for (row, source) in sources.enumerate() {
        let limit = out_limit(source).max(query.k);
        for col in nearest_within(dists.row(row), limit, query.max_distance) {
            candidates.push(Candidate {
                source,
                target: targets.start + col,
                distance: dists[[row, col]],
            });
        }
    }
    tracing::debug!("timestep {}: {} transition candidates", t, candidates.len());
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::traxel::Traxel;
    use ndarray::array;

    #[test]
    fn test_distance_matrix() {
        let a = [Point3::new(0.0, 0.0, 0.0)];
        let b = [Point3::new(3.0, 4.0, 0.0), Point3::new(0.0, 0.0, 1.0)];
        let d = distance_matrix(&a, &b);
        assert_eq!(d.dim(), (1, 2));
        assert_eq!(d[[0, 0]], 5.0);
        assert_eq!(d[[0, 1]], 1.0);
    }

    #[test]
    fn test_nearest_within_limits_and_orders() {
        let row = array![4.0, 1.0, 9.0, 2.0];
        assert_eq!(nearest_within(row.view(), 2, 10.0), vec![1, 3]);
        assert_eq!(nearest_within(row.view(), 10, 3.0), vec![1, 3]);
        assert!(nearest_within(row.view(), 3, 0.5).is_empty());
    }

    #[test]
    fn test_frame_candidates_respect_division_limit() {
        let store = TraxelStore::from_traxels(vec![
            Traxel::builder(0, 1).position(0.0, 0.0, 0.0).build(),
            Traxel::builder(1, 1).position(1.0, 0.0, 0.0).build(),
            Traxel::builder(1, 2).position(-2.0, 0.0, 0.0).build(),
            Traxel::builder(1, 3).position(50.0, 0.0, 0.0).build(),
        ])
        .unwrap();
        let query = NeighborQuery {
            k: 1,
            max_distance: 10.0,
        };

        let plain = frame_candidates(&store, 0, query, |_| 1).unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(store.get(plain[0].target).id, 1);

        let dividing = frame_candidates(&store, 0, query, |_| 2).unwrap();
        assert_eq!(dividing.len(), 2);
        assert_eq!(store.get(dividing[1].target).id, 2);
    }

    #[test]
    fn test_empty_next_frame_yields_no_candidates() {
        let store =
            TraxelStore::from_traxels(vec![Traxel::builder(0, 1).position(0.0, 0.0, 0.0).build()])
                .unwrap();
        let query = NeighborQuery {
            k: 3,
            max_distance: 10.0,
        };
        assert!(frame_candidates(&store, 0, query, |_| 3).unwrap().is_empty());
    }
}
