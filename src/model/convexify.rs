use crate::model::energy::CostModel;

/// Lower convex envelope of `costs` over the state index, evaluated at every
/// state. Vectors of length two or less are already convex.
pub fn convex_envelope(costs: &[f64]) -> Vec<f64> {
    if costs.len() <= 2 {
        return costs.to_vec();
    }

    // Andrew's monotone chain, lower hull only; x coordinates are the indices.
    let mut hull: Vec<usize> = Vec::with_capacity(costs.len());
    for i in 0..costs.len() {
        while hull.len() >= 2 {
            let (a, b) = (hull[hull.len() - 2], hull[hull.len() - 1]);
            let cross = (b - a) as f64 * (costs[i] - costs[a]) - (i - a) as f64 * (costs[b] - costs[a]);
            if cross <= 0.0 {
                hull.pop();
            } else {
                break;
            }
        }
        hull.push(i);
    }

    let mut out = Vec::with_capacity(costs.len());
    for pair in hull.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let slope = (costs[b] - costs[a]) / (b - a) as f64;
        for i in a..b {
            out.push(costs[a] + slope * (i - a) as f64);
        }
    }
    out.push(costs[costs.len() - 1]);
    out
}

impl CostModel {
    /// Replace every cost vector by its convex envelope.
    pub fn convexify(&mut self) {
        let mut changed = 0usize;
        self.map_vectors(|costs| {
            let convex = convex_envelope(costs);
            if convex != *costs {
                changed += 1;
                *costs = convex;
            }
        });
        tracing::debug!("convexified {} cost vectors", changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_convex_input_unchanged() {
        let costs = vec![0.0, 1.0, 3.0, 6.0];
        assert_eq!(convex_envelope(&costs), costs);
        assert_eq!(convex_envelope(&[4.0, 1.0]), vec![4.0, 1.0]);
    }

    #[test]
    fn test_bump_is_flattened() {
        let out = convex_envelope(&[0.0, 5.0, 2.0]);
        assert_relative_eq!(out[1], 1.0);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[2], 2.0);
    }

    #[test]
    fn test_envelope_never_exceeds_input() {
        let costs = [3.0, 0.5, 4.0, 1.0, 9.0];
        let out = convex_envelope(&costs);
        for (c, e) in costs.iter().zip(&out) {
            assert!(e <= c);
        }
        for w in out.windows(3) {
            assert!(w[2] - w[1] >= w[1] - w[0] - 1e-12);
        }
    }
}
