use crate::error::Result;
use crate::graph::traxel::TraxelStore;

/// Axis-aligned spatio-temporal box enclosing the observed data.
///
/// Coordinates are ordered `(t, x, y, z)`; both bounds are inclusive. Spatial
/// bounds are expressed in scaled (physical) units, the same units traxel
/// positions use.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldOfView {
    /// Lower corner `(t, x, y, z)`
    pub lower: [f64; 4],
    /// Upper corner `(t, x, y, z)`
    pub upper: [f64; 4],
}

impl FieldOfView {
    /// Create a field of view from its two corners.
    #[inline]
    pub fn new(lower: [f64; 4], upper: [f64; 4]) -> Self {
        Self { lower, upper }
    }

    /// Field of view covering an image of `shape` voxels (x, y, z) between
    /// timesteps `t0` and `t1`, scaled per axis.
    ///
    /// A 2-D image uses `shape[2] == 1`, giving a degenerate z extent.
    pub fn from_shape(t0: u32, t1: u32, shape: [usize; 3], scale: [f64; 3]) -> Self {
        let extent = |axis: usize| scale[axis] * (shape[axis].saturating_sub(1)) as f64;
        Self {
            lower: [t0 as f64, 0.0, 0.0, 0.0],
            upper: [t1 as f64, extent(0), extent(1), extent(2)],
        }
    }

    /// Smallest box holding every traxel position of a store, or `None` when
    /// the store is empty.
    pub fn enclosing(store: &TraxelStore) -> Result<Option<Self>> {
        let Some(range) = store.time_range() else {
            return Ok(None);
        };
        let mut lower = [range.first as f64, f64::INFINITY, f64::INFINITY, f64::INFINITY];
        let mut upper = [range.last as f64, f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY];
        for traxel in store.iter() {
            let p = traxel.position()?;
            for (axis, v) in [p.x, p.y, p.z].into_iter().enumerate() {
                lower[axis + 1] = lower[axis + 1].min(v);
                upper[axis + 1] = upper[axis + 1].max(v);
            }
        }
        if store.is_empty() {
            lower[1..].fill(0.0);
            upper[1..].fill(0.0);
        }
        Ok(Some(Self { lower, upper }))
    }

    /// Replace the temporal bounds.
    #[inline]
    pub fn with_time_bounds(mut self, t0: u32, t1: u32) -> Self {
        self.lower[0] = t0 as f64;
        self.upper[0] = t1 as f64;
        self
    }

    /// Check whether a spatial position at timestep `t` lies inside the box.
    pub fn contains(&self, t: u32, position: [f64; 3]) -> bool {
        let point = [t as f64, position[0], position[1], position[2]];
        point
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(p, (lo, hi))| *p >= *lo && *p <= *hi)
    }

    /// Distance from `position` to the closest spatial face of the box.
    ///
    /// Axes with zero extent (e.g. z for 2-D data) are ignored. Points outside
    /// the box yield a negative distance; a box without any spatial extent
    /// yields infinity.
    pub fn spatial_distance_to_border(&self, position: [f64; 3]) -> f64 {
        let mut distance = f64::INFINITY;
        for axis in 0..3 {
            let (lo, hi) = (self.lower[axis + 1], self.upper[axis + 1]);
            if hi - lo <= f64::EPSILON {
                continue;
            }
            let p = position[axis];
            distance = distance.min(p - lo).min(hi - p);
        }
        distance
    }

    /// Number of spatial axes with non-zero extent.
    pub fn spatial_dimensions(&self) -> usize {
        (1..4)
            .filter(|&axis| self.upper[axis] - self.lower[axis] > f64::EPSILON)
            .count()
    }
}
