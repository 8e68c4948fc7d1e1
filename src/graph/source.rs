//! Traits for the external collaborators that feed traxels and label images.

use std::collections::BTreeMap;
use std::convert::Infallible;

use ndarray::ArrayD;

use crate::graph::traxel::{TimeRange, Traxel};

/// Upstream feature extraction: yields the traxels of each timestep.
///
/// # Example
///
/// ```ignore
/// use celltrack_rs::{TimeRange, Traxel, TraxelSource};
///
/// struct MySegmentation { /* ... */ }
///
/// impl TraxelSource for MySegmentation {
///     type Error = std::io::Error;
///
///     fn time_range(&self) -> Option<TimeRange> {
///         Some(TimeRange::new(0, 99))
///     }
///
///     fn traxels_at(&mut self, timestep: u32) -> Result<Vec<Traxel>, Self::Error> {
///         // Read region features and classifier outputs for `timestep`
///         Ok(vec![])
///     }
/// }
/// ```
pub trait TraxelSource {
    /// Error type for lookup failures.
    type Error: std::fmt::Display;

    /// Timesteps this source covers, `None` if it holds no frame at all.
    fn time_range(&self) -> Option<TimeRange>;

    /// All traxels of one timestep, before any filtering.
    fn traxels_at(&mut self, timestep: u32) -> Result<Vec<Traxel>, Self::Error>;
}

impl TraxelSource for BTreeMap<u32, Vec<Traxel>> {
    type Error = Infallible;

    fn time_range(&self) -> Option<TimeRange> {
        let first = *self.keys().next()?;
        let last = *self.keys().next_back()?;
        Some(TimeRange::new(first, last))
    }

    fn traxels_at(&mut self, timestep: u32) -> Result<Vec<Traxel>, Self::Error> {
        Ok(self.get(&timestep).cloned().unwrap_or_default())
    }
}

/// Per-frame segmentation label images; pixel value = traxel id, 0 = background.
pub trait LabelImageSource {
    /// Error type for read failures.
    type Error: std::fmt::Display;

    fn label_image(&mut self, timestep: u32) -> Result<ArrayD<u32>, Self::Error>;
}

impl LabelImageSource for BTreeMap<u32, ArrayD<u32>> {
    type Error = String;

    fn label_image(&mut self, timestep: u32) -> Result<ArrayD<u32>, Self::Error> {
        self.get(&timestep)
            .cloned()
            .ok_or_else(|| format!("no label image for timestep {timestep}"))
    }
}
