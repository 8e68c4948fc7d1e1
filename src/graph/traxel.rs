//! Traxels (per-frame object observations) and the store holding them.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::Path;

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::fov::FieldOfView;
use crate::graph::source::TraxelSource;

/// Feature names understood by the energy model.
pub mod features {
    /// Object center, 2 or 3 scaled coordinates.
    pub const POSITION: &str = "com";
    /// Object size in pixels.
    pub const SIZE: &str = "count";
    /// Object-count classifier output, one probability per number of objects.
    pub const DETECTION: &str = "detProb";
    /// Division classifier output.
    pub const DIVISION: &str = "divProb";
}

/// Identity of a traxel: its timestep and its 1-based label within that frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraxelKey {
    pub timestep: u32,
    pub id: u32,
}

impl TraxelKey {
    #[inline]
    pub fn new(timestep: u32, id: u32) -> Self {
        Self { timestep, id }
    }
}

/// One observed object at one timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traxel {
    pub timestep: u32,
    /// Label of the object in its frame's segmentation (1-based).
    pub id: u32,
    pub features: BTreeMap<String, Vec<f64>>,
}

impl Traxel {
    pub fn new(timestep: u32, id: u32) -> Self {
        Self {
            timestep,
            id,
            features: BTreeMap::new(),
        }
    }

    /// Start building a traxel with features.
    pub fn builder(timestep: u32, id: u32) -> TraxelBuilder {
        TraxelBuilder::new(timestep, id)
    }

    #[inline]
    pub fn key(&self) -> TraxelKey {
        TraxelKey::new(self.timestep, self.id)
    }

    pub fn feature(&self, name: &str) -> Option<&[f64]> {
        self.features.get(name).map(Vec::as_slice)
    }

    fn missing(&self, feature: &'static str) -> Error {
        Error::MissingFeature {
            timestep: self.timestep,
            id: self.id,
            feature,
        }
    }

    /// Object center. 2-D positions get `z = 0`.
    pub fn position(&self) -> Result<Point3<f64>> {
        match self.feature(features::POSITION) {
            Some([x, y]) => Ok(Point3::new(*x, *y, 0.0)),
            Some([x, y, z]) => Ok(Point3::new(*x, *y, *z)),
            _ => Err(self.missing(features::POSITION)),
        }
    }

    pub fn size(&self) -> Option<f64> {
        self.feature(features::SIZE).and_then(|v| v.first().copied())
    }

    /// Probability that this object divides before the next frame.
    ///
    /// Accepts either a single probability or a `[p(no division), p(division)]` pair.
    pub fn division_probability(&self) -> Option<f64> {
        match self.feature(features::DIVISION)? {
            [p] => Some(*p),
            [_, p, ..] => Some(*p),
            [] => None,
        }
    }

    /// Object-count probabilities for states `0..num_states`.
    ///
    /// Probability mass for more objects than `num_states - 1` is folded into
    /// the last state; missing trailing states are zero.
    pub fn detection_probabilities(&self, num_states: usize) -> Result<Vec<f64>> {
        let probs = self
            .feature(features::DETECTION)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| self.missing(features::DETECTION))?;

        let mut out = vec![0.0; num_states];
        for (state, p) in probs.iter().enumerate() {
            out[state.min(num_states - 1)] += p;
        }
        Ok(out)
    }
}

/// Builder for [`Traxel`] values.
#[derive(Debug, Clone)]
pub struct TraxelBuilder {
    traxel: Traxel,
}

impl TraxelBuilder {
    pub fn new(timestep: u32, id: u32) -> Self {
        Self {
            traxel: Traxel::new(timestep, id),
        }
    }

    /// Set the object center (x, y, z).
    pub fn position(self, x: f64, y: f64, z: f64) -> Self {
        self.feature(features::POSITION, vec![x, y, z])
    }

    /// Set the object size in pixels.
    pub fn size(self, size: f64) -> Self {
        self.feature(features::SIZE, vec![size])
    }

    /// Set the object-count probabilities, index = number of objects.
    pub fn detection_probabilities(self, probs: impl Into<Vec<f64>>) -> Self {
        self.feature(features::DETECTION, probs.into())
    }

    pub fn division_probability(self, p: f64) -> Self {
        self.feature(features::DIVISION, vec![p])
    }

    /// Attach an arbitrary feature array.
    pub fn feature(mut self, name: &str, values: Vec<f64>) -> Self {
        self.traxel.features.insert(name.to_string(), values);
        self
    }

    pub fn build(self) -> Traxel {
        self.traxel
    }
}

/// Inclusive range of timesteps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub first: u32,
    pub last: u32,
}

impl TimeRange {
    pub fn new(first: u32, last: u32) -> Self {
        Self { first, last }
    }

    #[inline]
    pub fn contains(&self, t: u32) -> bool {
        t >= self.first && t <= self.last
    }

    /// Timesteps of the range in increasing order.
    pub fn iter(self) -> std::ops::RangeInclusive<u32> {
        self.first..=self.last
    }
}

/// Pre-graph filter applied to traxels coming from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraxelFilter {
    /// Accepted object sizes, `[min, max)`.
    pub size_range: [f64; 2],
    /// Spatio-temporal region of interest.
    pub roi: Option<FieldOfView>,
    pub time_range: Option<TimeRange>,
}

impl Default for TraxelFilter {
    fn default() -> Self {
        Self {
            size_range: [0.0, 100_000.0],
            roi: None,
            time_range: None,
        }
    }
}

impl TraxelFilter {
    pub fn validate(&self) -> Result<()> {
        let [min, max] = self.size_range;
        if !(min < max) {
            return Err(Error::config(format!(
                "filter.size_range must be non-empty, got [{min}, {max})"
            )));
        }
        if let Some(range) = self.time_range {
            if range.first > range.last {
                return Err(Error::config("filter.time_range starts after it ends"));
            }
        }
        Ok(())
    }

    /// Whether a traxel passes the filter. Traxels without a size feature pass
    /// the size check.
    pub fn accepts(&self, traxel: &Traxel) -> Result<bool> {
        if let Some(range) = self.time_range {
            if !range.contains(traxel.timestep) {
                return Ok(false);
            }
        }
        if let Some(size) = traxel.size() {
            if size < self.size_range[0] || size >= self.size_range[1] {
                return Ok(false);
            }
        }
        if let Some(roi) = &self.roi {
            let p = traxel.position()?;
            if !roi.contains(traxel.timestep, [p.x, p.y, p.z]) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Flat, read-only collection of traxels ordered by `(timestep, id)`.
#[derive(Debug, Clone, Default)]
pub struct TraxelStore {
    traxels: Vec<Traxel>,
    time_range: Option<TimeRange>,
    frames: BTreeMap<u32, Range<usize>>,
    index: HashMap<TraxelKey, usize>,
    empty_frames: Vec<u32>,
    filtered_labels: BTreeMap<u32, Vec<u32>>,
    max_label_at: BTreeMap<u32, u32>,
}

#[derive(Serialize, Deserialize)]
struct StoreDump {
    traxels: Vec<Traxel>,
    time_range: Option<TimeRange>,
    filtered_labels: BTreeMap<u32, Vec<u32>>,
    max_label_at: BTreeMap<u32, u32>,
}

impl TraxelStore {
    /// Build a store from traxels. The observed time range spans the smallest
    /// to the largest timestep present.
    pub fn from_traxels(traxels: Vec<Traxel>) -> Result<Self> {
        let mut store = Self {
            traxels,
            ..Self::default()
        };
        store.reindex()?;
        Ok(store)
    }

    /// Declare the observed time range explicitly, e.g. when leading or
    /// trailing frames contain no objects.
    pub fn with_time_range(mut self, range: TimeRange) -> Result<Self> {
        self.time_range = Some(range);
        self.reindex()?;
        Ok(self)
    }

    /// Pull every frame of `source` through `filter`.
    pub fn from_source<S: TraxelSource>(source: &mut S, filter: &TraxelFilter) -> Result<Self> {
        let Some(mut range) = source.time_range() else {
            tracing::warn!("traxel source is empty");
            return Ok(Self::default());
        };
        if let Some(limit) = filter.time_range {
            range = TimeRange::new(range.first.max(limit.first), range.last.min(limit.last));
            if range.first > range.last {
                return Err(Error::config("filter.time_range does not overlap the source"));
            }
        }

        let mut traxels = Vec::new();
        let mut filtered_labels = BTreeMap::new();
        let mut max_label_at = BTreeMap::new();
        for t in range.iter() {
            let frame = source
                .traxels_at(t)
                .map_err(|e| Error::Source(format!("timestep {t}: {e}")))?;
            tracing::info!("at timestep {}, {} traxels found", t, frame.len());
            max_label_at.insert(t, frame.iter().map(|x| x.id).max().unwrap_or(0));

            let mut passed = 0;
            let mut rejected = Vec::new();
            for traxel in frame {
                if traxel.timestep != t {
                    return Err(Error::Source(format!(
                        "source returned traxel {} of timestep {} for timestep {t}",
                        traxel.id, traxel.timestep
                    )));
                }
                if filter.accepts(&traxel)? {
                    passed += 1;
                    traxels.push(traxel);
                } else {
                    rejected.push(traxel.id);
                }
            }
            tracing::info!("at timestep {}, {} traxels passed filter", t, passed);
            filtered_labels.insert(t, rejected);
        }

        let mut store = Self {
            traxels,
            time_range: Some(range),
            filtered_labels,
            max_label_at,
            ..Self::default()
        };
        store.reindex()?;
        Ok(store)
    }

    fn reindex(&mut self) -> Result<()> {
        self.traxels.sort_by_key(Traxel::key);
        self.index.clear();
        self.frames.clear();

        for (i, traxel) in self.traxels.iter().enumerate() {
            if self.index.insert(traxel.key(), i).is_some() {
                return Err(Error::Source(format!(
                    "duplicate traxel id {} at timestep {}",
                    traxel.id, traxel.timestep
                )));
            }
            self.frames
                .entry(traxel.timestep)
                .and_modify(|r| r.end = i + 1)
                .or_insert(i..i + 1);
        }

        let observed = match (self.traxels.first(), self.traxels.last()) {
            (Some(a), Some(b)) => Some(TimeRange::new(a.timestep, b.timestep)),
            _ => None,
        };
        self.time_range = match (self.time_range, observed) {
            (Some(declared), Some(seen)) => Some(TimeRange::new(
                declared.first.min(seen.first),
                declared.last.max(seen.last),
            )),
            (declared, seen) => declared.or(seen),
        };

        self.empty_frames = self
            .time_range
            .map(|r| r.iter().filter(|t| !self.frames.contains_key(t)).collect())
            .unwrap_or_default();
        for t in &self.empty_frames {
            tracing::warn!("timestep {} contains no traxels", t);
        }
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.traxels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.traxels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Traxel> {
        self.traxels.iter()
    }

    /// Traxel at a store index.
    #[inline]
    pub fn get(&self, index: usize) -> &Traxel {
        &self.traxels[index]
    }

    pub fn index_of(&self, key: TraxelKey) -> Option<usize> {
        self.index.get(&key).copied()
    }

    pub fn find(&self, timestep: u32, id: u32) -> Result<&Traxel> {
        self.index_of(TraxelKey::new(timestep, id))
            .map(|i| &self.traxels[i])
            .ok_or(Error::UnknownTraxel { timestep, id })
    }

    /// Store indices of the traxels at timestep `t`.
    pub fn frame_indices(&self, t: u32) -> Range<usize> {
        self.frames.get(&t).cloned().unwrap_or(0..0)
    }

    pub fn frame(&self, t: u32) -> &[Traxel] {
        &self.traxels[self.frame_indices(t)]
    }

    /// Observed time range, `None` for a store built from nothing.
    pub fn time_range(&self) -> Option<TimeRange> {
        self.time_range
    }

    /// Timesteps of the observed range that hold no traxel.
    pub fn empty_frames(&self) -> &[u32] {
        &self.empty_frames
    }

    /// Labels dropped by the filter, per timestep.
    pub fn filtered_labels(&self) -> &BTreeMap<u32, Vec<u32>> {
        &self.filtered_labels
    }

    /// Largest label seen per timestep before filtering.
    pub fn max_label_at(&self, t: u32) -> Option<u32> {
        self.max_label_at.get(&t).copied()
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let dump = StoreDump {
            traxels: self.traxels.clone(),
            time_range: self.time_range,
            filtered_labels: self.filtered_labels.clone(),
            max_label_at: self.max_label_at.clone(),
        };
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(file, &dump)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        let dump: StoreDump = serde_json::from_reader(file)?;
        let mut store = Self {
            traxels: dump.traxels,
            time_range: dump.time_range,
            filtered_labels: dump.filtered_labels,
            max_label_at: dump.max_label_at,
            ..Self::default()
        };
        store.reindex()?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn traxel(t: u32, id: u32, x: f64, size: f64) -> Traxel {
        Traxel::builder(t, id)
            .position(x, 0.0, 0.0)
            .size(size)
            .detection_probabilities(vec![0.1, 0.9])
            .build()
    }

    #[test]
    fn test_detection_probabilities_fold_tail() {
        let t = Traxel::builder(0, 1)
            .detection_probabilities(vec![0.1, 0.5, 0.2, 0.15, 0.05])
            .build();
        let probs = t.detection_probabilities(3).unwrap();
        assert_eq!(probs.len(), 3);
        assert_relative_eq!(probs[2], 0.4, epsilon = 1e-12);

        let padded = t.detection_probabilities(6).unwrap();
        assert_eq!(padded[5], 0.0);
    }

    #[test]
    fn test_missing_detection_feature_is_error() {
        let t = Traxel::builder(2, 7).position(1.0, 2.0, 0.0).build();
        assert!(matches!(
            t.detection_probabilities(2),
            Err(Error::MissingFeature { timestep: 2, id: 7, .. })
        ));
    }

    #[test]
    fn test_position_accepts_2d() {
        let t = Traxel::builder(0, 1)
            .feature(features::POSITION, vec![3.0, 4.0])
            .build();
        assert_eq!(t.position().unwrap(), Point3::new(3.0, 4.0, 0.0));
    }

    #[test]
    fn test_division_probability_formats() {
        let single = Traxel::builder(0, 1).division_probability(0.7).build();
        assert_eq!(single.division_probability(), Some(0.7));
        let pair = Traxel::builder(0, 1)
            .feature(features::DIVISION, vec![0.2, 0.8])
            .build();
        assert_eq!(pair.division_probability(), Some(0.8));
    }

    #[test]
    fn test_store_orders_frames_and_records_empty_frames() {
        let store = TraxelStore::from_traxels(vec![
            traxel(3, 1, 0.0, 10.0),
            traxel(0, 2, 0.0, 10.0),
            traxel(0, 1, 0.0, 10.0),
        ])
        .unwrap();
        assert_eq!(store.time_range(), Some(TimeRange::new(0, 3)));
        assert_eq!(store.frame(0).len(), 2);
        assert_eq!(store.frame(0)[0].id, 1);
        assert_eq!(store.empty_frames(), &[1, 2]);
        assert!(store.frame(2).is_empty());
    }

    #[test]
    fn test_store_rejects_duplicates() {
        let result =
            TraxelStore::from_traxels(vec![traxel(0, 1, 0.0, 1.0), traxel(0, 1, 5.0, 1.0)]);
        assert!(matches!(result, Err(Error::Source(_))));
    }

    #[test]
    fn test_from_source_applies_size_filter() {
        let mut frames = BTreeMap::new();
        frames.insert(0, vec![traxel(0, 1, 0.0, 5.0), traxel(0, 2, 5.0, 50.0)]);
        frames.insert(1, vec![traxel(1, 1, 0.0, 500.0)]);
        let filter = TraxelFilter {
            size_range: [10.0, 100.0],
            ..TraxelFilter::default()
        };

        let store = TraxelStore::from_source(&mut frames, &filter).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.filtered_labels()[&0], vec![1]);
        assert_eq!(store.filtered_labels()[&1], vec![1]);
        assert_eq!(store.empty_frames(), &[1]);
        assert_eq!(store.max_label_at(0), Some(2));
        assert_eq!(store.time_range(), Some(TimeRange::new(0, 1)));
    }

    #[test]
    fn test_json_dump_round_trip() {
        let store = TraxelStore::from_traxels(vec![traxel(0, 1, 1.0, 1.0), traxel(1, 1, 2.0, 1.0)])
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traxels.json");
        store.save_json(&path).unwrap();

        let loaded = TraxelStore::load_json(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.find(1, 1).unwrap(), store.find(1, 1).unwrap());
    }
}
