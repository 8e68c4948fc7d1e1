//! Pixel-wise substitution of segment ids by track ids.

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array, ArrayD, Dimension};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::graph::LabelImageSource;
use crate::solution::TrackMapping;

/// Replace every segment id of `labels` by its track id. Background and
/// unmapped segments become 0; the shape is unchanged.
pub fn remap_labels<D: Dimension>(
    labels: &Array<u32, D>,
    mapping: &HashMap<u32, u32>,
) -> Result<Array<u16, D>> {
    let mut narrow = HashMap::with_capacity(mapping.len());
    for (&segment, &track) in mapping {
        let track = u16::try_from(track).map_err(|_| Error::TrackIdOverflow(track))?;
        narrow.insert(segment, track);
    }
    Ok(labels.mapv(|segment| {
        if segment == 0 {
            0
        } else {
            narrow.get(&segment).copied().unwrap_or(0)
        }
    }))
}

/// Read the label image of every mapped timestep from `source` and remap the
/// frames in parallel.
pub fn remap_frames<S: LabelImageSource>(
    source: &mut S,
    mapping: &TrackMapping,
    timesteps: impl IntoIterator<Item = u32>,
) -> Result<BTreeMap<u32, ArrayD<u16>>> {
    let mut frames = Vec::new();
    for t in timesteps {
        let image = source
            .label_image(t)
            .map_err(|e| Error::Source(format!("label image at timestep {t}: {e}")))?;
        frames.push((t, image));
    }

    let remapped = frames
        .par_iter()
        .map(|(t, image)| Ok((*t, remap_labels(image, &mapping.frame(*t))?)))
        .collect::<Result<BTreeMap<_, _>>>()?;
    tracing::info!("remapped {} label frames", remapped.len());
    Ok(remapped)
}
