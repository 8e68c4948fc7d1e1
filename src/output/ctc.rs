//! Cell-tracking-challenge style result files.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, Luma};
use ndarray::ArrayD;
use rayon::prelude::*;

use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::solution::Lineage;

/// One `trackId firstTimestep lastTimestep parentId` line per track, parent 0
/// when the track has none.
pub fn format_track_table(lineage: &Lineage) -> String {
    let mut table = String::new();
    for track in lineage.tracks().iter().filter(|t| t.id != 0) {
        let _ = writeln!(
            table,
            "{} {} {} {}",
            track.id,
            track.first_timestep,
            track.last_timestep,
            track.parent.unwrap_or(0)
        );
    }
    table
}

/// Writes the lineage table and 16-bit per-frame label images into one
/// directory.
#[derive(Debug, Clone)]
pub struct CtcWriter {
    dir: PathBuf,
    zero_padding: usize,
    ground_truth: bool,
}

impl CtcWriter {
    /// Create the output directory if needed.
    pub fn new(dir: impl Into<PathBuf>, config: &OutputConfig) -> Result<Self> {
        if config.zero_padding == 0 {
            return Err(Error::config("output.zero_padding must be at least 1"));
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            zero_padding: config.zero_padding,
            ground_truth: config.ground_truth,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `mask###.tif`, or `man_track###.tif` in ground-truth mode.
    pub fn frame_path(&self, timestep: u32) -> PathBuf {
        let prefix = if self.ground_truth { "man_track" } else { "mask" };
        self.dir.join(format!(
            "{prefix}{timestep:0width$}.tif",
            width = self.zero_padding
        ))
    }

    /// `res_track.txt`, or `man_track.txt` in ground-truth mode.
    pub fn track_file_path(&self) -> PathBuf {
        let name = if self.ground_truth {
            "man_track.txt"
        } else {
            "res_track.txt"
        };
        self.dir.join(name)
    }

    pub fn write_tracks(&self, lineage: &Lineage) -> Result<PathBuf> {
        let path = self.track_file_path();
        std::fs::write(&path, format_track_table(lineage))?;
        tracing::info!("wrote {} tracks to {}", lineage.len(), path.display());
        Ok(path)
    }

    /// Save one remapped frame. Frames are `(rows, cols)`; extra axes are
    /// accepted only with length 1.
    pub fn write_frame(&self, timestep: u32, frame: &ArrayD<u16>) -> Result<PathBuf> {
        let shape = frame.shape();
        let unsupported = Error::UnsupportedImage {
            timestep,
            ndim: frame.ndim(),
        };
        if shape.len() < 2 || shape[2..].iter().any(|&n| n != 1) {
            return Err(unsupported);
        }
        let (Ok(height), Ok(width)) = (u32::try_from(shape[0]), u32::try_from(shape[1])) else {
            return Err(unsupported);
        };

        let pixels: Vec<u16> = frame.iter().copied().collect();
        let buffer = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, pixels)
            .ok_or(unsupported)?;
        let path = self.frame_path(timestep);
        buffer.save(&path)?;
        tracing::debug!("wrote frame {} to {}", timestep, path.display());
        Ok(path)
    }

    /// Save every frame in parallel; each timestep has its own path.
    pub fn write_frames(&self, frames: &BTreeMap<u32, ArrayD<u16>>) -> Result<Vec<PathBuf>> {
        let entries: Vec<(&u32, &ArrayD<u16>)> = frames.iter().collect();
        let paths = entries
            .par_iter()
            .map(|(t, frame)| self.write_frame(**t, frame))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!("wrote {} frames to {}", paths.len(), self.dir.display());
        Ok(paths)
    }
}
