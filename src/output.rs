//! Label remapping and result files.

mod ctc;
mod remap;

pub use ctc::{CtcWriter, format_track_table};
pub use remap::{remap_frames, remap_labels};
