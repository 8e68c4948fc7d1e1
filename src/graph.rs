//! Traxel store and hypotheses graph construction.

mod fov;
mod hypotheses;
mod neighbors;
mod source;
mod tracklets;
mod traxel;

pub use fov::FieldOfView;
pub use hypotheses::{GraphBuilder, HypothesesGraph, Link, LinkId, Node, NodeId};
pub use neighbors::{Candidate, NeighborQuery, distance_matrix};
pub use source::{LabelImageSource, TraxelSource};
pub use traxel::{TimeRange, Traxel, TraxelBuilder, TraxelFilter, TraxelKey, TraxelStore, features};
