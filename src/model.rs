//! Energy model and its export for the ILP solver.

mod convexify;
mod energy;
mod export;

pub use convexify::convex_envelope;
pub use energy::{
    CostModel, CostModelGenerator, NodeCosts, PROBABILITY_FLOOR, TransitionClassifier, neg_log,
};
pub use export::{
    ExportSettings, Features, LinkingHypothesis, ModelDocument, ModelExporter,
    SegmentationHypothesis,
};
