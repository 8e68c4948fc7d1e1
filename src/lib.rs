//! Cell tracking by global optimization.
//!
//! Traxels (per-frame object observations) are linked into a hypotheses
//! graph, every node and link gets a negative-log-probability cost vector,
//! and the model is handed to an ILP solver. The solver's assignment is
//! turned back into tracks, a division lineage and relabelled frames.
//!
//! ```ignore
//! use celltrack_rs::{CommandSolver, TrackingConfig, TrackingPipeline};
//!
//! let config = TrackingConfig::from_json_file("tracking.json")?;
//! let solver = CommandSolver::discover(&config.solver)?;
//! let mut pipeline = TrackingPipeline::new(solver, config)?;
//!
//! let store = pipeline.load_traxels(&mut my_features)?;
//! let result = pipeline.run(&store)?;
//! pipeline.write_results(&store, &result, &mut my_labels, "out")?;
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod solution;

pub use config::{CostConfig, ExportConfig, GraphConfig, OutputConfig, TrackingConfig};
pub use error::{Error, Result};
pub use graph::{
    FieldOfView, GraphBuilder, HypothesesGraph, LabelImageSource, Link, LinkId, Node, NodeId,
    TimeRange, Traxel, TraxelBuilder, TraxelFilter, TraxelKey, TraxelSource, TraxelStore,
};
pub use model::{
    CostModel, CostModelGenerator, ExportSettings, ModelDocument, ModelExporter,
    TransitionClassifier,
};
pub use output::{CtcWriter, remap_labels};
pub use pipeline::{BuiltModel, TrackingPipeline, TrackingResult};
pub use solution::{
    AssignmentSolver, CommandSolver, Lineage, Solution, SolutionInterpreter, Solver,
    SolverBackend, SolverConfig, SolverResult, Track, TrackMapping, Weights,
};
