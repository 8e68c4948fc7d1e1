//! Solver contract, backends and solution interpretation.

mod assignment;
mod interpret;
mod result;
mod solver;

pub use assignment::{AssignmentResult, AssignmentSolver, linear_assignment};
pub use interpret::{Lineage, Solution, SolutionInterpreter, Track, TrackMapping};
pub use result::{DetectionResult, DivisionResult, LinkingResult, SolverResult};
pub use solver::{CommandSolver, Solver, SolverBackend, SolverConfig, Weights};
