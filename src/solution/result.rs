//! Solver output: chosen state per node and link.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub id: usize,
    /// Number of objects the node represents.
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkingResult {
    pub src: usize,
    pub dest: usize,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivisionResult {
    pub id: usize,
    pub value: bool,
}

/// Assignment returned by a solver backend, in the backend's JSON layout.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverResult {
    #[serde(default)]
    pub detection_results: Vec<DetectionResult>,
    #[serde(default)]
    pub linking_results: Vec<LinkingResult>,
    /// Absent when the backend does not report division decisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division_results: Option<Vec<DivisionResult>>,
}

impl SolverResult {
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::io::BufReader::new(std::fs::File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Nodes with a non-zero state.
    pub fn active_node_count(&self) -> usize {
        self.detection_results.iter().filter(|d| d.value > 0).count()
    }
}
