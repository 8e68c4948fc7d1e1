//! Solver contract and the command-line ILP backends.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ModelDocument;
use crate::solution::result::SolverResult;

/// Weights the solver multiplies onto each cost family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub detection: f64,
    pub division: f64,
    pub transition: f64,
    pub appearance: f64,
    pub disappearance: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            detection: 10.0,
            division: 10.0,
            transition: 10.0,
            appearance: 500.0,
            disappearance: 500.0,
        }
    }
}

#[derive(Serialize)]
struct WeightsFile {
    weights: [f64; 5],
}

impl Weights {
    pub fn validate(&self) -> Result<()> {
        if self.as_array().iter().any(|w| !w.is_finite()) {
            return Err(Error::config("weights must be finite"));
        }
        Ok(())
    }

    /// Solver order: detection, division, transition, appearance, disappearance.
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.detection,
            self.division,
            self.transition,
            self.appearance,
            self.disappearance,
        ]
    }

    /// `{"weights": [...]}` as read by the solver backends.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(
            file,
            &WeightsFile {
                weights: self.as_array(),
            },
        )?;
        Ok(())
    }
}

/// Anything that turns a model document into a state assignment.
///
/// # Example
///
/// ```ignore
/// use celltrack_rs::{ModelDocument, Solver, SolverResult, Weights};
///
/// struct Fixed(SolverResult);
///
/// impl Solver for Fixed {
///     type Error = std::convert::Infallible;
///
///     fn name(&self) -> &str {
///         "fixed"
///     }
///
///     fn solve(&mut self, _: &ModelDocument, _: &Weights) -> Result<SolverResult, Self::Error> {
///         Ok(self.0.clone())
///     }
/// }
/// ```
pub trait Solver {
    /// Error type for solve failures.
    type Error: Into<Error>;

    /// Backend name used in logs and error messages.
    fn name(&self) -> &str;

    /// Blocking solve of one model.
    fn solve(
        &mut self,
        model: &ModelDocument,
        weights: &Weights,
    ) -> std::result::Result<SolverResult, Self::Error>;
}

/// A solver executable and the name it is reported under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverBackend {
    pub name: String,
    /// Executable name looked up on `PATH`, or a path to it.
    pub program: String,
}

impl SolverBackend {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
        }
    }
}

/// Backend discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub backends: Vec<SolverBackend>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backends: vec![
                SolverBackend::new("cplex", "mht-cplex"),
                SolverBackend::new("gurobi", "mht-gurobi"),
            ],
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::config("solver.backends must list at least one backend"));
        }
        if let Some(b) = self.backends.iter().find(|b| b.program.trim().is_empty()) {
            return Err(Error::config(format!(
                "solver backend `{}` has no program",
                b.name
            )));
        }
        Ok(())
    }
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = path.metadata() else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.is_file() && meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        meta.is_file()
    }
}

/// Runs an external solver program as `program <model.json> <weights.json> <result.json>`.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    backend: SolverBackend,
    executable: PathBuf,
}

impl CommandSolver {
    pub fn new(backend: SolverBackend, executable: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            executable: executable.into(),
        }
    }

    /// First configured backend found on `PATH`.
    pub fn discover(config: &SolverConfig) -> Result<Self> {
        let path = std::env::var_os("PATH").unwrap_or_default();
        Self::discover_in(config, &path)
    }

    /// First configured backend found in `search_path`, a `PATH`-style list.
    /// Backends are tried strictly in configured order.
    pub fn discover_in(config: &SolverConfig, search_path: &OsStr) -> Result<Self> {
        config.validate()?;
        let dirs: Vec<PathBuf> = std::env::split_paths(search_path).collect();
        for backend in &config.backends {
            let program = Path::new(&backend.program);
            let found = if program.components().count() > 1 {
                is_executable(program).then(|| program.to_path_buf())
            } else {
                dirs.iter()
                    .map(|d| d.join(program))
                    .find(|candidate| is_executable(candidate))
            };
            match found {
                Some(executable) => {
                    tracing::info!(
                        "using solver backend `{}` at {}",
                        backend.name,
                        executable.display()
                    );
                    return Ok(Self::new(backend.clone(), executable));
                }
                None => tracing::debug!("solver backend `{}` not found", backend.name),
            }
        }
        Err(Error::SolverUnavailable {
            tried: config
                .backends
                .iter()
                .map(|b| b.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn failure(&self, message: impl Into<String>) -> Error {
        Error::Solver {
            backend: self.backend.name.clone(),
            message: message.into(),
        }
    }
}

impl Solver for CommandSolver {
    type Error = Error;

    fn name(&self) -> &str {
        &self.backend.name
    }

    fn solve(&mut self, model: &ModelDocument, weights: &Weights) -> Result<SolverResult> {
        let scratch = tempfile::tempdir()?;
        let model_path = scratch.path().join("model.json");
        let weights_path = scratch.path().join("weights.json");
        let result_path = scratch.path().join("result.json");
        model.save_json(&model_path)?;
        weights.save_json(&weights_path)?;

        tracing::info!(
            "running solver `{}` on {} nodes and {} links",
            self.backend.name,
            model.segmentation_hypotheses.len(),
            model.linking_hypotheses.len()
        );
        let output = Command::new(&self.executable)
            .arg(&model_path)
            .arg(&weights_path)
            .arg(&result_path)
            .output()
            .map_err(|e| self.failure(format!("could not start {}: {e}", self.executable.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!("{}: {}", output.status, stderr.trim())));
        }

        let result = SolverResult::load_json(&result_path)
            .map_err(|e| self.failure(format!("unreadable result: {e}")))?;
        tracing::info!(
            "solver `{}` finished, {} active nodes",
            self.backend.name,
            result.active_node_count()
        );
        Ok(result)
    }
}
