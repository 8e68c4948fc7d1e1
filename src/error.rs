//! Error type shared by every stage of the tracking pipeline.

use thiserror::Error;

/// Errors raised while building, exporting, solving or interpreting a
/// tracking model.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameters, detected before any graph work starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// None of the solver backends could be located.
    #[error("no ILP solver backend available (tried: {tried})")]
    SolverUnavailable { tried: String },

    /// A backend was found but did not produce a usable result.
    #[error("solver backend `{backend}` failed: {message}")]
    Solver { backend: String, message: String },

    /// Sequencing or consistency error inside the pipeline.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A traxel lacks a feature the cost model depends on.
    #[error("traxel ({timestep}, {id}) has no usable `{feature}` feature")]
    MissingFeature {
        timestep: u32,
        id: u32,
        feature: &'static str,
    },

    /// A traxel referenced by the graph is not in the store.
    #[error("traxel ({timestep}, {id}) is not in the traxel store")]
    UnknownTraxel { timestep: u32, id: u32 },

    /// An external traxel or label-image collaborator failed.
    #[error("data source failed: {0}")]
    Source(String),

    /// Track ids are written into 16-bit label images.
    #[error("track id {0} does not fit into a 16-bit label image")]
    TrackIdOverflow(u32),

    #[error("label image for timestep {timestep} has {ndim} dimensions, only 2-D frames can be written")]
    UnsupportedImage { timestep: u32, ndim: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}
