//! Error types for matrix-ci

use thiserror::Error;

/// Errors that can occur while building or driving the matrix.
///
/// Cell-level failures (provisioning, fatal steps) are contained in the cell
/// report and never surface here; these variants cover conditions where the
/// run itself cannot be constructed.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An axis was declared with no values; the cross-product would be empty
    #[error("Axis '{0}' has no values")]
    EmptyAxis(String),

    /// The matrix has no axes at all
    #[error("Axis set is empty")]
    EmptyAxisSet,

    /// A cell references an environment with no configured manifests
    #[error("No manifests configured for environment '{0}'")]
    UnknownEnvironment(String),

    /// The pipeline spec could not be loaded or is inconsistent
    #[error("Invalid pipeline spec: {0}")]
    Spec(String),

    /// Environment layer error
    #[error(transparent)]
    EnvCache(#[from] env_cache::EnvCacheError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
