//! Error types for env-cache

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the environment cache layer
#[derive(Error, Debug)]
pub enum EnvCacheError {
    /// A dependency manifest could not be read. Fatal: the pipeline cannot
    /// know what to build without it.
    #[error("Manifest unreadable: {path}: {source}")]
    ManifestUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No manifest paths were supplied
    #[error("Manifest set is empty")]
    EmptyManifestSet,

    /// Provisioning command failed (unsatisfiable dependencies, network, ...)
    #[error("Provisioning failed for environment '{target}': {detail}")]
    ProvisioningFailed { target: String, detail: String },

    /// Provisioning command could not be spawned
    #[error("Provisioner spawn failed: {0}")]
    ProvisionerSpawn(String),

    /// Cache store error (corrupt entry, unreadable cache directory)
    #[error("Cache store error: {0}")]
    CacheStore(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (cache entry serialization)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
