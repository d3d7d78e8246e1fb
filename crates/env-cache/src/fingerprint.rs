//! Manifest fingerprinting - stable content digests for dependency manifests
//!
//! The digest depends only on manifest bytes and file names, never on
//! timestamps or filesystem metadata, so identical content hashes identically
//! anywhere, any time.

use crate::error::EnvCacheError;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

/// Content fingerprint of an ordered set of dependency manifests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManifestDigest(String);

impl ManifestDigest {
    /// Get the full 64-character hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get short digest (first 12 characters).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }

    /// Wrap an already-computed digest string (tests, persisted entries).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        ManifestDigest(hex.into())
    }
}

impl std::fmt::Display for ManifestDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute the fingerprint of one or more manifest files, in the given order.
///
/// Each file contributes its name and full byte content, framed with NUL
/// separators (NUL cannot appear in a valid text manifest). Any missing or
/// unreadable path is fatal: a pipeline that cannot read a manifest cannot
/// know what to build.
pub fn fingerprint<P: AsRef<Path>>(manifest_paths: &[P]) -> Result<ManifestDigest> {
    if manifest_paths.is_empty() {
        return Err(EnvCacheError::EmptyManifestSet);
    }

    let mut hasher = Sha256::new();

    for path in manifest_paths {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|source| EnvCacheError::ManifestUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(name) = path.file_name() {
            hasher.update(name.to_string_lossy().as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(&content);
        hasher.update(b"\0");
    }

    let digest = ManifestDigest(hex::encode(hasher.finalize()));
    debug!(digest = %digest.short(), files = manifest_paths.len(), "Computed manifest fingerprint");
    Ok(digest)
}
