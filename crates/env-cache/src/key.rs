//! Cache key derivation.
//!
//! A key combines the runner OS, a project namespace, an operator-bumped
//! epoch, the environment axis value, and the manifest digest with fixed
//! delimiters in a fixed order:
//!
//! ```text
//! {os}-{namespace}-{epoch}-{axis_value}-{digest}
//! ```
//!
//! The epoch is the explicit cache-busting escape hatch: bumping it forces
//! every key to change independent of manifest content (e.g. after a tooling
//! upgrade).

use crate::fingerprint::ManifestDigest;
use serde::{Deserialize, Serialize};

/// A derived environment cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds cache keys for one (os, namespace, epoch) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKeyBuilder {
    /// Runner OS name (e.g. "linux").
    pub os_name: String,

    /// Project namespace embedded in every key.
    pub namespace: String,

    /// Operator-controlled integer, bumped manually to invalidate all keys.
    pub epoch: u32,
}

impl CacheKeyBuilder {
    pub fn new(os_name: impl Into<String>, namespace: impl Into<String>, epoch: u32) -> Self {
        Self {
            os_name: os_name.into(),
            namespace: namespace.into(),
            epoch,
        }
    }

    /// Derive the key for one environment axis value and manifest digest.
    ///
    /// Pure: identical inputs always yield an identical key.
    pub fn build(&self, axis_value: &str, digest: &ManifestDigest) -> CacheKey {
        CacheKey(format!(
            "{}-{}-{}-{}-{}",
            self.os_name, self.namespace, self.epoch, axis_value, digest
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(s: &str) -> ManifestDigest {
        ManifestDigest::from_hex(s)
    }

    #[test]
    fn test_key_format() {
        let builder = CacheKeyBuilder::new("linux", "improver", 3);
        let key = builder.build("env_a", &digest("D1"));
        assert_eq!(key.as_str(), "linux-improver-3-env_a-D1");
    }

    #[test]
    fn test_key_deterministic() {
        let builder = CacheKeyBuilder::new("linux", "improver", 2);
        let k1 = builder.build("latest", &digest("abc123"));
        let k2 = builder.build("latest", &digest("abc123"));
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_epoch_bump_changes_key() {
        let d = digest("abc123");
        let k1 = CacheKeyBuilder::new("linux", "improver", 2).build("env_a", &d);
        let k2 = CacheKeyBuilder::new("linux", "improver", 3).build("env_a", &d);
        assert_ne!(k1, k2, "Bumping the epoch must change the key");
    }

    #[test]
    fn test_distinct_axis_values_distinct_keys() {
        let builder = CacheKeyBuilder::new("linux", "improver", 1);
        let d = digest("abc123");
        assert_ne!(builder.build("env_a", &d), builder.build("env_b", &d));
    }

    #[test]
    fn test_distinct_digests_distinct_keys() {
        let builder = CacheKeyBuilder::new("linux", "improver", 1);
        assert_ne!(
            builder.build("env_a", &digest("D1")),
            builder.build("env_a", &digest("D2"))
        );
    }
}
