//! env-cache: content-addressed build-environment caching.
//!
//! This crate provides the environment layer of the matrix orchestrator:
//! - Manifest fingerprinting (stable SHA-256 digest of dependency manifests)
//! - Cache key derivation from OS / namespace / epoch / axis value / digest
//! - A pluggable environment cache (hit = reuse, miss = provision)
//! - Provisioners that build a named environment from its manifests
//!
//! A cache entry is never mutated in place: changed manifest bytes produce a
//! new key, not an update of the old entry.

pub mod cache;
pub mod error;
pub mod fingerprint;
pub mod key;
pub mod provision;

pub use cache::{CacheEntry, DirEnvironmentCache, EnvHandle, EnvironmentCache, MemoryEnvironmentCache};
pub use error::EnvCacheError;
pub use fingerprint::{fingerprint, ManifestDigest};
pub use key::{CacheKey, CacheKeyBuilder};
pub use provision::{ensure_environment, CommandProvisioner, EnvironmentProvisioner, ProvisionReport};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, EnvCacheError>;
