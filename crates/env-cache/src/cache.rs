//! Environment cache - maps cache keys to provisioned environment handles.
//!
//! Entries are content-addressed: a changed manifest produces a new key, not
//! an update of an existing entry. Concurrent inserts of the same key are
//! last-writer-wins; both writers carry identical content.

use crate::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Opaque handle to a provisioned environment (e.g. its install prefix).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvHandle {
    /// Logical environment name the provisioner installed into.
    pub name: String,

    /// Location of the provisioned environment.
    pub path: PathBuf,
}

impl EnvHandle {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// A cache entry: handle plus creation timestamp. Never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub handle: EnvHandle,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(handle: EnvHandle) -> Self {
        Self {
            handle,
            created_at: Utc::now(),
        }
    }
}

/// Store of provisioned environments keyed by cache key.
///
/// Lookups and inserts must be safe under concurrent access from sibling
/// matrix cells.
#[async_trait]
pub trait EnvironmentCache: Send + Sync {
    /// Look up an entry. `Some` is a hit: provisioning is skipped entirely.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<EnvHandle>>;

    /// Register a freshly provisioned environment under its key.
    async fn insert(&self, key: &CacheKey, handle: EnvHandle) -> Result<()>;

    /// Whether an entry exists for the key.
    async fn contains(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.lookup(key).await?.is_some())
    }
}

/// In-memory environment cache backed by a `Mutex<HashMap>`.
#[derive(Debug, Default)]
pub struct MemoryEnvironmentCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryEnvironmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EnvironmentCache for MemoryEnvironmentCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<EnvHandle>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key.as_str()).map(|e| e.handle.clone()))
    }

    async fn insert(&self, key: &CacheKey, handle: EnvHandle) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.as_str().to_string(), CacheEntry::new(handle));
        Ok(())
    }
}

/// Directory-backed cache: one JSON file per key, so hits survive across
/// process runs.
#[derive(Debug)]
pub struct DirEnvironmentCache {
    root: PathBuf,
}

impl DirEnvironmentCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.json", key.as_str()))
    }
}

#[async_trait]
impl EnvironmentCache for DirEnvironmentCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<EnvHandle>> {
        let path = self.entry_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let entry: CacheEntry = serde_json::from_slice(&bytes)?;
                debug!(key = %key, "Environment cache hit (dir)");
                Ok(Some(entry.handle))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert(&self, key: &CacheKey, handle: EnvHandle) -> Result<()> {
        let entry = CacheEntry::new(handle);
        let bytes = serde_json::to_vec_pretty(&entry)?;
        // Write-then-rename so a concurrent reader never sees a torn entry.
        let tmp = self.entry_path(key).with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, self.entry_path(key)).await?;
        Ok(())
    }
}
