//! Environment provisioning and the cache hit/miss flow.
//!
//! On a cache hit the provisioner is never invoked; on a miss it builds the
//! environment and registers it under the key so the next run with an
//! unchanged digest hits. Provisioning must be idempotent: re-running against
//! an already-consistent target changes nothing.

use crate::cache::{EnvHandle, EnvironmentCache};
use crate::error::EnvCacheError;
use crate::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Builds an isolated, named environment from its dependency manifests.
#[async_trait]
pub trait EnvironmentProvisioner: Send + Sync {
    /// Install the declared dependencies into a fresh target named
    /// `target_name`. Idempotent.
    async fn build(&self, manifest_paths: &[PathBuf], target_name: &str) -> Result<EnvHandle>;
}

/// Outcome of `ensure_environment`, recording whether the cache was hit.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub handle: EnvHandle,
    pub cache_hit: bool,
}

/// Resolve an environment for one matrix cell: reuse on hit, build on miss.
///
/// `use_cache == false` (uncached axis values such as "latest") bypasses both
/// the lookup and the registration, so every run rebuilds against unpinned
/// dependency versions.
pub async fn ensure_environment(
    cache: &dyn EnvironmentCache,
    provisioner: &dyn EnvironmentProvisioner,
    key: &CacheKey,
    manifest_paths: &[PathBuf],
    target_name: &str,
    use_cache: bool,
) -> Result<ProvisionReport> {
    if use_cache {
        if let Some(handle) = cache.lookup(key).await? {
            info!(key = %key, env = %target_name, "Environment cache hit, skipping provisioning");
            return Ok(ProvisionReport {
                handle,
                cache_hit: true,
            });
        }
        info!(key = %key, env = %target_name, "Environment cache miss, provisioning");
    } else {
        info!(env = %target_name, "Cache disabled for this environment, provisioning");
    }

    let handle = provisioner.build(manifest_paths, target_name).await?;

    if use_cache {
        cache.insert(key, handle.clone()).await?;
    }

    Ok(ProvisionReport {
        handle,
        cache_hit: false,
    })
}

/// Provisioner that shells out to an opaque installer command.
///
/// The installer is invoked as
/// `{program} {args...} --name {target} --file {manifest}...` and must exit
/// zero on success. Environments are created under `envs_root`.
#[derive(Debug, Clone)]
pub struct CommandProvisioner {
    program: String,
    args: Vec<String>,
    envs_root: PathBuf,
    timeout_secs: u64,
}

impl CommandProvisioner {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        envs_root: impl AsRef<Path>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            envs_root: envs_root.as_ref().to_path_buf(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl EnvironmentProvisioner for CommandProvisioner {
    async fn build(&self, manifest_paths: &[PathBuf], target_name: &str) -> Result<EnvHandle> {
        if manifest_paths.is_empty() {
            return Err(EnvCacheError::EmptyManifestSet);
        }

        let env_path = self.envs_root.join(target_name);

        // The timeout path drops the child mid-wait; without kill_on_drop the
        // installer would keep running.
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--name")
            .arg(target_name)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for manifest in manifest_paths {
            cmd.arg("--file").arg(manifest);
        }

        let child = cmd
            .spawn()
            .map_err(|e| EnvCacheError::ProvisionerSpawn(format!("{}: {}", self.program, e)))?;

        let output = if self.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| EnvCacheError::ProvisioningFailed {
                target: target_name.to_string(),
                detail: format!("timed out after {} seconds", self.timeout_secs),
            })??
        } else {
            child.wait_with_output().await?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(env = %target_name, code = output.status.code().unwrap_or(-1), "Provisioning failed");
            return Err(EnvCacheError::ProvisioningFailed {
                target: target_name.to_string(),
                detail: stderr.trim().to_string(),
            });
        }

        info!(env = %target_name, path = %env_path.display(), "Environment provisioned");
        Ok(EnvHandle::new(target_name, env_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryEnvironmentCache;
    use crate::fingerprint::ManifestDigest;
    use crate::key::CacheKeyBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake provisioner that counts invocations.
    pub(crate) struct FakeProvisioner {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl FakeProvisioner {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl EnvironmentProvisioner for FakeProvisioner {
        async fn build(&self, _manifests: &[PathBuf], target: &str) -> Result<EnvHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EnvCacheError::ProvisioningFailed {
                    target: target.to_string(),
                    detail: "unsatisfiable dependency set".to_string(),
                });
            }
            Ok(EnvHandle::new(target, format!("/envs/{target}")))
        }
    }

    fn key() -> CacheKey {
        CacheKeyBuilder::new("linux", "improver", 1).build("env_a", &ManifestDigest::from_hex("d0"))
    }

    #[tokio::test]
    async fn test_miss_builds_and_registers() {
        let cache = MemoryEnvironmentCache::new();
        let prov = FakeProvisioner::new();
        let k = key();

        let report = ensure_environment(&cache, &prov, &k, &[PathBuf::from("m.yml")], "env_a", true)
            .await
            .unwrap();

        assert!(!report.cache_hit);
        assert_eq!(prov.calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains(&k).await.unwrap(), "Miss must register the result");
    }

    #[tokio::test]
    async fn test_hit_never_invokes_provisioner() {
        let cache = MemoryEnvironmentCache::new();
        let prov = FakeProvisioner::new();
        let k = key();

        cache.insert(&k, EnvHandle::new("env_a", "/envs/env_a")).await.unwrap();

        let report = ensure_environment(&cache, &prov, &k, &[PathBuf::from("m.yml")], "env_a", true)
            .await
            .unwrap();

        assert!(report.cache_hit);
        assert_eq!(prov.calls.load(Ordering::SeqCst), 0, "Hit must skip provisioning");
    }

    #[tokio::test]
    async fn test_uncached_always_builds_never_registers() {
        let cache = MemoryEnvironmentCache::new();
        let prov = FakeProvisioner::new();
        let k = key();

        for _ in 0..2 {
            let report =
                ensure_environment(&cache, &prov, &k, &[PathBuf::from("m.yml")], "latest", false)
                    .await
                    .unwrap();
            assert!(!report.cache_hit);
        }

        assert_eq!(prov.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty(), "Uncached builds must not be registered");
    }

    /// Gone, or at least dead (a zombie still shows in /proc until reaped).
    async fn process_dead(pid: u32) -> bool {
        for _ in 0..50 {
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Err(_) => return true,
                Ok(stat) => {
                    if stat.split_whitespace().nth(2) == Some("Z") {
                        return true;
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_timed_out_installer_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        // `sh -c` treats the trailing --name/--file arguments as positional
        // parameters, so the script ignores them.
        let script = format!("echo $$ > {} && exec sleep 30", pidfile.display());
        let prov = CommandProvisioner::new("sh", vec!["-c".into(), script], dir.path(), 1);

        let err = prov
            .build(&[PathBuf::from("m.yml")], "env_a")
            .await
            .unwrap_err();
        assert!(matches!(err, EnvCacheError::ProvisioningFailed { .. }));

        let pid: u32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(
            process_dead(pid).await,
            "Installer {pid} must not outlive the provisioning timeout"
        );
    }

    #[tokio::test]
    async fn test_provisioning_failure_propagates() {
        let cache = MemoryEnvironmentCache::new();
        let prov = FakeProvisioner::failing();
        let k = key();

        let err = ensure_environment(&cache, &prov, &k, &[PathBuf::from("m.yml")], "env_a", true)
            .await
            .unwrap_err();

        assert!(matches!(err, EnvCacheError::ProvisioningFailed { .. }));
        assert!(cache.is_empty(), "Failed builds must not be registered");
    }
}
