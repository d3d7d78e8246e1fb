//! Pipeline specification and identity.
//!
//! A `PipelineSpec` describes one whole run: cache identity (namespace,
//! epoch, os), the matrix axes, per-environment manifests, and the step
//! templates the selector turns into concrete per-cell step sequences.
//! Loaded from JSON; carries a deterministic digest for run identity.

use crate::axes::AxisSet;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Logical class of a step template; drives the selector's forks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepClass {
    /// Documentation build; fatal on any warning (the command enforces it).
    Docs,

    /// Test run; subject to the coverage fork.
    Test,

    /// Report upload; gated on cell identity and secret presence.
    Upload,

    /// Security/dependency audit; always best-effort.
    Audit,

    /// Style/format/lint check; always fatal.
    Lint,

    /// Type check; fatal except under the scheduled trigger.
    TypeCheck,
}

/// One step template, instantiated per cell by the selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    pub name: String,
    pub class: StepClass,

    /// Base command (first element is the executable).
    pub command: Vec<String>,

    /// Coverage-instrumented variant of `command`; only meaningful for
    /// `StepClass::Test`. `None` means the base command is used everywhere.
    #[serde(default)]
    pub coverage_command: Option<Vec<String>>,

    /// Coverage artifact emitted by the instrumented variant.
    #[serde(default)]
    pub artifact: Option<PathBuf>,

    /// Timeout in seconds (0 = none).
    #[serde(default = "default_step_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_step_timeout() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "improver".to_string()
}

fn default_os_name() -> String {
    "linux".to_string()
}

fn default_env_axis() -> String {
    "env".to_string()
}

fn default_uncached_envs() -> Vec<String> {
    vec!["latest".to_string()]
}

fn default_concurrency() -> usize {
    4
}

fn default_provisioner_program() -> String {
    "mamba".to_string()
}

fn default_provisioner_args() -> Vec<String> {
    vec!["env".to_string(), "create".to_string(), "--yes".to_string()]
}

fn default_envs_root() -> PathBuf {
    PathBuf::from(".envs")
}

fn default_provision_timeout() -> u64 {
    1800
}

/// How environments are installed: an opaque command the provisioner invokes
/// with `--name <target>` and one `--file <manifest>` per manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    #[serde(default = "default_provisioner_program")]
    pub program: String,

    #[serde(default = "default_provisioner_args")]
    pub args: Vec<String>,

    /// Directory environments are created under.
    #[serde(default = "default_envs_root")]
    pub envs_root: PathBuf,

    /// Timeout in seconds for one provisioning run (0 = none).
    #[serde(default = "default_provision_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            program: default_provisioner_program(),
            args: default_provisioner_args(),
            envs_root: default_envs_root(),
            timeout_secs: default_provision_timeout(),
        }
    }
}

/// Specification of one matrix run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Project namespace embedded in every cache key.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Runner OS name, part of the cache key.
    #[serde(default = "default_os_name")]
    pub os_name: String,

    /// Operator-bumped cache epoch (manual invalidation signal).
    pub epoch: u32,

    /// Matrix axes; the full cross-product is run.
    pub axes: AxisSet,

    /// Which axis names the logical environment (manifest lookup key).
    #[serde(default = "default_env_axis")]
    pub env_axis: String,

    /// Dependency manifests per environment axis value, in hash order.
    pub manifests: BTreeMap<String, Vec<PathBuf>>,

    /// Environment values that bypass the cache entirely (forward-compat
    /// checks against unpinned versions).
    #[serde(default = "default_uncached_envs")]
    pub uncached_envs: Vec<String>,

    /// Environment whose cells run tests without coverage instrumentation.
    pub baseline_env: String,

    /// Environment whose cells may run the report upload.
    pub upload_env: String,

    /// Step templates, in execution order.
    pub steps: Vec<StepTemplate>,

    /// Maximum number of cells running concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Wall-clock timeout for one whole cell, seconds (0 = none).
    #[serde(default)]
    pub cell_timeout_secs: u64,

    /// Installer command used on cache misses.
    #[serde(default)]
    pub provisioner: ProvisionerConfig,
}

impl PipelineSpec {
    /// Load a spec from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let bytes = std::fs::read(path.as_ref())?;
        let spec: PipelineSpec = serde_json::from_slice(&bytes)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Structural checks that cannot be expressed in serde alone.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.concurrency == 0 {
            return Err(PipelineError::Spec("concurrency must be at least 1".into()));
        }
        if !self.axes.axes.iter().any(|a| a.name == self.env_axis) {
            return Err(PipelineError::Spec(format!(
                "env axis '{}' is not declared in the axis set",
                self.env_axis
            )));
        }
        // Every env value that is cached must have manifests to hash.
        if let Some(axis) = self.axes.axes.iter().find(|a| a.name == self.env_axis) {
            for value in &axis.values {
                if !self.manifests.contains_key(value) {
                    return Err(PipelineError::UnknownEnvironment(value.clone()));
                }
            }
        }
        Ok(())
    }

    /// Deterministic SHA-256 digest of the spec's canonical JSON form.
    ///
    /// Errs on a spec that cannot be encoded, e.g. a manifest path holding
    /// non-UTF-8 bytes.
    pub fn spec_digest(&self) -> Result<String, PipelineError> {
        // serde_json serializes struct fields in declaration order and
        // BTreeMap keys sorted, so the encoding is canonical.
        let encoded = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Whether the cache is bypassed for this environment value.
    pub fn is_uncached(&self, env: &str) -> bool {
        self.uncached_envs.iter().any(|e| e == env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axes::AxisSet;

    fn spec() -> PipelineSpec {
        let mut manifests = BTreeMap::new();
        manifests.insert("env_a".to_string(), vec![PathBuf::from("envs/env_a.yml")]);
        manifests.insert("latest".to_string(), vec![PathBuf::from("envs/latest.yml")]);

        PipelineSpec {
            namespace: "improver".into(),
            os_name: "linux".into(),
            epoch: 3,
            axes: AxisSet::single("env", vec!["env_a".into(), "latest".into()]),
            env_axis: "env".into(),
            manifests,
            uncached_envs: vec!["latest".into()],
            baseline_env: "latest".into(),
            upload_env: "env_a".into(),
            steps: vec![],
            concurrency: 2,
            cell_timeout_secs: 0,
            provisioner: ProvisionerConfig::default(),
        }
    }

    #[test]
    fn test_spec_digest_deterministic() {
        let s = spec();
        assert_eq!(s.spec_digest().unwrap(), s.spec_digest().unwrap());
        assert_eq!(s.spec_digest().unwrap().len(), 64);
    }

    #[test]
    fn test_spec_digest_sensitive_to_epoch() {
        let s1 = spec();
        let mut s2 = spec();
        s2.epoch = 4;
        assert_ne!(s1.spec_digest().unwrap(), s2.spec_digest().unwrap());
    }

    #[test]
    fn test_spec_digest_rejects_non_utf8_path() {
        use std::os::unix::ffi::OsStrExt;

        let mut s = spec();
        let bad = PathBuf::from(std::ffi::OsStr::from_bytes(b"envs/\xff.yml"));
        s.manifests.insert("env_a".into(), vec![bad]);
        assert!(matches!(s.spec_digest(), Err(PipelineError::Json(_))));
    }

    #[test]
    fn test_validate_rejects_missing_manifests() {
        let mut s = spec();
        s.manifests.remove("latest");
        assert!(matches!(
            s.validate(),
            Err(PipelineError::UnknownEnvironment(env)) if env == "latest"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_env_axis() {
        let mut s = spec();
        s.env_axis = "platform".into();
        assert!(matches!(s.validate(), Err(PipelineError::Spec(_))));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut s = spec();
        s.concurrency = 0;
        assert!(matches!(s.validate(), Err(PipelineError::Spec(_))));
    }

    #[test]
    fn test_is_uncached() {
        let s = spec();
        assert!(s.is_uncached("latest"));
        assert!(!s.is_uncached("env_a"));
    }

    #[test]
    fn test_from_json_defaults() {
        let json = serde_json::json!({
            "epoch": 1,
            "axes": { "axes": [ { "name": "env", "values": ["env_a"] } ] },
            "manifests": { "env_a": ["envs/env_a.yml"] },
            "baseline_env": "env_a",
            "upload_env": "env_a",
            "steps": []
        });
        let spec: PipelineSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.namespace, "improver");
        assert_eq!(spec.os_name, "linux");
        assert_eq!(spec.env_axis, "env");
        assert_eq!(spec.uncached_envs, vec!["latest".to_string()]);
        assert_eq!(spec.concurrency, 4);
        spec.validate().unwrap();
    }
}
