//! Matrix expansion and cell-parallel execution.
//!
//! Cells transition independently through
//! `Pending -> Provisioning -> Ready -> Running -> Completed`, with side
//! edges to `Failed` on provisioning error or cell timeout. There is no
//! global abort: one cell's failure never cancels its siblings (fail-fast
//! disabled by design, so a broken environment axis value cannot hide
//! results for the others). Steps within a cell are strictly sequential;
//! after a fatal step failure the cell's remaining steps are recorded as
//! skipped.

use crate::axes::MatrixCell;
use crate::error::PipelineError;
use crate::report::{CellReport, CellState, RunReport};
use crate::runner::execute_step;
use crate::selector::{StepSelector, Trigger};
use crate::spec::PipelineSpec;
use crate::step::StepOutcome;
use env_cache::{ensure_environment, fingerprint, CacheKeyBuilder, EnvironmentCache, EnvironmentProvisioner};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

/// Drives the full matrix: expansion, environment resolution, step
/// execution, aggregation.
pub struct JobMatrixRunner {
    cache: Arc<dyn EnvironmentCache>,
    provisioner: Arc<dyn EnvironmentProvisioner>,
}

impl JobMatrixRunner {
    pub fn new(
        cache: Arc<dyn EnvironmentCache>,
        provisioner: Arc<dyn EnvironmentProvisioner>,
    ) -> Self {
        Self { cache, provisioner }
    }

    /// Run every cell of the matrix and aggregate the results.
    ///
    /// Returns `Err` only when the run itself cannot be constructed (empty
    /// axis, inconsistent spec). Cell-level failures are contained in the
    /// report.
    pub async fn run(
        &self,
        spec: &PipelineSpec,
        trigger: Trigger,
        secret_present: bool,
    ) -> Result<RunReport, PipelineError> {
        spec.validate()?;
        let spec_digest = spec.spec_digest()?;
        let start = Instant::now();

        let cells = spec.axes.expand()?;
        let selector = StepSelector::from_spec(spec);
        let spec = Arc::new(spec.clone());
        let semaphore = Arc::new(Semaphore::new(spec.concurrency));
        let run_id = Uuid::new_v4().to_string();

        info!(run_id = %run_id, cells = cells.len(), "Starting matrix run");

        let mut handles = Vec::with_capacity(cells.len());
        for cell in cells {
            let cell_id = cell.id();
            let semaphore = semaphore.clone();
            let spec = spec.clone();
            let selector = selector.clone();
            let cache = self.cache.clone();
            let provisioner = self.provisioner.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("cell semaphore is never closed");
                run_cell(&spec, &selector, &*cache, &*provisioner, cell, trigger, secret_present)
                    .await
            });
            handles.push((cell_id, handle));
        }

        let joined = join_all(
            handles
                .into_iter()
                .map(|(cell_id, handle)| async move { (cell_id, handle.await) }),
        )
        .await;

        let mut reports = Vec::with_capacity(joined.len());
        for (cell_id, result) in joined {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    // A panicked cell task fails only that cell.
                    warn!(cell = %cell_id, "Cell task aborted: {}", e);
                    reports.push(CellReport {
                        cell_id: cell_id.clone(),
                        env: String::new(),
                        state: CellState::Failed,
                        env_key: None,
                        cache_hit: None,
                        outcomes: Vec::new(),
                        note: Some(format!("cell task aborted: {}", e)),
                        duration_ms: 0,
                    });
                }
            }
        }

        let report = RunReport {
            run_id: run_id.clone(),
            spec_digest,
            cells: reports,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if report.success() {
            info!(run_id = %run_id, "Matrix run completed, all cells passed");
        } else {
            info!(
                run_id = %run_id,
                failed = report.failed_count(),
                "Matrix run completed with failed cells"
            );
        }

        Ok(report)
    }
}

/// Run one cell, applying the optional wall-clock timeout.
async fn run_cell(
    spec: &PipelineSpec,
    selector: &StepSelector,
    cache: &dyn EnvironmentCache,
    provisioner: &dyn EnvironmentProvisioner,
    cell: MatrixCell,
    trigger: Trigger,
    secret_present: bool,
) -> CellReport {
    let cell_id = cell.id();
    let env = cell.get(&spec.env_axis).unwrap_or_default().to_string();
    let start = Instant::now();

    if spec.cell_timeout_secs > 0 {
        let deadline = std::time::Duration::from_secs(spec.cell_timeout_secs);
        let fut = drive_cell(spec, selector, cache, provisioner, &cell, trigger, secret_present);
        match tokio::time::timeout(deadline, fut).await {
            Ok(report) => report,
            Err(_) => {
                warn!(cell = %cell_id, "Cell timed out");
                CellReport {
                    cell_id,
                    env,
                    state: CellState::Failed,
                    env_key: None,
                    cache_hit: None,
                    outcomes: Vec::new(),
                    note: Some(format!(
                        "cell timed out after {} seconds",
                        spec.cell_timeout_secs
                    )),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
        }
    } else {
        drive_cell(spec, selector, cache, provisioner, &cell, trigger, secret_present).await
    }
}

/// Provision the cell's environment and run its steps sequentially.
async fn drive_cell(
    spec: &PipelineSpec,
    selector: &StepSelector,
    cache: &dyn EnvironmentCache,
    provisioner: &dyn EnvironmentProvisioner,
    cell: &MatrixCell,
    trigger: Trigger,
    secret_present: bool,
) -> CellReport {
    let cell_id = cell.id();
    let env = cell.get(&spec.env_axis).unwrap_or_default().to_string();
    let start = Instant::now();

    let failed = |note: String, env_key: Option<String>, duration_ms: u64| CellReport {
        cell_id: cell_id.clone(),
        env: env.clone(),
        state: CellState::Failed,
        env_key,
        cache_hit: None,
        outcomes: Vec::new(),
        note: Some(note),
        duration_ms,
    };

    // Pending -> Provisioning
    info!(cell = %cell_id, env = %env, "Provisioning environment");

    let manifests = match spec.manifests.get(&env) {
        Some(m) => m.clone(),
        None => {
            return failed(
                format!("no manifests configured for environment '{}'", env),
                None,
                start.elapsed().as_millis() as u64,
            );
        }
    };

    let digest = match fingerprint(&manifests) {
        Ok(d) => d,
        Err(e) => {
            return failed(e.to_string(), None, start.elapsed().as_millis() as u64);
        }
    };

    let key = CacheKeyBuilder::new(&spec.os_name, &spec.namespace, spec.epoch).build(&env, &digest);
    let use_cache = !spec.is_uncached(&env);

    let provision = match ensure_environment(cache, provisioner, &key, &manifests, &env, use_cache)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            // Provisioning -> Failed; subsequent steps never run, siblings
            // are unaffected.
            warn!(cell = %cell_id, env = %env, "Provisioning failed: {}", e);
            return failed(
                e.to_string(),
                Some(key.to_string()),
                start.elapsed().as_millis() as u64,
            );
        }
    };

    // Provisioning -> Ready -> Running
    let planned = selector.plan(&spec.steps, cell, trigger, secret_present);

    let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(planned.len());
    let mut fatal_seen = false;

    for config in planned {
        if fatal_seen {
            outcomes.push(StepOutcome::skipped(
                config.name.as_str(),
                "earlier fatal step failed",
            ));
            continue;
        }

        info!(cell = %cell_id, step = %config.name, "Executing step");
        let outcome = execute_step(&config).await;
        if outcome.failed_fatally() {
            fatal_seen = true;
        }
        outcomes.push(outcome);
    }

    // Running -> Completed(status)
    CellReport {
        cell_id,
        env,
        state: CellState::Completed,
        env_key: Some(key.to_string()),
        cache_hit: Some(provision.cache_hit),
        outcomes,
        note: None,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{StepClass, StepTemplate};
    use async_trait::async_trait;
    use env_cache::{EnvCacheError, EnvHandle, MemoryEnvironmentCache};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingProvisioner {
        calls: AtomicUsize,
        fail_envs: Vec<String>,
    }

    impl CountingProvisioner {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_envs: Vec::new(),
            }
        }

        fn failing_for(envs: &[&str]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_envs: envs.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl env_cache::EnvironmentProvisioner for CountingProvisioner {
        async fn build(
            &self,
            _manifests: &[PathBuf],
            target: &str,
        ) -> env_cache::Result<EnvHandle> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_envs.iter().any(|e| e == target) {
                return Err(EnvCacheError::ProvisioningFailed {
                    target: target.to_string(),
                    detail: "unsatisfiable dependency set".to_string(),
                });
            }
            Ok(EnvHandle::new(target, format!("/envs/{target}")))
        }
    }

    fn write_manifests(dir: &TempDir, envs: &[&str]) -> BTreeMap<String, Vec<PathBuf>> {
        let mut manifests = BTreeMap::new();
        for env in envs {
            let path = dir.path().join(format!("{env}.yml"));
            std::fs::write(&path, format!("dependencies:\n  - pkg-{env}\n")).unwrap();
            manifests.insert(env.to_string(), vec![path]);
        }
        manifests
    }

    fn spec(dir: &TempDir, envs: &[&str], steps: Vec<StepTemplate>) -> PipelineSpec {
        PipelineSpec {
            namespace: "improver".into(),
            os_name: "linux".into(),
            epoch: 1,
            axes: crate::axes::AxisSet::single(
                "env",
                envs.iter().map(|s| s.to_string()).collect(),
            ),
            env_axis: "env".into(),
            manifests: write_manifests(dir, envs),
            uncached_envs: vec!["latest".into()],
            baseline_env: "latest".into(),
            upload_env: "env_a".into(),
            steps,
            concurrency: 4,
            cell_timeout_secs: 0,
            provisioner: crate::spec::ProvisionerConfig::default(),
        }
    }

    fn echo_step(name: &str) -> StepTemplate {
        StepTemplate {
            name: name.into(),
            class: StepClass::Test,
            command: vec!["echo".into(), "ok".into()],
            coverage_command: None,
            artifact: None,
            timeout_secs: 60,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_three_cells_run_independently() {
        let dir = TempDir::new().unwrap();
        let spec = spec(&dir, &["env_a", "env_b", "env_c"], vec![echo_step("tests")]);
        let runner = JobMatrixRunner::new(
            Arc::new(MemoryEnvironmentCache::new()),
            Arc::new(CountingProvisioner::new()),
        );

        let report = runner.run(&spec, Trigger::Push, false).await.unwrap();
        assert_eq!(report.cells.len(), 3);
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_provisioning_failure_does_not_abort_siblings() {
        let dir = TempDir::new().unwrap();
        let spec = spec(&dir, &["env_a", "env_b", "env_c"], vec![echo_step("tests")]);
        let runner = JobMatrixRunner::new(
            Arc::new(MemoryEnvironmentCache::new()),
            Arc::new(CountingProvisioner::failing_for(&["env_b"])),
        );

        let report = runner.run(&spec, Trigger::Push, false).await.unwrap();
        assert!(!report.success());
        assert_eq!(report.failed_count(), 1);

        let by_env = |env: &str| report.cells.iter().find(|c| c.env == env).unwrap();
        assert!(by_env("env_a").passed());
        assert!(!by_env("env_b").passed());
        assert_eq!(by_env("env_b").state, CellState::Failed);
        assert!(by_env("env_b").outcomes.is_empty(), "No steps run after provisioning failure");
        assert!(by_env("env_c").passed());
    }

    #[tokio::test]
    async fn test_second_run_hits_cache_and_skips_provisioning() {
        let dir = TempDir::new().unwrap();
        let spec = spec(&dir, &["env_a"], vec![echo_step("tests")]);
        let cache = Arc::new(MemoryEnvironmentCache::new());
        let provisioner = Arc::new(CountingProvisioner::new());
        let runner = JobMatrixRunner::new(cache, provisioner.clone());

        let first = runner.run(&spec, Trigger::Push, false).await.unwrap();
        assert_eq!(first.cells[0].cache_hit, Some(false));

        let second = runner.run(&spec, Trigger::Push, false).await.unwrap();
        assert_eq!(second.cells[0].cache_hit, Some(true));
        assert_eq!(
            provisioner.calls.load(Ordering::SeqCst),
            1,
            "Cache hit must skip provisioning"
        );
    }

    #[tokio::test]
    async fn test_uncached_latest_always_provisions() {
        let dir = TempDir::new().unwrap();
        let spec = spec(&dir, &["latest"], vec![echo_step("tests")]);
        let provisioner = Arc::new(CountingProvisioner::new());
        let runner = JobMatrixRunner::new(
            Arc::new(MemoryEnvironmentCache::new()),
            provisioner.clone(),
        );

        runner.run(&spec, Trigger::Schedule, false).await.unwrap();
        runner.run(&spec, Trigger::Schedule, false).await.unwrap();
        assert_eq!(provisioner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_step_skips_remaining_steps_in_cell() {
        let dir = TempDir::new().unwrap();
        let mut fail_step = echo_step("lint");
        fail_step.class = StepClass::Lint;
        fail_step.command = vec!["false".into()];
        let spec = spec(
            &dir,
            &["env_a"],
            vec![fail_step, echo_step("tests")],
        );
        let runner = JobMatrixRunner::new(
            Arc::new(MemoryEnvironmentCache::new()),
            Arc::new(CountingProvisioner::new()),
        );

        let report = runner.run(&spec, Trigger::Push, false).await.unwrap();
        let cell = &report.cells[0];
        assert!(!cell.passed());
        assert_eq!(cell.outcomes[0].status, crate::step::StepStatus::Failed);
        assert_eq!(cell.outcomes[1].status, crate::step::StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_cell_timeout_contained_at_cell_boundary() {
        let dir = TempDir::new().unwrap();
        let mut slow = echo_step("slow");
        slow.command = vec!["sleep".into(), "5".into()];
        let mut spec = spec(&dir, &["env_a", "env_b"], vec![slow]);
        spec.cell_timeout_secs = 1;
        let runner = JobMatrixRunner::new(
            Arc::new(MemoryEnvironmentCache::new()),
            Arc::new(CountingProvisioner::new()),
        );

        let report = runner.run(&spec, Trigger::Push, false).await.unwrap();
        assert_eq!(report.cells.len(), 2);
        for cell in &report.cells {
            assert_eq!(cell.state, CellState::Failed);
            assert!(cell.note.as_deref().unwrap_or_default().contains("timed out"));
        }
    }
}
