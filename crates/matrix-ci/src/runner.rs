//! Single-step execution.

use crate::step::{Severity, StepConfig, StepOutcome, StepStatus};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::warn;

/// Execute one step and map its exit to an outcome by severity.
///
/// Spawn errors and timeouts are contained in the outcome (they fail only
/// this step, and only fatally if the step itself is fatal).
pub async fn execute_step(config: &StepConfig) -> StepOutcome {
    if !config.enabled {
        let reason = config.skip_reason.as_deref().unwrap_or("step disabled");
        return StepOutcome::skipped(config.name.as_str(), reason);
    }
    if config.command.is_empty() {
        return failure(config, None, String::new(), "step has empty command".to_string(), 0);
    }

    let start = Instant::now();
    let exe = &config.command[0];
    let args = &config.command[1..];

    // The timeout path drops the child mid-wait; without kill_on_drop the
    // process would outlive the step.
    let child = match Command::new(exe)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return failure(
                config,
                None,
                String::new(),
                format!("failed to spawn '{}': {}", exe, e),
                start.elapsed().as_millis() as u64,
            );
        }
    };

    let output = if config.timeout_secs > 0 {
        match tokio::time::timeout(
            std::time::Duration::from_secs(config.timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                return failure(
                    config,
                    None,
                    String::new(),
                    format!("timed out after {} seconds", config.timeout_secs),
                    start.elapsed().as_millis() as u64,
                );
            }
        }
    } else {
        child.wait_with_output().await
    };

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            return failure(
                config,
                None,
                String::new(),
                format!("failed to collect output: {}", e),
                start.elapsed().as_millis() as u64,
            );
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if output.status.success() {
        StepOutcome {
            step_name: config.name.clone(),
            status: StepStatus::Passed,
            exit_code: Some(exit_code),
            stdout,
            stderr,
            duration_ms,
            artifact: config.artifact.clone(),
            note: None,
        }
    } else {
        failure(config, Some(exit_code), stdout, stderr, duration_ms)
    }
}

fn failure(
    config: &StepConfig,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    duration_ms: u64,
) -> StepOutcome {
    let status = match config.severity {
        Severity::Fatal => StepStatus::Failed,
        Severity::BestEffort => {
            warn!(step = %config.name, "Best-effort step failed, result recorded but ignored");
            StepStatus::BestEffortFailed
        }
    };
    StepOutcome {
        step_name: config.name.clone(),
        status,
        exit_code,
        stdout,
        stderr,
        duration_ms,
        artifact: None,
        note: None,
    }
}
