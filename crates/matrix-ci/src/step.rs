//! Step definitions and outcomes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a non-zero exit is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Non-zero exit fails the owning cell.
    Fatal,

    /// Non-zero exit is recorded but never fails the cell.
    BestEffort,
}

/// Final status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
    BestEffortFailed,
}

/// Configuration for a single step within a cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Human-readable step name.
    pub name: String,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,

    /// Fatal or best-effort.
    pub severity: Severity,

    /// Artifact the step is expected to emit on success (e.g. a coverage
    /// report), attached to the outcome.
    pub artifact: Option<PathBuf>,

    /// Whether this step is enabled.
    pub enabled: bool,

    /// Why a disabled step was gated off (recorded in its skipped outcome).
    #[serde(default)]
    pub skip_reason: Option<String>,
}

impl StepConfig {
    /// Create a fatal step.
    pub fn fatal(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
            severity: Severity::Fatal,
            artifact: None,
            enabled: true,
            skip_reason: None,
        }
    }

    /// Create a best-effort step.
    pub fn best_effort(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
            severity: Severity::BestEffort,
            artifact: None,
            enabled: true,
            skip_reason: None,
        }
    }

    /// Attach an expected artifact path.
    pub fn with_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    /// Disable this step.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Disable this step with a recorded reason.
    pub fn gated(mut self, reason: impl Into<String>) -> Self {
        self.enabled = false;
        self.skip_reason = Some(reason.into());
        self
    }
}

/// Recorded result of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Step name.
    pub step_name: String,

    /// Final status.
    pub status: StepStatus,

    /// Exit code, when the command actually ran.
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Artifact emitted by the step, if any.
    pub artifact: Option<PathBuf>,

    /// Why the step was skipped or what went wrong outside the command.
    pub note: Option<String>,
}

impl StepOutcome {
    /// A step that was never run (gated off, disabled, or after a fatal
    /// failure earlier in the cell).
    pub fn skipped(step_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            status: StepStatus::Skipped,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            artifact: None,
            note: Some(reason.into()),
        }
    }

    /// True only for fatal failures; best-effort failures never flip the
    /// owning cell to failed.
    pub fn failed_fatally(&self) -> bool {
        self.status == StepStatus::Failed
    }

    pub fn passed(&self) -> bool {
        self.status == StepStatus::Passed
    }
}
