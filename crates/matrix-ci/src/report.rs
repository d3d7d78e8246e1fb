//! Per-cell and run-wide result aggregation.

use crate::step::{StepOutcome, StepStatus};
use serde::{Deserialize, Serialize};

/// Lifecycle of one matrix cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    Pending,
    Provisioning,
    Ready,
    Running,
    Completed,
    Failed,
}

/// Reduced status of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Passed,
    Failed,
}

/// Result of one matrix cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellReport {
    /// Stable cell identity (axis values joined with '/').
    pub cell_id: String,

    /// Environment axis value for this cell.
    pub env: String,

    /// Final lifecycle state.
    pub state: CellState,

    /// Cache key the environment resolved through, when derived.
    pub env_key: Option<String>,

    /// Whether the environment came from the cache.
    pub cache_hit: Option<bool>,

    /// Outcomes of the cell's steps, in execution order.
    pub outcomes: Vec<StepOutcome>,

    /// Failure detail outside any single step (provisioning, timeout).
    pub note: Option<String>,

    /// Cell duration in milliseconds.
    pub duration_ms: u64,
}

impl CellReport {
    /// Failed if the cell never became ready, or any fatal step failed.
    /// Best-effort failures and skips never flip the cell.
    pub fn status(&self) -> CellStatus {
        if self.state == CellState::Failed {
            return CellStatus::Failed;
        }
        if self.outcomes.iter().any(|o| o.failed_fatally()) {
            CellStatus::Failed
        } else {
            CellStatus::Passed
        }
    }

    pub fn passed(&self) -> bool {
        self.status() == CellStatus::Passed
    }
}

/// Result of a complete matrix run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run ID.
    pub run_id: String,

    /// Digest of the pipeline specification.
    pub spec_digest: String,

    /// Per-cell reports, in matrix expansion order.
    pub cells: Vec<CellReport>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl RunReport {
    /// The run is green only if every cell is green.
    pub fn success(&self) -> bool {
        self.cells.iter().all(|c| c.passed())
    }

    pub fn passed_count(&self) -> usize {
        self.cells.iter().filter(|c| c.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.passed()).count()
    }

    /// Process exit code: non-zero iff any required cell failed.
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }

    /// Render a per-cell, per-step summary distinguishing fatal from
    /// advisory failures at a glance.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        for cell in &self.cells {
            let verdict = match cell.status() {
                CellStatus::Passed => "PASSED",
                CellStatus::Failed => "FAILED",
            };
            let cache = match cell.cache_hit {
                Some(true) => " (cache hit)",
                Some(false) => " (cache miss)",
                None => "",
            };
            out.push_str(&format!("cell {} .. {}{}\n", cell.cell_id, verdict, cache));

            if let Some(note) = &cell.note {
                out.push_str(&format!("  ! {}\n", note));
            }
            for outcome in &cell.outcomes {
                let marker = match outcome.status {
                    StepStatus::Passed => "PASS",
                    StepStatus::Failed => "FAIL",
                    StepStatus::Skipped => "SKIP",
                    StepStatus::BestEffortFailed => "WARN",
                };
                let detail = match outcome.status {
                    StepStatus::Failed => " (fatal)",
                    StepStatus::BestEffortFailed => " (advisory, ignored)",
                    _ => "",
                };
                out.push_str(&format!("  [{}] {}{}", marker, outcome.step_name, detail));
                if let Some(note) = &outcome.note {
                    out.push_str(&format!(" - {}", note));
                }
                out.push('\n');
            }
        }
        out.push_str(&format!(
            "{}/{} cells passed\n",
            self.passed_count(),
            self.cells.len()
        ));
        out
    }
}
