//! Per-cell step selection.
//!
//! The selector is pure: given the same cell, trigger, and secret presence
//! it always plans the same step sequence. Three forks are implemented:
//!
//! 1. Coverage - the baseline environment runs tests uninstrumented (the
//!    canonical pass/fail signal); every other environment runs the
//!    instrumented variant and emits a coverage artifact.
//! 2. Upload gating - the upload step runs only when the cell is the upload
//!    environment AND the credential is present; a missing credential skips
//!    the step, it never fails it.
//! 3. Severity - audit checks are best-effort, lint checks fatal, the type
//!    check fatal except under the scheduled trigger.

use crate::axes::MatrixCell;
use crate::spec::{PipelineSpec, StepClass, StepTemplate};
use crate::step::{Severity, StepConfig};
use serde::{Deserialize, Serialize};

/// What caused the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Push,
    PullRequest,
    Manual,
    Schedule,
}

/// Coverage fork outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageVariant {
    /// Plain test run, no instrumentation.
    Plain,

    /// Instrumented run that must emit a coverage artifact.
    Instrumented,
}

/// Upload-gating fork outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDecision {
    Run,
    Skip { reason: String },
}

/// Pure step-variant selector for one pipeline spec.
#[derive(Debug, Clone)]
pub struct StepSelector {
    baseline_env: String,
    upload_env: String,
    env_axis: String,
}

impl StepSelector {
    pub fn from_spec(spec: &PipelineSpec) -> Self {
        Self {
            baseline_env: spec.baseline_env.clone(),
            upload_env: spec.upload_env.clone(),
            env_axis: spec.env_axis.clone(),
        }
    }

    pub fn new(
        baseline_env: impl Into<String>,
        upload_env: impl Into<String>,
        env_axis: impl Into<String>,
    ) -> Self {
        Self {
            baseline_env: baseline_env.into(),
            upload_env: upload_env.into(),
            env_axis: env_axis.into(),
        }
    }

    fn cell_env<'a>(&self, cell: &'a MatrixCell) -> &'a str {
        cell.get(&self.env_axis).unwrap_or_default()
    }

    /// Coverage fork: baseline runs plain, everyone else instrumented.
    pub fn coverage_variant(&self, cell: &MatrixCell) -> CoverageVariant {
        if self.cell_env(cell) == self.baseline_env {
            CoverageVariant::Plain
        } else {
            CoverageVariant::Instrumented
        }
    }

    /// Upload fork: identity match AND credential present.
    pub fn upload_decision(&self, cell: &MatrixCell, secret_present: bool) -> UploadDecision {
        let env = self.cell_env(cell);
        if env != self.upload_env {
            return UploadDecision::Skip {
                reason: format!("upload restricted to environment '{}'", self.upload_env),
            };
        }
        if !secret_present {
            return UploadDecision::Skip {
                reason: "upload credential not present".to_string(),
            };
        }
        UploadDecision::Run
    }

    /// Severity fork for a step class under a trigger.
    pub fn severity(&self, class: StepClass, trigger: Trigger) -> Severity {
        match class {
            StepClass::Audit => Severity::BestEffort,
            StepClass::TypeCheck if trigger == Trigger::Schedule => Severity::BestEffort,
            StepClass::Docs
            | StepClass::Test
            | StepClass::Upload
            | StepClass::Lint
            | StepClass::TypeCheck => Severity::Fatal,
        }
    }

    /// Instantiate one template for one cell. Gated upload steps are
    /// returned disabled, with the reason recorded, so the skip is visible
    /// in the report.
    fn instantiate(
        &self,
        template: &StepTemplate,
        cell: &MatrixCell,
        trigger: Trigger,
        secret_present: bool,
    ) -> StepConfig {
        let severity = self.severity(template.class, trigger);

        let mut config = StepConfig {
            name: template.name.clone(),
            command: template.command.clone(),
            timeout_secs: template.timeout_secs,
            severity,
            artifact: None,
            enabled: template.enabled,
            skip_reason: None,
        };

        match template.class {
            StepClass::Test => {
                if self.coverage_variant(cell) == CoverageVariant::Instrumented {
                    if let Some(cov) = &template.coverage_command {
                        config.command = cov.clone();
                    }
                    config.artifact = template.artifact.clone();
                }
            }
            StepClass::Upload => {
                if let UploadDecision::Skip { reason } = self.upload_decision(cell, secret_present)
                {
                    config = config.gated(reason);
                }
            }
            _ => {}
        }

        config
    }

    /// Plan the full, ordered step sequence for one cell.
    pub fn plan(
        &self,
        templates: &[StepTemplate],
        cell: &MatrixCell,
        trigger: Trigger,
        secret_present: bool,
    ) -> Vec<StepConfig> {
        templates
            .iter()
            .map(|t| self.instantiate(t, cell, trigger, secret_present))
            .collect()
    }
}
