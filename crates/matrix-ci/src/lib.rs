//! matrix-ci - conditional test-matrix orchestration
//!
//! Provides a matrix orchestrator that:
//! - Expands named axes into independent matrix cells (full cross-product)
//! - Resolves each cell's environment through the content-addressed cache
//! - Selects per-cell step variants (coverage, upload gating, severity)
//! - Runs cells concurrently with fail-fast disabled, steps sequentially
//! - Aggregates per-cell outcomes into a run-wide report

pub mod axes;
pub mod error;
pub mod matrix;
pub mod report;
pub mod runner;
pub mod selector;
pub mod spec;
pub mod step;

// Re-export key types
pub use axes::{Axis, AxisSet, MatrixCell};
pub use error::PipelineError;
pub use matrix::JobMatrixRunner;
pub use report::{CellReport, CellState, CellStatus, RunReport};
pub use selector::{CoverageVariant, StepSelector, Trigger, UploadDecision};
pub use spec::{PipelineSpec, ProvisionerConfig, StepClass, StepTemplate};
pub use step::{Severity, StepConfig, StepOutcome, StepStatus};
