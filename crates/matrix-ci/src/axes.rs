//! Matrix axes and cell expansion.
//!
//! An `AxisSet` is an ordered mapping from axis name to an ordered list of
//! values; the matrix is always the full cross-product. Cells are
//! independent: each owns its assignments and shares no mutable state with
//! siblings.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// One named axis with its allowed values, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    pub values: Vec<String>,
}

impl Axis {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Ordered set of axes defining the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSet {
    pub axes: Vec<Axis>,
}

impl AxisSet {
    pub fn new(axes: Vec<Axis>) -> Self {
        Self { axes }
    }

    /// Convenience: a matrix with a single axis.
    pub fn single(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            axes: vec![Axis::new(name, values)],
        }
    }

    /// Expand to the full cross-product, in row-major order (the last axis
    /// varies fastest). Every axis must have at least one value.
    pub fn expand(&self) -> Result<Vec<MatrixCell>, PipelineError> {
        if self.axes.is_empty() {
            return Err(PipelineError::EmptyAxisSet);
        }
        for axis in &self.axes {
            if axis.values.is_empty() {
                return Err(PipelineError::EmptyAxis(axis.name.clone()));
            }
        }

        let mut cells = vec![MatrixCell {
            assignments: Vec::new(),
        }];
        for axis in &self.axes {
            let mut next = Vec::with_capacity(cells.len() * axis.values.len());
            for cell in &cells {
                for value in &axis.values {
                    let mut assignments = cell.assignments.clone();
                    assignments.push((axis.name.clone(), value.clone()));
                    next.push(MatrixCell { assignments });
                }
            }
            cells = next;
        }
        Ok(cells)
    }
}

/// One assignment of a value to every axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    /// (axis name, value) pairs in axis order.
    assignments: Vec<(String, String)>,
}

impl MatrixCell {
    /// Construct a cell directly (tests, single-cell runs).
    pub fn from_assignments(assignments: Vec<(String, String)>) -> Self {
        Self { assignments }
    }

    /// Value assigned to the named axis.
    pub fn get(&self, axis: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|(name, _)| name == axis)
            .map(|(_, value)| value.as_str())
    }

    /// Stable cell identity: axis values joined with '/' in axis order.
    pub fn id(&self) -> String {
        self.assignments
            .iter()
            .map(|(_, value)| value.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// All (axis, value) pairs in axis order.
    pub fn assignments(&self) -> &[(String, String)] {
        &self.assignments
    }
}

impl std::fmt::Display for MatrixCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_axis_expansion() {
        let axes = AxisSet::single("env", vec!["a".into(), "b".into(), "c".into()]);
        let cells = axes.expand().unwrap();

        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].get("env"), Some("a"));
        assert_eq!(cells[1].get("env"), Some("b"));
        assert_eq!(cells[2].get("env"), Some("c"));
    }

    #[test]
    fn test_cross_product_row_major() {
        let axes = AxisSet::new(vec![
            Axis::new("os", vec!["linux".into(), "macos".into()]),
            Axis::new("env", vec!["a".into(), "b".into()]),
        ]);
        let cells = axes.expand().unwrap();

        assert_eq!(cells.len(), 4);
        // Last axis varies fastest.
        assert_eq!(cells[0].id(), "linux/a");
        assert_eq!(cells[1].id(), "linux/b");
        assert_eq!(cells[2].id(), "macos/a");
        assert_eq!(cells[3].id(), "macos/b");
    }

    #[test]
    fn test_empty_axis_rejected() {
        let axes = AxisSet::single("env", vec![]);
        let err = axes.expand().unwrap_err();
        assert!(matches!(err, PipelineError::EmptyAxis(name) if name == "env"));
    }

    #[test]
    fn test_empty_axis_set_rejected() {
        let axes = AxisSet::new(vec![]);
        assert!(matches!(axes.expand(), Err(PipelineError::EmptyAxisSet)));
    }

    #[test]
    fn test_cell_id_stable() {
        let cell = MatrixCell::from_assignments(vec![
            ("os".into(), "linux".into()),
            ("env".into(), "env_a".into()),
        ]);
        assert_eq!(cell.id(), "linux/env_a");
        assert_eq!(cell.get("missing"), None);
    }
}
