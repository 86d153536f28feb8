//! Error types for tensorgrad.

use thiserror::Error;

/// Errors surfaced by graph-building operations.
///
/// The backward pass itself never fails on a well-formed graph; every
/// variant here is raised at operation-call time, before the output node
/// exists, so the graph built so far stays usable.
#[derive(Debug, Error)]
pub enum AutogradError {
    /// An operand has the wrong kind (e.g. a tracked node used as an exponent).
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    /// Operand shapes cannot be combined by the given operation.
    #[error("shape mismatch in `{op}`: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    /// A reduction axis is outside `-ndim..ndim`.
    #[error("axis {axis} is out of bounds for array of rank {ndim}")]
    AxisOutOfBounds { axis: isize, ndim: usize },

    /// The same axis was named twice in a reduction.
    #[error("duplicate axis {0} in reduction")]
    DuplicateAxis(usize),

    /// A textual tensor literal could not be parsed.
    #[error("tensor literal: {0}")]
    Parse(&'static str),

    /// Raised by the array library while reshaping or converting data.
    #[error(transparent)]
    Array(#[from] ndarray::ShapeError),
}

impl AutogradError {
    pub(crate) fn shape_mismatch(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Self {
        Self::ShapeMismatch {
            op,
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AutogradError>;
