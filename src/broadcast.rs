//! NumPy-style broadcasting for shapes and gradients.
//!
//! Elementwise operations broadcast their operands in the forward pass, so
//! the upstream gradient arriving at an operand can be larger than the
//! operand itself. [`reduce_to_shape`] undoes that expansion by summing the
//! gradient over every axis the operand was stretched along.

use ndarray::{Axis, IxDyn};

use crate::error::{AutogradError, Result};
use crate::tensors::Ten64;

/// Computes the shape two operands broadcast to.
///
/// Shapes are aligned at their trailing axes; each aligned pair must be equal
/// or contain a 1, and missing leading axes count as 1.
///
/// # Errors
/// Returns [`AutogradError::ShapeMismatch`] naming `op` when the shapes are
/// incompatible.
pub fn broadcast_shape(op: &'static str, lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let ndim = lhs.len().max(rhs.len());
    let mut out = vec![0; ndim];

    for (i, slot) in out.iter_mut().enumerate() {
        let l = dim_from_end(lhs, ndim - 1 - i);
        let r = dim_from_end(rhs, ndim - 1 - i);
        *slot = match (l, r) {
            (l, r) if l == r => l,
            (1, r) => r,
            (l, 1) => l,
            _ => return Err(AutogradError::shape_mismatch(op, lhs, rhs)),
        };
    }

    Ok(out)
}

fn dim_from_end(shape: &[usize], back: usize) -> usize {
    if back < shape.len() {
        shape[shape.len() - 1 - back]
    } else {
        1
    }
}

/// Reduces an upstream gradient to the shape of the operand it belongs to.
///
/// Sums `grad` over
/// - every leading axis that `shape` lacks (rank expansion), and
/// - every axis where `shape` has size 1 but `grad` does not (size expansion,
///   including expansion to an empty axis),
///
/// then drops the leading axes so the result has exactly `shape`. When the
/// shapes already match, `grad` is returned untouched.
///
/// # Panics
/// Panics if `grad` could not have been produced by broadcasting an array of
/// `shape`.
#[must_use]
pub fn reduce_to_shape(grad: Ten64, shape: &[usize]) -> Ten64 {
    if grad.shape() == shape {
        return grad;
    }

    assert!(
        grad.ndim() >= shape.len(),
        "gradient of shape {:?} cannot reduce to higher-rank shape {shape:?}",
        grad.shape()
    );

    let lead = grad.ndim() - shape.len();
    let mut axes: Vec<usize> = (0..lead).collect();
    axes.extend(
        shape
            .iter()
            .zip(&grad.shape()[lead..])
            .enumerate()
            .filter(|&(_, (&s, &g))| s == 1 && g != 1)
            .map(|(i, _)| lead + i),
    );

    // highest axis first so the remaining indices stay valid
    let summed = axes
        .iter()
        .rev()
        .fold(grad, |acc, &axis| acc.sum_axis(Axis(axis)));

    summed
        .into_shape_with_order(IxDyn(shape))
        .unwrap_or_else(|err| panic!("gradient does not broadcast to {shape:?}: {err}"))
}
