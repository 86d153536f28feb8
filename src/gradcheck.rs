//! Finite-difference verification of analytic gradients.
//!
//! [`check_gradients`] builds a graph from fresh leaves, backpropagates the
//! sum of its output, and compares every leaf gradient element with the
//! central difference
//!
//! ```text
//! (L(x + eps) - L(x - eps)) / (2 * eps)
//! ```
//!
//! where `L` is the summed output. Each perturbed evaluation builds its own
//! graph, so with the `parallel` feature they are spread over the `rayon`
//! pool without sharing any node between threads.
//!
//! # Example
//! ```rust
//! use tensorgrad::{GradCheck, Node, Ten64, check_gradients};
//! use tensorgrad::ndarray::array;
//!
//! let x: Ten64 = array![[0.5, 1.5], [2.0, 3.0]].into_dyn();
//! let report = check_gradients(|v: &[Node]| Ok(v[0].exp()), &[x], &GradCheck::default())
//!     .unwrap();
//! assert!(report.passed());
//! ```

use log::debug;

use crate::error::Result;
use crate::node::Node;
use crate::tensors::Ten64;
use crate::tolerance::{ApproxEquality, RelativeEq, Tolerance};

/// Settings for [`check_gradients`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradCheck {
    /// Perturbation applied on each side of an element.
    pub epsilon: f64,
    /// Accepted distance between analytic and numeric values. The numeric
    /// estimate is the reference.
    pub tolerance: Tolerance,
}

impl Default for GradCheck {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            tolerance: Tolerance::default(),
        }
    }
}

/// One element whose analytic gradient disagrees with the numeric estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    /// Position of the input in the slice passed to [`check_gradients`].
    pub input: usize,
    /// Flat element index in logical (row-major) order.
    pub index: usize,
    pub analytic: f64,
    pub numeric: f64,
}

/// Outcome of a gradient check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradCheckReport {
    pub mismatches: Vec<Mismatch>,
    /// Largest `|analytic - numeric|` over every checked element.
    pub max_abs_error: f64,
    /// Number of elements compared.
    pub checked: usize,
    /// Worst grade over every checked element.
    pub grade: ApproxEquality,
}

impl GradCheckReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compares analytic and numeric gradients of `sum(f(inputs))`.
///
/// `f` receives one fresh leaf per input, in order, and may be called many
/// times.
///
/// # Errors
/// Propagates the first error returned by `f`.
pub fn check_gradients<F>(f: F, inputs: &[Ten64], config: &GradCheck) -> Result<GradCheckReport>
where
    F: Fn(&[Node]) -> Result<Node> + Sync,
{
    let analytic = analytic_gradients(&f, inputs)?;

    let work: Vec<(usize, usize)> = inputs
        .iter()
        .enumerate()
        .flat_map(|(i, x)| (0..x.len()).map(move |k| (i, k)))
        .collect();

    #[cfg(feature = "parallel")]
    let numeric: Vec<f64> = {
        use rayon::prelude::*;
        work.par_iter()
            .map(|&(i, k)| central_difference(&f, inputs, i, k, config.epsilon))
            .collect::<Result<Vec<_>>>()?
    };

    #[cfg(not(feature = "parallel"))]
    let numeric: Vec<f64> = work
        .iter()
        .map(|&(i, k)| central_difference(&f, inputs, i, k, config.epsilon))
        .collect::<Result<Vec<_>>>()?;

    let mut report = GradCheckReport {
        checked: work.len(),
        ..GradCheckReport::default()
    };
    let analytic_flat = analytic.iter().flat_map(|g| g.iter().copied());

    for ((&(input, index), numeric), analytic) in work.iter().zip(numeric).zip(analytic_flat) {
        let err = (analytic - numeric).abs();
        if err > report.max_abs_error || err.is_nan() {
            report.max_abs_error = err;
        }
        let grade = analytic.approx_eq(&numeric, config.tolerance);
        report.grade = report.grade.max(grade);
        if !grade.is_close() {
            debug!("gradient mismatch at input {input}[{index}]: analytic {analytic}, numeric {numeric}");
            report.mismatches.push(Mismatch {
                input,
                index,
                analytic,
                numeric,
            });
        }
    }

    debug!(
        "checked {} gradient elements, {} mismatched, max abs error {:e}, grade {:?}",
        report.checked,
        report.mismatches.len(),
        report.max_abs_error,
        report.grade
    );
    Ok(report)
}

fn leaves(inputs: &[Ten64]) -> Vec<Node> {
    inputs.iter().cloned().map(Node::from).collect()
}

fn analytic_gradients<F>(f: &F, inputs: &[Ten64]) -> Result<Vec<Ten64>>
where
    F: Fn(&[Node]) -> Result<Node>,
{
    let nodes = leaves(inputs);
    f(&nodes)?.sum_all().backward();
    Ok(nodes.iter().map(Node::grad).collect())
}

fn summed_output<F>(f: &F, inputs: &[Ten64]) -> Result<f64>
where
    F: Fn(&[Node]) -> Result<Node>,
{
    Ok(f(&leaves(inputs))?.data().sum())
}

fn central_difference<F>(f: &F, inputs: &[Ten64], input: usize, index: usize, eps: f64) -> Result<f64>
where
    F: Fn(&[Node]) -> Result<Node>,
{
    let mut shifted = inputs.to_vec();
    let base = inputs[input].iter().nth(index).copied().unwrap_or_default();

    set_element(&mut shifted[input], index, base + eps);
    let plus = summed_output(f, &shifted)?;
    set_element(&mut shifted[input], index, base - eps);
    let minus = summed_output(f, &shifted)?;

    Ok((plus - minus) / (2.0 * eps))
}

fn set_element(x: &mut Ten64, index: usize, value: f64) {
    if let Some(slot) = x.iter_mut().nth(index) {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AutogradError;
    use ndarray::array;

    #[test]
    fn passes_for_a_correct_rule() {
        let x = array![[1.0, -2.0], [0.5, 3.0]].into_dyn();
        let report = check_gradients(
            |v: &[Node]| v[0].try_mul(&v[0]),
            &[x],
            &GradCheck::default(),
        )
        .unwrap();
        assert!(report.passed(), "{report:?}");
        assert_eq!(report.checked, 4);
        assert!(report.max_abs_error < 1e-6);
        assert_eq!(report.grade, ApproxEquality::Precise);
    }

    #[test]
    fn flags_the_relu_kink() {
        // subgradient 0 at the kink, symmetric difference 0.5
        let x = array![0.0, 1.0].into_dyn();
        let report = check_gradients(|v: &[Node]| Ok(v[0].relu()), &[x], &GradCheck::default())
            .unwrap();
        assert!(!report.passed());
        assert_eq!(report.grade, ApproxEquality::Scarce);
        assert_eq!(report.mismatches.len(), 1);
        let m = report.mismatches[0];
        assert_eq!((m.input, m.index), (0, 0));
        assert_eq!(m.analytic, 0.0);
        assert!((m.numeric - 0.5).abs() < 1e-6);
    }

    #[test]
    fn reports_the_input_position() {
        let a = array![1.0, 2.0].into_dyn();
        let b = array![3.0, 4.0].into_dyn();
        let report = check_gradients(
            |v: &[Node]| v[0].try_mul(&v[1]),
            &[a, b],
            &GradCheck::default(),
        )
        .unwrap();
        assert!(report.passed());
        assert_eq!(report.checked, 4);
    }

    #[test]
    fn errors_from_the_graph_are_propagated() {
        let a = array![1.0, 2.0].into_dyn();
        let b = array![1.0, 2.0, 3.0].into_dyn();
        let err = check_gradients(
            |v: &[Node]| v[0].try_add(&v[1]),
            &[a, b],
            &GradCheck::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AutogradError::ShapeMismatch { .. }));
    }
}
