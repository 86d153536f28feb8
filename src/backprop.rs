//! Differentiable operations on [`Node`]s.
//!
//! # Operation Layer
//!
//! Each operation computes its forward value with `ndarray`, then wraps the
//! result in a new node that records the operation ([`Op`]) and its operand
//! handles. Nothing is differentiated here; [`Node::backward`] later replays
//! the recorded operations in reverse.
//!
//! **Primitives:** add, multiply, scalar power, matrix product, ReLU, exp,
//! log, and axis sums. Negation, subtraction and division are built from
//! them (`-a = a * -1`, `a - b = a + (-b)`, `a / b = a * b**-1`), so they need
//! no gradient rule of their own.
//!
//! ## Operands
//!
//! Binary operations accept anything convertible into an [`Operand`]: a node,
//! a scalar, or an array. Raw values are wrapped as leaf nodes first, which
//! keeps expressions like `&x * 2.0` ergonomic without changing the gradient.
//!
//! ## Broadcasting
//!
//! Elementwise operations follow NumPy broadcasting. Shapes are checked
//! before the array library is called, and in the backward pass every
//! broadcast operand (for both `+` and `*`) receives its gradient summed back
//! to its own shape.
//!
//! ## Usage Guidelines
//!
//! - The `try_*` methods, [`Node::pow`], [`Node::matmul`] and [`Node::sum`]
//!   return [`Result`]; errors surface before the output node exists.
//! - The `+ - * /` operators are sugar over the `try_*` methods and **panic**
//!   on incompatible shapes.
//!
//! # Example
//! ```rust
//! use tensorgrad::Node;
//!
//! let x = Node::new([[1.0, -2.0], [3.0, -4.0]]);
//! let w = Node::new([[0.5], [0.25]]);
//! let loss = x.matmul(&w).unwrap().relu().sum_all();
//! loss.backward();
//! assert_eq!(w.grad().shape(), &[2, 1]);
//! ```

use std::ops::{Add, Div, Mul, Neg, Sub};

use log::debug;

use crate::broadcast::broadcast_shape;
use crate::error::{AutogradError, Result};
use crate::node::{Node, Op};
use crate::ops::rules::{self, LOG_FLOOR};
use crate::tensors::Ten64;

/// A right-hand operand: a tracked node or raw data to be wrapped as a leaf.
#[derive(Debug, Clone)]
pub enum Operand {
    Node(Node),
    Scalar(f64),
    Array(Ten64),
}

impl Operand {
    /// Returns the node, wrapping raw data as a new leaf.
    #[must_use]
    pub fn into_node(self) -> Node {
        match self {
            Self::Node(node) => node,
            Self::Scalar(value) => Node::scalar(value),
            Self::Array(data) => Node::from(data),
        }
    }
}

impl From<Node> for Operand {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<&Node> for Operand {
    fn from(node: &Node) -> Self {
        Self::Node(node.clone())
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Self::Scalar(f64::from(value))
    }
}

impl From<Ten64> for Operand {
    fn from(data: Ten64) -> Self {
        Self::Array(data)
    }
}

/// Axes selected for a reduction.
///
/// Negative indices count from the last axis, as in NumPy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Axes {
    /// Reduce over every axis.
    #[default]
    All,
    /// Reduce over the listed axes.
    These(Vec<isize>),
}

impl Axes {
    /// Resolves negative indices against `ndim` and returns the axes in
    /// ascending order.
    ///
    /// # Errors
    /// [`AutogradError::AxisOutOfBounds`] for an index outside `-ndim..ndim`,
    /// [`AutogradError::DuplicateAxis`] if an axis is named twice.
    pub fn normalize(&self, ndim: usize) -> Result<Vec<usize>> {
        let Self::These(axes) = self else {
            return Ok((0..ndim).collect());
        };

        let rank = isize::try_from(ndim).unwrap_or(isize::MAX);
        let mut out = Vec::with_capacity(axes.len());
        for &axis in axes {
            let resolved = if axis < 0 { axis + rank } else { axis };
            if !(0..rank).contains(&resolved) {
                return Err(AutogradError::AxisOutOfBounds { axis, ndim });
            }
            // in range, so non-negative
            let resolved = resolved.unsigned_abs();
            if out.contains(&resolved) {
                return Err(AutogradError::DuplicateAxis(resolved));
            }
            out.push(resolved);
        }
        out.sort_unstable();
        Ok(out)
    }
}

impl From<isize> for Axes {
    fn from(axis: isize) -> Self {
        Self::These(vec![axis])
    }
}

impl From<i32> for Axes {
    fn from(axis: i32) -> Self {
        Self::These(vec![axis as isize])
    }
}

impl From<usize> for Axes {
    fn from(axis: usize) -> Self {
        Self::These(vec![isize::try_from(axis).unwrap_or(isize::MAX)])
    }
}

impl From<Vec<isize>> for Axes {
    fn from(axes: Vec<isize>) -> Self {
        Self::These(axes)
    }
}

impl From<&[isize]> for Axes {
    fn from(axes: &[isize]) -> Self {
        Self::These(axes.to_vec())
    }
}

impl<const N: usize> From<[i32; N]> for Axes {
    fn from(axes: [i32; N]) -> Self {
        Self::These(axes.iter().map(|&a| a as isize).collect())
    }
}

impl<T: Into<Axes>> From<Option<T>> for Axes {
    fn from(axes: Option<T>) -> Self {
        axes.map_or(Self::All, Into::into)
    }
}

impl Node {
    /// Elementwise `self + rhs` with broadcasting.
    ///
    /// # Errors
    /// [`AutogradError::ShapeMismatch`] if the shapes do not broadcast.
    pub fn try_add(&self, rhs: impl Into<Operand>) -> Result<Node> {
        let rhs = rhs.into().into_node();
        broadcast_shape("+", self.shape(), rhs.shape())?;
        let data = self.data() + rhs.data();
        Ok(Node::from_op(data, Op::Add(self.clone(), rhs)))
    }

    /// Elementwise `self * rhs` with broadcasting.
    ///
    /// # Errors
    /// [`AutogradError::ShapeMismatch`] if the shapes do not broadcast.
    pub fn try_mul(&self, rhs: impl Into<Operand>) -> Result<Node> {
        let rhs = rhs.into().into_node();
        broadcast_shape("*", self.shape(), rhs.shape())?;
        let data = self.data() * rhs.data();
        Ok(Node::from_op(data, Op::Mul(self.clone(), rhs)))
    }

    /// `self * -1`.
    #[must_use]
    pub fn neg(&self) -> Node {
        let minus_one = Node::scalar(-1.0);
        let data = self.data() * -1.0;
        Node::from_op(data, Op::Mul(self.clone(), minus_one))
    }

    /// `self + (-rhs)`.
    ///
    /// # Errors
    /// [`AutogradError::ShapeMismatch`] if the shapes do not broadcast.
    pub fn try_sub(&self, rhs: impl Into<Operand>) -> Result<Node> {
        self.try_add(rhs.into().into_node().neg())
    }

    /// `self * rhs**-1`.
    ///
    /// # Errors
    /// [`AutogradError::ShapeMismatch`] if the shapes do not broadcast.
    pub fn try_div(&self, rhs: impl Into<Operand>) -> Result<Node> {
        let reciprocal = rhs.into().into_node().pow(-1.0)?;
        self.try_mul(reciprocal)
    }

    /// Elementwise power with a constant scalar exponent.
    ///
    /// # Errors
    /// [`AutogradError::InvalidOperand`] if `exponent` is a node or an array.
    pub fn pow(&self, exponent: impl Into<Operand>) -> Result<Node> {
        let p = match exponent.into() {
            Operand::Scalar(p) => p,
            Operand::Node(node) => {
                return Err(AutogradError::InvalidOperand(format!(
                    "exponent must be a scalar number, got tracked {node}"
                )));
            }
            Operand::Array(data) => {
                return Err(AutogradError::InvalidOperand(format!(
                    "exponent must be a scalar number, got array of shape {:?}",
                    data.shape()
                )));
            }
        };
        let data = self.data().mapv(|x| x.powf(p));
        Ok(Node::from_op(data, Op::Pow(self.clone(), p)))
    }

    /// Matrix product `self @ rhs` for 1-d and 2-d operands.
    ///
    /// # Errors
    /// [`AutogradError::ShapeMismatch`] if the contracted dimensions differ or
    /// an operand is not 1-d or 2-d.
    pub fn matmul(&self, rhs: impl Into<Operand>) -> Result<Node> {
        let rhs = rhs.into().into_node();
        let data = rules::matmul_forward(self.data(), rhs.data())?;
        Ok(Node::from_op(data, Op::MatMul(self.clone(), rhs)))
    }

    /// Elementwise `max(0, x)`.
    #[must_use]
    pub fn relu(&self) -> Node {
        let data = self.data().mapv(|x| if x > 0.0 { x } else { 0.0 });
        Node::from_op(data, Op::Relu(self.clone()))
    }

    /// Elementwise `e^x`.
    #[must_use]
    pub fn exp(&self) -> Node {
        let data = self.data().mapv(f64::exp);
        Node::from_op(data, Op::Exp(self.clone()))
    }

    /// Elementwise natural log, with inputs clamped to at least [`LOG_FLOOR`].
    #[must_use]
    pub fn log(&self) -> Node {
        let clamped = self.data().iter().filter(|&&x| x < LOG_FLOOR).count();
        if clamped > 0 {
            debug!("log: clamped {clamped} of {} inputs to {LOG_FLOOR:e}", self.len());
        }
        let data = self.data().mapv(|x| x.max(LOG_FLOOR).ln());
        Node::from_op(data, Op::Log(self.clone()))
    }

    /// Sums over `axes`; reduced axes are kept as size 1 when `keepdims`.
    ///
    /// # Errors
    /// [`AutogradError::AxisOutOfBounds`] or [`AutogradError::DuplicateAxis`]
    /// for an invalid axis list.
    pub fn sum(&self, axes: impl Into<Axes>, keepdims: bool) -> Result<Node> {
        let axes = axes.into().normalize(self.ndim())?;
        Ok(self.sum_normalized(axes, keepdims))
    }

    /// Sums every element into a 0-d node.
    #[must_use]
    pub fn sum_all(&self) -> Node {
        self.sum_normalized((0..self.ndim()).collect(), false)
    }

    fn sum_normalized(&self, axes: Vec<usize>, keepdims: bool) -> Node {
        let data = rules::sum_forward(self.data(), &axes, keepdims);
        Node::from_op(
            data,
            Op::Sum {
                input: self.clone(),
                axes,
                keepdims,
            },
        )
    }
}

fn or_panic(result: Result<Node>) -> Node {
    result.unwrap_or_else(|err| panic!("{err}"))
}

macro_rules! impl_binary_op {
    ($op:ident, $method:ident, $fallible:ident) => {
        impl<R: Into<Operand>> $op<R> for &Node {
            type Output = Node;

            fn $method(self, rhs: R) -> Node {
                or_panic(self.$fallible(rhs))
            }
        }

        impl<R: Into<Operand>> $op<R> for Node {
            type Output = Node;

            fn $method(self, rhs: R) -> Node {
                or_panic(self.$fallible(rhs))
            }
        }
    };
}

impl_binary_op!(Add, add, try_add);
impl_binary_op!(Sub, sub, try_sub);
impl_binary_op!(Mul, mul, try_mul);
impl_binary_op!(Div, div, try_div);

// reflected forms keep the node on the left for `+` and `*`, like `x + s`
macro_rules! impl_reflected_op {
    ($op:ident, $method:ident, |$s:ident, $n:ident| $body:expr) => {
        impl $op<&Node> for f64 {
            type Output = Node;

            fn $method(self, rhs: &Node) -> Node {
                let ($s, $n) = (self, rhs);
                or_panic($body)
            }
        }

        impl $op<Node> for f64 {
            type Output = Node;

            fn $method(self, rhs: Node) -> Node {
                let ($s, $n) = (self, &rhs);
                or_panic($body)
            }
        }
    };
}

impl_reflected_op!(Add, add, |s, n| n.try_add(s));
impl_reflected_op!(Mul, mul, |s, n| n.try_mul(s));
impl_reflected_op!(Sub, sub, |s, n| Node::scalar(s).try_sub(n));
impl_reflected_op!(Div, div, |s, n| Node::scalar(s).try_div(n));

impl Neg for &Node {
    type Output = Node;

    fn neg(self) -> Node {
        Node::neg(self)
    }
}

impl Neg for Node {
    type Output = Node;

    fn neg(self) -> Node {
        Node::neg(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_values_match_elementwise_math() {
        let a = Node::new([1.0, 2.0, 3.0]);
        let b = Node::new([4.0, 5.0, 6.0]);
        assert_eq!((&a + &b).data().as_slice().unwrap(), &[5.0, 7.0, 9.0]);
        assert_eq!((&a * &b).data().as_slice().unwrap(), &[4.0, 10.0, 18.0]);
        assert_eq!((&b - &a).data().as_slice().unwrap(), &[3.0, 3.0, 3.0]);
        assert_eq!((&b / 2.0).data().as_slice().unwrap(), &[2.0, 2.5, 3.0]);
        assert_eq!((-&a).data().as_slice().unwrap(), &[-1.0, -2.0, -3.0]);
        assert_eq!(a.pow(2).unwrap().data().as_slice().unwrap(), &[1.0, 4.0, 9.0]);
    }

    #[test]
    fn op_tags_name_the_primitive() {
        let a = Node::new([1.0, 2.0]);
        assert_eq!((&a + 1.0).op_tag().as_deref(), Some("+"));
        assert_eq!((&a * 1.0).op_tag().as_deref(), Some("*"));
        assert_eq!(a.pow(2.0).unwrap().op_tag().as_deref(), Some("**2"));
        assert_eq!(a.pow(0.5).unwrap().op_tag().as_deref(), Some("**0.5"));
        assert_eq!(a.matmul(&a).unwrap().op_tag().as_deref(), Some("@"));
        assert_eq!(a.relu().op_tag().as_deref(), Some("ReLU"));
        assert_eq!(a.exp().op_tag().as_deref(), Some("exp"));
        assert_eq!(a.log().op_tag().as_deref(), Some("log"));
        assert_eq!(a.sum_all().op_tag().as_deref(), Some("sum"));
        // derived operations are built from primitives
        assert_eq!((-&a).op_tag().as_deref(), Some("*"));
        assert_eq!((&a - 1.0).op_tag().as_deref(), Some("+"));
        assert_eq!((&a / 2.0).op_tag().as_deref(), Some("*"));
    }

    #[test]
    fn raw_operands_become_leaf_parents() {
        let a = Node::new([1.0, 2.0]);
        let c = &a + 3.0;
        let parents = c.parents();
        assert_eq!(parents.len(), 2);
        assert!(parents[0].ptr_eq(&a));
        assert!(parents[1].is_leaf());
        assert_eq!(parents[1].ndim(), 0);
    }

    #[test]
    fn self_multiplication_lists_parent_twice() {
        let a = Node::new([3.0]);
        let c = &a * &a;
        let parents = c.parents();
        assert_eq!(parents.len(), 2);
        assert!(parents[0].ptr_eq(&a) && parents[1].ptr_eq(&a));
    }

    #[test]
    fn pow_rejects_non_scalar_exponents() {
        let a = Node::new([1.0, 2.0]);
        let err = a.pow(&a).unwrap_err();
        assert!(matches!(err, AutogradError::InvalidOperand(_)));
        let err = a.pow(a.data().clone()).unwrap_err();
        assert!(matches!(err, AutogradError::InvalidOperand(_)));
    }

    #[test]
    fn elementwise_mismatch_is_reported_not_panicked() {
        let a = Node::ones(&[2, 3]);
        let b = Node::ones(&[3, 2]);
        let err = a.try_add(&b).unwrap_err();
        assert!(matches!(err, AutogradError::ShapeMismatch { op: "+", .. }));
        let err = a.try_mul(&b).unwrap_err();
        assert!(matches!(err, AutogradError::ShapeMismatch { op: "*", .. }));
    }

    #[test]
    #[should_panic(expected = "shape mismatch in `+`")]
    fn operator_sugar_panics_on_mismatch() {
        let _ = Node::ones(&[2]) + Node::ones(&[3]);
    }

    #[test]
    fn sum_axes_follow_numpy_conventions() {
        let x = Node::ones(&[2, 3, 4]);
        assert_eq!(x.sum(1_isize, false).unwrap().shape(), &[2, 4]);
        assert_eq!(x.sum(-1_isize, true).unwrap().shape(), &[2, 3, 1]);
        assert_eq!(x.sum([0, 2], false).unwrap().shape(), &[3]);
        assert_eq!(x.sum(Axes::All, true).unwrap().shape(), &[1, 1, 1]);
        assert_eq!(x.sum(None::<isize>, false).unwrap().ndim(), 0);
        assert_eq!(x.sum_all().data().sum(), 24.0);
    }

    #[test]
    fn sum_rejects_bad_axes() {
        let x = Node::ones(&[2, 3]);
        assert!(matches!(
            x.sum(2_isize, false).unwrap_err(),
            AutogradError::AxisOutOfBounds { axis: 2, ndim: 2 }
        ));
        assert!(matches!(
            x.sum(-3_isize, false).unwrap_err(),
            AutogradError::AxisOutOfBounds { axis: -3, ndim: 2 }
        ));
        assert!(matches!(
            x.sum([1, -1], false).unwrap_err(),
            AutogradError::DuplicateAxis(1)
        ));
    }

    #[test]
    fn log_clamps_non_positive_inputs() {
        let x = Node::new([0.0, -5.0, 1.0]);
        let y = x.log();
        let floor = LOG_FLOOR.ln();
        assert_eq!(y.data().as_slice().unwrap(), &[floor, floor, 0.0]);
        assert!(y.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn reflected_operators_keep_numbers_on_either_side() {
        let a = Node::new([1.0, 2.0]);
        assert_eq!((2.0 + &a).data().as_slice().unwrap(), &[3.0, 4.0]);
        assert_eq!((2.0 * &a).data().as_slice().unwrap(), &[2.0, 4.0]);
        assert_eq!((2.0 - &a).data().as_slice().unwrap(), &[1.0, 0.0]);
        assert_eq!((2.0 / a.clone()).data().as_slice().unwrap(), &[2.0, 1.0]);
    }
}
