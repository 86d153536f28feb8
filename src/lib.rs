//! tensorgrad: reverse-mode automatic differentiation over n-d arrays.
//!
//! Builds a computation graph as you compute, then walks it backwards to
//! produce the gradient of an output with respect to every value that fed
//! into it. Arrays are `ndarray` arrays of `f64` with NumPy-style
//! broadcasting.
//!
//! # Features
//!
//! - Dynamic graphs of shared [`Node`] handles, recorded operation by operation.
//! - Elementwise add, multiply, power, ReLU, exp and log with broadcasting,
//!   plus matrix products and axis sums.
//! - Gradients of broadcast operands are summed back to the operand's shape.
//! - Gradient accumulation across passes, with explicit resets.
//! - Finite-difference gradient checking, run in parallel with `rayon`.
//!
//! # Goals
//!
//! - Prioritize correctness and explicitness over breadth of operations.
//! - Keep the graph inspectable: every node names the operation that made it.
//! - Report shape problems as errors before any node is created.
//!
//! # Modules
//!
//! - [`tensors`]: raw array data and the text literal parser.
//! - [`node`]: the graph node and its operation record.
//! - [`backprop`]: differentiable operations and operators.
//! - [`backward`]: topological ordering and the backward pass.
//! - [`broadcast`]: broadcast shapes and gradient reduction.
//! - [`ops`]: forward kernels and gradient rules.
//! - [`gradcheck`]: numeric verification of gradients.
//! - [`tolerance`]: approximate comparison of values and arrays.
//!
//! # Cargo Features
//!
//! - `parallel` (default): evaluate finite differences on the `rayon` pool.
//!
//! # Example
//!
//! ```rust
//! use tensorgrad::Node;
//!
//! let a = Node::new([[1.0], [2.0], [3.0]]);
//! let b = Node::ones(&[3, 4]);
//! let c = (&a + &b).sum_all();
//! c.backward();
//!
//! // each element of `a` was broadcast across 4 columns
//! assert_eq!(a.grad().iter().copied().collect::<Vec<_>>(), vec![4.0, 4.0, 4.0]);
//! ```

pub mod backprop;
pub mod backward;
pub mod broadcast;
pub mod error;
pub mod gradcheck;
pub mod node;
pub mod ops;
pub mod tensors;
pub mod tolerance;

pub use ndarray;

pub use backprop::{Axes, Operand};
pub use error::{AutogradError, Result};
pub use gradcheck::{GradCheck, GradCheckReport, Mismatch, check_gradients};
pub use node::{Node, NodeId, Op};
pub use ops::rules::LOG_FLOOR;
pub use tensors::{IntoTensor, Ten64, parse_tensor};
pub use tolerance::{ApproxEquality, RelativeEq, Tolerance, approx_eq};
