//! # Gradient Rule Layer
//!
//! The engine separates *what* an operation is from *how* its gradient is
//! computed:
//!
//! - [`crate::node::Op`] records an operation and its operand handles
//! - [`rules`] holds the pure forward kernels and per-operand gradient rules
//! - [`dispatch`] selects the rule for a node's [`Op`](crate::node::Op) tag
//!   and accumulates the results into the operands' gradients
//!
//! ## Extending the Engine
//!
//! To add a new operation:
//!
//! 1. Add a variant to [`Op`](crate::node::Op) holding its operands and parameters
//! 2. Write its gradient rule in [`rules`]
//! 3. Handle the variant in [`dispatch`] and expose a constructor in
//!    [`crate::backprop`]

pub mod dispatch;
pub mod rules;
