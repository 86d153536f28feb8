//! Operation Dispatch Layer
//!
//! Selects the gradient rule for a node from its [`Op`] tag and pushes the
//! resulting contributions onto the operands.
//!
//! # Design Highlights
//! - **Tag-driven**: no captured closures; the rule is chosen from the
//!   recorded operation, so graphs stay inspectable
//! - **Additive**: operands only ever receive `grad += contribution`
//! - **Alias-safe**: contributions are computed before any operand is
//!   borrowed mutably, so `a * a` accumulates both sides into `a`

use log::trace;

use super::rules;
use crate::node::{Node, Op};

/// Propagates `node`'s current gradient to its operands.
///
/// Leaves have nothing to propagate. Must only be called once the node's
/// gradient has received every downstream contribution.
pub fn backward_step(node: &Node) {
    let Some(op) = node.op() else {
        return;
    };
    trace!("backward through `{}` {}", op.tag(), node);

    let grad = node.grad();

    match op {
        Op::Add(a, b) => {
            let (ga, gb) = rules::add_backward(&grad, a.shape(), b.shape());
            a.accumulate(&ga);
            b.accumulate(&gb);
        }
        Op::Mul(a, b) => {
            let (ga, gb) = rules::mul_backward(&grad, a.data(), b.data());
            a.accumulate(&ga);
            b.accumulate(&gb);
        }
        Op::Pow(a, p) => a.accumulate(&rules::pow_backward(&grad, a.data(), *p)),
        Op::MatMul(a, b) => {
            let (ga, gb) = rules::matmul_backward(&grad, a.data(), b.data());
            a.accumulate(&ga);
            b.accumulate(&gb);
        }
        Op::Relu(a) => a.accumulate(&rules::relu_backward(&grad, a.data())),
        Op::Exp(a) => a.accumulate(&rules::exp_backward(&grad, node.data())),
        Op::Log(a) => a.accumulate(&rules::log_backward(&grad, a.data())),
        Op::Sum {
            input,
            axes,
            keepdims,
        } => input.accumulate(&rules::sum_backward(
            &grad,
            input.shape(),
            axes,
            *keepdims,
        )),
    }
}
