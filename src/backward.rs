//! Backward pass driver.
//!
//! One call runs three phases over the ancestors of a terminal node:
//!
//! 1. **Build**: a depth-first walk over operands appends each node only
//!    after all of its operands, giving a topological order that ends with
//!    the terminal node. Nodes are marked by identity, so a node reached
//!    along several paths is listed once.
//! 2. **Seed**: the terminal gradient is set to `d(out)/d(out) = 1`.
//! 3. **Propagate**: the order is walked in reverse and each node's rule runs
//!    exactly once, after every consumer has contributed to its gradient.
//!
//! Gradients are not reset between passes: a second `backward` re-seeds the
//! terminal node and adds on top of whatever the ancestors already hold.
//! Intermediate nodes keep their gradient too, so each pass propagates
//! everything accumulated so far. Leaves directly under the terminal node
//! double on a second pass; leaves further down grow faster. Use
//! [`Node::zero_grad_graph`] to start over.

use std::collections::HashSet;

use log::debug;

use crate::error::{AutogradError, Result};
use crate::node::{Node, NodeId};
use crate::ops::dispatch::backward_step;
use crate::tensors::Ten64;

impl Node {
    /// Nodes reachable from `self` through operands, in topological order
    /// (every node after its operands, `self` last).
    #[must_use]
    pub fn topo_order(&self) -> Vec<Node> {
        let mut order = Vec::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        // (node, operands already expanded)
        let mut stack = vec![(self.clone(), false)];

        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            if !visited.insert(node.id()) {
                continue;
            }
            let parents = node.parents();
            stack.push((node, true));
            // reversed so the first operand is finished first
            for parent in parents.into_iter().rev() {
                if !visited.contains(&parent.id()) {
                    stack.push((parent, false));
                }
            }
        }

        order
    }

    /// Computes the gradient of `self` with respect to every ancestor.
    ///
    /// Seeds `self.grad` with ones, then accumulates into every node that
    /// contributed to `self`. Existing gradients are added to, never cleared.
    pub fn backward(&self) {
        self.run_backward(Ten64::ones(self.data().raw_dim()));
    }

    /// Like [`Node::backward`], but seeds `self.grad` with `seed`.
    ///
    /// # Errors
    /// [`AutogradError::ShapeMismatch`] if `seed` does not have this node's
    /// shape. Nothing is modified in that case.
    pub fn backward_with(&self, seed: Ten64) -> Result<()> {
        if seed.shape() != self.shape() {
            return Err(AutogradError::shape_mismatch(
                "backward",
                self.shape(),
                seed.shape(),
            ));
        }
        self.run_backward(seed);
        Ok(())
    }

    fn run_backward(&self, seed: Ten64) {
        let order = self.topo_order();
        debug!("backward from {self} over {} nodes", order.len());

        self.set_grad(seed);
        for node in order.iter().rev() {
            backward_step(node);
        }
    }

    /// Resets the gradient of `self` and of every ancestor to zeros.
    pub fn zero_grad_graph(&self) {
        for node in self.topo_order() {
            node.zero_grad();
        }
    }
}
