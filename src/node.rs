//! The tracked value and the record of the operation that produced it.
//!
//! # Graph Representation
//!
//! A [`Node`] is a shared handle: cloning it clones an `Rc`, never the data.
//! A node may feed several downstream operations (fan-in), so no single
//! owner exists and the graph lives as long as any handle into it.
//!
//! Each node holds:
//! - its forward value (`data`), fixed at construction
//! - a gradient accumulator of the same shape, starting at zero
//! - an optional [`Op`] naming the operation and its operand handles
//!
//! Operands always exist before the node that consumes them, so the parent
//! relation is acyclic by construction.

use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use ndarray::IxDyn;

use crate::error::{AutogradError, Result};
use crate::tensors::{IntoTensor, Ten64, parse_tensor};

/// Identity of a node, stable for as long as any handle to it is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// The operation that produced a non-leaf node.
///
/// Stores only operand handles and operation parameters; the matching
/// gradient rule is selected by the backward driver from this tag.
#[derive(Clone)]
pub enum Op {
    /// `a + b` with broadcasting.
    Add(Node, Node),
    /// `a * b` with broadcasting.
    Mul(Node, Node),
    /// `a ** exponent` for a constant scalar exponent.
    Pow(Node, f64),
    /// Matrix product `a @ b` of 1-d or 2-d operands.
    MatMul(Node, Node),
    /// `max(0, a)` elementwise.
    Relu(Node),
    /// `e^a` elementwise.
    Exp(Node),
    /// `ln(max(a, LOG_FLOOR))` elementwise.
    Log(Node),
    /// Sum over `axes` (already normalized, ascending).
    Sum {
        input: Node,
        axes: Vec<usize>,
        keepdims: bool,
    },
}

impl Op {
    /// Operand handles in operand order. `a * a` lists `a` twice.
    #[must_use]
    pub fn inputs(&self) -> Vec<&Node> {
        match self {
            Self::Add(a, b) | Self::Mul(a, b) | Self::MatMul(a, b) => vec![a, b],
            Self::Pow(a, _) | Self::Relu(a) | Self::Exp(a) | Self::Log(a) => vec![a],
            Self::Sum { input, .. } => vec![input],
        }
    }

    fn into_inputs(self) -> Vec<Node> {
        match self {
            Self::Add(a, b) | Self::Mul(a, b) | Self::MatMul(a, b) => vec![a, b],
            Self::Pow(a, _) | Self::Relu(a) | Self::Exp(a) | Self::Log(a) => vec![a],
            Self::Sum { input, .. } => vec![input],
        }
    }

    /// Short diagnostic label, e.g. `+` or `**2`.
    #[must_use]
    pub fn tag(&self) -> String {
        match self {
            Self::Add(..) => "+".into(),
            Self::Mul(..) => "*".into(),
            Self::Pow(_, p) => format!("**{p}"),
            Self::MatMul(..) => "@".into(),
            Self::Relu(_) => "ReLU".into(),
            Self::Exp(_) => "exp".into(),
            Self::Log(_) => "log".into(),
            Self::Sum { .. } => "sum".into(),
        }
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

struct NodeInner {
    data: Ten64,
    grad: RefCell<Ten64>,
    op: Option<Op>,
}

// Unlinks uniquely owned ancestors with an explicit stack; the default
// recursive drop would overflow on long operation chains.
impl Drop for NodeInner {
    fn drop(&mut self) {
        let mut pending = self.op.take().map(Op::into_inputs).unwrap_or_default();
        while let Some(node) = pending.pop() {
            if let Ok(mut inner) = Rc::try_unwrap(node.0) {
                if let Some(op) = inner.op.take() {
                    pending.extend(op.into_inputs());
                }
            }
        }
    }
}

/// A tracked value in the computation graph.
///
/// Pairs an immutable forward array with a gradient accumulator. Arithmetic
/// on nodes records the operation, and [`Node::backward`] fills in the
/// gradients of every ancestor.
///
/// # Example
/// ```rust
/// use tensorgrad::Node;
///
/// let a = Node::new([2.0]);
/// let b = Node::new([3.0]);
/// let c = &a * &b + b.pow(2.0).unwrap();
/// c.backward();
///
/// assert_eq!(a.grad().as_slice().unwrap(), &[3.0]);
/// assert_eq!(b.grad().as_slice().unwrap(), &[8.0]);
/// ```
#[derive(Clone)]
pub struct Node(Rc<NodeInner>);

impl Node {
    /// Creates a leaf node from raw data.
    ///
    /// # Panics
    /// Panics if `data` is a ragged nested list. Use [`Node::try_new`] to get
    /// the error instead.
    pub fn new(data: impl IntoTensor) -> Self {
        Self::try_new(data).unwrap_or_else(|err| panic!("invalid leaf data: {err}"))
    }

    /// Creates a leaf node from raw data.
    ///
    /// # Errors
    /// Returns [`AutogradError::ShapeMismatch`] for ragged nested lists.
    pub fn try_new(data: impl IntoTensor) -> Result<Self> {
        Ok(Self::leaf(data.into_tensor()?))
    }

    /// Creates a 0-d leaf node.
    #[must_use]
    pub fn scalar(value: f64) -> Self {
        Self::leaf(Ten64::from_elem(IxDyn(&[]), value))
    }

    /// Creates a leaf node of zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::leaf(Ten64::zeros(IxDyn(shape)))
    }

    /// Creates a leaf node of ones.
    #[must_use]
    pub fn ones(shape: &[usize]) -> Self {
        Self::leaf(Ten64::ones(IxDyn(shape)))
    }

    fn leaf(data: Ten64) -> Self {
        Self::from_parts(data, None)
    }

    /// Wraps a freshly computed forward value together with the op that made it.
    pub(crate) fn from_op(data: Ten64, op: Op) -> Self {
        Self::from_parts(data, Some(op))
    }

    fn from_parts(data: Ten64, op: Option<Op>) -> Self {
        let grad = RefCell::new(Ten64::zeros(data.raw_dim()));
        Self(Rc::new(NodeInner { data, grad, op }))
    }

    /// The forward value.
    #[must_use]
    pub fn data(&self) -> &Ten64 {
        &self.0.data
    }

    /// A snapshot of the accumulated gradient.
    #[must_use]
    pub fn grad(&self) -> Ten64 {
        self.0.grad.borrow().clone()
    }

    /// Borrows the gradient without copying it.
    ///
    /// # Panics
    /// Panics if called while a backward pass is writing to this node.
    #[must_use]
    pub fn grad_ref(&self) -> Ref<'_, Ten64> {
        self.0.grad.borrow()
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.0.data.shape()
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.0.data.ndim()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.data.is_empty()
    }

    /// Whether this node was supplied directly rather than produced by an op.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.0.op.is_none()
    }

    /// The operation that produced this node, if any.
    #[must_use]
    pub fn op(&self) -> Option<&Op> {
        self.0.op.as_ref()
    }

    /// Diagnostic label of the producing operation; `None` for leaves.
    #[must_use]
    pub fn op_tag(&self) -> Option<String> {
        self.0.op.as_ref().map(Op::tag)
    }

    /// Direct inputs of the producing operation, in operand order.
    #[must_use]
    pub fn parents(&self) -> Vec<Node> {
        self.0
            .op
            .as_ref()
            .map(|op| op.inputs().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        NodeId(Rc::as_ptr(&self.0) as usize)
    }

    /// Whether both handles point at the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Adds `contribution` into the gradient.
    ///
    /// # Panics
    /// Panics if `contribution` does not have this node's shape.
    pub(crate) fn accumulate(&self, contribution: &Ten64) {
        let mut grad = self.0.grad.borrow_mut();
        assert_eq!(
            grad.shape(),
            contribution.shape(),
            "gradient contribution does not match node shape"
        );
        *grad += contribution;
    }

    /// Overwrites the gradient; used to seed the terminal node.
    pub(crate) fn set_grad(&self, grad: Ten64) {
        *self.0.grad.borrow_mut() = grad;
    }

    /// Resets this node's gradient to zeros.
    pub fn zero_grad(&self) {
        self.0.grad.borrow_mut().fill(0.0);
    }
}

impl From<Ten64> for Node {
    fn from(data: Ten64) -> Self {
        Self::leaf(data)
    }
}

impl From<f64> for Node {
    fn from(value: f64) -> Self {
        Self::scalar(value)
    }
}

impl FromStr for Node {
    type Err = AutogradError;

    fn from_str(s: &str) -> Result<Self> {
        parse_tensor(s).map(Self::leaf)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node(shape={:?})", self.shape())
    }
}

/// Shape plus the tag of the producing operation; array values are never
/// printed.
impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Node");
        s.field("shape", &self.shape());
        if let Some(op) = &self.0.op {
            s.field("op", op);
        }
        s.finish()
    }
}
