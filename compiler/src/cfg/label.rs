//! CFG nodes
//!
//! Each CFG owns an arena of labels addressed by `NodeId`; ownership of a
//! node is genuinely shared (every predecessor references it, and so does
//! the CFG), so edges are stored as indices rather than owning references.
//! The CFG's own entry node is not a label; predecessor records refer to
//! it through `NodeRef::Entry`.

use smallvec::SmallVec;
use std::fmt;

use crate::internal_error;
use crate::mil::{Atom, BlockId};

/// Index of a label in its owning CFG's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A reference to a CFG node: either the CFG's entry node or a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    /// The owning CFG's entry node
    Entry,

    /// A label in the arena
    Node(NodeId),
}

/// One recorded call site: the source node together with the (non-unit)
/// actual arguments supplied there. A label's predecessor list grows by
/// appending these during discovery and is read-only afterward.
#[derive(Debug, Clone)]
pub struct PredEdge {
    pub src: NodeRef,
    pub args: Vec<Atom>,
}

/// The three structurally different kinds of label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// Owns a full block body; any number of predecessors; one label per
    /// block per CFG
    BlockBody { block: BlockId },

    /// A call that leaves the CFG: the callee's code is emitted as its own
    /// function, not included here. Zero successors, and exactly one
    /// predecessor by construction (one such label per call site).
    TailOnly { block: BlockId },

    /// An inserted node that redirects flow to `target`, giving a merge
    /// point a distinct source when one node would otherwise appear twice
    /// in its predecessor list. One successor, no parameters of its own.
    PureJump { target: NodeId },
}

/// A label: a numbered graph vertex participating in SSA lowering.
#[derive(Debug, Clone)]
pub struct Label {
    pub kind: LabelKind,

    /// Call sites discovered so far, in discovery order
    pub preds: Vec<PredEdge>,

    /// Successor edges; `None` until discovery computes them, and reading
    /// them before that is an internal-consistency failure
    pub succs: Option<SmallVec<[NodeId; 4]>>,

    /// Guard ensuring the renaming pass handles each label exactly once
    /// per traversal, even on cyclic graphs
    pub visited: bool,
}

impl Label {
    pub fn new(kind: LabelKind) -> Self {
        Label {
            kind,
            preds: Vec::new(),
            succs: None,
            visited: false,
        }
    }

    /// Record that this label is called with the given arguments from the
    /// given source node.
    ///
    /// A tail-only label represents a single call site; a second
    /// predecessor can only come from a defect in edge construction and is
    /// rejected here, before any emission is attempted.
    pub fn called_from(&mut self, id: NodeId, src: NodeRef, args: Vec<Atom>) {
        if matches!(self.kind, LabelKind::TailOnly { .. }) && !self.preds.is_empty() {
            internal_error!("tail-only label {} acquired a second predecessor", id);
        }
        self.preds.push(PredEdge { src, args });
    }

    /// The successor list, which must already have been computed.
    pub fn succs(&self, id: NodeId) -> &SmallVec<[NodeId; 4]> {
        match &self.succs {
            Some(succs) => succs,
            None => internal_error!("successors of {} read before discovery", id),
        }
    }
}
