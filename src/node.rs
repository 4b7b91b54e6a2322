//! Graph node identities and entries.

use std::fmt;
use std::rc::Weak;

use crate::graph::Computation;

/// Stable identity of a node in the computation graph.
///
/// The generation distinguishes a live node from an earlier, dropped node
/// that occupied the same arena slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId(#{}, gen {})", self.index, self.generation)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// Anything that names a variable node of the graph.
pub trait AbstractVariable {
    /// Returns the identity of the underlying graph node.
    fn node(&self) -> NodeId;
}

impl<T: AbstractVariable + ?Sized> AbstractVariable for &T {
    fn node(&self) -> NodeId {
        (**self).node()
    }
}

/// A node entry in the graph arena, with dependency edges.
pub(crate) struct GraphNode {
    /// The variable's type-erased computation.
    pub computation: Weak<dyn Computation>,
    /// Nodes the variable's expression reads from.
    pub children: Vec<NodeId>,
    /// Bumped whenever `children` is rebuilt.
    pub version: u64,
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GraphNode {{ children: {:?}, version: {}, alive: {} }}",
            self.children,
            self.version,
            self.computation.strong_count() > 0
        )
    }
}

impl GraphNode {
    pub fn new(computation: Weak<dyn Computation>) -> Self {
        Self {
            computation,
            children: Vec::new(),
            version: 0,
        }
    }

    #[inline]
    pub fn add_child(&mut self, child: NodeId) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }
}
