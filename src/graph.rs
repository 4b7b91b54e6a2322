//! Thread-local arena of variable nodes.
//!
//! Every variable registers one entry here. Functions address nodes by
//! [`NodeId`] only and upgrade the weak computation handle when they run.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::errors::{ADError, Result};
use crate::node::{GraphNode, NodeId};

/// The per-node work a compiled function drives, erased over the node's
/// value and derivative types.
pub(crate) trait Computation {
    /// Whether the node evaluates an expression (as opposed to a literal).
    fn has_expression(&self) -> bool;
    /// Number of scalar elements of the node's value.
    fn size(&self) -> usize;
    /// Shape of the current derivative, if one is set.
    fn derivative_shape(&self) -> Option<(usize, usize)>;
    /// Re-evaluates the expression into the value cache.
    fn evaluate(&self);
    /// Recomputes the derivative from the expression, in evaluation order.
    fn push_forward(&self);
    /// Sends the current derivative into the expression's children.
    fn pull_back(&self);
    fn clear_derivative(&self);
    fn seed_identity(&self);
    fn seed_zeros(&self, rows: usize, cols: usize);
    /// Sets a zero derivative of the given shape if none is set.
    fn fill_unset_derivative(&self, rows: usize, cols: usize);
    /// Shared handle on the current derivative.
    fn derivative_handle(&self) -> Option<Rc<dyn Any>>;
    /// Puts back a derivative taken with `derivative_handle`.
    fn restore_derivative(&self, handle: Rc<dyn Any>);
}

enum Slot {
    Occupied(GraphNode),
    Vacant,
}

struct Entry {
    generation: u32,
    slot: Slot,
}

/// Arena of graph nodes with stable, generation-checked indices.
pub struct Graph {
    entries: Vec<Entry>,
    free: Vec<u32>,
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    fn entry(&self, id: NodeId) -> Option<&GraphNode> {
        match self.entries.get(id.index as usize) {
            Some(Entry {
                generation,
                slot: Slot::Occupied(node),
            }) if *generation == id.generation => Some(node),
            _ => None,
        }
    }

    fn entry_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        match self.entries.get_mut(id.index as usize) {
            Some(Entry {
                generation,
                slot: Slot::Occupied(node),
            }) if *generation == id.generation => Some(node),
            _ => None,
        }
    }

    pub(crate) fn insert(&mut self, computation: Weak<dyn Computation>) -> NodeId {
        let node = GraphNode::new(computation);
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.slot = Slot::Occupied(node);
            return NodeId {
                index,
                generation: entry.generation,
            };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            slot: Slot::Occupied(node),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    pub(crate) fn remove(&mut self, id: NodeId) {
        if self.entry(id).is_some() {
            self.entries[id.index as usize].slot = Slot::Vacant;
            self.free.push(id.index);
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.slot, Slot::Occupied(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn children(&self, id: NodeId) -> Result<&[NodeId]> {
        self.entry(id)
            .map(|n| n.children.as_slice())
            .ok_or(ADError::NodeNotIndexedInGraphErr)
    }

    pub fn version(&self, id: NodeId) -> Option<u64> {
        self.entry(id).map(|n| n.version)
    }

    pub(crate) fn add_child(&mut self, id: NodeId, child: NodeId) -> Result<()> {
        self.entry_mut(id)
            .map(|n| n.add_child(child))
            .ok_or(ADError::NodeNotIndexedInGraphErr)
    }

    /// Drops all dependency edges of a node and bumps its version.
    pub(crate) fn reset_children(&mut self, id: NodeId) -> Result<()> {
        let node = self
            .entry_mut(id)
            .ok_or(ADError::NodeNotIndexedInGraphErr)?;
        node.children.clear();
        node.version += 1;
        Ok(())
    }

    pub(crate) fn computation(&self, id: NodeId) -> Result<Rc<dyn Computation>> {
        self.entry(id)
            .and_then(|n| n.computation.upgrade())
            .ok_or(ADError::NodeNotIndexedInGraphErr)
    }

    pub fn debug_print() {
        GRAPH.with(|g| {
            let graph = g.borrow();
            for (i, entry) in graph.entries.iter().enumerate() {
                if let Slot::Occupied(node) = &entry.slot {
                    println!("#{}: {:?}", i, node);
                }
            }
        });
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Runs `f` with shared access to the current thread's graph.
    #[inline]
    pub fn with<R>(f: impl FnOnce(&Graph) -> R) -> R {
        GRAPH.with(|g| f(&g.borrow()))
    }

    #[inline]
    pub(crate) fn with_mut<R>(f: impl FnOnce(&mut Graph) -> R) -> R {
        GRAPH.with(|g| f(&mut g.borrow_mut()))
    }

    /// Removes a node, tolerating thread teardown.
    pub(crate) fn release(id: NodeId) {
        let _ = GRAPH.try_with(|g| {
            if let Ok(mut graph) = g.try_borrow_mut() {
                graph.remove(id);
            }
        });
    }

    /// Number of live nodes in the current thread's graph.
    pub fn live_nodes() -> usize {
        Self::with(Graph::len)
    }
}

thread_local! {
    static GRAPH: RefCell<Graph> = RefCell::new(Graph::new());
}
