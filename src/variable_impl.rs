use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use log::{debug, warn};

use crate::expression::Expr;
use crate::graph::{Computation, Graph};
use crate::node::{AbstractVariable, NodeId};
use crate::value::{Derivative, Value};
use crate::wrapper::ExpressionWrapper;

struct VariableState<V: Value, D: Derivative> {
    value: Rc<V>,
    derivative: Option<Rc<D>>,
    expression: Option<ExpressionWrapper<V, D>>,
}

struct VariableCell<V: Value, D: Derivative> {
    id: NodeId,
    state: RefCell<VariableState<V, D>>,
}

impl<V: Value, D: Derivative> Drop for VariableCell<V, D> {
    fn drop(&mut self) {
        Graph::release(self.id);
    }
}

/// A graph variable: persistent value, optional expression and cached
/// derivative, registered as one node of the thread's graph.
///
/// Clones share the same node. The node leaves the graph when the last
/// handle, including those held by other variables' expressions, is dropped.
pub struct VariableNode<V: Value, D: Derivative> {
    cell: Rc<VariableCell<V, D>>,
}

impl<V: Value, D: Derivative> Clone for VariableNode<V, D> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<V: Value, D: Derivative> VariableNode<V, D> {
    pub fn new(value: V) -> Self {
        let cell = Rc::new_cyclic(|weak: &Weak<VariableCell<V, D>>| {
            let computation: Weak<dyn Computation> = weak.clone();
            VariableCell {
                id: Graph::with_mut(|g| g.insert(computation)),
                state: RefCell::new(VariableState {
                    value: Rc::new(value),
                    derivative: None,
                    expression: None,
                }),
            }
        });
        Self { cell }
    }

    /// Creates a variable holding `expression`, evaluated once.
    pub fn with_expression(expression: ExpressionWrapper<V, D>) -> Self {
        let value = expression.value();
        let node = Self::new((*value).clone());
        node.attach(expression, value);
        node
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.cell.id
    }

    pub fn value(&self) -> Rc<V> {
        self.cell.state.borrow().value.clone()
    }

    pub fn expression(&self) -> Option<ExpressionWrapper<V, D>> {
        self.cell.state.borrow().expression.clone()
    }

    /// Replaces the value with a literal, dropping any expression.
    pub fn set_value(&self, value: V) {
        let previous = {
            let mut state = self.cell.state.borrow_mut();
            state.value = Rc::new(value);
            state.expression.take()
        };
        if previous.is_some() {
            self.reset_children();
        }
    }

    /// Assigns an expression and evaluates it eagerly.
    pub fn set_expression(&self, expression: ExpressionWrapper<V, D>) {
        // May read this very variable, so no borrow may be held here.
        let value = expression.value();
        self.attach(expression, value);
    }

    fn attach(&self, expression: ExpressionWrapper<V, D>, value: Rc<V>) {
        expression.release_cache();
        self.reset_children();
        expression.transfer_children_to(self.id());
        debug!(
            "{} assigned an expression with {} children",
            self.id(),
            Graph::with(|g| g.children(self.id()).map_or(0, |c| c.len()))
        );
        let previous = {
            let mut state = self.cell.state.borrow_mut();
            state.value = value;
            mem::replace(&mut state.expression, Some(expression))
        };
        drop(previous);
    }

    fn reset_children(&self) {
        if let Err(err) = Graph::with_mut(|g| g.reset_children(self.id())) {
            warn!("cannot reset edges of {}: {}", self.id(), err);
        }
    }

    pub fn derivative(&self) -> Option<Rc<D>> {
        self.cell.state.borrow().derivative.clone()
    }

    pub fn set_derivative(&self, derivative: D) {
        self.cell.state.borrow_mut().derivative = Some(Rc::new(derivative));
    }

    pub fn clear_derivative(&self) {
        self.cell.state.borrow_mut().derivative = None;
    }

    /// Adds `derivative` to the current derivative, or sets it if none.
    pub fn accumulate(&self, derivative: &D) {
        let mut state = self.cell.state.borrow_mut();
        match state.derivative.as_mut() {
            Some(current) => Rc::make_mut(current).accumulate(derivative),
            None => state.derivative = Some(Rc::new(derivative.clone())),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<V: Value, D: Derivative> AbstractVariable for VariableNode<V, D> {
    fn node(&self) -> NodeId {
        self.id()
    }
}

impl<V: Value, D: Derivative> fmt::Debug for VariableNode<V, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.cell.state.borrow();
        f.debug_struct("VariableNode")
            .field("id", &self.cell.id)
            .field("value", &state.value)
            .field("derivative", &state.derivative)
            .field("expression", &state.expression.is_some())
            .finish()
    }
}

impl<V: Value, D: Derivative> VariableCell<V, D> {
    fn expression(&self) -> Option<ExpressionWrapper<V, D>> {
        self.state.borrow().expression.clone()
    }
}

impl<V: Value, D: Derivative> Computation for VariableCell<V, D> {
    fn has_expression(&self) -> bool {
        self.state.borrow().expression.is_some()
    }

    fn size(&self) -> usize {
        self.state.borrow().value.size()
    }

    fn derivative_shape(&self) -> Option<(usize, usize)> {
        self.state.borrow().derivative.as_ref().map(|d| d.shape())
    }

    fn evaluate(&self) {
        if let Some(expression) = self.expression() {
            let value = expression.value();
            expression.release_cache();
            self.state.borrow_mut().value = value;
        }
    }

    fn push_forward(&self) {
        if let Some(expression) = self.expression() {
            let tangent = expression.push_forward();
            expression.release_cache();
            self.state.borrow_mut().derivative = tangent;
        }
    }

    fn pull_back(&self) {
        let derivative = self.state.borrow().derivative.clone();
        if let (Some(expression), Some(derivative)) = (self.expression(), derivative) {
            expression.pull_back(&derivative);
            expression.release_cache();
        }
    }

    fn clear_derivative(&self) {
        self.state.borrow_mut().derivative = None;
    }

    fn seed_identity(&self) {
        let size = self.size();
        self.state.borrow_mut().derivative = Some(Rc::new(D::identity(size)));
    }

    fn seed_zeros(&self, rows: usize, cols: usize) {
        self.state.borrow_mut().derivative = Some(Rc::new(D::zeros(rows, cols)));
    }

    fn fill_unset_derivative(&self, rows: usize, cols: usize) {
        let mut state = self.state.borrow_mut();
        if state.derivative.is_none() {
            state.derivative = Some(Rc::new(D::zeros(rows, cols)));
        }
    }

    fn derivative_handle(&self) -> Option<Rc<dyn Any>> {
        let derivative: Rc<dyn Any> = self.state.borrow().derivative.clone()?;
        Some(derivative)
    }

    fn restore_derivative(&self, handle: Rc<dyn Any>) {
        if let Ok(derivative) = handle.downcast::<D>() {
            self.state.borrow_mut().derivative = Some(derivative);
        }
    }
}
