//! Type erasure of expressions per (value, derivative) category.

use std::cell::RefCell;
use std::rc::Rc;

use log::warn;

use crate::expression::{Expr, Tangent};
use crate::graph::Graph;
use crate::node::NodeId;
use crate::value::{Derivative, Value};
use crate::variable_impl::VariableNode;

/// The expression contract behind a trait object, so any expression of a
/// category can be stored, shared and composed without naming its type.
pub trait Evaluator<V: Value, D: Derivative> {
    /// Cached value, computed on first use after a cache release.
    fn value(&self) -> Rc<V>;
    /// Cached tangent. Children must already hold their tangents.
    fn push_forward(&self) -> Tangent<D>;
    fn pull_back(&self, derivative: &D);
    fn transfer_children_to(&self, node: NodeId);
    /// Idempotent.
    fn release_cache(&self);
    fn is_constant(&self) -> bool;
}

/// Evaluator owning a one-off computation.
///
/// Holds at most one value and one tangent per pass, both freed by
/// [`Evaluator::release_cache`].
pub struct OperationEvaluator<E: Expr> {
    expression: E,
    value: RefCell<Option<Rc<E::Value>>>,
    derivative: RefCell<Option<Tangent<E::Derivative>>>,
}

impl<E: Expr> OperationEvaluator<E> {
    pub fn new(expression: E) -> Self {
        Self {
            expression,
            value: RefCell::new(None),
            derivative: RefCell::new(None),
        }
    }

    /// Whether a value is currently cached.
    pub fn is_cached(&self) -> bool {
        self.value.borrow().is_some()
    }
}

impl<E: Expr> Evaluator<E::Value, E::Derivative> for OperationEvaluator<E> {
    fn value(&self) -> Rc<E::Value> {
        let cached = self.value.borrow().clone();
        if let Some(value) = cached {
            return value;
        }
        let value = self.expression.value();
        *self.value.borrow_mut() = Some(value.clone());
        value
    }

    fn push_forward(&self) -> Tangent<E::Derivative> {
        let cached = self.derivative.borrow().clone();
        if let Some(tangent) = cached {
            return tangent;
        }
        let tangent = self.expression.push_forward();
        *self.derivative.borrow_mut() = Some(tangent.clone());
        tangent
    }

    fn pull_back(&self, derivative: &E::Derivative) {
        self.expression.pull_back(derivative);
    }

    fn transfer_children_to(&self, node: NodeId) {
        self.expression.transfer_children_to(node);
    }

    fn release_cache(&self) {
        self.value.borrow_mut().take();
        self.derivative.borrow_mut().take();
        self.expression.release_cache();
    }

    fn is_constant(&self) -> bool {
        self.expression.is_constant()
    }
}

/// Evaluator reading a variable's persistent state.
pub struct VariableEvaluator<V: Value, D: Derivative> {
    variable: VariableNode<V, D>,
}

impl<V: Value, D: Derivative> VariableEvaluator<V, D> {
    pub fn new(variable: VariableNode<V, D>) -> Self {
        Self { variable }
    }
}

impl<V: Value, D: Derivative> Evaluator<V, D> for VariableEvaluator<V, D> {
    fn value(&self) -> Rc<V> {
        self.variable.value()
    }

    fn push_forward(&self) -> Tangent<D> {
        self.variable.derivative()
    }

    fn pull_back(&self, derivative: &D) {
        self.variable.accumulate(derivative);
    }

    fn transfer_children_to(&self, node: NodeId) {
        let child = self.variable.id();
        if let Err(err) = Graph::with_mut(|g| g.add_child(node, child)) {
            warn!("cannot link {} under {}: {}", child, node, err);
        }
    }

    // The variable owns its cache across passes.
    fn release_cache(&self) {}

    fn is_constant(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{Binary, Cwise, Literal, MulOp};

    #[test]
    fn operation_value_is_cached_until_released() {
        let x = VariableNode::<f64, f64>::new(2.0);
        let expr = Binary::<_, _, Cwise<MulOp>>::new(
            crate::wrapper::ExpressionWrapper::from_variable(x.clone()),
            Literal::<f64, f64>::new(3.0),
        );
        let evaluator = OperationEvaluator::new(expr);
        assert!(!evaluator.is_cached());
        assert_eq!(*evaluator.value(), 6.0);
        assert!(evaluator.is_cached());

        x.set_value(5.0);
        assert_eq!(*evaluator.value(), 6.0);
        evaluator.release_cache();
        evaluator.release_cache();
        assert!(!evaluator.is_cached());
        assert_eq!(*evaluator.value(), 15.0);
    }

    #[test]
    fn variable_evaluator_accumulates_into_variable() {
        let x = VariableNode::<f64, f64>::new(1.0);
        let evaluator = VariableEvaluator::new(x.clone());
        evaluator.pull_back(&2.0);
        evaluator.pull_back(&0.5);
        assert_eq!(x.derivative().as_deref(), Some(&2.5));
        assert_eq!(evaluator.push_forward().as_deref(), Some(&2.5));
    }
}
