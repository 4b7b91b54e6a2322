use std::fmt;
use std::rc::Rc;

use crate::evaluator::{Evaluator, OperationEvaluator, VariableEvaluator};
use crate::expression::{Expr, Tangent};
use crate::node::NodeId;
use crate::value::{Derivative, Value};
use crate::variable_impl::VariableNode;

/// Shared handle to an [`Evaluator`]: the one runtime type that stands in
/// for any expression of a (value, derivative) category.
///
/// Clones refer to the same evaluator and therefore the same caches.
pub struct ExpressionWrapper<V: Value, D: Derivative> {
    evaluator: Rc<dyn Evaluator<V, D>>,
}

impl<V: Value, D: Derivative> ExpressionWrapper<V, D> {
    /// Erases a statically typed expression.
    pub fn new<E>(expression: E) -> Self
    where
        E: Expr<Value = V, Derivative = D> + 'static,
    {
        Self::from_evaluator(Rc::new(OperationEvaluator::new(expression)))
    }

    pub fn from_evaluator(evaluator: Rc<dyn Evaluator<V, D>>) -> Self {
        Self { evaluator }
    }

    pub fn from_variable(variable: VariableNode<V, D>) -> Self {
        Self::from_evaluator(Rc::new(VariableEvaluator::new(variable)))
    }

    pub fn evaluator(&self) -> &Rc<dyn Evaluator<V, D>> {
        &self.evaluator
    }

    /// Whether both handles share one evaluator.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.evaluator, &other.evaluator)
    }
}

impl<V: Value, D: Derivative> Clone for ExpressionWrapper<V, D> {
    fn clone(&self) -> Self {
        Self {
            evaluator: self.evaluator.clone(),
        }
    }
}

impl<V: Value, D: Derivative> fmt::Debug for ExpressionWrapper<V, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExpressionWrapper({:p})", Rc::as_ptr(&self.evaluator))
    }
}

impl<V: Value, D: Derivative> Expr for ExpressionWrapper<V, D> {
    type Value = V;
    type Derivative = D;

    #[inline]
    fn value(&self) -> Rc<V> {
        self.evaluator.value()
    }
    #[inline]
    fn push_forward(&self) -> Tangent<D> {
        self.evaluator.push_forward()
    }
    #[inline]
    fn pull_back(&self, derivative: &D) {
        self.evaluator.pull_back(derivative)
    }
    #[inline]
    fn transfer_children_to(&self, node: NodeId) {
        self.evaluator.transfer_children_to(node)
    }
    #[inline]
    fn release_cache(&self) {
        self.evaluator.release_cache()
    }
    #[inline]
    fn is_constant(&self) -> bool {
        self.evaluator.is_constant()
    }
}
