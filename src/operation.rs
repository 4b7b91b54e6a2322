use std::fmt;
use std::rc::Rc;

use crate::evaluator::{Evaluator, OperationEvaluator};
use crate::expression::Expr;
use crate::value::{Derivative, Value};
use crate::variable::Expression;
use crate::wrapper::ExpressionWrapper;

/// A pending computation such as `x + y`.
///
/// Operations keep no value of their own between passes: they are either
/// absorbed into a variable or re-derived on every use.
pub struct Operation<V: Value, D: Derivative> {
    evaluator: Rc<dyn Evaluator<V, D>>,
}

impl<V: Value, D: Derivative> Operation<V, D> {
    pub fn new<E>(expression: E) -> Self
    where
        E: Expr<Value = V, Derivative = D> + 'static,
    {
        Self {
            evaluator: Rc::new(OperationEvaluator::new(expression)),
        }
    }

    /// Evaluates the operation from the current values of its variables.
    pub fn value(&self) -> V {
        let value = (*self.evaluator.value()).clone();
        self.evaluator.release_cache();
        value
    }
}

impl<V: Value, D: Derivative> Expression<V, D> for Operation<V, D> {
    fn wrapper(&self) -> ExpressionWrapper<V, D> {
        ExpressionWrapper::from_evaluator(self.evaluator.clone())
    }
}

impl<V: Value, D: Derivative> Clone for Operation<V, D> {
    fn clone(&self) -> Self {
        Self {
            evaluator: self.evaluator.clone(),
        }
    }
}

impl<V: Value, D: Derivative> fmt::Debug for Operation<V, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation({:p})", Rc::as_ptr(&self.evaluator))
    }
}
