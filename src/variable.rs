//! Public expression variants and the conversions behind the typed API.

use std::fmt;

use ndarray::{Array1, Array2};

use crate::expression::Literal;
use crate::node::{AbstractVariable, NodeId};
use crate::operation::Operation;
use crate::value::{Derivative, Value};
use crate::variable_impl::VariableNode;
use crate::wrapper::ExpressionWrapper;

/// Anything that can hand out a wrapper around its computation.
pub trait Expression<V: Value, D: Derivative> {
    fn wrapper(&self) -> ExpressionWrapper<V, D>;
}

impl<V: Value, D: Derivative> Expression<V, D> for ExpressionWrapper<V, D> {
    fn wrapper(&self) -> ExpressionWrapper<V, D> {
        self.clone()
    }
}

/// Persistent, eagerly evaluated state with a cached derivative.
pub struct Variable<V: Value, D: Derivative> {
    node: VariableNode<V, D>,
}

impl<V: Value, D: Derivative> Variable<V, D> {
    pub fn new(value: V) -> Self {
        Self {
            node: VariableNode::new(value),
        }
    }

    /// Current value.
    pub fn value(&self) -> V {
        (*self.node.value()).clone()
    }

    /// Assigns a literal or an expression. Either way the value is
    /// up to date when this returns.
    pub fn set<A: Assign<V, D>>(&self, init: A) {
        init.assign_to(&self.node);
    }

    /// Derivative of the last differentiation pass, empty if none ran yet.
    pub fn derivative(&self) -> D {
        self.node
            .derivative()
            .map_or_else(D::empty, |d| (*d).clone())
    }

    pub fn set_derivative(&self, derivative: D) {
        self.node.set_derivative(derivative);
    }

    pub fn expression(&self) -> Option<ExpressionWrapper<V, D>> {
        self.node.expression()
    }

    pub fn handle(&self) -> &VariableNode<V, D> {
        &self.node
    }
}

impl<V: Value + Default, D: Derivative> Default for Variable<V, D> {
    fn default() -> Self {
        Self::new(V::default())
    }
}

impl<V: Value, D: Derivative> AbstractVariable for Variable<V, D> {
    fn node(&self) -> NodeId {
        self.node.id()
    }
}

impl<V: Value, D: Derivative> Expression<V, D> for Variable<V, D> {
    fn wrapper(&self) -> ExpressionWrapper<V, D> {
        ExpressionWrapper::from_variable(self.node.clone())
    }
}

impl<V: Value, D: Derivative> fmt::Debug for Variable<V, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Variable({}, {:?})", self.node.id(), self.node.value())
    }
}

/// Creates a variable from a literal or an expression.
pub fn var<V: Value, D: Derivative>(init: impl Assign<V, D>) -> Variable<V, D> {
    Variable {
        node: init.into_node(),
    }
}

/// Derivative of `variable` from the last differentiation pass.
pub fn d<V: Value, D: Derivative>(variable: &Variable<V, D>) -> D {
    variable.derivative()
}

/// Operands of the typed operators: expressions and literals.
pub trait Operand<V: Value, D: Derivative> {
    fn into_wrapper(self) -> ExpressionWrapper<V, D>;
}

/// Right-hand sides of [`Variable::set`] and [`var`].
pub trait Assign<V: Value, D: Derivative> {
    fn assign_to(self, variable: &VariableNode<V, D>);
    fn into_node(self) -> VariableNode<V, D>;
}

macro_rules! expression_operand {
    ($($Type:ty),*) => {
        $(
            impl<V: Value, D: Derivative> Operand<V, D> for $Type {
                fn into_wrapper(self) -> ExpressionWrapper<V, D> {
                    self.wrapper()
                }
            }

            impl<V: Value, D: Derivative> Assign<V, D> for $Type {
                fn assign_to(self, variable: &VariableNode<V, D>) {
                    variable.set_expression(self.wrapper());
                }
                fn into_node(self) -> VariableNode<V, D> {
                    VariableNode::with_expression(self.wrapper())
                }
            }
        )*
    };
}

expression_operand!(
    &Variable<V, D>,
    Variable<V, D>,
    &Operation<V, D>,
    Operation<V, D>,
    &ExpressionWrapper<V, D>,
    ExpressionWrapper<V, D>
);

macro_rules! literal_operand {
    ($($V:ty),*) => {
        $(
            impl<D: Derivative> Operand<$V, D> for $V {
                fn into_wrapper(self) -> ExpressionWrapper<$V, D> {
                    ExpressionWrapper::new(Literal::new(self))
                }
            }

            impl<D: Derivative> Operand<$V, D> for &$V {
                fn into_wrapper(self) -> ExpressionWrapper<$V, D> {
                    ExpressionWrapper::new(Literal::new(self.clone()))
                }
            }

            impl<D: Derivative> Assign<$V, D> for $V {
                fn assign_to(self, variable: &VariableNode<$V, D>) {
                    variable.set_value(self);
                }
                fn into_node(self) -> VariableNode<$V, D> {
                    VariableNode::new(self)
                }
            }
        )*
    };
}

literal_operand!(f64, Array1<f64>, Array2<f64>);
