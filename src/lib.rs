//! Expression-graph automatic differentiation.
//!
//! Variables hold eagerly evaluated values and may be defined by expressions
//! over other variables. A [`function::Function`] compiles the subgraph
//! between its targets and sources into a program that it can re-evaluate
//! and differentiate in forward mode (tangents) or reverse mode (gradients).
//!
//! The typed API lives in [`prelude`]. The [`scalar`] and [`array`] modules
//! build dynamically typed [`host::Module`]s exposing the same engine through
//! a uniform runtime type per value category.

pub mod array;
pub mod binding;
pub mod errors;
pub mod evaluator;
pub mod expression;
pub mod function;
pub mod graph;
pub mod host;
pub mod node;
pub mod operation;
mod overloads;
pub mod prelude;
pub mod scalar;
pub mod value;
pub mod variable;
mod variable_impl;
pub mod wrapper;

pub use overloads::{
    binary, cos, dot, exp, log, matmul, maximum, mean, minimum, norm, outer, pow, powf, sin,
    sqrt, square, squared_norm, sum, unary,
};
pub use variable_impl::VariableNode;
