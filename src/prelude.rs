pub use crate::errors::{ADError, Result};
pub use crate::function::{Function, Sources, Targets};
pub use crate::node::{AbstractVariable, NodeId};
pub use crate::operation::Operation;
pub use crate::variable::{d, var, Expression, Variable};
pub use crate::wrapper::ExpressionWrapper;
pub use crate::{
    cos, dot, exp, log, matmul, maximum, mean, minimum, norm, outer, pow, powf, sin, sqrt, square,
    squared_norm, sum,
};
