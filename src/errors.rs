//! Error types for the automatic differentiation crate.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Error variants for graph, function and host operations.
pub enum ADError {
    #[error("no targets provided")]
    /// A function was constructed without target variables.
    NoTargets,
    #[error("cyclic dependency in compiled program")]
    /// The subgraph between sources and targets contains a cycle.
    CyclicDependency,
    #[error("seed is not an actual source of the function")]
    /// `push_tangent_at` was called with a variable outside the compiled sources.
    NotASource,
    #[error("seed is not a target of the function")]
    /// `pull_gradient_at` was called with a variable outside the targets.
    NotATarget,
    #[error("compiled program is stale, call compile() after assigning new expressions")]
    /// A variable of the compiled program changed its expression or was dropped.
    StalePlan,
    #[error("Node not indexed in graph")]
    /// Attempted to access a node that is no longer registered in the graph.
    NodeNotIndexedInGraphErr,
    #[error("no overload of `{name}` matches the given arguments")]
    /// No registered host overload accepts the given arguments.
    NoMatchingOverload { name: String },
    #[error("operands of `{op}` have incompatible shapes {lhs:?} and {rhs:?}")]
    /// A host operator received operands whose shapes do not fit together.
    ShapeMismatch {
        op: String,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    #[error("Type error: {0}")]
    /// A host object could not be used the way it was asked to.
    TypeError(String),
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, ADError>;
