//! Compiled programs over a bounded part of the graph.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use log::{debug, trace, warn};
use rustc_hash::FxHashMap;

use crate::errors::{ADError, Result};
use crate::graph::{Computation, Graph};
use crate::node::{AbstractVariable, NodeId};

macro_rules! node_set {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug, Default, PartialEq, Eq)]
        pub struct $name(BTreeSet<NodeId>);

        impl $name {
            pub fn from_variables(variables: &[&dyn AbstractVariable]) -> Self {
                Self(variables.iter().map(|v| v.node()).collect())
            }
            #[inline]
            pub fn contains(&self, node: NodeId) -> bool {
                self.0.contains(&node)
            }
            pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
                self.0.iter().copied()
            }
            pub fn len(&self) -> usize {
                self.0.len()
            }
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }
    };
}

node_set!(Sources, "Boundary of the dependency search.");
node_set!(Targets, "Nodes a function computes.");

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

struct Frame {
    node: NodeId,
    children: Vec<NodeId>,
    next: usize,
}

impl Frame {
    fn next_child(&mut self) -> Option<NodeId> {
        let child = self.children.get(self.next).copied();
        self.next += 1;
        child
    }
}

type Nodes = Vec<(NodeId, Rc<dyn Computation>)>;

/// A topologically ordered traversal plan.
#[derive(Debug, Default)]
struct Program {
    /// Evaluation order: every node after its children.
    order: Vec<NodeId>,
    /// Reached nodes that are in `Sources` or have no expression.
    sources: BTreeSet<NodeId>,
    /// Structural version of every visited node outside `Sources`.
    versions: Vec<(NodeId, u64)>,
}

impl Program {
    fn is_fresh(&self) -> bool {
        Graph::with(|g| {
            self.versions
                .iter()
                .all(|&(id, version)| g.version(id) == Some(version))
        })
    }

    fn nodes(&self) -> Result<Nodes> {
        Graph::with(|g| {
            self.order
                .iter()
                .map(|&id| g.computation(id).map(|c| (id, c)))
                .collect()
        })
    }
}

/// A target's derivative when a reverse pass started, and when it ended.
struct Seed {
    node: NodeId,
    before: Rc<dyn Any>,
    after: Option<Rc<dyn Any>>,
}

enum State {
    Uninitialized,
    Compiled(Rc<Program>),
    Failed(ADError),
}

/// Evaluates and differentiates `targets` with respect to the sources of
/// the subgraph that `sources` bounds.
///
/// A function does not own any variable: it refers to nodes by identity.
/// Reassigning the expression of a variable inside the compiled subgraph
/// makes every later pass fail with [`ADError::StalePlan`] until
/// [`Function::compile`] runs again.
pub struct Function {
    sources: Sources,
    targets: Targets,
    state: State,
    seeds: Vec<Seed>,
}

impl Function {
    /// Fails with [`ADError::NoTargets`] if `targets` is empty.
    pub fn new(
        targets: &[&dyn AbstractVariable],
        sources: &[&dyn AbstractVariable],
    ) -> Result<Self> {
        let targets = Targets::from_variables(targets);
        if targets.is_empty() {
            return Err(ADError::NoTargets);
        }
        Ok(Self {
            sources: Sources::from_variables(sources),
            targets,
            state: State::Uninitialized,
            seeds: Vec::new(),
        })
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    /// Builds the traversal plan from the targets down to the sources.
    pub fn compile(&mut self) -> Result<()> {
        match self.build() {
            Ok(program) => {
                debug!(
                    "compiled {} targets into {} nodes with {} actual sources",
                    self.targets.len(),
                    program.order.len(),
                    program.sources.len()
                );
                self.state = State::Compiled(Rc::new(program));
                Ok(())
            }
            Err(err) => {
                self.state = State::Failed(err.clone());
                Err(err)
            }
        }
    }

    /// Whether a plan exists and still matches the graph.
    pub fn compiled(&self) -> bool {
        match &self.state {
            State::Compiled(program) => program.is_fresh(),
            _ => false,
        }
    }

    /// Error of the last failed compilation, if that is the current state.
    pub fn error(&self) -> Option<&ADError> {
        match &self.state {
            State::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Evaluation order of the compiled plan.
    pub fn program(&self) -> Option<&[NodeId]> {
        match &self.state {
            State::Compiled(program) => Some(&program.order),
            _ => None,
        }
    }

    /// Nodes the compiled plan treats as inputs.
    pub fn actual_sources(&self) -> Option<Vec<NodeId>> {
        match &self.state {
            State::Compiled(program) => Some(program.sources.iter().copied().collect()),
            _ => None,
        }
    }

    /// Re-evaluates every non-source node in evaluation order.
    pub fn evaluate(&mut self) -> Result<()> {
        let program = self.ready()?;
        let nodes = program.nodes()?;
        trace!("evaluate over {} nodes", nodes.len());
        for (id, node) in &nodes {
            if !program.sources.contains(id) {
                node.evaluate();
            }
        }
        Ok(())
    }

    /// Forward pass from the derivatives currently held by the sources.
    pub fn push_tangent(&mut self) -> Result<()> {
        let program = self.ready()?;
        let nodes = program.nodes()?;
        Self::forward(&program, &nodes);
        Ok(())
    }

    /// Forward pass with `seed`'s tangent set to the identity and every other
    /// source's to zero.
    pub fn push_tangent_at(&mut self, seed: &dyn AbstractVariable) -> Result<()> {
        let program = self.ready()?;
        let seed = seed.node();
        if !program.sources.contains(&seed) {
            return Err(ADError::NotASource);
        }
        let nodes = program.nodes()?;
        let width = Self::size_of(&nodes, seed);
        for (id, node) in nodes.iter().filter(|(id, _)| program.sources.contains(id)) {
            if *id == seed {
                node.seed_identity();
            } else {
                node.seed_zeros(node.size(), width);
            }
        }
        Self::forward(&program, &nodes);
        Ok(())
    }

    /// Reverse pass from the derivatives currently held by the targets.
    ///
    /// A target that another target depends on ends a pass holding its seed
    /// plus what flowed into it. Unless its derivative was set since, the
    /// next pass starts again from the seed.
    pub fn pull_gradient(&mut self) -> Result<()> {
        let program = self.ready()?;
        let nodes = program.nodes()?;
        self.restore_seeds(&nodes);
        self.backward(&program, &nodes);
        Ok(())
    }

    /// Reverse pass with `seed`'s gradient set to the identity and every other
    /// target's to zero.
    pub fn pull_gradient_at(&mut self, seed: &dyn AbstractVariable) -> Result<()> {
        let program = self.ready()?;
        let seed = seed.node();
        if !self.targets.contains(seed) {
            return Err(ADError::NotATarget);
        }
        let nodes = program.nodes()?;
        let height = Self::size_of(&nodes, seed);
        for (id, node) in nodes.iter().filter(|(id, _)| self.targets.contains(*id)) {
            if *id == seed {
                node.seed_identity();
            } else {
                node.seed_zeros(height, node.size());
            }
        }
        self.backward(&program, &nodes);
        Ok(())
    }

    fn ready(&mut self) -> Result<Rc<Program>> {
        if !matches!(self.state, State::Compiled(_)) {
            self.compile()?;
        }
        match &self.state {
            State::Compiled(program) if program.is_fresh() => Ok(program.clone()),
            State::Compiled(_) => {
                warn!("stale program for targets {}", list(self.targets.iter()));
                Err(ADError::StalePlan)
            }
            State::Failed(err) => Err(err.clone()),
            State::Uninitialized => Err(ADError::NodeNotIndexedInGraphErr),
        }
    }

    fn size_of(nodes: &Nodes, id: NodeId) -> usize {
        Self::find(nodes, id).map_or(0, |c| c.size())
    }

    fn forward(program: &Program, nodes: &Nodes) {
        let width = nodes
            .iter()
            .filter(|(id, _)| program.sources.contains(id))
            .find_map(|(_, node)| node.derivative_shape())
            .map_or(1, |(_, cols)| cols);
        trace!("push tangent of width {} over {} nodes", width, nodes.len());
        for (id, node) in nodes {
            if !program.sources.contains(id) {
                node.push_forward();
            }
        }
        for (_, node) in nodes {
            node.fill_unset_derivative(node.size(), width);
        }
    }

    fn find(nodes: &Nodes, id: NodeId) -> Option<&Rc<dyn Computation>> {
        nodes.iter().find(|(n, _)| *n == id).map(|(_, c)| c)
    }

    fn restore_seeds(&self, nodes: &Nodes) {
        for seed in &self.seeds {
            let Some(node) = Self::find(nodes, seed.node) else {
                continue;
            };
            let untouched = match (node.derivative_handle(), &seed.after) {
                (Some(current), Some(after)) => Rc::ptr_eq(&current, after),
                _ => false,
            };
            if untouched {
                node.restore_derivative(seed.before.clone());
            }
        }
    }

    fn backward(&mut self, program: &Program, nodes: &Nodes) {
        let seeds: Vec<(NodeId, Rc<dyn Any>)> = nodes
            .iter()
            .filter(|(id, _)| self.targets.contains(*id))
            .filter_map(|(id, node)| node.derivative_handle().map(|d| (*id, d)))
            .collect();
        for (id, node) in nodes {
            if !self.targets.contains(*id) {
                node.clear_derivative();
            }
        }
        let height = nodes
            .iter()
            .filter(|(id, _)| self.targets.contains(*id))
            .find_map(|(_, node)| node.derivative_shape())
            .map_or(1, |(rows, _)| rows);
        trace!("pull gradient of height {} over {} nodes", height, nodes.len());
        for (id, node) in nodes.iter().rev() {
            if !program.sources.contains(id) {
                node.pull_back();
            }
        }
        for (_, node) in nodes {
            node.fill_unset_derivative(height, node.size());
        }
        self.seeds = seeds
            .into_iter()
            .map(|(node, before)| Seed {
                node,
                before,
                after: Self::find(nodes, node).and_then(|c| c.derivative_handle()),
            })
            .collect();
    }

    fn build(&self) -> Result<Program> {
        let mut marks: FxHashMap<NodeId, Mark> = FxHashMap::default();
        let mut program = Program::default();
        let mut stack: Vec<Frame> = Vec::new();

        for target in self.targets.iter() {
            if marks.contains_key(&target) {
                continue;
            }
            self.enter(target, &mut marks, &mut stack, &mut program)?;
            while let Some(frame) = stack.last_mut() {
                match frame.next_child() {
                    Some(child) => match marks.get(&child) {
                        Some(Mark::Active) => return Err(ADError::CyclicDependency),
                        Some(Mark::Done) => {}
                        None => self.enter(child, &mut marks, &mut stack, &mut program)?,
                    },
                    None => {
                        let node = frame.node;
                        stack.pop();
                        marks.insert(node, Mark::Done);
                        program.order.push(node);
                    }
                }
            }
        }
        Ok(program)
    }

    fn enter(
        &self,
        node: NodeId,
        marks: &mut FxHashMap<NodeId, Mark>,
        stack: &mut Vec<Frame>,
        program: &mut Program,
    ) -> Result<()> {
        let computation = Graph::with(|g| g.computation(node))?;
        let bounded = self.sources.contains(node);
        if !bounded {
            let version = Graph::with(|g| g.version(node))
                .ok_or(ADError::NodeNotIndexedInGraphErr)?;
            program.versions.push((node, version));
        }
        if bounded || !computation.has_expression() {
            marks.insert(node, Mark::Done);
            program.order.push(node);
            program.sources.insert(node);
            return Ok(());
        }
        let children = Graph::with(|g| g.children(node).map(<[NodeId]>::to_vec))?;
        marks.insert(node, Mark::Active);
        stack.push(Frame {
            node,
            children,
            next: 0,
        });
        Ok(())
    }
}

fn list(nodes: impl Iterator<Item = NodeId>) -> String {
    let items: Vec<String> = nodes.map(|n| n.to_string()).collect();
    format!("[{}]", items.join(", "))
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Function(sources: {}, targets: {}, program: ",
            list(self.sources.iter()),
            list(self.targets.iter())
        )?;
        match &self.state {
            State::Compiled(program) => write!(f, "{})", list(program.order.iter().copied())),
            State::Failed(err) => write!(f, "failed: {})", err),
            State::Uninitialized => write!(f, "not compiled)"),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{var, Variable};

    type Scalar = Variable<f64, f64>;

    #[test]
    fn empty_targets_are_rejected() {
        assert_eq!(Function::new(&[], &[]).err(), Some(ADError::NoTargets));
    }

    #[test]
    fn program_lists_children_before_parents() {
        let x: Scalar = var(1.0);
        let y: Scalar = var(2.0);
        let z = var(&x * &y);
        let w = var(&z + &x);
        let mut f = Function::new(&[&w], &[]).unwrap();
        f.compile().unwrap();

        let order = f.program().unwrap().to_vec();
        let position = |id: NodeId| order.iter().position(|&n| n == id).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(z.node()) < position(w.node()));
        assert!(position(x.node()) < position(z.node()));
        assert_eq!(f.actual_sources().unwrap(), {
            let mut s = vec![x.node(), y.node()];
            s.sort();
            s
        });
    }

    #[test]
    fn sources_bound_the_search() {
        let x: Scalar = var(1.0);
        let z = var(&x * 3.0);
        let w = var(&z * 2.0);
        let mut f = Function::new(&[&w], &[&z]).unwrap();
        f.compile().unwrap();
        assert_eq!(f.program().unwrap(), &[z.node(), w.node()]);

        f.push_tangent_at(&z).unwrap();
        assert_eq!(w.derivative(), 2.0);
        assert_eq!(f.push_tangent_at(&x).err(), Some(ADError::NotASource));
    }

    #[test]
    fn self_assignment_is_cyclic() {
        let x: Scalar = var(1.0);
        x.set(&x + 1.0);
        let mut f = Function::new(&[&x], &[]).unwrap();
        assert_eq!(f.compile().err(), Some(ADError::CyclicDependency));
        assert!(!f.compiled());
        assert_eq!(f.evaluate().err(), Some(ADError::CyclicDependency));
        assert!(f.to_string().contains("failed"));

        x.set(2.0);
        assert!(f.evaluate().is_ok());
        assert!(f.compiled());
    }

    #[test]
    fn reassigned_expression_makes_the_plan_stale() {
        let x: Scalar = var(1.0);
        let y: Scalar = var(2.0);
        let z = var(&x + &y);
        let mut f = Function::new(&[&z], &[]).unwrap();
        f.evaluate().unwrap();
        assert!(f.compiled());

        z.set(&x * &y);
        assert!(!f.compiled());
        assert_eq!(f.evaluate().err(), Some(ADError::StalePlan));

        f.compile().unwrap();
        f.evaluate().unwrap();
        assert_eq!(z.value(), 2.0);
    }

    #[test]
    fn new_literal_values_keep_the_plan() {
        let x: Scalar = var(1.0);
        let z = var(&x * 2.0);
        let mut f = Function::new(&[&z], &[]).unwrap();
        f.compile().unwrap();
        x.set(4.0);
        f.evaluate().unwrap();
        assert_eq!(z.value(), 8.0);
        assert!(f.compiled());
    }

    #[test]
    fn display_lists_nodes() {
        let x: Scalar = var(1.0);
        let z = var(&x * 2.0);
        let mut f = Function::new(&[&z], &[&x]).unwrap();
        assert!(f.to_string().ends_with("program: not compiled)"));
        f.compile().unwrap();
        assert_eq!(
            f.to_string(),
            format!(
                "Function(sources: [{}], targets: [{}], program: [{}, {}])",
                x.node(),
                z.node(),
                x.node(),
                z.node()
            )
        );
    }
}
