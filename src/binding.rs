//! Registration of expression categories into a host [`Module`].

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use ndarray::Array2;

use crate::errors::{ADError, Result};
use crate::expression::{BinaryKernel, Expr, Literal, UnaryKernel};
use crate::function::Function;
use crate::host::{
    expression_class, operation_class, variable_class, AnyVariable, Category, Gradient, Module,
    VariableSet,
};
use crate::operation::Operation;
use crate::overloads::{binary, unary};
use crate::value::{ArrayValue, Derivative, Value};
use crate::variable::{var, Variable};
use crate::wrapper::ExpressionWrapper;

fn literal<V: Value, D: Derivative>(value: V) -> ExpressionWrapper<V, D> {
    ExpressionWrapper::new(Literal::new(value))
}

/// Applies `K` once the operand shapes are known to fit it.
fn checked<K, L, R, D>(
    op: &str,
    lhs: ExpressionWrapper<L, D>,
    rhs: ExpressionWrapper<R, D>,
) -> Result<Operation<K::Output, D>>
where
    L: Value,
    R: Value,
    D: Derivative,
    K: BinaryKernel<L, R> + 'static,
{
    let (l, r) = (lhs.value(), rhs.value());
    lhs.release_cache();
    rhs.release_cache();
    if !K::compatible(&l, &r) {
        return Err(ADError::ShapeMismatch {
            op: op.to_string(),
            lhs: l.dims().to_vec(),
            rhs: r.dims().to_vec(),
        });
    }
    Ok(binary::<K, L, R, D>(lhs, rhs))
}

/// Installs the `Expression`, `Operation` and `Variable` classes of one
/// (value, derivative) category, plus `var`, `d` and the variable
/// constructor, and then registers operators on them.
pub struct ExpressionBinding<'m, V, D> {
    module: &'m mut Module,
    _types: PhantomData<fn() -> (V, D)>,
}

impl<'m, V: Category, D: Gradient> ExpressionBinding<'m, V, D> {
    pub fn new(module: &'m mut Module) -> Self {
        let name = V::NAME;
        let expression = expression_class::<V>();
        let operation = operation_class::<V>();
        let variable = variable_class::<V>();

        module
            .add_class(
                &expression,
                &[],
                &format!("Abstract base class of {} expressions.", name.to_lowercase()),
            )
            .add_class(
                &operation,
                &[&expression],
                &format!("A pending {} computation.", name.to_lowercase()),
            )
            .add_class(
                &variable,
                &[&expression, "Variable"],
                &format!(
                    "A {} variable: a value or an expression, evaluated eagerly, \
                     with a cached derivative.",
                    name.to_lowercase()
                ),
            );

        module
            .def(&variable, || -> Result<Variable<V, D>> { Ok(Variable::default()) })
            .def(&variable, |value: V| -> Result<Variable<V, D>> { Ok(Variable::new(value)) })
            .def(&variable, |e: ExpressionWrapper<V, D>| -> Result<Variable<V, D>> {
                Ok(var(e))
            });

        module
            .def_method(&variable, "__call__", |x: Rc<Variable<V, D>>| -> Result<V> {
                Ok(x.value())
            })
            .def_method(&variable, "set", |x: Rc<Variable<V, D>>, value: V| -> Result<()> {
                x.handle().set_value(value);
                Ok(())
            })
            .def_method(
                &variable,
                "set",
                |x: Rc<Variable<V, D>>, e: ExpressionWrapper<V, D>| -> Result<()> {
                    x.set(e);
                    Ok(())
                },
            )
            .def_method(
                &variable,
                "set_derivative",
                |x: Rc<Variable<V, D>>, derivative: D| -> Result<()> {
                    x.set_derivative(derivative);
                    Ok(())
                },
            )
            .def_method(&variable, "derivative", |x: Rc<Variable<V, D>>| -> Result<D> {
                Ok(x.derivative())
            })
            .set_doc(&format!("{}.__call__", variable), "Current value.")
            .set_doc(
                &format!("{}.set", variable),
                "Assigns a value or an expression and evaluates it.",
            )
            .set_doc(
                &format!("{}.set_derivative", variable),
                "Overwrites the cached derivative.",
            );

        module
            .def("var", || -> Result<Variable<V, D>> { Ok(Variable::default()) })
            .def("var", |value: V| -> Result<Variable<V, D>> { Ok(Variable::new(value)) })
            .def("var", |e: ExpressionWrapper<V, D>| -> Result<Variable<V, D>> { Ok(var(e)) })
            .def("d", |x: Rc<Variable<V, D>>| -> Result<D> { Ok(x.derivative()) })
            .set_doc(
                "var",
                "Creates a variable from a value or an expression, or a zero-valued one.",
            )
            .set_doc("d", "Derivative of a variable from the last differentiation pass.");

        Self {
            module,
            _types: PhantomData,
        }
    }

    fn class(&self) -> String {
        expression_class::<V>()
    }

    /// `__name__` for expression∘expression and expression∘value, plus the
    /// reflected `__rname__` for value∘expression.
    pub fn def_sym_infix_op<K>(&mut self, name: &str) -> &mut Self
    where
        K: BinaryKernel<V, V, Output = V> + 'static,
    {
        let class = self.class();
        let forward = format!("__{}__", name);
        let reflected = format!("__r{}__", name);
        let (op, lit_op, r_op) = (forward.clone(), forward.clone(), reflected.clone());
        self.module
            .def_method(
                &class,
                &forward,
                move |l: ExpressionWrapper<V, D>,
                      r: ExpressionWrapper<V, D>|
                      -> Result<Operation<V, D>> { checked::<K, V, V, D>(&op, l, r) },
            )
            .def_method(
                &class,
                &forward,
                move |l: ExpressionWrapper<V, D>, r: V| -> Result<Operation<V, D>> {
                    checked::<K, V, V, D>(&lit_op, l, literal(r))
                },
            )
            .def_method(
                &class,
                &reflected,
                move |r: ExpressionWrapper<V, D>, l: V| -> Result<Operation<V, D>> {
                    checked::<K, V, V, D>(&r_op, literal(l), r)
                },
            );
        self
    }

    /// Prefix operator `__name__`.
    pub fn def_method<K>(&mut self, name: &str) -> &mut Self
    where
        K: UnaryKernel<V, Output = V> + 'static,
    {
        let class = self.class();
        self.module.def_method(
            &class,
            &format!("__{}__", name),
            |x: ExpressionWrapper<V, D>| -> Result<Operation<V, D>> { Ok(unary::<K, V, D>(x)) },
        );
        self
    }

    /// `__name__` with a scalar on the right, literal or expression.
    pub fn def_broadcast_infix_op<K>(&mut self, name: &str) -> &mut Self
    where
        K: BinaryKernel<V, f64, Output = V> + 'static,
    {
        let class = self.class();
        let forward = format!("__{}__", name);
        self.module
            .def_method(
                &class,
                &forward,
                |l: ExpressionWrapper<V, D>, r: f64| -> Result<Operation<V, D>> {
                    Ok(binary::<K, V, f64, D>(l, r))
                },
            )
            .def_method(
                &class,
                &forward,
                |l: ExpressionWrapper<V, D>,
                 r: ExpressionWrapper<f64, D>|
                 -> Result<Operation<V, D>> { Ok(binary::<K, V, f64, D>(l, r)) },
            );
        self
    }

    /// Reflected `__rname__` with a scalar on the left, literal or expression.
    pub fn def_r_broadcast_infix_op<K>(&mut self, name: &str) -> &mut Self
    where
        K: BinaryKernel<f64, V, Output = V> + 'static,
    {
        let class = self.class();
        let reflected = format!("__r{}__", name);
        self.module
            .def_method(
                &class,
                &reflected,
                |r: ExpressionWrapper<V, D>, l: f64| -> Result<Operation<V, D>> {
                    Ok(binary::<K, f64, V, D>(l, r))
                },
            )
            .def_method(
                &class,
                &reflected,
                |r: ExpressionWrapper<V, D>,
                 l: ExpressionWrapper<f64, D>|
                 -> Result<Operation<V, D>> { Ok(binary::<K, f64, V, D>(l, r)) },
            );
        self
    }

    /// `__name__` with an operand of another category `R`, expression or
    /// literal.
    pub fn def_infix_op<R, K>(&mut self, name: &str) -> &mut Self
    where
        R: Category,
        K: BinaryKernel<V, R> + 'static,
        K::Output: Category,
    {
        let class = self.class();
        let forward = format!("__{}__", name);
        let (op, lit_op) = (forward.clone(), forward.clone());
        self.module
            .def_method(
                &class,
                &forward,
                move |l: ExpressionWrapper<V, D>,
                      r: ExpressionWrapper<R, D>|
                      -> Result<Operation<K::Output, D>> { checked::<K, V, R, D>(&op, l, r) },
            )
            .def_method(
                &class,
                &forward,
                move |l: ExpressionWrapper<V, D>, r: R| -> Result<Operation<K::Output, D>> {
                    checked::<K, V, R, D>(&lit_op, l, literal(r))
                },
            );
        self
    }
}

/// Module function `name` applying `K` to an expression.
pub fn def_unary_op<K, A, D>(module: &mut Module, name: &str)
where
    A: Category,
    D: Gradient,
    K: UnaryKernel<A> + 'static,
    K::Output: Category,
{
    module.def(
        name,
        |x: ExpressionWrapper<A, D>| -> Result<Operation<K::Output, D>> {
            Ok(unary::<K, A, D>(x))
        },
    );
}

/// Module function `name` reducing an array expression to a scalar.
pub fn def_reduction<K, A>(module: &mut Module, name: &str)
where
    A: Category + ArrayValue,
    K: UnaryKernel<A, Output = f64> + 'static,
{
    def_unary_op::<K, A, Array2<f64>>(module, name);
}

/// Module function `name` applying `K` to two expressions, or to an
/// expression and a literal on either side.
pub fn def_binary_op<K, L, R, D>(module: &mut Module, name: &str)
where
    L: Category,
    R: Category,
    D: Gradient,
    K: BinaryKernel<L, R> + 'static,
    K::Output: Category,
{
    let (op, lit_r, lit_l) = (name.to_string(), name.to_string(), name.to_string());
    module
        .def(
            name,
            move |l: ExpressionWrapper<L, D>,
                  r: ExpressionWrapper<R, D>|
                  -> Result<Operation<K::Output, D>> { checked::<K, L, R, D>(&op, l, r) },
        )
        .def(
            name,
            move |l: ExpressionWrapper<L, D>, r: R| -> Result<Operation<K::Output, D>> {
                checked::<K, L, R, D>(&lit_r, l, literal(r))
            },
        )
        .def(
            name,
            move |l: L, r: ExpressionWrapper<R, D>| -> Result<Operation<K::Output, D>> {
                checked::<K, L, R, D>(&lit_l, literal(l), r)
            },
        );
}

type FunctionRef = Rc<RefCell<Function>>;

fn function(targets: VariableSet, sources: VariableSet) -> Result<Function> {
    Function::new(&targets.as_dyn(), &sources.as_dyn())
}

/// Installs the `Variable` base class and the `Function` class.
pub fn def_core(module: &mut Module) {
    module.add_class(
        "Variable",
        &[],
        "Base class of all variables, whatever their category.",
    );
    module.add_class(
        "Function",
        &[],
        "Evaluates and differentiates targets with respect to the sources of the \
         subgraph bounded by `sources`. Construction fails if `targets` is empty. \
         After assigning a new expression to a variable inside the subgraph, \
         `compile()` must be called again; passes on the old program fail.",
    );

    module
        .def("Function", |targets: VariableSet| -> Result<Function> {
            function(targets, VariableSet(Vec::new()))
        })
        .def(
            "Function",
            |targets: VariableSet, sources: VariableSet| -> Result<Function> {
                function(targets, sources)
            },
        );

    module
        .def_method("Function", "compile", |f: FunctionRef| -> Result<()> {
            f.borrow_mut().compile()
        })
        .def_method("Function", "compiled", |f: FunctionRef| -> Result<bool> {
            Ok(f.borrow().compiled())
        })
        .def_method("Function", "evaluate", |f: FunctionRef| -> Result<()> {
            f.borrow_mut().evaluate()
        })
        .def_method("Function", "push_tangent", |f: FunctionRef| -> Result<()> {
            f.borrow_mut().push_tangent()
        })
        .def_method(
            "Function",
            "push_tangent_at",
            |f: FunctionRef, seed: AnyVariable| -> Result<()> {
                f.borrow_mut().push_tangent_at(&seed)
            },
        )
        .def_method("Function", "pull_gradient", |f: FunctionRef| -> Result<()> {
            f.borrow_mut().pull_gradient()
        })
        .def_method(
            "Function",
            "pull_gradient_at",
            |f: FunctionRef, seed: AnyVariable| -> Result<()> {
                f.borrow_mut().pull_gradient_at(&seed)
            },
        )
        .def_method("Function", "__str__", |f: FunctionRef| -> Result<String> {
            Ok(f.borrow().to_string())
        });

    module
        .set_doc("Function.compile", "Builds the evaluation program. Fails on a cyclic dependency.")
        .set_doc("Function.compiled", "Whether a program exists and matches the graph.")
        .set_doc(
            "Function.evaluate",
            "Evaluates the targets from the current values of the sources, \
             compiling first if needed.",
        )
        .set_doc(
            "Function.push_tangent",
            "Forward mode: propagates the tangents of the sources to every variable \
             of the program.",
        )
        .set_doc(
            "Function.push_tangent_at",
            "Forward mode with the seed's tangent set to the identity and the other \
             sources' to zero.",
        )
        .set_doc(
            "Function.pull_gradient",
            "Reverse mode: propagates the gradients of the targets to every variable \
             of the program.",
        )
        .set_doc(
            "Function.pull_gradient_at",
            "Reverse mode with the seed's gradient set to the identity and the other \
             targets' to zero.",
        );
}
