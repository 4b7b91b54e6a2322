//! Differentiation of scalar, vector and matrix programs, with Jacobian
//! derivatives.
//!
//! Matrix values are flattened column-major when differentiated, so every
//! derivative is a matrix: a target of size `m` and a source of size `n`
//! give an `m x n` gradient in reverse mode.

use ndarray::{Array1, Array2};

use crate::binding::{def_binary_op, def_core, def_reduction, def_unary_op, ExpressionBinding};
use crate::expression::{
    AddOp, Broadcast, BroadcastLeft, CosOp, Cwise, DivOp, Dot, ExpOp, LogOp, Map, Matmul,
    MaximumOp, Mean, MinimumOp, MulOp, NegOp, Norm, Outer, PowOp, SinOp, SqrtOp, SquareOp,
    SquaredNorm, SubOp, Sum,
};
use crate::host::{Category, Module};
use crate::value::ArrayValue;

type Jacobian = Array2<f64>;

pub type ScalarVariable = crate::variable::Variable<f64, Jacobian>;
pub type VectorVariable = crate::variable::Variable<Array1<f64>, Jacobian>;
pub type MatrixVariable = crate::variable::Variable<Array2<f64>, Jacobian>;
pub type ScalarOperation = crate::operation::Operation<f64, Jacobian>;
pub type VectorOperation = crate::operation::Operation<Array1<f64>, Jacobian>;
pub type MatrixOperation = crate::operation::Operation<Array2<f64>, Jacobian>;

const DOC: &str = "Automatic differentiation of scalar, vector and matrix computations. \
Binary operations accept a literal for either operand, and scalars broadcast into \
array operations. One-dimensional and N x 1 arrays are vectors; 1 x N arrays are matrices.";

fn def_arithmetic<V: Category>(binding: &mut ExpressionBinding<'_, V, Jacobian>) {
    binding
        .def_sym_infix_op::<Cwise<AddOp>>("add")
        .def_sym_infix_op::<Cwise<SubOp>>("sub")
        .def_sym_infix_op::<Cwise<MulOp>>("mul")
        .def_sym_infix_op::<Cwise<DivOp>>("truediv")
        .def_sym_infix_op::<Cwise<PowOp>>("pow")
        .def_method::<Map<NegOp>>("neg");
}

// Reflected `pow` is left out: a scalar raised to an array has no binding.
fn def_broadcasts<V: Category + ArrayValue>(binding: &mut ExpressionBinding<'_, V, Jacobian>) {
    binding
        .def_broadcast_infix_op::<Broadcast<AddOp>>("add")
        .def_broadcast_infix_op::<Broadcast<SubOp>>("sub")
        .def_broadcast_infix_op::<Broadcast<MulOp>>("mul")
        .def_broadcast_infix_op::<Broadcast<DivOp>>("truediv")
        .def_broadcast_infix_op::<Broadcast<PowOp>>("pow")
        .def_r_broadcast_infix_op::<BroadcastLeft<AddOp>>("add")
        .def_r_broadcast_infix_op::<BroadcastLeft<SubOp>>("sub")
        .def_r_broadcast_infix_op::<BroadcastLeft<MulOp>>("mul")
        .def_r_broadcast_infix_op::<BroadcastLeft<DivOp>>("truediv");
}

fn def_functions<V: Category>(module: &mut Module) {
    def_unary_op::<Map<CosOp>, V, Jacobian>(module, "cos");
    def_unary_op::<Map<ExpOp>, V, Jacobian>(module, "exp");
    def_unary_op::<Map<LogOp>, V, Jacobian>(module, "log");
    def_unary_op::<Map<MaximumOp>, V, Jacobian>(module, "maximum");
    def_unary_op::<Map<MinimumOp>, V, Jacobian>(module, "minimum");
    def_unary_op::<Map<SinOp>, V, Jacobian>(module, "sin");
    def_unary_op::<Map<SqrtOp>, V, Jacobian>(module, "sqrt");
    def_unary_op::<Map<SquareOp>, V, Jacobian>(module, "square");
}

fn def_reductions<V: Category + ArrayValue>(module: &mut Module) {
    def_reduction::<Mean, V>(module, "mean");
    def_reduction::<Norm, V>(module, "norm");
    def_reduction::<SquaredNorm, V>(module, "squared_norm");
    def_reduction::<Sum, V>(module, "sum");
}

/// Builds the `array` host module.
pub fn module() -> Module {
    let mut module = Module::new("array", DOC);
    def_core(&mut module);

    def_arithmetic(&mut ExpressionBinding::<f64, Jacobian>::new(&mut module));
    def_functions::<f64>(&mut module);

    {
        let mut vector = ExpressionBinding::<Array1<f64>, Jacobian>::new(&mut module);
        def_arithmetic(&mut vector);
        def_broadcasts(&mut vector);
    }
    def_functions::<Array1<f64>>(&mut module);

    {
        let mut matrix = ExpressionBinding::<Array2<f64>, Jacobian>::new(&mut module);
        def_arithmetic(&mut matrix);
        def_broadcasts(&mut matrix);
        matrix
            .def_infix_op::<Array1<f64>, Matmul>("matmul")
            .def_infix_op::<Array2<f64>, Matmul>("matmul");
    }
    def_functions::<Array2<f64>>(&mut module);

    def_binary_op::<Dot, Array1<f64>, Array1<f64>, Jacobian>(&mut module, "dot");
    def_binary_op::<Outer, Array1<f64>, Array1<f64>, Jacobian>(&mut module, "outer");
    def_binary_op::<Matmul, Array2<f64>, Array1<f64>, Jacobian>(&mut module, "matmul");
    def_binary_op::<Matmul, Array2<f64>, Array2<f64>, Jacobian>(&mut module, "matmul");

    def_reductions::<Array1<f64>>(&mut module);
    def_reductions::<Array2<f64>>(&mut module);

    module
        .set_doc("cos", "Cosine, element-wise.")
        .set_doc("exp", "Exponential, element-wise.")
        .set_doc("log", "Natural logarithm, element-wise.")
        .set_doc("maximum", "Element-wise maximum of the elements and zero.")
        .set_doc("minimum", "Element-wise minimum of the elements and zero.")
        .set_doc("sin", "Sine, element-wise.")
        .set_doc("sqrt", "Square root, element-wise.")
        .set_doc("square", "Square, element-wise.")
        .set_doc("dot", "Dot product of two vectors.")
        .set_doc("outer", "Outer product of two vectors.")
        .set_doc("matmul", "Matrix-vector or matrix-matrix product.")
        .set_doc("mean", "Arithmetic mean of the elements.")
        .set_doc("norm", "L2 norm of a vector, Frobenius norm of a matrix.")
        .set_doc(
            "squared_norm",
            "Square of `norm`, the dot product of the array with itself.",
        )
        .set_doc("sum", "Sum of the elements.");
    module
}
