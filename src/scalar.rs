//! Differentiation of scalar programs, with scalar derivatives.

use crate::binding::{def_core, def_unary_op, ExpressionBinding};
use crate::expression::{
    AddOp, CosOp, Cwise, DivOp, ExpOp, LogOp, Map, MaximumOp, MinimumOp, MulOp, NegOp, PowOp,
    SinOp, SqrtOp, SquareOp, SubOp,
};
use crate::host::Module;

pub type Variable = crate::variable::Variable<f64, f64>;
pub type Operation = crate::operation::Operation<f64, f64>;

const DOC: &str = "Automatic differentiation of scalar computations. \
Binary operations accept a float literal for either operand.";

/// Builds the `scalar` host module.
pub fn module() -> Module {
    let mut module = Module::new("scalar", DOC);
    def_core(&mut module);

    ExpressionBinding::<f64, f64>::new(&mut module)
        .def_sym_infix_op::<Cwise<AddOp>>("add")
        .def_sym_infix_op::<Cwise<SubOp>>("sub")
        .def_sym_infix_op::<Cwise<MulOp>>("mul")
        .def_sym_infix_op::<Cwise<DivOp>>("truediv")
        .def_sym_infix_op::<Cwise<PowOp>>("pow")
        .def_method::<Map<NegOp>>("neg");

    def_unary_op::<Map<CosOp>, f64, f64>(&mut module, "cos");
    def_unary_op::<Map<ExpOp>, f64, f64>(&mut module, "exp");
    def_unary_op::<Map<LogOp>, f64, f64>(&mut module, "log");
    def_unary_op::<Map<MaximumOp>, f64, f64>(&mut module, "maximum");
    def_unary_op::<Map<MinimumOp>, f64, f64>(&mut module, "minimum");
    def_unary_op::<Map<SinOp>, f64, f64>(&mut module, "sin");
    def_unary_op::<Map<SqrtOp>, f64, f64>(&mut module, "sqrt");
    def_unary_op::<Map<SquareOp>, f64, f64>(&mut module, "square");

    module
        .set_doc("cos", "Cosine.")
        .set_doc("exp", "Exponential.")
        .set_doc("log", "Natural logarithm.")
        .set_doc("maximum", "Maximum of a scalar and zero.")
        .set_doc("minimum", "Minimum of a scalar and zero.")
        .set_doc("sin", "Sine.")
        .set_doc("sqrt", "Square root.")
        .set_doc("square", "Square.");
    module
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Object;

    #[test]
    fn module_defines_scalar_surface() {
        let m = module();
        let classes = [
            "Function",
            "Variable",
            "ScalarExpression",
            "ScalarOperation",
            "ScalarVariable",
        ];
        for class in classes {
            assert!(m.has_class(class), "{class}");
        }
        for function in ["var", "d", "Function", "sin", "square", "maximum"] {
            assert!(m.has_function(function), "{function}");
        }
        assert!(!m.has_function("sum"));
        assert!(m.isinstance(&m.call("var", &[2.0.into()]).unwrap(), "Variable"));
    }

    #[test]
    fn literals_combine_from_either_side() {
        let m = module();
        let x = m.call("var", &[Object::Float(3.0)]).unwrap();
        let y = m.call("var", &[m.binary_op("sub", &1.0.into(), &x).unwrap()]).unwrap();
        assert_eq!(m.call_instance(&y, &[]).unwrap(), Object::Float(-2.0));
        let z = m.call("var", &[m.binary_op("pow", &x, &2.0.into()).unwrap()]).unwrap();
        assert_eq!(m.call_instance(&z, &[]).unwrap(), Object::Float(9.0));
        let w = m.call("var", &[m.unary_op("neg", &x).unwrap()]).unwrap();
        assert_eq!(m.call_instance(&w, &[]).unwrap(), Object::Float(-3.0));
    }
}
