use approx::assert_relative_eq;
use autodiff::array;
use autodiff::errors::ADError;
use autodiff::host::{Module, Object};
use ndarray::{array, Array, Array2, ArrayD, Ix2};
use rstest::rstest;

fn init() -> Module {
    let _ = env_logger::builder().is_test(true).try_init();
    array::module()
}

fn ones(shape: &[usize]) -> Object {
    Object::Array(ArrayD::ones(shape))
}

fn matrix(object: Object) -> Array2<f64> {
    object
        .as_array()
        .unwrap()
        .clone()
        .into_dimensionality::<Ix2>()
        .unwrap()
}

fn class_of(m: &Module, value: Object) -> String {
    m.call("var", &[value]).unwrap().type_name().to_string()
}

#[rstest]
fn column_arrays_are_vectors(#[values(1, 2, 3, 8)] n: usize) {
    let m = init();
    assert_eq!(class_of(&m, ones(&[n, 1])), "VectorVariable");
    assert_eq!(class_of(&m, ones(&[n])), "VectorVariable");
}

#[rstest]
fn row_arrays_are_matrices(#[values(2, 3, 8)] n: usize) {
    let m = init();
    assert_eq!(class_of(&m, ones(&[1, n])), "MatrixVariable");
    assert_eq!(class_of(&m, ones(&[n, 2])), "MatrixVariable");
}

#[rstest]
#[case(&[3, 1], "VectorVariable", &[2])]
#[case(&[3, 2], "MatrixVariable", &[2, 2])]
fn matmul_binds_by_right_operand_shape(
    #[case] rhs: &[usize],
    #[case] class: &str,
    #[case] result: &[usize],
) {
    let m = init();
    let a = m.call("var", &[ones(&[2, 3])]).unwrap();
    let x = m.call("var", &[ones(rhs)]).unwrap();
    let y = m.call("var", &[m.binary_op("matmul", &a, &x).unwrap()]).unwrap();
    assert_eq!(y.type_name(), class);
    let value = m.call_instance(&y, &[]).unwrap();
    assert_eq!(value.as_array().unwrap().shape(), result);
}

#[test]
fn elementwise_gradient_from_seeded_target() {
    let m = init();
    let x = m.call("var", &[array![1.0, 2.0, 3.0].into()]).unwrap();
    let y = m.call("var", &[array![4.0, 5.0, 6.0].into()]).unwrap();
    let z = m.call("var", &[m.binary_op("mul", &x, &y).unwrap()]).unwrap();
    let f = m.call("Function", &[z.clone()]).unwrap();

    m.call_method(&z, "set_derivative", &[ones(&[1, 3])]).unwrap();
    m.call_method(&f, "pull_gradient", &[]).unwrap();
    assert_eq!(matrix(m.call("d", &[x]).unwrap()), array![[4.0, 5.0, 6.0]]);
    assert_eq!(matrix(m.call("d", &[y]).unwrap()), array![[1.0, 2.0, 3.0]]);
}

#[test]
fn directional_derivative_of_matrix_vector_product() {
    let m = init();
    let x = m.call("var", &[array![1.0, 2.0, 3.0].into()]).unwrap();
    let a: Object = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into();
    let y = m
        .call("var", &[m.call("matmul", &[a, x.clone()]).unwrap()])
        .unwrap();
    let f = m.call("Function", &[y.clone(), x.clone()]).unwrap();

    m.call_method(&x, "set_derivative", &[array![1.0, 1.0, 1.0].into()])
        .unwrap();
    m.call_method(&f, "push_tangent", &[]).unwrap();
    assert_eq!(matrix(m.call("d", &[y]).unwrap()), array![[6.0], [15.0]]);
}

#[test]
fn matrix_product_jacobian_shapes() {
    let m = init();
    let x = m
        .call("var", &[array![[1.0, 2.0], [3.0, 4.0]].into()])
        .unwrap();
    let y = m
        .call("var", &[array![[5.0, 6.0, 7.0], [8.0, 9.0, 10.0]].into()])
        .unwrap();
    let u = m.call("var", &[m.binary_op("matmul", &x, &y).unwrap()]).unwrap();
    let f = m.call("Function", &[u.clone()]).unwrap();
    m.call_method(&f, "pull_gradient_at", &[u.clone()]).unwrap();

    assert_eq!(matrix(m.call("d", &[u]).unwrap()), Array2::<f64>::eye(6));
    assert_eq!(matrix(m.call("d", &[x]).unwrap()).dim(), (6, 4));
    assert_eq!(matrix(m.call("d", &[y]).unwrap()).dim(), (6, 6));
}

#[test]
fn scalar_expressions_broadcast_from_either_side() {
    let m = init();
    let x = m.call("var", &[array![1.0, 2.0].into()]).unwrap();
    let s = m.call("var", &[3.0.into()]).unwrap();
    let left = m.binary_op("sub", &s, &x).unwrap();
    let right = m.binary_op("truediv", &x, &s).unwrap();
    let z = m
        .call("var", &[m.call("dot", &[left, right]).unwrap()])
        .unwrap();
    // (3 - x) . (x / 3) = (2 * 1 + 1 * 2) / 3
    assert_relative_eq!(m.call_instance(&z, &[]).unwrap().as_float().unwrap(), 4.0 / 3.0);

    let f = m
        .call("Function", &[z.clone(), Object::Tuple(vec![x.clone(), s.clone()])])
        .unwrap();
    m.call_method(&f, "pull_gradient_at", &[z.clone()]).unwrap();
    // d/dx_i = (3 - 2 x_i) / 3, d/ds = sum(x_i^2) / s^2
    assert_relative_eq!(
        matrix(m.call("d", &[x]).unwrap()),
        array![[1.0 / 3.0, -1.0 / 3.0]],
        epsilon = 1e-12
    );
    assert_relative_eq!(
        matrix(m.call("d", &[s]).unwrap()),
        array![[5.0 / 9.0]],
        epsilon = 1e-12
    );
}

#[test]
fn reductions_and_outer_products() {
    let m = init();
    let x = m.call("var", &[array![3.0, 4.0].into()]).unwrap();
    let norm = m.call("var", &[m.call("norm", &[x.clone()]).unwrap()]).unwrap();
    assert_eq!(m.call_instance(&norm, &[]).unwrap(), Object::Float(5.0));

    let o = m
        .call("var", &[m.call("outer", &[x.clone(), array![1.0, 0.5, 2.0].into()]).unwrap()])
        .unwrap();
    assert_eq!(o.type_name(), "MatrixVariable");
    let total = m.call("var", &[m.call("sum", &[o.clone()]).unwrap()]).unwrap();
    assert_eq!(m.call_instance(&total, &[]).unwrap(), Object::Float(24.5));

    let f = m.call("Function", &[Object::Tuple(vec![norm.clone(), total.clone()])]).unwrap();
    m.call_method(&f, "pull_gradient_at", &[total.clone()]).unwrap();
    assert_eq!(matrix(m.call("d", &[x.clone()]).unwrap()), array![[3.5, 3.5]]);
    m.call_method(&f, "pull_gradient_at", &[norm.clone()]).unwrap();
    assert_eq!(matrix(m.call("d", &[x]).unwrap()), array![[0.6, 0.8]]);
    assert_eq!(matrix(m.call("d", &[total]).unwrap()), array![[0.0]]);
}

#[test]
fn unary_functions_resolve_per_category() {
    let m = init();
    let s = m.call("var", &[0.0.into()]).unwrap();
    let v = m.call("var", &[array![0.0, 1.0].into()]).unwrap();
    let a = m.call("var", &[Object::Array(Array::zeros(vec![2, 2]))]).unwrap();
    for (x, kind) in [(s, "ScalarOperation"), (v, "VectorOperation"), (a, "MatrixOperation")] {
        for name in ["sin", "cos", "exp", "sqrt", "square", "maximum", "minimum"] {
            assert_eq!(m.call(name, &[x.clone()]).unwrap().type_name(), kind);
        }
        assert_eq!(m.unary_op("neg", &x).unwrap().type_name(), kind);
    }
}

fn mismatch(op: &str, lhs: &[usize], rhs: &[usize]) -> Option<ADError> {
    Some(ADError::ShapeMismatch {
        op: op.to_string(),
        lhs: lhs.to_vec(),
        rhs: rhs.to_vec(),
    })
}

#[test]
fn mismatched_shapes_are_errors() {
    let m = init();
    let x = m.call("var", &[array![1.0, 2.0, 3.0].into()]).unwrap();
    let short: Object = array![1.0, 2.0].into();
    assert_eq!(m.binary_op("add", &x, &short).err(), mismatch("__add__", &[3], &[2]));
    assert_eq!(m.binary_op("sub", &short, &x).err(), mismatch("__rsub__", &[2], &[3]));

    let y = m.call("var", &[short]).unwrap();
    assert_eq!(m.call("dot", &[x.clone(), y.clone()]).err(), mismatch("dot", &[3], &[2]));

    let a = m.call("var", &[ones(&[2, 3])]).unwrap();
    let b = m.call("var", &[ones(&[3, 2])]).unwrap();
    assert_eq!(m.binary_op("mul", &a, &b).err(), mismatch("__mul__", &[2, 3], &[3, 2]));
    assert_eq!(m.binary_op("matmul", &a, &y).err(), mismatch("__matmul__", &[2, 3], &[2]));
    assert_eq!(
        m.call("matmul", &[a.clone(), a.clone()]).err(),
        mismatch("matmul", &[2, 3], &[2, 3])
    );

    let product = m.binary_op("matmul", &a, &b).unwrap();
    assert_eq!(product.type_name(), "MatrixOperation");
    assert_eq!(m.call("dot", &[x.clone(), x]).unwrap().type_name(), "ScalarOperation");
}

#[test]
fn var_without_a_value_is_a_zero_scalar() {
    let m = init();
    let x = m.call("var", &[]).unwrap();
    assert_eq!(x.type_name(), "ScalarVariable");
    assert_eq!(m.call_instance(&x, &[]).unwrap(), Object::Float(0.0));
}
