use approx::assert_relative_eq;
use autodiff::graph::Graph;
use autodiff::prelude::*;
use ndarray::{array, Array1, Array2};

type Scalar = Variable<f64, f64>;
type Vector = Variable<Array1<f64>, Array2<f64>>;
type Matrix = Variable<Array2<f64>, Array2<f64>>;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn scalar_chain_gradient() {
    init();
    let x: Scalar = var(1.5);
    let y: Scalar = var(-2.0);
    let z = var(&x * &y);
    assert_eq!(z.value(), -3.0);

    let mut f = Function::new(&[&z], &[]).unwrap();
    f.pull_gradient_at(&z).unwrap();
    assert_eq!(d(&z), 1.0);
    assert_eq!(d(&x), -2.0);
    assert_eq!(d(&y), 1.5);
}

#[test]
fn elementwise_product_gradient_from_seeded_target() {
    init();
    let x: Vector = var(array![1.0, 2.0, 3.0]);
    let y: Vector = var(array![4.0, 5.0, 6.0]);
    let z = var(&x * &y);

    let mut f = Function::new(&[&z], &[]).unwrap();
    z.set_derivative(Array2::ones((1, 3)));
    f.pull_gradient().unwrap();
    assert_eq!(d(&x), array![[4.0, 5.0, 6.0]]);
    assert_eq!(d(&y), array![[1.0, 2.0, 3.0]]);
}

#[test]
fn directional_derivative_through_matrix_product() {
    init();
    let x: Vector = var(array![1.0, 2.0, 3.0]);
    let m = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
    let y = var(matmul(m, &x));
    assert_eq!(y.value(), array![14.0, 32.0]);

    let mut f = Function::new(&[&y], &[&x]).unwrap();
    x.set_derivative(Array2::ones((3, 1)));
    f.push_tangent().unwrap();
    assert_eq!(d(&y), array![[6.0], [15.0]]);
}

#[test]
fn matrix_jacobians_flatten_column_major() {
    init();
    let x: Matrix = var(array![[1.0, 2.0], [3.0, 4.0]]);
    let y: Matrix = var(array![[5.0, 6.0, 7.0], [8.0, 9.0, 10.0]]);
    let u = var(matmul(&x, &y));

    let mut f = Function::new(&[&u], &[]).unwrap();
    f.pull_gradient_at(&u).unwrap();
    assert_eq!(d(&u), Array2::<f64>::eye(6));
    assert_eq!(d(&x).dim(), (6, 4));
    assert_eq!(d(&y).dim(), (6, 6));
    // d u[0,0] / d x[0,1] = y[1,0]; x[0,1] is element 2 column-major.
    assert_eq!(d(&x)[[0, 2]], 8.0);
}

#[test]
fn elementwise_jacobians_follow_column_major_order() {
    init();
    let x: Matrix = var(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let z = var(&x * &x);
    let y = var(matmul(&z, array![1.0, 0.0, -1.0]));

    let mut f = Function::new(&[&z], &[]).unwrap();
    f.pull_gradient_at(&z).unwrap();
    assert_eq!(d(&x), Array2::from_diag(&array![2.0, 8.0, 4.0, 10.0, 6.0, 12.0]));

    // y[i] = x[i,0]^2 - x[i,2]^2; x[i,j] is element i + 2 j.
    let mut g = Function::new(&[&y], &[]).unwrap();
    g.pull_gradient_at(&y).unwrap();
    assert_eq!(
        d(&x),
        array![
            [2.0, 0.0, 0.0, 0.0, -6.0, 0.0],
            [0.0, 8.0, 0.0, 0.0, 0.0, -12.0]
        ]
    );
}

#[test]
fn broadcast_jacobians_follow_column_major_order() {
    init();
    let x: Matrix = var(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let s: Variable<f64, Array2<f64>> = var(2.0);
    let w = var(&x * &s);

    let mut f = Function::new(&[&w], &[]).unwrap();
    f.pull_gradient_at(&w).unwrap();
    assert_eq!(d(&x), Array2::<f64>::eye(6) * 2.0);
    assert_eq!(d(&s), array![[1.0], [4.0], [2.0], [5.0], [3.0], [6.0]]);

    f.push_tangent_at(&s).unwrap();
    assert_eq!(d(&w), array![[1.0], [4.0], [2.0], [5.0], [3.0], [6.0]]);
}

#[test]
fn repeated_pulls_start_from_the_same_seeds() {
    init();
    let x: Scalar = var(1.0);
    let y = var(&x * 2.0);
    let z = var(&y * 2.0);
    let mut f = Function::new(&[&y, &z], &[]).unwrap();

    y.set_derivative(1.0);
    z.set_derivative(1.0);
    for _ in 0..2 {
        f.pull_gradient().unwrap();
        assert_eq!(d(&y), 3.0);
        assert_eq!(d(&x), 6.0);
    }

    y.set_derivative(0.0);
    f.pull_gradient().unwrap();
    assert_eq!(d(&y), 2.0);
    assert_eq!(d(&x), 4.0);
}

#[test]
fn forward_and_reverse_agree_on_scalars() {
    init();
    let x: Scalar = var(0.7);
    let z = var(sin(&x) * &x + exp(&x));
    let expected = 0.7f64.cos() * 0.7 + 0.7f64.sin() + 0.7f64.exp();

    let mut f = Function::new(&[&z], &[&x]).unwrap();
    f.push_tangent_at(&x).unwrap();
    let forward = d(&z);
    f.pull_gradient_at(&z).unwrap();
    let reverse = d(&x);

    assert_relative_eq!(forward, expected, epsilon = 1e-12);
    assert_relative_eq!(reverse, forward, epsilon = 1e-12);
}

#[test]
fn forward_and_reverse_agree_on_reductions() {
    init();
    let x: Vector = var(array![1.0, -2.0, 0.5]);
    let s = var(sum(&x * &x) + norm(&x));
    let n = 5.25f64.sqrt();
    let gradient = array![[2.0 + 1.0 / n, -4.0 - 2.0 / n, 1.0 + 0.5 / n]];

    let mut f = Function::new(&[&s], &[]).unwrap();
    f.pull_gradient_at(&s).unwrap();
    assert_relative_eq!(d(&x), gradient, epsilon = 1e-12);

    f.push_tangent_at(&x).unwrap();
    assert_relative_eq!(d(&s), gradient, epsilon = 1e-12);
}

#[test]
fn evaluate_is_idempotent_and_tracks_sources() {
    init();
    let x: Vector = var(array![0.0, 1.0]);
    let s: Variable<f64, Array2<f64>> = var(3.0);
    let y = var(exp(&x) * &s - 1.0);
    let mut f = Function::new(&[&y], &[]).unwrap();

    f.evaluate().unwrap();
    let first = y.value();
    f.evaluate().unwrap();
    assert_eq!(y.value(), first);

    s.set(1.0);
    f.evaluate().unwrap();
    assert_relative_eq!(y.value(), array![0.0, 1f64.exp() - 1.0], epsilon = 1e-12);
}

#[test]
fn construction_and_seed_errors() {
    init();
    assert_eq!(Function::new(&[], &[]).err(), Some(ADError::NoTargets));

    let x: Scalar = var(1.0);
    let y: Scalar = var(2.0);
    let z = var(&x + &y);
    let mut f = Function::new(&[&z], &[&x]).unwrap();
    assert_eq!(f.push_tangent_at(&z).err(), Some(ADError::NotASource));
    assert_eq!(f.pull_gradient_at(&x).err(), Some(ADError::NotATarget));
    // y has no expression, so it is a source even outside the bound.
    assert!(f.push_tangent_at(&y).is_ok());
    assert_eq!(d(&z), 1.0);
}

#[test]
fn self_reference_fails_to_compile() {
    init();
    let x: Scalar = var(1.0);
    x.set(&x + 1.0);
    assert_eq!(x.value(), 2.0);
    let mut f = Function::new(&[&x], &[]).unwrap();
    assert_eq!(f.compile().err(), Some(ADError::CyclicDependency));
    assert_eq!(f.pull_gradient_at(&x).err(), Some(ADError::CyclicDependency));
}

#[test]
fn reassignment_requires_recompilation() {
    init();
    let x: Scalar = var(2.0);
    let y = var(&x * 3.0);
    let z = var(&y + 1.0);
    let mut f = Function::new(&[&z], &[]).unwrap();
    f.push_tangent_at(&x).unwrap();
    assert_eq!(d(&z), 3.0);

    y.set(&x * &x);
    assert!(!f.compiled());
    assert_eq!(f.push_tangent_at(&x).err(), Some(ADError::StalePlan));

    f.compile().unwrap();
    f.push_tangent_at(&x).unwrap();
    assert_eq!(d(&z), 4.0);
}

#[test]
fn dropping_variables_frees_their_nodes() {
    init();
    let before = Graph::live_nodes();
    {
        let x: Scalar = var(1.0);
        let z = var(&x * 2.0);
        let _f = Function::new(&[&z], &[]).unwrap();
        assert_eq!(Graph::live_nodes(), before + 2);
    }
    assert_eq!(Graph::live_nodes(), before);
}
