//! Statically typed expressions.
//!
//! Every operator produces a distinct expression type: `Binary<L, R, K>` and
//! `Unary<A, K>` are parameterized by the kernel that computes the value and
//! the local Jacobians. Scalar kernels (`BinOp`, `UnOp`) are lifted to the
//! array categories by `Cwise`, `Broadcast`, `BroadcastLeft` and `Map`.

use std::marker::PhantomData;
use std::rc::Rc;

use ndarray::{Array1, Array2};

use crate::node::NodeId;
use crate::value::{ArrayValue, Derivative, Elementwise, Jacobian, Value};

/// A forward-mode derivative. `None` is a structural zero.
pub type Tangent<D> = Option<Rc<D>>;

/// The generic expression contract driven by variables and functions.
pub trait Expr {
    type Value: Value;
    type Derivative: Derivative;

    /// Computes the value from the children's current values.
    fn value(&self) -> Rc<Self::Value>;
    /// Propagates the children's tangents through this expression.
    fn push_forward(&self) -> Tangent<Self::Derivative>;
    /// Accumulates `derivative * J` into every non-constant child.
    fn pull_back(&self, derivative: &Self::Derivative);
    /// Records every variable read by this expression as a child of `node`.
    fn transfer_children_to(&self, node: NodeId);
    /// Drops any value or derivative cached below this expression.
    fn release_cache(&self);
    /// Whether the expression depends on no variable at all.
    fn is_constant(&self) -> bool {
        false
    }
}

/// A binary operation on scalars.
pub trait BinOp {
    /// Evaluates the operator on the input values.
    fn eval(l: f64, r: f64) -> f64;
    /// Computes the derivative with respect to the left operand.
    fn d_left(l: f64, r: f64) -> f64;
    /// Computes the derivative with respect to the right operand.
    fn d_right(l: f64, r: f64) -> f64;
}

#[derive(Clone, Copy, Debug)]
/// Addition.
pub struct AddOp;
impl BinOp for AddOp {
    #[inline]
    fn eval(l: f64, r: f64) -> f64 {
        l + r
    }
    #[inline]
    fn d_left(_: f64, _: f64) -> f64 {
        1.0
    }
    #[inline]
    fn d_right(_: f64, _: f64) -> f64 {
        1.0
    }
}

#[derive(Clone, Copy, Debug)]
/// Subtraction.
pub struct SubOp;
impl BinOp for SubOp {
    #[inline]
    fn eval(l: f64, r: f64) -> f64 {
        l - r
    }
    #[inline]
    fn d_left(_: f64, _: f64) -> f64 {
        1.0
    }
    #[inline]
    fn d_right(_: f64, _: f64) -> f64 {
        -1.0
    }
}

#[derive(Clone, Copy, Debug)]
/// Multiplication.
pub struct MulOp;
impl BinOp for MulOp {
    #[inline]
    fn eval(l: f64, r: f64) -> f64 {
        l * r
    }
    #[inline]
    fn d_left(_: f64, r: f64) -> f64 {
        r
    }
    #[inline]
    fn d_right(l: f64, _: f64) -> f64 {
        l
    }
}

#[derive(Clone, Copy, Debug)]
/// Division.
pub struct DivOp;
impl BinOp for DivOp {
    #[inline]
    fn eval(l: f64, r: f64) -> f64 {
        l / r
    }
    #[inline]
    fn d_left(_: f64, r: f64) -> f64 {
        1.0 / r
    }
    #[inline]
    fn d_right(l: f64, r: f64) -> f64 {
        -l / (r * r)
    }
}

#[derive(Clone, Copy, Debug)]
/// Power, `l ** r`.
pub struct PowOp;
impl BinOp for PowOp {
    #[inline]
    fn eval(l: f64, r: f64) -> f64 {
        l.powf(r)
    }
    #[inline]
    fn d_left(l: f64, r: f64) -> f64 {
        r * l.powf(r - 1.0)
    }
    #[inline]
    fn d_right(l: f64, r: f64) -> f64 {
        l.powf(r) * l.ln()
    }
}

/// A unary operation on scalars.
pub trait UnOp {
    /// Evaluates the operator on the input value.
    fn eval(x: f64) -> f64;
    /// Computes the derivative at `x`, given the value `v = eval(x)`.
    fn deriv(x: f64, v: f64) -> f64;
}

macro_rules! un_op {
    ($name:ident, $doc:expr, $eval:expr, $d:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug)]
        pub struct $name;
        impl UnOp for $name {
            #[inline]
            fn eval(x: f64) -> f64 {
                $eval(x)
            }
            #[inline]
            fn deriv(x: f64, v: f64) -> f64 {
                $d(x, v)
            }
        }
    };
}

un_op!(NegOp, "Negation.", |x: f64| -x, |_, _| -1.0);
un_op!(ExpOp, "Exponential.", f64::exp, |_, v| v);
un_op!(LogOp, "Natural logarithm.", f64::ln, |x, _| 1.0 / x);
un_op!(SqrtOp, "Square root.", f64::sqrt, |_, v| 0.5 / v);
un_op!(SinOp, "Sine.", f64::sin, |x, _| f64::cos(x));
un_op!(CosOp, "Cosine.", f64::cos, |x, _| -f64::sin(x));
un_op!(SquareOp, "Square.", |x: f64| x * x, |x, _| 2.0 * x);
un_op!(
    MinimumOp,
    "Negative part, `min(x, 0)`.",
    |x: f64| x.min(0.0),
    |x, _| if x < 0.0 { 1.0 } else { 0.0 }
);
un_op!(
    MaximumOp,
    "Positive part, `max(x, 0)`.",
    |x: f64| x.max(0.0),
    |x, _| if x > 0.0 { 1.0 } else { 0.0 }
);

/// Value and local Jacobians of a binary operation on `(L, R)`.
pub trait BinaryKernel<L, R> {
    type Output: Value;
    fn eval(lhs: &L, rhs: &R) -> Self::Output;
    fn partial_lhs(lhs: &L, rhs: &R) -> Jacobian;
    fn partial_rhs(lhs: &L, rhs: &R) -> Jacobian;
    /// Whether the operand shapes fit the kernel.
    fn compatible(_lhs: &L, _rhs: &R) -> bool {
        true
    }
}

/// Value and local Jacobian of a unary operation on `A`.
pub trait UnaryKernel<A> {
    type Output: Value;
    fn eval(arg: &A) -> Self::Output;
    /// Jacobian at `arg`, where `out == eval(arg)`.
    fn partial(arg: &A, out: &Self::Output) -> Jacobian;
}

/// Element-wise `O` between two values of one category.
#[derive(Clone, Copy, Debug)]
pub struct Cwise<O>(PhantomData<O>);

impl<V: Elementwise, O: BinOp> BinaryKernel<V, V> for Cwise<O> {
    type Output = V;
    fn eval(lhs: &V, rhs: &V) -> V {
        lhs.zip_map(rhs, O::eval)
    }
    fn partial_lhs(lhs: &V, rhs: &V) -> Jacobian {
        lhs.zip_map(rhs, O::d_left).into_jacobian()
    }
    fn partial_rhs(lhs: &V, rhs: &V) -> Jacobian {
        lhs.zip_map(rhs, O::d_right).into_jacobian()
    }
    fn compatible(lhs: &V, rhs: &V) -> bool {
        lhs.dims() == rhs.dims()
    }
}

/// `O` between every element of an array and a scalar on the right.
#[derive(Clone, Copy, Debug)]
pub struct Broadcast<O>(PhantomData<O>);

impl<V: ArrayValue, O: BinOp> BinaryKernel<V, f64> for Broadcast<O> {
    type Output = V;
    fn eval(lhs: &V, rhs: &f64) -> V {
        lhs.map(|a| O::eval(a, *rhs))
    }
    fn partial_lhs(lhs: &V, rhs: &f64) -> Jacobian {
        lhs.map(|a| O::d_left(a, *rhs)).into_jacobian()
    }
    fn partial_rhs(lhs: &V, rhs: &f64) -> Jacobian {
        Jacobian::Column(lhs.map(|a| O::d_right(a, *rhs)).flatten())
    }
}

/// `O` between a scalar on the left and every element of an array.
#[derive(Clone, Copy, Debug)]
pub struct BroadcastLeft<O>(PhantomData<O>);

impl<V: ArrayValue, O: BinOp> BinaryKernel<f64, V> for BroadcastLeft<O> {
    type Output = V;
    fn eval(lhs: &f64, rhs: &V) -> V {
        rhs.map(|b| O::eval(*lhs, b))
    }
    fn partial_lhs(lhs: &f64, rhs: &V) -> Jacobian {
        Jacobian::Column(rhs.map(|b| O::d_left(*lhs, b)).flatten())
    }
    fn partial_rhs(lhs: &f64, rhs: &V) -> Jacobian {
        rhs.map(|b| O::d_right(*lhs, b)).into_jacobian()
    }
}

/// Element-wise `O`.
#[derive(Clone, Copy, Debug)]
pub struct Map<O>(PhantomData<O>);

impl<V: Elementwise, O: UnOp> UnaryKernel<V> for Map<O> {
    type Output = V;
    fn eval(arg: &V) -> V {
        arg.map(O::eval)
    }
    fn partial(arg: &V, out: &V) -> Jacobian {
        arg.zip_map(out, O::deriv).into_jacobian()
    }
}

/// Inner product of two vectors.
#[derive(Clone, Copy, Debug)]
pub struct Dot;

impl BinaryKernel<Array1<f64>, Array1<f64>> for Dot {
    type Output = f64;
    fn eval(lhs: &Array1<f64>, rhs: &Array1<f64>) -> f64 {
        lhs.dot(rhs)
    }
    fn partial_lhs(_: &Array1<f64>, rhs: &Array1<f64>) -> Jacobian {
        Jacobian::Row(rhs.clone())
    }
    fn partial_rhs(lhs: &Array1<f64>, _: &Array1<f64>) -> Jacobian {
        Jacobian::Row(lhs.clone())
    }
    fn compatible(lhs: &Array1<f64>, rhs: &Array1<f64>) -> bool {
        lhs.len() == rhs.len()
    }
}

/// Outer product `u v^T` of two vectors.
#[derive(Clone, Copy, Debug)]
pub struct Outer;

impl BinaryKernel<Array1<f64>, Array1<f64>> for Outer {
    type Output = Array2<f64>;
    fn eval(lhs: &Array1<f64>, rhs: &Array1<f64>) -> Array2<f64> {
        Array2::from_shape_fn((lhs.len(), rhs.len()), |(a, b)| lhs[a] * rhs[b])
    }
    fn partial_lhs(lhs: &Array1<f64>, rhs: &Array1<f64>) -> Jacobian {
        let n = lhs.len();
        let mut j = Array2::zeros((n * rhs.len(), n));
        for (b, &v) in rhs.iter().enumerate() {
            for a in 0..n {
                j[[a + n * b, a]] = v;
            }
        }
        Jacobian::Dense(j)
    }
    fn partial_rhs(lhs: &Array1<f64>, rhs: &Array1<f64>) -> Jacobian {
        let n = lhs.len();
        let mut j = Array2::zeros((n * rhs.len(), rhs.len()));
        for b in 0..rhs.len() {
            for (a, &u) in lhs.iter().enumerate() {
                j[[a + n * b, b]] = u;
            }
        }
        Jacobian::Dense(j)
    }
}

/// Matrix product, with a vector or a matrix on the right.
#[derive(Clone, Copy, Debug)]
pub struct Matmul;

impl BinaryKernel<Array2<f64>, Array1<f64>> for Matmul {
    type Output = Array1<f64>;
    fn eval(lhs: &Array2<f64>, rhs: &Array1<f64>) -> Array1<f64> {
        lhs.dot(rhs)
    }
    fn partial_lhs(lhs: &Array2<f64>, rhs: &Array1<f64>) -> Jacobian {
        let (r, s) = lhs.dim();
        let mut j = Array2::zeros((r, r * s));
        for (b, &v) in rhs.iter().enumerate() {
            for a in 0..r {
                j[[a, a + r * b]] = v;
            }
        }
        Jacobian::Dense(j)
    }
    fn partial_rhs(lhs: &Array2<f64>, _: &Array1<f64>) -> Jacobian {
        Jacobian::Dense(lhs.clone())
    }
    fn compatible(lhs: &Array2<f64>, rhs: &Array1<f64>) -> bool {
        lhs.ncols() == rhs.len()
    }
}

impl BinaryKernel<Array2<f64>, Array2<f64>> for Matmul {
    type Output = Array2<f64>;
    fn eval(lhs: &Array2<f64>, rhs: &Array2<f64>) -> Array2<f64> {
        lhs.dot(rhs)
    }
    fn partial_lhs(lhs: &Array2<f64>, rhs: &Array2<f64>) -> Jacobian {
        let (r, s) = lhs.dim();
        let t = rhs.ncols();
        let mut j = Array2::zeros((r * t, r * s));
        for c in 0..t {
            for b in 0..s {
                for a in 0..r {
                    j[[a + r * c, a + r * b]] = rhs[[b, c]];
                }
            }
        }
        Jacobian::Dense(j)
    }
    fn partial_rhs(lhs: &Array2<f64>, rhs: &Array2<f64>) -> Jacobian {
        let (r, s) = lhs.dim();
        let t = rhs.ncols();
        let mut j = Array2::zeros((r * t, s * t));
        for c in 0..t {
            for b in 0..s {
                for a in 0..r {
                    j[[a + r * c, b + s * c]] = lhs[[a, b]];
                }
            }
        }
        Jacobian::Dense(j)
    }
    fn compatible(lhs: &Array2<f64>, rhs: &Array2<f64>) -> bool {
        lhs.ncols() == rhs.nrows()
    }
}

macro_rules! reduction {
    ($name:ident, $doc:expr, |$x:ident| $eval:expr, |$arg:ident, $out:ident| $partial:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug)]
        pub struct $name;
        impl<V: ArrayValue> UnaryKernel<V> for $name {
            type Output = f64;
            fn eval(arg: &V) -> f64 {
                let $x = arg.flatten();
                $eval
            }
            fn partial(arg: &V, out: &f64) -> Jacobian {
                let $arg = arg.flatten();
                let $out = *out;
                Jacobian::Row($partial)
            }
        }
    };
}

reduction!(Sum, "Sum of all elements.", |x| x.sum(), |x, _out| {
    Array1::ones(x.len())
});
reduction!(Mean, "Mean of all elements.", |x| x.sum() / x.len() as f64, |x, _out| {
    Array1::from_elem(x.len(), 1.0 / x.len() as f64)
});
reduction!(Norm, "Euclidean norm.", |x| x.dot(&x).sqrt(), |x, out| x / out);
reduction!(SquaredNorm, "Squared Euclidean norm.", |x| x.dot(&x), |x, _out| {
    x * 2.0
});

/// A literal value, constant with respect to every variable.
pub struct Literal<V, D> {
    value: Rc<V>,
    _d: PhantomData<D>,
}

impl<V, D> Literal<V, D> {
    pub fn new(value: V) -> Self {
        Self {
            value: Rc::new(value),
            _d: PhantomData,
        }
    }
}

impl<V: Value, D: Derivative> Expr for Literal<V, D> {
    type Value = V;
    type Derivative = D;

    fn value(&self) -> Rc<V> {
        self.value.clone()
    }
    fn push_forward(&self) -> Tangent<D> {
        None
    }
    fn pull_back(&self, _: &D) {}
    fn transfer_children_to(&self, _: NodeId) {}
    fn release_cache(&self) {}
    fn is_constant(&self) -> bool {
        true
    }
}

/// An expression applying the kernel `K` to one child expression.
pub struct Unary<A, K> {
    arg: A,
    _k: PhantomData<K>,
}

impl<A, K> Unary<A, K> {
    pub fn new(arg: A) -> Self {
        Self {
            arg,
            _k: PhantomData,
        }
    }
}

impl<A, K> Expr for Unary<A, K>
where
    A: Expr,
    K: UnaryKernel<A::Value>,
{
    type Value = K::Output;
    type Derivative = A::Derivative;

    fn value(&self) -> Rc<K::Output> {
        Rc::new(K::eval(&self.arg.value()))
    }

    fn push_forward(&self) -> Tangent<A::Derivative> {
        let tangent = self.arg.push_forward()?;
        let arg = self.arg.value();
        let jacobian = K::partial(&arg, &K::eval(&arg));
        Some(Rc::new(A::Derivative::push_through(&jacobian, &tangent)))
    }

    fn pull_back(&self, derivative: &A::Derivative) {
        if self.arg.is_constant() {
            return;
        }
        let arg = self.arg.value();
        let jacobian = K::partial(&arg, &K::eval(&arg));
        self.arg
            .pull_back(&A::Derivative::pull_through(derivative, &jacobian));
    }

    fn transfer_children_to(&self, node: NodeId) {
        self.arg.transfer_children_to(node);
    }

    fn release_cache(&self) {
        self.arg.release_cache();
    }

    fn is_constant(&self) -> bool {
        self.arg.is_constant()
    }
}

/// An expression applying the kernel `K` to two child expressions.
pub struct Binary<L, R, K> {
    lhs: L,
    rhs: R,
    _k: PhantomData<K>,
}

impl<L, R, K> Binary<L, R, K> {
    pub fn new(lhs: L, rhs: R) -> Self {
        Self {
            lhs,
            rhs,
            _k: PhantomData,
        }
    }
}

impl<L, R, K> Expr for Binary<L, R, K>
where
    L: Expr,
    R: Expr<Derivative = L::Derivative>,
    K: BinaryKernel<L::Value, R::Value>,
{
    type Value = K::Output;
    type Derivative = L::Derivative;

    fn value(&self) -> Rc<K::Output> {
        Rc::new(K::eval(&self.lhs.value(), &self.rhs.value()))
    }

    fn push_forward(&self) -> Tangent<L::Derivative> {
        let lhs_tangent = self.lhs.push_forward();
        let rhs_tangent = self.rhs.push_forward();
        if lhs_tangent.is_none() && rhs_tangent.is_none() {
            return None;
        }
        let (l, r) = (self.lhs.value(), self.rhs.value());
        let mut total: Option<L::Derivative> = None;
        if let Some(t) = lhs_tangent {
            total = Some(L::Derivative::push_through(&K::partial_lhs(&l, &r), &t));
        }
        if let Some(t) = rhs_tangent {
            let part = L::Derivative::push_through(&K::partial_rhs(&l, &r), &t);
            match total.as_mut() {
                Some(acc) => acc.accumulate(&part),
                None => total = Some(part),
            }
        }
        total.map(Rc::new)
    }

    fn pull_back(&self, derivative: &L::Derivative) {
        let (lhs_constant, rhs_constant) = (self.lhs.is_constant(), self.rhs.is_constant());
        if lhs_constant && rhs_constant {
            return;
        }
        let (l, r) = (self.lhs.value(), self.rhs.value());
        if !lhs_constant {
            self.lhs.pull_back(&L::Derivative::pull_through(
                derivative,
                &K::partial_lhs(&l, &r),
            ));
        }
        if !rhs_constant {
            self.rhs.pull_back(&L::Derivative::pull_through(
                derivative,
                &K::partial_rhs(&l, &r),
            ));
        }
    }

    fn transfer_children_to(&self, node: NodeId) {
        self.lhs.transfer_children_to(node);
        self.rhs.transfer_children_to(node);
    }

    fn release_cache(&self) {
        self.lhs.release_cache();
        self.rhs.release_cache();
    }

    fn is_constant(&self) -> bool {
        self.lhs.is_constant() && self.rhs.is_constant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    type Lit<V> = Literal<V, Array2<f64>>;

    #[test]
    fn scalar_ops_match_derivatives() {
        assert_relative_eq!(PowOp::d_left(2.0, 3.0), 12.0);
        assert_relative_eq!(PowOp::d_right(2.0, 3.0), 8.0 * 2f64.ln());
        assert_relative_eq!(DivOp::d_right(1.0, 2.0), -0.25);
        assert_eq!(MinimumOp::eval(3.0), 0.0);
        assert_eq!(MinimumOp::deriv(-3.0, -3.0), 1.0);
        assert_eq!(MaximumOp::eval(-1.0), 0.0);
        assert_eq!(MaximumOp::deriv(2.0, 2.0), 1.0);
    }

    #[test]
    fn literals_are_constant() {
        let e = Binary::<_, _, Cwise<AddOp>>::new(
            Lit::new(array![1.0, 2.0]),
            Lit::new(array![3.0, 4.0]),
        );
        assert!(e.is_constant());
        assert_eq!(*e.value(), array![4.0, 6.0]);
        assert!(e.push_forward().is_none());
    }

    #[test]
    fn reductions_have_row_jacobians() {
        let x = array![[3.0, 0.0], [4.0, 0.0]];
        assert_relative_eq!(Norm::eval(&x), 5.0);
        assert_eq!(
            Norm::partial(&x, &5.0),
            Jacobian::Row(array![0.6, 0.8, 0.0, 0.0])
        );
        assert_relative_eq!(Mean::eval(&array![1.0, 2.0, 3.0, 6.0]), 3.0);
        assert_relative_eq!(SquaredNorm::eval(&array![1.0, 2.0]), 5.0);
        assert_relative_eq!(Sum::eval(&x), 7.0);
    }

    #[test]
    fn matmul_jacobian_shapes_follow_flattening() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let b = array![[1.0, 0.0, 2.0], [0.0, 1.0, 3.0]];
        match <Matmul as BinaryKernel<Array2<f64>, Array2<f64>>>::partial_lhs(&a, &b) {
            Jacobian::Dense(j) => assert_eq!(j.dim(), (6, 4)),
            other => panic!("unexpected jacobian {other:?}"),
        }
        match <Matmul as BinaryKernel<Array2<f64>, Array2<f64>>>::partial_rhs(&a, &b) {
            Jacobian::Dense(j) => assert_eq!(j.dim(), (6, 6)),
            other => panic!("unexpected jacobian {other:?}"),
        }
    }

    #[test]
    fn matmul_jacobian_matches_product() {
        // d(A v)/dA applied to a perturbation H equals H v.
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let v = array![1.0, -1.0, 2.0];
        let h = array![[0.5, 0.0, 1.0], [0.0, 2.0, 0.0]];
        let j = match <Matmul as BinaryKernel<Array2<f64>, Array1<f64>>>::partial_lhs(&a, &v) {
            Jacobian::Dense(j) => j,
            other => panic!("unexpected jacobian {other:?}"),
        };
        assert_eq!(j.dot(&Elementwise::flatten(&h)), h.dot(&v));
    }

    #[test]
    fn outer_jacobian_matches_product() {
        let u = array![1.0, 2.0];
        let v = array![3.0, 4.0, 5.0];
        let du = array![1.0, -1.0];
        let j = match Outer::partial_lhs(&u, &v) {
            Jacobian::Dense(j) => j,
            other => panic!("unexpected jacobian {other:?}"),
        };
        assert_eq!(j.dot(&du), Elementwise::flatten(&Outer::eval(&du, &v)));
    }
}
