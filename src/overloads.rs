//! Typed operator surface: `std::ops` for variables and operations, plus
//! the free mathematical functions.
//!
//! Operators are stamped per (value, derivative) pair. Array categories also
//! accept scalar operands on either side, broadcast over every element.

use std::ops::{Add, Div, Mul, Neg, Sub};

use ndarray::{Array1, Array2};

use crate::expression::{
    AddOp, Binary, BinaryKernel, Broadcast, BroadcastLeft, CosOp, Cwise, DivOp, Dot, ExpOp, LogOp,
    Map, Matmul, MaximumOp, Mean, MinimumOp, MulOp, NegOp, Norm, Outer, PowOp, SinOp, SqrtOp,
    SquareOp, SquaredNorm, SubOp, Sum, Unary, UnaryKernel,
};
use crate::operation::Operation;
use crate::value::{ArrayValue, Derivative, Elementwise, Value};
use crate::variable::{Operand, Variable};

/// Applies the binary kernel `K`.
pub fn binary<K, L, R, D>(
    lhs: impl Operand<L, D>,
    rhs: impl Operand<R, D>,
) -> Operation<K::Output, D>
where
    L: Value,
    R: Value,
    D: Derivative,
    K: BinaryKernel<L, R> + 'static,
{
    Operation::new(Binary::<_, _, K>::new(lhs.into_wrapper(), rhs.into_wrapper()))
}

/// Applies the unary kernel `K`.
pub fn unary<K, A, D>(arg: impl Operand<A, D>) -> Operation<K::Output, D>
where
    A: Value,
    D: Derivative,
    K: UnaryKernel<A> + 'static,
{
    Operation::new(Unary::<_, K>::new(arg.into_wrapper()))
}

macro_rules! impl_bin_op {
    (@rhs $Trait:ident, $method:ident, $Kernel:ty, ($L:ty, $R:ty, $D:ty), $Lhs:ty, [$($Rhs:ty),*]) => {
        $(
            impl $Trait<$Rhs> for $Lhs {
                type Output = Operation<<$Kernel as BinaryKernel<$L, $R>>::Output, $D>;
                #[inline]
                fn $method(self, rhs: $Rhs) -> Self::Output {
                    binary::<$Kernel, $L, $R, $D>(self, rhs)
                }
            }
        )*
    };
    ($Trait:ident, $method:ident, $Kernel:ty, ($L:ty, $R:ty, $D:ty), [$($Lhs:ty),*], $Rhs:tt) => {
        $(
            impl_bin_op!(@rhs $Trait, $method, $Kernel, ($L, $R, $D), $Lhs, $Rhs);
        )*
    };
}

macro_rules! impl_arith {
    ($Op:ident, ($L:ty, $R:ty, $D:ty), $Lhs:tt, $Rhs:tt) => {
        impl_bin_op!(Add, add, $Op<AddOp>, ($L, $R, $D), $Lhs, $Rhs);
        impl_bin_op!(Sub, sub, $Op<SubOp>, ($L, $R, $D), $Lhs, $Rhs);
        impl_bin_op!(Mul, mul, $Op<MulOp>, ($L, $R, $D), $Lhs, $Rhs);
        impl_bin_op!(Div, div, $Op<DivOp>, ($L, $R, $D), $Lhs, $Rhs);
    };
}

macro_rules! impl_neg {
    ($V:ty, $D:ty; $($Lhs:ty),*) => {
        $(
            impl Neg for $Lhs {
                type Output = Operation<$V, $D>;
                #[inline]
                fn neg(self) -> Self::Output {
                    unary::<Map<NegOp>, $V, $D>(self)
                }
            }
        )*
    };
}

macro_rules! impl_category_ops {
    ($V:ty, $D:ty) => {
        impl_arith!(
            Cwise,
            ($V, $V, $D),
            [&Variable<$V, $D>, &Operation<$V, $D>, Operation<$V, $D>],
            [&Variable<$V, $D>, &Operation<$V, $D>, Operation<$V, $D>, $V]
        );
        impl_neg!($V, $D; &Variable<$V, $D>, &Operation<$V, $D>, Operation<$V, $D>);
    };
}

macro_rules! impl_scalar_left_ops {
    ($D:ty) => {
        impl_arith!(
            Cwise,
            (f64, f64, $D),
            [f64],
            [&Variable<f64, $D>, &Operation<f64, $D>, Operation<f64, $D>]
        );
    };
}

macro_rules! impl_broadcast_ops {
    ($V:ty) => {
        impl_arith!(
            Broadcast,
            ($V, f64, Array2<f64>),
            [&Variable<$V, Array2<f64>>, &Operation<$V, Array2<f64>>, Operation<$V, Array2<f64>>],
            [
                f64,
                &Variable<f64, Array2<f64>>,
                &Operation<f64, Array2<f64>>,
                Operation<f64, Array2<f64>>
            ]
        );
        impl_arith!(
            BroadcastLeft,
            (f64, $V, Array2<f64>),
            [
                f64,
                &Variable<f64, Array2<f64>>,
                &Operation<f64, Array2<f64>>,
                Operation<f64, Array2<f64>>
            ],
            [&Variable<$V, Array2<f64>>, &Operation<$V, Array2<f64>>, Operation<$V, Array2<f64>>]
        );
    };
}

impl_category_ops!(f64, f64);
impl_scalar_left_ops!(f64);

impl_category_ops!(f64, Array2<f64>);
impl_scalar_left_ops!(Array2<f64>);
impl_category_ops!(Array1<f64>, Array2<f64>);
impl_category_ops!(Array2<f64>, Array2<f64>);
impl_broadcast_ops!(Array1<f64>);
impl_broadcast_ops!(Array2<f64>);

/// Element-wise `base ** exponent`.
pub fn pow<V: Elementwise, D: Derivative>(
    base: impl Operand<V, D>,
    exponent: impl Operand<V, D>,
) -> Operation<V, D> {
    binary::<Cwise<PowOp>, V, V, D>(base, exponent)
}

/// Every element of `base` raised to a scalar `exponent`.
pub fn powf<V: ArrayValue>(
    base: impl Operand<V, Array2<f64>>,
    exponent: impl Operand<f64, Array2<f64>>,
) -> Operation<V, Array2<f64>> {
    binary::<Broadcast<PowOp>, V, f64, Array2<f64>>(base, exponent)
}

macro_rules! elementwise_fn {
    ($($name:ident => $Op:ty),* $(,)?) => {
        $(
            #[inline]
            pub fn $name<V: Elementwise, D: Derivative>(x: impl Operand<V, D>) -> Operation<V, D> {
                unary::<Map<$Op>, V, D>(x)
            }
        )*
    };
}

elementwise_fn!(
    sin => SinOp,
    cos => CosOp,
    exp => ExpOp,
    log => LogOp,
    sqrt => SqrtOp,
    square => SquareOp,
    minimum => MinimumOp,
    maximum => MaximumOp,
);

macro_rules! reduction_fn {
    ($($(#[$doc:meta])* $name:ident => $Kernel:ty),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name<V: ArrayValue>(
                x: impl Operand<V, Array2<f64>>,
            ) -> Operation<f64, Array2<f64>> {
                unary::<$Kernel, V, Array2<f64>>(x)
            }
        )*
    };
}

reduction_fn!(
    /// Sum of all elements.
    sum => Sum,
    /// Mean of all elements.
    mean => Mean,
    /// Euclidean norm; the Frobenius norm for matrices.
    norm => Norm,
    squared_norm => SquaredNorm,
);

pub fn dot(
    u: impl Operand<Array1<f64>, Array2<f64>>,
    v: impl Operand<Array1<f64>, Array2<f64>>,
) -> Operation<f64, Array2<f64>> {
    binary::<Dot, _, _, _>(u, v)
}

pub fn outer(
    u: impl Operand<Array1<f64>, Array2<f64>>,
    v: impl Operand<Array1<f64>, Array2<f64>>,
) -> Operation<Array2<f64>, Array2<f64>> {
    binary::<Outer, _, _, _>(u, v)
}

/// Matrix product with a vector or a matrix.
pub fn matmul<V>(
    m: impl Operand<Array2<f64>, Array2<f64>>,
    x: impl Operand<V, Array2<f64>>,
) -> Operation<<Matmul as BinaryKernel<Array2<f64>, V>>::Output, Array2<f64>>
where
    V: Value,
    Matmul: BinaryKernel<Array2<f64>, V>,
{
    binary::<Matmul, Array2<f64>, V, Array2<f64>>(m, x)
}
