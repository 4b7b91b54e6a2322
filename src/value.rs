//! Value categories, local Jacobians and derivative containers.
//!
//! Matrices are flattened in column-major order wherever they meet a
//! Jacobian, so every derivative is a 2-D matrix whatever the value shape.

use std::fmt;

use ndarray::{Array1, Array2, Axis, Zip};

/// A value that can sit in a graph node.
pub trait Value: Clone + fmt::Debug + 'static {
    /// Number of scalar elements.
    fn size(&self) -> usize;
    /// Array shape; empty for scalars.
    fn dims(&self) -> &[usize];
}

/// Values supporting element-wise maps.
pub trait Elementwise: Value {
    fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self;

    /// Combines two values of the same shape element by element.
    ///
    /// # Panics
    /// If the shapes differ.
    fn zip_map<F: Fn(f64, f64) -> f64>(&self, other: &Self, f: F) -> Self;

    /// Elements in column-major order.
    fn flatten(&self) -> Array1<f64>;

    /// Turns element-wise partials into the diagonal Jacobian they describe.
    fn into_jacobian(self) -> Jacobian;
}

/// Marker for vector and matrix values: broadcast targets and reduction operands.
pub trait ArrayValue: Elementwise {}

impl Value for f64 {
    #[inline]
    fn size(&self) -> usize {
        1
    }
    fn dims(&self) -> &[usize] {
        &[]
    }
}

impl Elementwise for f64 {
    #[inline]
    fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        f(*self)
    }
    #[inline]
    fn zip_map<F: Fn(f64, f64) -> f64>(&self, other: &Self, f: F) -> Self {
        f(*self, *other)
    }
    fn flatten(&self) -> Array1<f64> {
        Array1::from_elem(1, *self)
    }
    #[inline]
    fn into_jacobian(self) -> Jacobian {
        Jacobian::Scale(self)
    }
}

impl Value for Array1<f64> {
    fn size(&self) -> usize {
        self.len()
    }
    fn dims(&self) -> &[usize] {
        self.shape()
    }
}

impl Elementwise for Array1<f64> {
    fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        self.mapv(f)
    }
    fn zip_map<F: Fn(f64, f64) -> f64>(&self, other: &Self, f: F) -> Self {
        Zip::from(self).and(other).map_collect(|&a, &b| f(a, b))
    }
    fn flatten(&self) -> Array1<f64> {
        self.clone()
    }
    fn into_jacobian(self) -> Jacobian {
        Jacobian::Diagonal(self)
    }
}

impl ArrayValue for Array1<f64> {}

impl Value for Array2<f64> {
    fn size(&self) -> usize {
        self.len()
    }
    fn dims(&self) -> &[usize] {
        self.shape()
    }
}

impl Elementwise for Array2<f64> {
    fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        self.mapv(f)
    }
    fn zip_map<F: Fn(f64, f64) -> f64>(&self, other: &Self, f: F) -> Self {
        Zip::from(self).and(other).map_collect(|&a, &b| f(a, b))
    }
    fn flatten(&self) -> Array1<f64> {
        self.t().iter().copied().collect()
    }
    fn into_jacobian(self) -> Jacobian {
        Jacobian::Diagonal(Elementwise::flatten(&self))
    }
}

impl ArrayValue for Array2<f64> {}

/// Local derivative of an operation's output with respect to one operand,
/// over flattened elements.
#[derive(Clone, Debug, PartialEq)]
pub enum Jacobian {
    /// `c * I`.
    Scale(f64),
    /// `diag(p)`, element-wise operations.
    Diagonal(Array1<f64>),
    /// `n x 1`, a scalar operand broadcast into an array.
    Column(Array1<f64>),
    /// `1 x n`, an array reduced to a scalar.
    Row(Array1<f64>),
    /// Any other linear map, e.g. products.
    Dense(Array2<f64>),
}

impl Jacobian {
    /// The single entry of a 1 x 1 Jacobian.
    pub fn scalar(&self) -> f64 {
        match self {
            Jacobian::Scale(c) => *c,
            Jacobian::Diagonal(p) | Jacobian::Column(p) | Jacobian::Row(p) => {
                debug_assert_eq!(p.len(), 1);
                p[0]
            }
            Jacobian::Dense(j) => {
                debug_assert_eq!(j.dim(), (1, 1));
                j[[0, 0]]
            }
        }
    }
}

/// A derivative container: the tangent or gradient cached at a variable.
///
/// Tangents (forward mode) are `size x k`, gradients (reverse mode) are
/// `m x size`.
pub trait Derivative: Clone + fmt::Debug + 'static {
    /// The derivative reported for a variable that has none yet.
    fn empty() -> Self;
    fn zeros(rows: usize, cols: usize) -> Self;
    fn identity(size: usize) -> Self;
    fn shape(&self) -> (usize, usize);
    fn accumulate(&mut self, other: &Self);
    /// `jacobian * tangent`.
    fn push_through(jacobian: &Jacobian, tangent: &Self) -> Self;
    /// `gradient * jacobian`.
    fn pull_through(gradient: &Self, jacobian: &Jacobian) -> Self;
}

impl Derivative for f64 {
    fn empty() -> Self {
        0.0
    }
    fn zeros(_: usize, _: usize) -> Self {
        0.0
    }
    fn identity(_: usize) -> Self {
        1.0
    }
    fn shape(&self) -> (usize, usize) {
        (1, 1)
    }
    #[inline]
    fn accumulate(&mut self, other: &Self) {
        *self += other;
    }
    #[inline]
    fn push_through(jacobian: &Jacobian, tangent: &Self) -> Self {
        jacobian.scalar() * tangent
    }
    #[inline]
    fn pull_through(gradient: &Self, jacobian: &Jacobian) -> Self {
        gradient * jacobian.scalar()
    }
}

impl Derivative for Array2<f64> {
    fn empty() -> Self {
        Array2::zeros((0, 0))
    }
    fn zeros(rows: usize, cols: usize) -> Self {
        Array2::zeros((rows, cols))
    }
    fn identity(size: usize) -> Self {
        Array2::eye(size)
    }
    fn shape(&self) -> (usize, usize) {
        self.dim()
    }
    fn accumulate(&mut self, other: &Self) {
        *self += other;
    }

    fn push_through(jacobian: &Jacobian, tangent: &Self) -> Self {
        match jacobian {
            Jacobian::Scale(c) => tangent * *c,
            Jacobian::Diagonal(p) => tangent * &p.view().insert_axis(Axis(1)),
            Jacobian::Column(p) => p.view().insert_axis(Axis(1)).dot(tangent),
            Jacobian::Row(p) => p.view().insert_axis(Axis(0)).dot(tangent),
            Jacobian::Dense(j) => j.dot(tangent),
        }
    }

    fn pull_through(gradient: &Self, jacobian: &Jacobian) -> Self {
        match jacobian {
            Jacobian::Scale(c) => gradient * *c,
            Jacobian::Diagonal(p) => gradient * &p.view().insert_axis(Axis(0)),
            Jacobian::Column(p) => gradient.dot(p).insert_axis(Axis(1)),
            Jacobian::Row(p) => gradient.dot(&p.view().insert_axis(Axis(0))),
            Jacobian::Dense(j) => gradient.dot(j),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn matrices_flatten_column_major() {
        let m = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        assert_eq!(Elementwise::flatten(&m), array![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(m.size(), 6);
    }

    #[test]
    fn diagonal_scales_rows_forward_and_columns_backward() {
        let jacobian = Jacobian::Diagonal(array![2.0, 3.0]);
        let ones = Array2::<f64>::ones((2, 2));

        let tangent = Array2::push_through(&jacobian, &ones);
        assert_eq!(tangent, array![[2.0, 2.0], [3.0, 3.0]]);

        let gradient = Array2::pull_through(&ones, &jacobian);
        assert_eq!(gradient, array![[2.0, 3.0], [2.0, 3.0]]);
    }

    #[test]
    fn column_and_row_change_shape() {
        let column = Jacobian::Column(array![1.0, 2.0, 3.0]);
        let tangent = Array2::push_through(&column, &array![[2.0]]);
        assert_eq!(tangent, array![[2.0], [4.0], [6.0]]);
        let gradient = Array2::pull_through(&array![[1.0, 1.0, 1.0]], &column);
        assert_eq!(gradient, array![[6.0]]);

        let row = Jacobian::Row(array![1.0, 2.0]);
        let tangent = Array2::push_through(&row, &array![[1.0], [1.0]]);
        assert_eq!(tangent, array![[3.0]]);
        let gradient = Array2::pull_through(&array![[2.0]], &row);
        assert_eq!(gradient, array![[2.0, 4.0]]);
    }

    #[test]
    fn scalar_derivatives_use_the_single_entry() {
        assert_eq!(f64::push_through(&Jacobian::Scale(3.0), &2.0), 6.0);
        assert_eq!(f64::pull_through(&2.0, &Jacobian::Row(array![4.0])), 8.0);
        assert_eq!(f64::identity(7), 1.0);
        assert_eq!(f64::zeros(3, 3), 0.0);
    }
}
