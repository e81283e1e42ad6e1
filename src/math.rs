use ndarray::prelude::*;
use ndarray::{ArrayD, IxDyn};
use num_complex::Complex64;

use crate::error::Result;

/// Cyclic index pairs $(\alpha,\beta)$ of an antisymmetric tensor: the
/// component `c` of $X_{\alpha\beta}-X_{\beta\alpha}$ is the `c` component of the pseudo-vector.
pub const ALPHA_A: [usize; 3] = [1, 2, 0];
pub const BETA_A: [usize; 3] = [2, 0, 1];

/// $\frac{1}{2}(M + M^\dagger)$ over axes `a` and `b` of a tensor of any rank.
pub fn hermitize(mat: &ArrayD<Complex64>, a: usize, b: usize) -> ArrayD<Complex64> {
    let mut dag = mat.view();
    dag.swap_axes(a, b);
    let dag = dag.mapv(|x| x.conj());
    (mat + &dag) * 0.5
}

/// Largest $|M_{\dots a \dots b \dots} - \overline{M_{\dots b \dots a \dots}}|$.
pub fn hermiticity_deviation(mat: &ArrayD<Complex64>, a: usize, b: usize) -> f64 {
    let mut dag = mat.view();
    dag.swap_axes(a, b);
    mat.iter()
        .zip(dag.iter())
        .fold(0.0, |acc, (x, y)| f64::max(acc, (x - y.conj()).norm()))
}

/// Flatten every axis from `from` on into one, returning the reshaped copy
/// together with the original trailing shape.
pub fn flatten_tail(
    mat: ArrayViewD<Complex64>,
    from: usize,
) -> Result<(ArrayD<Complex64>, Vec<usize>)> {
    let shape = mat.shape().to_vec();
    let tail = shape[from..].to_vec();
    let ncomp: usize = tail.iter().product();
    let mut new_shape = shape[..from].to_vec();
    new_shape.push(ncomp);
    let flat = mat
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order(IxDyn(&new_shape))?;
    Ok((flat, tail))
}
