//! Bloch gauge -> Wannier gauge rotation of band-space matrices.
use ndarray::prelude::*;
use ndarray::{ArrayD, IxDyn};
use ndarray_linalg::conjugate;
use num_complex::Complex64;

use crate::error::{Result, TbError};
use crate::math::{flatten_tail, hermitize};

/// Per-k rotation from the bands of the disentanglement window to the
/// Wannier functions.
///
/// `v_matrix[k]` is `num_wann × (win_max[k] - win_min[k])`; its rows are
/// orthonormal.
#[derive(Debug, Clone)]
pub struct GaugeRotation {
    pub num_bands: usize,
    pub num_wann: usize,
    pub win_min: Vec<usize>,
    pub win_max: Vec<usize>,
    pub v_matrix: Vec<Array2<Complex64>>,
}

impl GaugeRotation {
    pub fn new(
        num_bands: usize,
        win_min: Vec<usize>,
        win_max: Vec<usize>,
        v_matrix: Vec<Array2<Complex64>>,
    ) -> Result<Self> {
        let nk = v_matrix.len();
        if win_min.len() != nk || win_max.len() != nk {
            return Err(TbError::DimensionMismatch {
                context: "disentanglement windows".to_string(),
                expected: nk,
                found: win_min.len().min(win_max.len()),
            });
        }
        let num_wann = v_matrix.first().map(|v| v.nrows()).unwrap_or(0);
        for (ik, v) in v_matrix.iter().enumerate() {
            let nd = win_max[ik].saturating_sub(win_min[ik]);
            if win_max[ik] > num_bands || win_max[ik] < win_min[ik] || v.ncols() != nd || v.nrows() != num_wann {
                return Err(TbError::DimensionMismatch {
                    context: format!("gauge matrix of k-point {}", ik),
                    expected: nd,
                    found: v.ncols(),
                });
            }
        }
        Ok(GaugeRotation {
            num_bands,
            num_wann,
            win_min,
            win_max,
            v_matrix,
        })
    }

    pub fn num_kpts(&self) -> usize {
        self.v_matrix.len()
    }

    /// Rotate `mat`, indexed by raw bands on its two leading axes, to the
    /// Wannier gauge: `conj(V(k1)) · M · V(k2)ᵀ` for every trailing component.
    ///
    /// The rows are restricted to the window of `ik1` and the columns to the
    /// window of `ik2`. The result has shape `(num_wann, num_wann, ...)`.
    pub fn to_wannier_gauge(&self, mat: ArrayViewD<Complex64>, ik1: usize, ik2: usize) -> Result<ArrayD<Complex64>> {
        let shape = mat.shape();
        if shape.len() < 2 || shape[0] != self.num_bands || shape[1] != self.num_bands {
            return Err(TbError::DimensionMismatch {
                context: format!("band-space matrix {:?}", shape),
                expected: self.num_bands,
                found: shape.first().cloned().unwrap_or(0),
            });
        }
        let (v1, v2) = match (self.v_matrix.get(ik1), self.v_matrix.get(ik2)) {
            (Some(v1), Some(v2)) => (v1.mapv(|x| x.conj()), v2.t()),
            _ => {
                return Err(TbError::DimensionMismatch {
                    context: "k-point index".to_string(),
                    expected: self.num_kpts(),
                    found: ik1.max(ik2),
                });
            }
        };
        let (flat, tail) = flatten_tail(mat, 2)?;
        let flat = flat.into_dimensionality::<Ix3>()?;
        let restricted = flat.slice(s![
            self.win_min[ik1]..self.win_max[ik1],
            self.win_min[ik2]..self.win_max[ik2],
            ..
        ]);
        let nw = self.num_wann;
        let ncomp = restricted.len_of(Axis(2));
        let mut out = Array3::<Complex64>::zeros((nw, nw, ncomp));
        for c in 0..ncomp {
            let m = restricted.index_axis(Axis(2), c);
            out.index_axis_mut(Axis(2), c).assign(&v1.dot(&m).dot(&v2));
        }
        let mut new_shape = vec![nw, nw];
        new_shape.extend(tail);
        Ok(out.into_dyn().into_shape_with_order(IxDyn(&new_shape))?)
    }

    /// A band vector (energies, say) promoted to a diagonal matrix first.
    pub fn to_wannier_gauge_diag(&self, vec: ArrayView1<f64>, ik1: usize, ik2: usize) -> Result<ArrayD<Complex64>> {
        let diag = Array2::from_diag(&vec.mapv(|x| Complex64::new(x, 0.0)));
        self.to_wannier_gauge(diag.into_dyn().view(), ik1, ik2)
    }

    /// Largest deviation of `V(k) V(k)†` from the identity over all k-points.
    pub fn orthonormality_deviation(&self) -> f64 {
        let eye = Array2::<Complex64>::eye(self.num_wann);
        self.v_matrix
            .iter()
            .map(|v| {
                let vdag: Array2<Complex64> = conjugate(v);
                (v.dot(&vdag) - &eye).iter().fold(0.0, |acc: f64, x| acc.max(x.norm()))
            })
            .fold(0.0, f64::max)
    }
}

/// Hermitize a tensor over k-points, `(nk, num_wann, num_wann, ...)`.
pub fn hermitize_q(q: &ArrayD<Complex64>) -> ArrayD<Complex64> {
    hermitize(q, 1, 2)
}
