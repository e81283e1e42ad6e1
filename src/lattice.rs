//! Real and reciprocal lattice of the crystal.
use ndarray::prelude::*;
use ndarray_linalg::{Determinant, Inverse};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::consts::{LATTICE_DERIVED_TOLERANCE, LATTICE_DUALITY_TOLERANCE};
use crate::error::{Result, TbError};
use crate::options::WsMetric;

/// The lattice vectors, stored row-wise: `real.row(i)` is $\bm a_i$ and
/// `recip.row(i)` is $\bm b_i$, with $\bm a_i\cdot\bm b_j = 2\pi\delta_{ij}$.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeVectors {
    pub real: Array2<f64>,
    pub recip: Array2<f64>,
}

impl LatticeVectors {
    /// Build from both lattices, asserting duality to [`LATTICE_DUALITY_TOLERANCE`].
    pub fn new(real: Array2<f64>, recip: Array2<f64>) -> Result<Self> {
        let lat = LatticeVectors { real, recip };
        lat.check_duality(LATTICE_DUALITY_TOLERANCE)?;
        Ok(lat)
    }

    /// Derive the reciprocal lattice $B = 2\pi (A^{-1})^T$.
    pub fn from_real(real: Array2<f64>) -> Result<Self> {
        let recip = real.inv()?.reversed_axes() * (2.0 * PI);
        let lat = LatticeVectors { real, recip };
        lat.check_duality(LATTICE_DERIVED_TOLERANCE)?;
        Ok(lat)
    }

    pub fn from_recip(recip: Array2<f64>) -> Result<Self> {
        let real = recip.inv()?.reversed_axes() * (2.0 * PI);
        let lat = LatticeVectors { real, recip };
        lat.check_duality(LATTICE_DERIVED_TOLERANCE)?;
        Ok(lat)
    }

    /// Frobenius norm of $A B^T/2\pi - I$, which must stay below `tol`.
    pub fn check_duality(&self, tol: f64) -> Result<()> {
        if self.real.shape() != [3, 3] || self.recip.shape() != [3, 3] {
            return Err(TbError::DimensionMismatch {
                context: "lattice vectors".to_string(),
                expected: 9,
                found: self.real.len().min(self.recip.len()),
            });
        }
        let prod = self.real.dot(&self.recip.t()) / (2.0 * PI) - Array2::<f64>::eye(3);
        let deviation = prod.iter().map(|x| x * x).sum::<f64>().sqrt();
        if deviation > tol {
            return Err(TbError::LatticeDuality { deviation });
        }
        Ok(())
    }

    /// $A^T A$, the default metric of the Wigner-Seitz search.
    #[inline(always)]
    pub fn metric(&self) -> Array2<f64> {
        self.real.t().dot(&self.real)
    }

    /// $G_{ij} = \bm a_i\cdot\bm a_j$: $n^T G n$ is the squared Cartesian
    /// length of the translation with reduced coordinates $n$.
    #[inline(always)]
    pub fn row_metric(&self) -> Array2<f64> {
        self.real.dot(&self.real.t())
    }

    pub fn ws_metric(&self, kind: WsMetric) -> Array2<f64> {
        match kind {
            WsMetric::LatticeColumns => self.metric(),
            WsMetric::LatticeRows => self.row_metric(),
        }
    }

    pub fn cell_volume(&self) -> Result<f64> {
        Ok(self.real.det()?.abs())
    }

    /// Cartesian coordinates of integer lattice translations, one per row.
    pub fn cartesian(&self, irvec: &Array2<isize>) -> Array2<f64> {
        irvec.mapv(|x| x as f64).dot(&self.real)
    }
}
