//! k -> R Fourier transform of Wannier-gauge operators on the
//! Monkhorst-Pack mesh.
//!
//! $$O(\bm R) = \frac{1}{N_k\,d_{\bm R}} \sum_{\bm k} O(\bm k)\, e^{-i\bm k\cdot\bm R}$$
//!
//! with $d_{\bm R}$ the Wigner-Seitz degeneracy. With k-points on the mesh
//! this is a forward DFT sampled at `R mod mp_grid`, so the whole mesh is
//! transformed at once with `rustfft` and the kept R-vectors are picked up.
use log::info;
use ndarray::prelude::*;
use ndarray::{ArrayD, IxDyn};
use num_complex::Complex64;
use rayon::prelude::*;
use rayon::ThreadPool;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{Result, TbError};
use crate::math::flatten_tail;
use crate::options::FftMethod;

/// Integer coordinates of every k-point on the mesh,
/// `round(kpt_latt · mp_grid) mod mp_grid`.
pub fn kpt_mp_grid_from_latt(kpt_latt: &Array2<f64>, mp_grid: [usize; 3]) -> Vec<[usize; 3]> {
    kpt_latt
        .outer_iter()
        .map(|k| {
            let mut out = [0usize; 3];
            for a in 0..3 {
                let n = mp_grid[a] as isize;
                out[a] = ((k[a] * n as f64).round() as isize).rem_euclid(n) as usize;
            }
            out
        })
        .collect()
}

pub struct FourierInterpolator<'a> {
    mp_grid: [usize; 3],
    kpt_mp_grid: Vec<[usize; 3]>,
    irvec: Array2<isize>,
    ndegen: Array1<usize>,
    method: FftMethod,
    pool: Option<&'a ThreadPool>,
}

impl<'a> FourierInterpolator<'a> {
    #[allow(non_snake_case)]
    pub fn new(
        mp_grid: [usize; 3],
        kpt_mp_grid: Vec<[usize; 3]>,
        iRvec: Array2<isize>,
        ndegen: Array1<usize>,
        method: FftMethod,
        pool: Option<&'a ThreadPool>,
    ) -> Result<Self> {
        if iRvec.nrows() != ndegen.len() {
            return Err(TbError::DimensionMismatch {
                context: "R-vectors and degeneracies".to_string(),
                expected: iRvec.nrows(),
                found: ndegen.len(),
            });
        }
        if mp_grid.contains(&0) || ndegen.iter().any(|&d| d == 0) {
            return Err(TbError::InvalidOption(format!(
                "empty k-mesh {:?} or zero degeneracy",
                mp_grid
            )));
        }
        if let Some(k) = kpt_mp_grid.iter().find(|k| (0..3).any(|a| k[a] >= mp_grid[a])) {
            return Err(TbError::InvalidOption(format!(
                "k-point {:?} lies outside the mesh {:?}",
                k, mp_grid
            )));
        }
        Ok(FourierInterpolator {
            mp_grid,
            kpt_mp_grid,
            irvec: iRvec,
            ndegen,
            method,
            pool,
        })
    }

    pub fn num_kpts(&self) -> usize {
        self.kpt_mp_grid.len()
    }

    /// Transform `(nk, num_wann, num_wann, ...)` to `(num_wann, num_wann, nRvec, ...)`.
    pub fn q_to_r(&self, q: &ArrayD<Complex64>) -> Result<ArrayD<Complex64>> {
        let shape = q.shape().to_vec();
        if shape.len() < 3 || shape[0] != self.num_kpts() {
            return Err(TbError::DimensionMismatch {
                context: format!("operator over k-points {:?}", shape),
                expected: self.num_kpts(),
                found: shape.first().cloned().unwrap_or(0),
            });
        }
        let t0 = Instant::now();
        let (flat, _) = flatten_tail(q.view(), 1)?;
        let flat = flat.into_dimensionality::<Ix2>()?;
        let ncomp = flat.ncols();
        let nr = self.irvec.nrows();

        let columns: Vec<Array1<Complex64>> = match self.method {
            FftMethod::Fft => {
                let mut planner = FftPlanner::<f64>::new();
                let plans: Vec<Arc<dyn Fft<f64>>> =
                    self.mp_grid.iter().map(|&n| planner.plan_fft_forward(n)).collect();
                self.run(|| {
                    (0..ncomp)
                        .into_par_iter()
                        .map(|c| self.fft_component(flat.column(c), &plans))
                        .collect()
                })
            }
            FftMethod::Direct => {
                let phases = self.phases();
                self.run(|| {
                    (0..ncomp)
                        .into_par_iter()
                        .map(|c| phases.dot(&flat.column(c)))
                        .collect()
                })
            }
        };

        let nk_total = self.mp_grid.iter().product::<usize>() as f64;
        let mut out = Array2::<Complex64>::zeros((nr, ncomp));
        for (c, col) in columns.iter().enumerate() {
            out.column_mut(c).assign(col);
        }
        for (mut row, &d) in out.outer_iter_mut().zip(self.ndegen.iter()) {
            row /= Complex64::new(d as f64 * nk_total, 0.0);
        }

        // (nR, nw, nw, tail...) -> (nw, nw, nR, tail...)
        let mut r_shape = vec![nr];
        r_shape.extend_from_slice(&shape[1..]);
        let out = out.into_dyn().into_shape_with_order(IxDyn(&r_shape))?;
        let mut axes: Vec<usize> = vec![1, 2, 0];
        axes.extend(3..r_shape.len());
        let out = out.permuted_axes(IxDyn(&axes)).as_standard_layout().into_owned();
        info!("time for FFT_q_to_R : {:.3} sec", t0.elapsed().as_secs_f64());
        Ok(out)
    }

    fn run<T, F>(&self, op: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        match self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// `exp(-2πi k·R)` for every (R, k), k in reduced coordinates of the mesh.
    fn phases(&self) -> Array2<Complex64> {
        let nk = self.num_kpts();
        Array2::from_shape_fn((self.irvec.nrows(), nk), |(ir, ik)| {
            let k = &self.kpt_mp_grid[ik];
            let phase: f64 = (0..3)
                .map(|a| k[a] as f64 / self.mp_grid[a] as f64 * self.irvec[[ir, a]] as f64)
                .sum();
            Complex64::new(0.0, -2.0 * PI * phase).exp()
        })
    }

    fn fft_component(&self, values: ArrayView1<Complex64>, plans: &[Arc<dyn Fft<f64>>]) -> Array1<Complex64> {
        let mut grid = Array3::<Complex64>::zeros(self.mp_grid);
        for (k, v) in self.kpt_mp_grid.iter().zip(values.iter()) {
            grid[*k] += *v;
        }
        for (a, plan) in plans.iter().enumerate() {
            let mut buffer = vec![Complex64::new(0.0, 0.0); self.mp_grid[a]];
            for mut lane in grid.lanes_mut(Axis(a)) {
                for (b, x) in buffer.iter_mut().zip(lane.iter()) {
                    *b = *x;
                }
                plan.process(&mut buffer);
                lane.iter_mut().zip(buffer.iter()).for_each(|(x, b)| *x = *b);
            }
        }
        self.irvec
            .outer_iter()
            .map(|r| {
                let idx = [0, 1, 2].map(|a| r[a].rem_euclid(self.mp_grid[a] as isize) as usize);
                grid[idx]
            })
            .collect()
    }
}
