//! Selection of the real-space lattice vectors R on which the tight-binding
//! operators live: the points of the Monkhorst-Pack supercell that lie in
//! its Wigner-Seitz cell, each with the number of equivalent images.
use ndarray::prelude::*;
use std::collections::HashSet;

use crate::consts::{WS_SEARCH_TOLERANCE, WS_SUPERCELL_RANGE};
use crate::error::{Result, TbError};
use crate::lattice::LatticeVectors;
use crate::options::WsMetric;

/// All integer triples with `-size[i] <= n[i] <= size[i]`, last axis fastest.
pub fn iterate3dpm(size: [isize; 3]) -> impl Iterator<Item = [isize; 3]> {
    (-size[0]..=size[0]).flat_map(move |i| {
        (-size[1]..=size[1])
            .flat_map(move |j| (-size[2]..=size[2]).map(move |k| [i, j, k]))
    })
}

#[inline(always)]
fn quadratic_form(metric: &Array2<f64>, n: &[isize; 3]) -> f64 {
    let mut d = 0.0;
    for a in 0..3 {
        for b in 0..3 {
            d += n[a] as f64 * metric[[a, b]] * n[b] as f64;
        }
    }
    d
}

/// Wigner-Seitz search on the supercell defined by `mp_grid`.
///
/// A point `n` of the box `[-mp_grid, mp_grid]` is kept when none of its
/// periodic images `n - i·mp_grid`, `i ∈ {-2..2}³`, is strictly closer to
/// the origin. Its degeneracy is the number of images that tie with the
/// minimum; ties are always counted, never broken.
///
/// Returns `(iRvec, Ndegen)` with one R-vector per row. Distances use
/// [`LatticeVectors::metric`].
pub fn wigner_seitz(mp_grid: [usize; 3], lattice: &LatticeVectors) -> (Array2<isize>, Array1<usize>) {
    wigner_seitz_with(mp_grid, lattice, WsMetric::default())
}

/// [`wigner_seitz`] with a chosen metric.
#[allow(non_snake_case)]
pub fn wigner_seitz_with(
    mp_grid: [usize; 3],
    lattice: &LatticeVectors,
    metric: WsMetric,
) -> (Array2<isize>, Array1<usize>) {
    let real_metric = lattice.ws_metric(metric);
    let mp = mp_grid.map(|x| x as isize);
    let r = WS_SUPERCELL_RANGE;
    let side = 2 * r + 1;
    // index of the shift i = (0,0,0) in iterate3dpm order
    let center = ((r * side + r) * side + r) as usize;
    let shifts: Vec<[isize; 3]> = iterate3dpm([r, r, r]).collect();

    let mut irvec = Vec::new();
    let mut ndegen = Vec::new();
    for n in iterate3dpm(mp) {
        let dist: Vec<f64> = shifts
            .iter()
            .map(|i| {
                let ndiff = [n[0] - i[0] * mp[0], n[1] - i[1] * mp[1], n[2] - i[2] * mp[2]];
                quadratic_form(&real_metric, &ndiff)
            })
            .collect();
        let dist_min = dist.iter().cloned().fold(f64::INFINITY, f64::min);
        if (dist[center] - dist_min).abs() < WS_SEARCH_TOLERANCE {
            irvec.push(n);
            ndegen.push(
                dist.iter()
                    .filter(|&&d| (d - dist_min).abs() < WS_SEARCH_TOLERANCE)
                    .count(),
            );
        }
    }
    let mut iRvec = Array2::<isize>::zeros((irvec.len(), 3));
    for (mut row, n) in iRvec.outer_iter_mut().zip(irvec.iter()) {
        row.assign(&aview1(n));
    }
    (iRvec, Array1::from(ndegen))
}

/// Whether every R-vector falls on its own point of an FFT grid of size `fft`.
#[allow(non_snake_case)]
pub fn fft_compatible(fft: [usize; 3], iRvec: &Array2<isize>) -> bool {
    let mut seen = HashSet::new();
    iRvec.outer_iter().all(|r| {
        let folded = [
            r[0].rem_euclid(fft[0] as isize),
            r[1].rem_euclid(fft[1] as isize),
            r[2].rem_euclid(fft[2] as isize),
        ];
        seen.insert(folded)
    })
}

/// The smallest FFT grid on which different R-vectors do not overlap.
#[allow(non_snake_case)]
pub fn nk_fft_min(iRvec: &Array2<isize>) -> Result<[usize; 3]> {
    let mut fft = [1usize; 3];
    for i in 0..3 {
        let col = iRvec.column(i);
        let max = col.iter().cloned().filter(|&x| x > 0).max().unwrap_or(0);
        let min = col.iter().cloned().filter(|&x| x < 0).min().unwrap_or(0);
        fft[i] += (max - min) as usize;
    }
    if !fft_compatible(fft, iRvec) {
        return Err(TbError::FftIncompatible { fft });
    }
    Ok(fft)
}
