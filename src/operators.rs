//! k-space matrix elements of the Wannier functions, built from the
//! wannier90 data files with finite differences over the b-vectors.
//!
//! Every function returns a tensor `(num_kpts, num_wann, num_wann, ...)`
//! ready for [`FourierInterpolator::q_to_r`](crate::fourier::FourierInterpolator::q_to_r).
use ndarray::prelude::*;
use ndarray::ArrayD;
use num_complex::Complex64;

use crate::error::{Result, TbError};
use crate::gauge::{hermitize_q, GaugeRotation};
use crate::math::{ALPHA_A, BETA_A};
use crate::w90_files::{BVectors, Eig, Mmn, Spn, Sxu, Uxu};

const I: Complex64 = Complex64::new(0.0, 1.0);

fn check_dims(context: &str, expected: (usize, usize), found: (usize, usize)) -> Result<()> {
    if expected.0 != found.0 {
        return Err(TbError::DimensionMismatch {
            context: format!("k-points of {}", context),
            expected: expected.0,
            found: found.0,
        });
    }
    if expected.1 != found.1 {
        return Err(TbError::DimensionMismatch {
            context: format!("bands of {}", context),
            expected: expected.1,
            found: found.1,
        });
    }
    Ok(())
}

fn check_nnb(context: &str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(TbError::DimensionMismatch {
            context: format!("neighbours of {}", context),
            expected,
            found,
        });
    }
    Ok(())
}

fn rotate2(gauge: &GaugeRotation, mat: ArrayView2<Complex64>, ik1: usize, ik2: usize) -> Result<Array2<Complex64>> {
    Ok(gauge
        .to_wannier_gauge(mat.into_dyn(), ik1, ik2)?
        .into_dimensionality::<Ix2>()?)
}

/// $H_{mn}(\bm q)$ from the band energies.
pub fn hh_q(gauge: &GaugeRotation, eig: &Eig) -> Result<ArrayD<Complex64>> {
    check_dims("eig", (gauge.num_kpts(), gauge.num_bands), (eig.num_kpts(), eig.num_bands()))?;
    let nw = gauge.num_wann;
    let mut hh = Array3::<Complex64>::zeros((gauge.num_kpts(), nw, nw));
    for (ik, e) in eig.data.outer_iter().enumerate() {
        let h = gauge.to_wannier_gauge_diag(e, ik, ik)?;
        hh.index_axis_mut(Axis(0), ik).assign(&h.into_dimensionality::<Ix2>()?);
    }
    Ok(hermitize_q(&hh.into_dyn()))
}

/// Spin matrices $\braket{m\bm q|\sigma_s|n\bm q}$.
pub fn ss_q(gauge: &GaugeRotation, spn: &Spn) -> Result<ArrayD<Complex64>> {
    check_dims("spn", (gauge.num_kpts(), gauge.num_bands), (spn.num_kpts(), spn.num_bands()))?;
    let nw = gauge.num_wann;
    let mut ss = Array4::<Complex64>::zeros((gauge.num_kpts(), nw, nw, 3));
    for (ik, s) in spn.data.outer_iter().enumerate() {
        let w = gauge.to_wannier_gauge(s.into_dyn(), ik, ik)?;
        ss.index_axis_mut(Axis(0), ik).assign(&w.into_dimensionality::<Ix3>()?);
    }
    Ok(hermitize_q(&ss.into_dyn()))
}

/// Berry connection $A_{mn}(\bm q) = i\sum_b w_b\, \bm b\, M_{mn}(\bm q,\bm b)$.
///
/// With `eig` the overlaps are weighted by the energy of the left band,
/// giving $B_{mn}(\bm q) = \braket{m\bm q|H\,\bm r|n\bm q}$; that tensor is not
/// Hermitian and is returned as is. `transl_inv` replaces the diagonal by
/// $-w_b\,\bm b\,\mathrm{Im}\ln M_{nn}$ and is only meaningful for AA.
pub fn aa_q(
    gauge: &GaugeRotation,
    mmn: &Mmn,
    bvec: &BVectors,
    eig: Option<&Eig>,
    transl_inv: bool,
) -> Result<ArrayD<Complex64>> {
    if transl_inv && eig.is_some() {
        return Err(TbError::InvalidOption(
            "transl_inv cannot be used to obtain BB".to_string(),
        ));
    }
    check_dims("mmn", (gauge.num_kpts(), gauge.num_bands), (mmn.num_kpts(), mmn.num_bands()))?;
    if let Some(eig) = eig {
        check_dims("eig", (gauge.num_kpts(), gauge.num_bands), (eig.num_kpts(), eig.num_bands()))?;
    }
    let (nk, nw) = (gauge.num_kpts(), gauge.num_wann);
    let mut aa = Array4::<Complex64>::zeros((nk, nw, nw, 3));
    for ik in 0..nk {
        for ib in 0..mmn.nnb() {
            let nbr = mmn.neighbours[[ik, ib]];
            let m = mmn.data.slice(s![ik, ib, .., ..]);
            let data = match eig {
                Some(eig) => &m * &eig.data.row(ik).insert_axis(Axis(1)),
                None => m.to_owned(),
            };
            let aaw = rotate2(gauge, data.view(), ik, nbr)?;
            let wk = bvec.wk[[ik, ib]];
            let b = bvec.bk_cart.slice(s![ik, ib, ..]);
            for n in 0..nw {
                for l in 0..nw {
                    for a in 0..3 {
                        aa[[ik, n, l, a]] += if transl_inv && n == l {
                            Complex64::new(-aaw[[n, n]].arg() * wk * b[a], 0.0)
                        } else {
                            I * aaw[[n, l]] * wk * b[a]
                        };
                    }
                }
            }
        }
    }
    let aa = aa.into_dyn();
    Ok(if eig.is_none() { hermitize_q(&aa) } else { aa })
}

/// $C_{mn}(\bm q)$ from `.uHu`, as the pseudo-vector of
/// $i\sum_{b_1 b_2} w_1 w_2\, b_{1\alpha} b_{2\beta}\braket{u_{m\bm q+\bm b_1}|H|u_{n\bm q+\bm b_2}}$.
pub fn cc_q(gauge: &GaugeRotation, uhu: &Uxu, mmn: &Mmn, bvec: &BVectors) -> Result<ArrayD<Complex64>> {
    check_nnb("uHu", mmn.nnb(), uhu.nnb())?;
    let (nk, nw, nnb) = (gauge.num_kpts(), gauge.num_wann, mmn.nnb());
    let mut cc = Array4::<Complex64>::zeros((nk, nw, nw, 3));
    for ik in 0..nk {
        for ib1 in 0..nnb {
            let nbr1 = mmn.neighbours[[ik, ib1]];
            let b1 = bvec.bk_cart.slice(s![ik, ib1, ..]);
            for ib2 in 0..nnb {
                let nbr2 = mmn.neighbours[[ik, ib2]];
                let b2 = bvec.bk_cart.slice(s![ik, ib2, ..]);
                let w = bvec.wk[[ik, ib1]] * bvec.wk[[ik, ib2]];
                let ccw = rotate2(gauge, uhu.data.slice(s![ik, ib1, ib2, .., ..]), nbr1, nbr2)?;
                for c in 0..3 {
                    let (al, be) = (ALPHA_A[c], BETA_A[c]);
                    let factor = w * (b1[al] * b2[be] - b1[be] * b2[al]);
                    if factor == 0.0 {
                        continue;
                    }
                    let mut slot = cc.slice_mut(s![ik, .., .., c]);
                    slot.scaled_add(I * factor, &ccw);
                }
            }
        }
    }
    Ok(hermitize_q(&cc.into_dyn()))
}

/// Shared body of SA and SHA: `[.., a, ipol] = i Σ_b w_b b_a X_{ipol}(q, b)`.
fn spin_connection(gauge: &GaugeRotation, sxu: &Sxu, mmn: &Mmn, bvec: &BVectors, what: &str) -> Result<ArrayD<Complex64>> {
    check_nnb(what, mmn.nnb(), sxu.nnb())?;
    let (nk, nw) = (gauge.num_kpts(), gauge.num_wann);
    let mut sa = Array5::<Complex64>::zeros((nk, nw, nw, 3, 3));
    for ik in 0..nk {
        for ib in 0..mmn.nnb() {
            let nbr = mmn.neighbours[[ik, ib]];
            let wk = bvec.wk[[ik, ib]];
            for ipol in 0..3 {
                let saw = rotate2(gauge, sxu.data.slice(s![ik, ib, ipol, .., ..]), ik, nbr)?;
                for a in 0..3 {
                    let mut slot = sa.slice_mut(s![ik, .., .., a, ipol]);
                    slot.scaled_add(I * wk * bvec.bk_cart[[ik, ib, a]], &saw);
                }
            }
        }
    }
    Ok(hermitize_q(&sa.into_dyn()))
}

/// $\braket{m\bm q|\sigma_s\,\bm r|n\bm q}$ from `.sIu`.
pub fn sa_q(gauge: &GaugeRotation, siu: &Sxu, mmn: &Mmn, bvec: &BVectors) -> Result<ArrayD<Complex64>> {
    spin_connection(gauge, siu, mmn, bvec, "sIu")
}

/// $\braket{m\bm q|\sigma_s H\,\bm r|n\bm q}$ from `.sHu`.
pub fn sha_q(gauge: &GaugeRotation, shu: &Sxu, mmn: &Mmn, bvec: &BVectors) -> Result<ArrayD<Complex64>> {
    spin_connection(gauge, shu, mmn, bvec, "sHu")
}
