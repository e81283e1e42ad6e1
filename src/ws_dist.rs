//! Minimal-distance replica selection of wannier90 (`use_ws_distance`).
//!
//! A hopping $\langle w_{i,0}|O|w_{j,R}\rangle$ is moved to the supercell image
//! of $R$ that puts $w_j$ inside the Wigner-Seitz cell centred on $w_i$. When
//! $w_j$ sits on the boundary of that cell, the weight is split evenly over
//! all tied images. The result is a table
//! `new R -> (old R index -> num_wann × num_wann weights)`, applied to every
//! operator defined on the original R grid.
use log::{debug, warn};
use ndarray::prelude::*;
use ndarray::{ArrayD, IxDyn};
use ndarray_linalg::Norm;
use num_complex::Complex64;
use rayon::prelude::*;
use std::collections::BTreeMap;

use crate::consts::{
    SUM_RULE_TOLERANCE, WEIGHT_CONSERVATION_TOLERANCE, WS_DISTANCE_TOLERANCE, WS_SEARCH_SIZE,
};
use crate::error::{Result, TbError};
use crate::io::parse_tokens;
use crate::lattice::LatticeVectors;
use crate::math::flatten_tail;
use crate::options::ConservationPolicy;
use crate::wigner_seitz::iterate3dpm;

type Contributions = BTreeMap<usize, Array2<f64>>;

#[derive(Debug, Clone)]
pub struct WsDistMap {
    num_wann: usize,
    n_rvec_old: usize,
    /// Keys are kept sorted, which fixes the order of the new R grid.
    table: BTreeMap<[isize; 3], Contributions>,
}

impl WsDistMap {
    fn empty(num_wann: usize, n_rvec_old: usize) -> Self {
        WsDistMap {
            num_wann,
            n_rvec_old,
            table: BTreeMap::new(),
        }
    }

    fn add(&mut self, ir: usize, irvec_new: [isize; 3], iw: usize, jw: usize, weight: f64) {
        let nw = self.num_wann;
        let w = self
            .table
            .entry(irvec_new)
            .or_default()
            .entry(ir)
            .or_insert_with(|| Array2::zeros((nw, nw)));
        w[[iw, jw]] += weight;
    }

    /// Every image of a star shares the weight equally.
    fn add_star(&mut self, ir: usize, star: &[[isize; 3]], iw: usize, jw: usize) {
        let weight = 1.0 / star.len() as f64;
        for irv in star {
            self.add(ir, *irv, iw, jw, weight);
        }
    }

    /// Build the map from the geometry of the Wannier centres.
    ///
    /// `wannier_centres` are Cartesian, one row per Wannier function.
    /// Images are searched over the supercell shifts `[-3, 3]³ · mp_grid`,
    /// and two images tie when their distances differ by less than
    /// [`WS_DISTANCE_TOLERANCE`].
    #[allow(non_snake_case)]
    pub fn generate(
        iRvec: &Array2<isize>,
        wannier_centres: &Array2<f64>,
        mp_grid: [usize; 3],
        lattice: &LatticeVectors,
        policy: ConservationPolicy,
    ) -> Result<Self> {
        if wannier_centres.ncols() != 3 {
            return Err(TbError::DimensionMismatch {
                context: "wannier centres".to_string(),
                expected: 3,
                found: wannier_centres.ncols(),
            });
        }
        let num_wann = wannier_centres.nrows();
        let nRvec = iRvec.nrows();
        let mp = mp_grid.map(|x| x as isize);
        let shifts_int: Vec<[isize; 3]> = iterate3dpm([WS_SEARCH_SIZE + 1; 3])
            .map(|s| [s[0] * mp[0], s[1] * mp[1], s[2] * mp[2]])
            .collect();
        let shifts_int_arr = Array2::from_shape_fn((shifts_int.len(), 3), |(i, a)| shifts_int[i][a]);
        let shifts_cart = lattice.cartesian(&shifts_int_arr);
        let cRvec = lattice.cartesian(iRvec);

        // 每个 R 的搜索彼此独立, 先并行算出所有的 star, 再按顺序累加
        let stars: Vec<Vec<(usize, usize, Vec<[isize; 3]>)>> = (0..nRvec)
            .into_par_iter()
            .map(|ir| {
                let iR = [iRvec[[ir, 0]], iRvec[[ir, 1]], iRvec[[ir, 2]]];
                let mut out = Vec::with_capacity(num_wann * num_wann);
                for jw in 0..num_wann {
                    for iw in 0..num_wann {
                        let R_in = &cRvec.row(ir) + &wannier_centres.row(jw) - &wannier_centres.row(iw);
                        let dist: Vec<f64> = shifts_cart
                            .outer_iter()
                            .map(|s| (&R_in + &s).norm_l2())
                            .collect();
                        let dist_min = dist.iter().cloned().fold(f64::INFINITY, f64::min);
                        let star: Vec<[isize; 3]> = dist
                            .iter()
                            .zip(shifts_int.iter())
                            .filter(|(d, _)| **d - dist_min < WS_DISTANCE_TOLERANCE)
                            .map(|(_, s)| [iR[0] + s[0], iR[1] + s[1], iR[2] + s[2]])
                            .collect();
                        out.push((iw, jw, star));
                    }
                }
                out
            })
            .collect();

        let mut map = WsDistMap::empty(num_wann, nRvec);
        for (ir, per_pair) in stars.iter().enumerate() {
            for (iw, jw, star) in per_pair {
                map.add_star(ir, star, *iw, *jw);
            }
        }
        map.check_conservation(policy)?;
        debug!(
            "minimal-distance map: {} R vectors -> {} R vectors",
            nRvec,
            map.table.len()
        );
        Ok(map)
    }

    /// Read the map from its text form, as stored after the R-vector list of
    /// a `_R.info` file.
    ///
    /// The first `nRvec` lines end with the number of listed orbital pairs
    /// of each original R. Then, for each R in turn, that many lines
    /// `i j R1 R2 R3 [R1 R2 R3 ...]` follow, with 1-based orbitals and
    /// absolute new R-vectors. Pairs not listed stay at the original R.
    #[allow(non_snake_case)]
    pub fn from_lines<S: AsRef<str>>(
        iRvec: &Array2<isize>,
        num_wann: usize,
        lines: &[S],
        policy: ConservationPolicy,
    ) -> Result<Self> {
        const FILE: &str = "minimal-distance table";
        let nRvec = iRvec.nrows();
        if lines.len() < nRvec {
            return Err(TbError::FileParse {
                file: FILE.to_string(),
                message: format!("expected {} count lines, found {}", nRvec, lines.len()),
            });
        }
        let mut n_nonzero = Vec::with_capacity(nRvec);
        for line in &lines[..nRvec] {
            let last = line.as_ref().split_whitespace().last().ok_or_else(|| TbError::FileParse {
                file: FILE.to_string(),
                message: "empty count line".to_string(),
            })?;
            n_nonzero.push(parse_tokens::<usize>(last, FILE)?[0]);
        }

        let mut map = WsDistMap::empty(num_wann, nRvec);
        let mut pos = nRvec;
        for (ir, &nnz) in n_nonzero.iter().enumerate() {
            let iR = [iRvec[[ir, 0]], iRvec[[ir, 1]], iRvec[[ir, 2]]];
            let mut listed: BTreeMap<(usize, usize), Vec<[isize; 3]>> = BTreeMap::new();
            for _ in 0..nnz {
                let line = lines.get(pos).ok_or_else(|| TbError::FileParse {
                    file: FILE.to_string(),
                    message: format!("table ends inside the block of R-vector #{}", ir),
                })?;
                pos += 1;
                let tokens: Vec<isize> = parse_tokens(line.as_ref(), FILE)?;
                if tokens.len() < 5 || (tokens.len() - 2) % 3 != 0 {
                    return Err(TbError::FileParse {
                        file: FILE.to_string(),
                        message: format!("malformed entry '{}'", line.as_ref().trim()),
                    });
                }
                let (i, j) = (tokens[0] - 1, tokens[1] - 1);
                if i < 0 || j < 0 || i as usize >= num_wann || j as usize >= num_wann {
                    return Err(TbError::FileParse {
                        file: FILE.to_string(),
                        message: format!("orbital pair ({}, {}) out of range", i + 1, j + 1),
                    });
                }
                let star = tokens[2..].chunks(3).map(|c| [c[0], c[1], c[2]]).collect();
                listed.insert((i as usize, j as usize), star);
            }
            for iw in 0..num_wann {
                for jw in 0..num_wann {
                    match listed.get(&(iw, jw)) {
                        Some(star) => map.add_star(ir, star, iw, jw),
                        None => map.add(ir, iR, iw, jw, 1.0),
                    }
                }
            }
        }
        map.check_conservation(policy)?;
        Ok(map)
    }

    /// Summed absolute deviation from one of the weights distributed by
    /// each original R-vector, returned as `(ir, deviation)` for the worst one.
    fn worst_conservation(&self) -> (usize, f64) {
        let nw = self.num_wann;
        let mut chsum = vec![Array2::<f64>::zeros((nw, nw)); self.n_rvec_old];
        for contrib in self.table.values() {
            for (&ir, w) in contrib {
                chsum[ir] += w;
            }
        }
        chsum
            .iter()
            .map(|s| s.iter().map(|x| (x - 1.0).abs()).sum::<f64>())
            .enumerate()
            .fold((0, 0.0), |acc, (ir, d)| if d > acc.1 { (ir, d) } else { acc })
    }

    fn check_conservation(&self, policy: ConservationPolicy) -> Result<()> {
        let (ir, deviation) = self.worst_conservation();
        if deviation > WEIGHT_CONSERVATION_TOLERANCE {
            match policy {
                ConservationPolicy::Warn => {
                    warn!("Check sum for R-vector #{} : {:e}", ir, deviation)
                }
                ConservationPolicy::Fail => {
                    return Err(TbError::WeightConservation { ir, deviation });
                }
            }
        }
        Ok(())
    }

    pub fn num_wann(&self) -> usize {
        self.num_wann
    }

    pub fn n_rvec_new(&self) -> usize {
        self.table.len()
    }

    /// The new R grid, sorted lexicographically, one vector per row.
    pub fn irvec_ordered(&self) -> Array2<isize> {
        let mut out = Array2::<isize>::zeros((self.table.len(), 3));
        for (mut row, key) in out.outer_iter_mut().zip(self.table.keys()) {
            row.assign(&aview1(key));
        }
        out
    }

    /// Old R index -> weight matrix for one new R-vector.
    pub fn weights_for(&self, irvec_new: [isize; 3]) -> Option<&BTreeMap<usize, Array2<f64>>> {
        self.table.get(&irvec_new)
    }

    /// Redistribute a tensor `(num_wann, num_wann, nRvec_old, ...)` onto the
    /// new R grid. The weights broadcast over the trailing axes, and
    /// `Σ_R T[:, :, R]` must survive to [`SUM_RULE_TOLERANCE`].
    pub fn apply(&self, tensor: &ArrayD<Complex64>) -> Result<ArrayD<Complex64>> {
        let nw = self.num_wann;
        let shape = tensor.shape();
        if shape.len() < 3 || shape[0] != nw || shape[1] != nw || shape[2] != self.n_rvec_old {
            return Err(TbError::DimensionMismatch {
                context: format!("minimal-distance remap of tensor {:?}", shape),
                expected: self.n_rvec_old,
                found: shape.get(2).cloned().unwrap_or(0),
            });
        }
        let (flat, tail) = flatten_tail(tensor.view(), 3)?;
        let flat = flat.into_dimensionality::<Ix4>()?;
        let ncomp = flat.shape()[3];

        let blocks: Vec<Array3<Complex64>> = self
            .table
            .values()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|contrib| {
                let mut block = Array3::<Complex64>::zeros((nw, nw, ncomp));
                for (&ir, w) in contrib.iter() {
                    for iw in 0..nw {
                        for jw in 0..nw {
                            let wij = w[[iw, jw]];
                            if wij == 0.0 {
                                continue;
                            }
                            for c in 0..ncomp {
                                block[[iw, jw, c]] += flat[[iw, jw, ir, c]] * wij;
                            }
                        }
                    }
                }
                block
            })
            .collect();

        let mut new = Array4::<Complex64>::zeros((nw, nw, blocks.len(), ncomp));
        for (inew, block) in blocks.iter().enumerate() {
            new.slice_mut(s![.., .., inew, ..]).assign(block);
        }

        let deviation = (&new.sum_axis(Axis(2)) - &flat.sum_axis(Axis(2)))
            .iter()
            .fold(0.0, |acc: f64, x| acc.max(x.norm()));
        if deviation > SUM_RULE_TOLERANCE {
            return Err(TbError::SumRuleViolated { deviation });
        }

        let mut new_shape = vec![nw, nw, blocks.len()];
        new_shape.extend(tail);
        Ok(new.into_dyn().into_shape_with_order(IxDyn(&new_shape))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wigner_seitz::wigner_seitz;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn chain() -> LatticeVectors {
        LatticeVectors::from_real(array![[1.0, 0.0, 0.0], [0.0, 10.0, 0.0], [0.0, 0.0, 10.0]]).unwrap()
    }

    fn hexagonal() -> LatticeVectors {
        LatticeVectors::from_real(array![
            [1.0, 0.0, 0.0],
            [-0.5, 3_f64.sqrt() / 2.0, 0.0],
            [0.0, 0.0, 4.0]
        ])
        .unwrap()
    }

    fn pseudo_random_tensor(shape: &[usize]) -> ArrayD<Complex64> {
        let mut k: f64 = 0.0;
        ArrayD::from_shape_simple_fn(IxDyn(shape), || {
            k += 1.0;
            Complex64::new((k * 0.7).sin(), (k * 1.3).cos())
        })
    }

    #[test]
    fn tied_images_share_weight_evenly() {
        let lat = chain();
        let (irvec, _) = wigner_seitz([1, 1, 1], &lat);
        assert_eq!(irvec.nrows(), 1);
        let centres = array![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]];
        let map = WsDistMap::generate(&irvec, &centres, [1, 1, 1], &lat, ConservationPolicy::Fail).unwrap();
        assert_eq!(map.irvec_ordered(), array![[-1isize, 0, 0], [0, 0, 0], [1, 0, 0]]);

        let left = map.weights_for([-1, 0, 0]).unwrap();
        assert_abs_diff_eq!(left[&0][[0, 1]], 0.5);
        assert_abs_diff_eq!(left[&0][[1, 0]], 0.0);
        let centre = map.weights_for([0, 0, 0]).unwrap();
        assert_eq!(centre[&0], array![[1.0, 0.5], [0.5, 1.0]]);
        let right = map.weights_for([1, 0, 0]).unwrap();
        assert_abs_diff_eq!(right[&0][[1, 0]], 0.5);
        assert!(map.weights_for([2, 0, 0]).is_none());
    }

    #[test]
    fn near_ties_within_tolerance_are_shared() {
        let lat = chain();
        let (irvec, _) = wigner_seitz([1, 1, 1], &lat);
        // image distances 0.5 ± 3e-6 differ by less than the tolerance
        let centres = array![[0.0, 0.0, 0.0], [0.5 + 3e-6, 0.0, 0.0]];
        let map = WsDistMap::generate(&irvec, &centres, [1, 1, 1], &lat, ConservationPolicy::Fail).unwrap();
        assert_abs_diff_eq!(map.weights_for([-1, 0, 0]).unwrap()[&0][[0, 1]], 0.5);
        assert_abs_diff_eq!(map.weights_for([0, 0, 0]).unwrap()[&0][[0, 1]], 0.5);
        assert_abs_diff_eq!(map.weights_for([1, 0, 0]).unwrap()[&0][[1, 0]], 0.5);

        // 0.5 ± 3e-5 is outside it: only the closer image is kept
        let centres = array![[0.0, 0.0, 0.0], [0.5 + 3e-5, 0.0, 0.0]];
        let map = WsDistMap::generate(&irvec, &centres, [1, 1, 1], &lat, ConservationPolicy::Fail).unwrap();
        assert_abs_diff_eq!(map.weights_for([-1, 0, 0]).unwrap()[&0][[0, 1]], 1.0);
        assert_abs_diff_eq!(map.weights_for([0, 0, 0]).unwrap()[&0][[0, 1]], 0.0);
        assert_abs_diff_eq!(map.weights_for([1, 0, 0]).unwrap()[&0][[1, 0]], 1.0);
        assert_eq!(map.n_rvec_new(), 3);
    }

    #[test]
    fn generated_map_conserves_weight_and_sum() {
        let lat = hexagonal();
        let mp_grid = [4, 4, 1];
        let (irvec, _) = wigner_seitz(mp_grid, &lat);
        let centres = array![[0.1, 0.2, 0.0], [0.5, 0.28867513459481287, 0.3], [-0.2, 0.7, 1.1]];
        let map = WsDistMap::generate(&irvec, &centres, mp_grid, &lat, ConservationPolicy::Fail).unwrap();
        let (_, deviation) = map.worst_conservation();
        assert!(deviation < 1e-12);

        let tensor = pseudo_random_tensor(&[3, 3, irvec.nrows(), 3]);
        let new = map.apply(&tensor).unwrap();
        assert_eq!(new.shape(), &[3, 3, map.n_rvec_new(), 3]);
        let before = tensor.sum_axis(Axis(2));
        let after = new.sum_axis(Axis(2));
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).norm() < 1e-10);
        }
        let rows: Vec<Vec<isize>> = map.irvec_ordered().outer_iter().map(|r| r.to_vec()).collect();
        let mut sorted = rows.clone();
        sorted.sort();
        assert_eq!(rows, sorted);
    }

    #[test]
    fn read_map_defaults_to_original_vector() {
        let irvec = array![[0, 0, 0], [1, 0, 0]];
        let lines = ["0 0 0   0", "1 0 0   1", "1 2   1 0 0   0 0 0"];
        let map = WsDistMap::from_lines(&irvec, 2, &lines, ConservationPolicy::Fail).unwrap();
        assert_eq!(map.irvec_ordered(), array![[0isize, 0, 0], [1, 0, 0]]);
        let origin = map.weights_for([0, 0, 0]).unwrap();
        assert_eq!(origin[&0], Array2::<f64>::ones((2, 2)));
        assert_eq!(origin[&1], array![[0.0, 0.5], [0.0, 0.0]]);
        let one = map.weights_for([1, 0, 0]).unwrap();
        assert_eq!(one[&1], array![[1.0, 0.5], [1.0, 1.0]]);

        let tensor = pseudo_random_tensor(&[2, 2, 2]);
        let new = map.apply(&tensor).unwrap();
        assert_abs_diff_eq!(new[[0, 1, 0]].re, tensor[[0, 1, 0]].re + 0.5 * tensor[[0, 1, 1]].re, epsilon = 1e-14);
        assert_abs_diff_eq!(new[[1, 0, 1]].im, tensor[[1, 0, 1]].im, epsilon = 1e-14);
    }

    #[test]
    fn malformed_table_is_rejected() {
        let irvec = array![[0, 0, 0]];
        let short = ["0 0 0 1"];
        assert!(WsDistMap::from_lines(&irvec, 2, &short, ConservationPolicy::Warn).is_err());
        let bad_pair = ["0 0 0 1", "3 1 0 0 0"];
        assert!(WsDistMap::from_lines(&irvec, 2, &bad_pair, ConservationPolicy::Warn).is_err());
        let bad_vector = ["0 0 0 1", "1 1 0 0"];
        assert!(WsDistMap::from_lines(&irvec, 2, &bad_vector, ConservationPolicy::Warn).is_err());
    }

    #[test]
    fn lost_weight_is_reported() {
        let irvec = array![[0, 0, 0], [1, 0, 0]];
        let lines = ["0 0 0 0", "1 0 0 0"];
        let mut map = WsDistMap::from_lines(&irvec, 1, &lines, ConservationPolicy::Fail).unwrap();
        if let Some(w) = map.table.get_mut(&[1, 0, 0]).and_then(|c| c.get_mut(&1)) {
            w[[0, 0]] = 0.75;
        }
        assert!(map.check_conservation(ConservationPolicy::Warn).is_ok());
        assert!(matches!(
            map.check_conservation(ConservationPolicy::Fail),
            Err(TbError::WeightConservation { ir: 1, .. })
        ));
        let tensor = ArrayD::from_elem(IxDyn(&[1, 1, 2]), Complex64::new(1.0, 0.0));
        assert!(matches!(map.apply(&tensor), Err(TbError::SumRuleViolated { .. })));
    }
}
