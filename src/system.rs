//! The tight-binding model: R-vectors, degeneracies and the operator
//! matrices $\bra{m\bm 0}\hat O\ket{n\bm R}$.
//!
//! A model is assembled through [`SystemBuilder`], whose stages
//! `Uninitialized -> LatticeSet -> OperatorsLoaded -> (WSRemapped) -> Finalized`
//! are enforced at run time. Only the finalized [`System`] exposes the
//! derived quantities, which are computed on first use and cached.
use log::info;
use ndarray::prelude::*;
use ndarray::{ArrayD, ArrayViewD, Data};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::f64::consts::PI;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{Result, TbError};
use crate::lattice::LatticeVectors;
use crate::wigner_seitz::nk_fft_min;
use crate::ws_dist::WsDistMap;

/// The operators a model can carry. `HH` is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    /// Hamiltonian $H_{mn}(\bm R)$.
    HH,
    /// Position (Berry connection) $A_{mn,a}(\bm R)$.
    AA,
    /// $\bra{m\bm 0}H\,r_a\ket{n\bm R}$.
    BB,
    /// Orbital moment $\bra{m\bm 0}r_b H r_c\ket{n\bm R}$, antisymmetrized.
    CC,
    /// Spin $\sigma_a$.
    SS,
    /// $\bra{m\bm 0}r_b r_c\ket{n\bm R}$, antisymmetrized.
    FF,
    /// $\bra{m\bm 0}\sigma_b\,r_a\ket{n\bm R}$.
    SA,
    /// $\bra{m\bm 0}\sigma_b H r_a\ket{n\bm R}$.
    SHA,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 8] = [
        OperatorKind::HH,
        OperatorKind::AA,
        OperatorKind::BB,
        OperatorKind::CC,
        OperatorKind::SS,
        OperatorKind::FF,
        OperatorKind::SA,
        OperatorKind::SHA,
    ];

    /// Number of Cartesian axes after `(m, n, R)`.
    pub fn rank(self) -> usize {
        match self {
            OperatorKind::HH => 0,
            OperatorKind::SA | OperatorKind::SHA => 2,
            _ => 1,
        }
    }

    /// The `XX` of `seedname_XX_R`.
    pub fn suffix(self) -> &'static str {
        match self {
            OperatorKind::HH => "HH",
            OperatorKind::AA => "AA",
            OperatorKind::BB => "BB",
            OperatorKind::CC => "CC",
            OperatorKind::SS => "SS",
            OperatorKind::FF => "FF",
            OperatorKind::SA => "SA",
            OperatorKind::SHA => "SHA",
        }
    }

    /// Whether $O_{mn}(\bm R) = O_{nm}(-\bm R)^*$ holds by construction.
    pub fn is_hermitian(self) -> bool {
        !matches!(self, OperatorKind::BB | OperatorKind::FF)
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Uninitialized,
    LatticeSet,
    OperatorsLoaded,
    WSRemapped,
    Finalized,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Uninitialized => "Uninitialized",
            Stage::LatticeSet => "LatticeSet",
            Stage::OperatorsLoaded => "OperatorsLoaded",
            Stage::WSRemapped => "WSRemapped",
            Stage::Finalized => "Finalized",
        }
    }
}

/// Staged construction of a [`System`].
///
/// ```
/// use ndarray::{array, Array1, Array2, ArrayD, IxDyn};
/// use num_complex::Complex64;
/// use wannier_tb::{LatticeVectors, OperatorKind, SystemBuilder};
///
/// let lattice = LatticeVectors::from_real(Array2::eye(3)).unwrap();
/// let hh = ArrayD::from_elem(IxDyn(&[1, 1, 1]), Complex64::new(0.5, 0.0));
/// let system = SystemBuilder::new()
///     .set_lattice(lattice, array![[0, 0, 0]], Array1::ones(1)).unwrap()
///     .load_operator(OperatorKind::HH, hh).unwrap()
///     .finalize().unwrap();
/// assert_eq!(system.num_wann(), 1);
/// ```
#[allow(non_snake_case)]
#[derive(Debug, Clone)]
pub struct SystemBuilder {
    stage: Stage,
    lattice: Option<LatticeVectors>,
    iRvec: Array2<isize>,
    Ndegen: Array1<usize>,
    num_wann: Option<usize>,
    tensors: BTreeMap<OperatorKind, ArrayD<Complex64>>,
}

impl Default for SystemBuilder {
    fn default() -> Self {
        SystemBuilder {
            stage: Stage::Uninitialized,
            lattice: None,
            iRvec: Array2::zeros((0, 3)),
            Ndegen: Array1::zeros(0),
            num_wann: None,
            tensors: BTreeMap::new(),
        }
    }
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn expect_stage(&self, allowed: &[Stage], expected: &'static str) -> Result<()> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(TbError::InvalidState {
                expected,
                found: self.stage.name(),
            })
        }
    }

    /// Fix the lattice and the R-vector set. R-vectors must be distinct
    /// and every degeneracy positive.
    #[allow(non_snake_case)]
    pub fn set_lattice(mut self, lattice: LatticeVectors, iRvec: Array2<isize>, Ndegen: Array1<usize>) -> Result<Self> {
        self.expect_stage(&[Stage::Uninitialized], "Uninitialized")?;
        validate_rvectors(&iRvec, &Ndegen)?;
        self.lattice = Some(lattice);
        self.iRvec = iRvec;
        self.Ndegen = Ndegen;
        self.stage = Stage::LatticeSet;
        Ok(self)
    }

    /// Add the tensor of one operator, shaped
    /// `(num_wann, num_wann, nRvec, 3, ...)` with [`OperatorKind::rank`]
    /// Cartesian axes. Loading the same kind twice replaces it.
    pub fn load_operator(mut self, kind: OperatorKind, tensor: ArrayD<Complex64>) -> Result<Self> {
        self.expect_stage(&[Stage::LatticeSet, Stage::OperatorsLoaded], "LatticeSet or OperatorsLoaded")?;
        let shape = tensor.shape();
        let num_wann = self.num_wann.unwrap_or(shape.first().cloned().unwrap_or(0));
        let mut expected = vec![num_wann, num_wann, self.iRvec.nrows()];
        expected.extend(std::iter::repeat(3).take(kind.rank()));
        if shape != expected.as_slice() {
            return Err(TbError::DimensionMismatch {
                context: format!("{} tensor of shape {:?}, expected {:?}", kind, shape, expected),
                expected: expected.iter().product(),
                found: tensor.len(),
            });
        }
        self.num_wann = Some(num_wann);
        self.tensors.insert(kind, tensor);
        self.stage = Stage::OperatorsLoaded;
        Ok(self)
    }

    pub fn has(&self, kind: OperatorKind) -> bool {
        self.tensors.contains_key(&kind)
    }

    /// Move every loaded tensor to the R grid of `map`. Either all tensors
    /// are replaced or none is. The degeneracies of the new grid are one,
    /// since the map has already spread the weight over the images.
    pub fn apply_ws_map(mut self, map: &WsDistMap) -> Result<Self> {
        self.expect_stage(&[Stage::OperatorsLoaded], "OperatorsLoaded")?;
        if Some(map.num_wann()) != self.num_wann {
            return Err(TbError::DimensionMismatch {
                context: "minimal-distance map".to_string(),
                expected: self.num_wann.unwrap_or(0),
                found: map.num_wann(),
            });
        }
        let mut remapped = BTreeMap::new();
        for (kind, tensor) in self.tensors.iter() {
            remapped.insert(*kind, map.apply(tensor)?);
        }
        self.tensors = remapped;
        self.iRvec = map.irvec_ordered();
        self.Ndegen = Array1::ones(self.iRvec.nrows());
        info!("Number of R points after minimal-distance remap: {}", self.iRvec.nrows());
        self.stage = Stage::WSRemapped;
        Ok(self)
    }

    #[allow(non_snake_case)]
    pub fn finalize(self) -> Result<System> {
        self.expect_stage(&[Stage::OperatorsLoaded, Stage::WSRemapped], "OperatorsLoaded or WSRemapped")?;
        let lattice = self.lattice.ok_or(TbError::InvalidState {
            expected: "LatticeSet",
            found: "Uninitialized",
        })?;
        let mut tensors = self.tensors;
        let HH_R = tensors
            .remove(&OperatorKind::HH)
            .ok_or(TbError::MissingOperator(OperatorKind::HH))?
            .into_dimensionality::<Ix3>()?;
        let mut take4 = |kind: OperatorKind| -> Result<Option<Array4<Complex64>>> {
            tensors.remove(&kind).map(|t| t.into_dimensionality::<Ix4>()).transpose().map_err(TbError::from)
        };
        let AA_R = take4(OperatorKind::AA)?;
        let BB_R = take4(OperatorKind::BB)?;
        let CC_R = take4(OperatorKind::CC)?;
        let SS_R = take4(OperatorKind::SS)?;
        let FF_R = take4(OperatorKind::FF)?;
        let SA_R = tensors.remove(&OperatorKind::SA).map(|t| t.into_dimensionality::<Ix5>()).transpose()?;
        let SHA_R = tensors.remove(&OperatorKind::SHA).map(|t| t.into_dimensionality::<Ix5>()).transpose()?;
        let system = System {
            num_wann: HH_R.shape()[0],
            lattice,
            iRvec: self.iRvec,
            Ndegen: self.Ndegen,
            operators: Operators {
                HH_R,
                AA_R,
                BB_R,
                CC_R,
                SS_R,
                FF_R,
                SA_R,
                SHA_R,
            },
            cRvec: OnceLock::new(),
            cell_volume: OnceLock::new(),
            nk_fft_min: OnceLock::new(),
            r_index: OnceLock::new(),
        };
        info!(
            "Tight-binding model: {} Wannier functions, {} R points",
            system.num_wann,
            system.nRvec()
        );
        Ok(system)
    }
}

#[allow(non_snake_case)]
fn validate_rvectors(iRvec: &Array2<isize>, Ndegen: &Array1<usize>) -> Result<()> {
    if iRvec.ncols() != 3 || iRvec.nrows() != Ndegen.len() {
        return Err(TbError::DimensionMismatch {
            context: "R-vectors and degeneracies".to_string(),
            expected: iRvec.nrows(),
            found: Ndegen.len(),
        });
    }
    if Ndegen.iter().any(|&d| d == 0) {
        return Err(TbError::InvalidOption("R-vector degeneracy must be positive".to_string()));
    }
    let mut seen = HashSet::new();
    for r in iRvec.outer_iter() {
        if !seen.insert([r[0], r[1], r[2]]) {
            return Err(TbError::InvalidOption(format!("duplicate R-vector {}", r)));
        }
    }
    Ok(())
}

/// Operator tensors, `(num_wann, num_wann, nRvec, ...)`.
#[allow(non_snake_case)]
#[derive(Debug, Clone)]
pub struct Operators {
    pub HH_R: Array3<Complex64>,
    pub AA_R: Option<Array4<Complex64>>,
    pub BB_R: Option<Array4<Complex64>>,
    pub CC_R: Option<Array4<Complex64>>,
    pub SS_R: Option<Array4<Complex64>>,
    pub FF_R: Option<Array4<Complex64>>,
    pub SA_R: Option<Array5<Complex64>>,
    pub SHA_R: Option<Array5<Complex64>>,
}

impl Operators {
    pub fn get(&self, kind: OperatorKind) -> Option<ArrayViewD<'_, Complex64>> {
        match kind {
            OperatorKind::HH => Some(self.HH_R.view().into_dyn()),
            OperatorKind::AA => self.AA_R.as_ref().map(|x| x.view().into_dyn()),
            OperatorKind::BB => self.BB_R.as_ref().map(|x| x.view().into_dyn()),
            OperatorKind::CC => self.CC_R.as_ref().map(|x| x.view().into_dyn()),
            OperatorKind::SS => self.SS_R.as_ref().map(|x| x.view().into_dyn()),
            OperatorKind::FF => self.FF_R.as_ref().map(|x| x.view().into_dyn()),
            OperatorKind::SA => self.SA_R.as_ref().map(|x| x.view().into_dyn()),
            OperatorKind::SHA => self.SHA_R.as_ref().map(|x| x.view().into_dyn()),
        }
    }

    pub fn has(&self, kind: OperatorKind) -> bool {
        self.get(kind).is_some()
    }
}

/// A finalized tight-binding model.
#[allow(non_snake_case)]
#[derive(Debug)]
pub struct System {
    num_wann: usize,
    lattice: LatticeVectors,
    iRvec: Array2<isize>,
    Ndegen: Array1<usize>,
    pub operators: Operators,
    cRvec: OnceLock<Array2<f64>>,
    cell_volume: OnceLock<f64>,
    nk_fft_min: OnceLock<[usize; 3]>,
    r_index: OnceLock<HashMap<[isize; 3], usize>>,
}

#[allow(non_snake_case)]
impl System {
    pub fn num_wann(&self) -> usize {
        self.num_wann
    }

    pub fn nRvec(&self) -> usize {
        self.iRvec.nrows()
    }

    pub fn iRvec(&self) -> &Array2<isize> {
        &self.iRvec
    }

    pub fn Ndegen(&self) -> &Array1<usize> {
        &self.Ndegen
    }

    pub fn lattice(&self) -> &LatticeVectors {
        &self.lattice
    }

    pub fn real_lattice(&self) -> &Array2<f64> {
        &self.lattice.real
    }

    pub fn recip_lattice(&self) -> &Array2<f64> {
        &self.lattice.recip
    }

    /// Cartesian R-vectors, one per row.
    pub fn cRvec(&self) -> &Array2<f64> {
        self.cRvec.get_or_init(|| self.lattice.cartesian(&self.iRvec))
    }

    pub fn cell_volume(&self) -> Result<f64> {
        if let Some(v) = self.cell_volume.get() {
            return Ok(*v);
        }
        let v = self.lattice.cell_volume()?;
        Ok(*self.cell_volume.get_or_init(|| v))
    }

    /// Smallest FFT grid on which the R-vectors do not alias.
    pub fn nk_fft_min(&self) -> Result<[usize; 3]> {
        if let Some(fft) = self.nk_fft_min.get() {
            return Ok(*fft);
        }
        let fft = nk_fft_min(&self.iRvec)?;
        info!("Minimal Number of K points in FFT grid: {:?}", fft);
        Ok(*self.nk_fft_min.get_or_init(|| fft))
    }

    /// Row of `R` in [`System::iRvec`].
    pub fn index_R(&self, R: [isize; 3]) -> Option<usize> {
        self.r_index
            .get_or_init(|| {
                self.iRvec
                    .outer_iter()
                    .enumerate()
                    .map(|(i, r)| ([r[0], r[1], r[2]], i))
                    .collect()
            })
            .get(&R)
            .cloned()
    }

    pub fn has(&self, kind: OperatorKind) -> bool {
        self.operators.has(kind)
    }

    pub fn operator(&self, kind: OperatorKind) -> Result<ArrayViewD<'_, Complex64>> {
        self.operators.get(kind).ok_or(TbError::MissingOperator(kind))
    }

    pub fn gen_ham<S: Data<Elem = f64>>(&self, kvec: &ArrayBase<S, Ix1>) -> Result<Array2<Complex64>> {
        //! 将实空间的哈密顿量变换到倒空间
        //!
        //! $$H_{mn}(\bm k)=\sum_{\bm R} H_{mn}(\bm R)\, e^{2\pi i\bm k\cdot\bm R}$$
        //!
        //! 其中 kvec 是约化坐标. 这里 Ndegen 已经在 HH_R 中除过了.
        if kvec.len() != 3 {
            return Err(TbError::DimensionMismatch {
                context: "k-vector".to_string(),
                expected: 3,
                found: kvec.len(),
            });
        }
        let phase = self
            .iRvec
            .mapv(|x| x as f64)
            .dot(kvec)
            .mapv(|x| Complex64::new(0.0, 2.0 * PI * x).exp());
        let nw = self.num_wann;
        let mut hamk = Array2::<Complex64>::zeros((nw, nw));
        for (ir, p) in phase.iter().enumerate() {
            hamk.scaled_add(*p, &self.operators.HH_R.index_axis(Axis(2), ir));
        }
        Ok(hamk)
    }

    /// Largest $|O_{mn}(\bm R) - O_{nm}(-\bm R)^*|$ over the R-vectors whose
    /// mirror is also present.
    pub fn hermiticity_deviation(&self, kind: OperatorKind) -> Result<f64> {
        let op = self.operator(kind)?;
        let mut deviation = 0.0_f64;
        for (ir, r) in self.iRvec.outer_iter().enumerate() {
            let Some(jr) = self.index_R([-r[0], -r[1], -r[2]]) else {
                continue;
            };
            let a = op.index_axis(Axis(2), ir);
            let mut b = op.index_axis(Axis(2), jr);
            b.swap_axes(0, 1);
            for (x, y) in a.iter().zip(b.iter()) {
                deviation = deviation.max((x - y.conj()).norm());
            }
        }
        Ok(deviation)
    }

    /// Check every loaded operator that is Hermitian by construction.
    pub fn check_hermiticity(&self, tol: f64) -> Result<()> {
        for kind in OperatorKind::ALL {
            if !kind.is_hermitian() || !self.has(kind) {
                continue;
            }
            let deviation = self.hermiticity_deviation(kind)?;
            if deviation > tol {
                return Err(TbError::NotHermitian {
                    context: format!("{}_R", kind),
                    deviation,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fourier::FourierInterpolator;
    use crate::gauge::{hermitize_q, GaugeRotation};
    use crate::options::{ConservationPolicy, FftMethod};
    use crate::wigner_seitz::wigner_seitz;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, IxDyn};

    fn chain() -> LatticeVectors {
        LatticeVectors::from_real(array![[1.0, 0.0, 0.0], [0.0, 10.0, 0.0], [0.0, 0.0, 10.0]]).unwrap()
    }

    fn mesh_1d(n: usize) -> Vec<[usize; 3]> {
        (0..n).map(|i| [i, 0, 0]).collect()
    }

    /// Two decoupled chains with nearest-neighbour hopping `t = 1`.
    fn chain_hh_q(n: usize) -> ArrayD<Complex64> {
        let mut q = ArrayD::<Complex64>::zeros(IxDyn(&[n, 2, 2]));
        for ik in 0..n {
            let e = 2.0 * (2.0 * PI * ik as f64 / n as f64).cos();
            q[[ik, 0, 0]] = Complex64::new(e, 0.0);
            q[[ik, 1, 1]] = Complex64::new(e, 0.0);
        }
        q
    }

    fn chain_system(use_ws: bool) -> System {
        let lat = chain();
        let mp_grid = [8, 1, 1];
        let (irvec, ndegen) = wigner_seitz(mp_grid, &lat);
        let fourier = FourierInterpolator::new(mp_grid, mesh_1d(8), irvec.clone(), ndegen.clone(), FftMethod::Fft, None).unwrap();
        let hh = fourier.q_to_r(&chain_hh_q(8)).unwrap();
        let builder = SystemBuilder::new()
            .set_lattice(lat.clone(), irvec.clone(), ndegen)
            .unwrap()
            .load_operator(OperatorKind::HH, hh)
            .unwrap();
        let builder = if use_ws {
            let centres = array![[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]];
            let map = WsDistMap::generate(&irvec, &centres, mp_grid, &lat, ConservationPolicy::Fail).unwrap();
            builder.apply_ws_map(&map).unwrap()
        } else {
            builder
        };
        builder.finalize().unwrap()
    }

    #[test]
    fn chain_dispersion_round_trip() {
        for use_ws in [false, true] {
            let system = chain_system(use_ws);
            for k in [0.0, 0.13, 0.31, 0.5, 0.77] {
                let hamk = system.gen_ham(&array![k, 0.2, -0.4]).unwrap();
                let e = 2.0 * (2.0 * PI * k).cos();
                assert_abs_diff_eq!(hamk[[0, 0]].re, e, epsilon = 1e-10);
                assert_abs_diff_eq!(hamk[[1, 1]].re, e, epsilon = 1e-10);
                assert_abs_diff_eq!(hamk[[0, 0]].im, 0.0, epsilon = 1e-10);
                assert_abs_diff_eq!(hamk[[0, 1]].norm(), 0.0, epsilon = 1e-10);
            }
            assert!(system.check_hermiticity(1e-12).is_ok());
        }
    }

    #[test]
    fn remap_resets_degeneracy() {
        let plain = chain_system(false);
        assert_eq!(plain.nRvec(), 9);
        assert_eq!(plain.Ndegen()[plain.index_R([4, 0, 0]).unwrap()], 2);
        let remapped = chain_system(true);
        assert!(remapped.Ndegen().iter().all(|&d| d == 1));
        assert!(remapped.index_R([4, 0, 0]).is_some());
        assert!(remapped.index_R([-4, 0, 0]).is_some());
        assert!(remapped.index_R([7, 0, 0]).is_none());
    }

    #[test]
    fn derived_quantities() {
        let system = chain_system(false);
        assert_abs_diff_eq!(system.cell_volume().unwrap(), 100.0, epsilon = 1e-10);
        assert_eq!(system.nk_fft_min().unwrap(), [9, 1, 1]);
        assert_eq!(system.nk_fft_min().unwrap(), [9, 1, 1]);
        let ir = system.index_R([-3, 0, 0]).unwrap();
        assert_abs_diff_eq!(system.cRvec()[[ir, 0]], -3.0);
        assert!(system.has(OperatorKind::HH));
        assert!(!system.has(OperatorKind::AA));
        assert!(matches!(
            system.operator(OperatorKind::SS),
            Err(TbError::MissingOperator(OperatorKind::SS))
        ));
    }

    #[test]
    fn hermitian_after_gauge_and_fourier() {
        let lat = chain();
        let mp_grid = [6, 1, 1];
        let (irvec, ndegen) = wigner_seitz(mp_grid, &lat);
        let nk = 6;
        let mut v = Vec::new();
        for ik in 0..nk {
            let t = 2.0 * PI * ik as f64 / nk as f64;
            let (s, c) = (0.7 * t).sin_cos();
            v.push(array![
                [Complex64::new(c, 0.0), Complex64::new(0.0, s)],
                [Complex64::new(0.0, s), Complex64::new(c, 0.0)]
            ]);
        }
        let rot = GaugeRotation::new(2, vec![0; nk], vec![2; nk], v).unwrap();
        let mut hq = ArrayD::<Complex64>::zeros(IxDyn(&[nk, 2, 2]));
        for ik in 0..nk {
            let t = 2.0 * PI * ik as f64 / nk as f64;
            let e = array![t.cos(), 1.0 + 0.5 * t.sin()];
            let h = rot.to_wannier_gauge_diag(e.view(), ik, ik).unwrap();
            hq.index_axis_mut(Axis(0), ik).assign(&h);
        }
        let hq = hermitize_q(&hq);
        let fourier = FourierInterpolator::new(mp_grid, mesh_1d(nk), irvec.clone(), ndegen.clone(), FftMethod::Direct, None).unwrap();
        let system = SystemBuilder::new()
            .set_lattice(lat, irvec, ndegen)
            .unwrap()
            .load_operator(OperatorKind::HH, fourier.q_to_r(&hq).unwrap())
            .unwrap()
            .finalize()
            .unwrap();
        assert!(system.hermiticity_deviation(OperatorKind::HH).unwrap() < 1e-12);
        assert!(system.check_hermiticity(1e-12).is_ok());
        // the model reproduces H(k) on the mesh
        let hamk = system.gen_ham(&array![2.0 / 6.0, 0.0, 0.0]).unwrap();
        for (a, b) in hamk.iter().zip(hq.index_axis(Axis(0), 2).iter()) {
            assert!((a - b).norm() < 1e-10);
        }
    }

    #[test]
    fn broken_hermiticity_is_reported() {
        let irvec = array![[-1, 0, 0], [0, 0, 0], [1, 0, 0]];
        let mut hh = ArrayD::<Complex64>::zeros(IxDyn(&[1, 1, 3]));
        hh[[0, 0, 0]] = Complex64::new(1.0, 0.0);
        hh[[0, 0, 2]] = Complex64::new(0.5, 0.0);
        let system = SystemBuilder::new()
            .set_lattice(chain(), irvec, Array1::ones(3))
            .unwrap()
            .load_operator(OperatorKind::HH, hh)
            .unwrap()
            .finalize()
            .unwrap();
        assert_abs_diff_eq!(system.hermiticity_deviation(OperatorKind::HH).unwrap(), 0.5);
        assert!(matches!(system.check_hermiticity(1e-8), Err(TbError::NotHermitian { .. })));
    }

    #[test]
    fn stages_are_enforced() {
        let hh = ArrayD::<Complex64>::zeros(IxDyn(&[1, 1, 1]));
        let err = SystemBuilder::new().load_operator(OperatorKind::HH, hh.clone()).unwrap_err();
        assert!(matches!(err, TbError::InvalidState { found: "Uninitialized", .. }));

        let builder = SystemBuilder::new()
            .set_lattice(chain(), array![[0, 0, 0]], Array1::ones(1))
            .unwrap();
        assert_eq!(builder.stage(), Stage::LatticeSet);
        assert!(matches!(builder.clone().finalize(), Err(TbError::InvalidState { .. })));
        assert!(matches!(
            builder.clone().set_lattice(chain(), array![[0, 0, 0]], Array1::ones(1)),
            Err(TbError::InvalidState { .. })
        ));
        let map = WsDistMap::from_lines(&array![[0, 0, 0]], 1, &["0 0 0 0"], ConservationPolicy::Fail).unwrap();
        assert!(matches!(builder.clone().apply_ws_map(&map), Err(TbError::InvalidState { .. })));

        let aa = ArrayD::<Complex64>::zeros(IxDyn(&[1, 1, 1, 3]));
        let loaded = builder.load_operator(OperatorKind::AA, aa).unwrap();
        assert!(loaded.has(OperatorKind::AA));
        assert!(matches!(
            loaded.clone().finalize(),
            Err(TbError::MissingOperator(OperatorKind::HH))
        ));
        let remapped = loaded.load_operator(OperatorKind::HH, hh).unwrap().apply_ws_map(&map).unwrap();
        assert_eq!(remapped.stage(), Stage::WSRemapped);
        assert!(matches!(remapped.clone().apply_ws_map(&map), Err(TbError::InvalidState { .. })));
        let system = remapped.finalize().unwrap();
        assert!(system.operators.AA_R.is_some());
        assert!(system.operators.SA_R.is_none());
    }

    #[test]
    fn shapes_are_validated() {
        let builder = SystemBuilder::new()
            .set_lattice(chain(), array![[0, 0, 0], [1, 0, 0]], Array1::ones(2))
            .unwrap();
        let wrong_nr = ArrayD::<Complex64>::zeros(IxDyn(&[2, 2, 3]));
        assert!(builder.clone().load_operator(OperatorKind::HH, wrong_nr).is_err());
        let wrong_rank = ArrayD::<Complex64>::zeros(IxDyn(&[2, 2, 2]));
        assert!(builder.clone().load_operator(OperatorKind::SA, wrong_rank).is_err());
        let hh = ArrayD::<Complex64>::zeros(IxDyn(&[2, 2, 2]));
        let other_nw = ArrayD::<Complex64>::zeros(IxDyn(&[3, 3, 2, 3]));
        assert!(builder.load_operator(OperatorKind::HH, hh).unwrap().load_operator(OperatorKind::AA, other_nw).is_err());

        let dup = SystemBuilder::new().set_lattice(chain(), array![[0, 0, 0], [0, 0, 0]], Array1::ones(2));
        assert!(dup.is_err());
        let zero = SystemBuilder::new().set_lattice(chain(), array![[0, 0, 0]], Array1::zeros(1));
        assert!(zero.is_err());
    }
}
