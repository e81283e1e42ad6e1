//! Configuration of the model construction.
use serde::{Deserialize, Serialize};

use crate::error::{Result, TbError};

/// What to do when the weights of the minimal-distance map do not add up
/// to one for some original R-vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConservationPolicy {
    /// Log a warning and keep going (wannier90 compatible).
    #[default]
    Warn,
    Fail,
}

/// Quadratic form used by the Wigner-Seitz search, with the lattice
/// vectors stored as the rows of `A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WsMetric {
    /// $A^T A$, the Gram matrix of the columns of `A`. Reproduces the R-vector
    /// sets of existing `_tb.dat` files.
    #[default]
    LatticeColumns,
    /// $A A^T$, the Cartesian metric of the lattice vectors.
    LatticeRows,
}

/// Back end of the k -> R transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FftMethod {
    #[default]
    Fft,
    /// Plain double sum over k-points and R-vectors.
    Direct,
}

/// Size of the worker pool used by the `.mmn` parser and the Fourier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parallelism {
    pub num_threads: usize,
}

impl Default for Parallelism {
    fn default() -> Self {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Parallelism { num_threads }
    }
}

impl Parallelism {
    pub fn new(num_threads: usize) -> Self {
        Parallelism { num_threads }
    }

    pub fn serial() -> Self {
        Parallelism { num_threads: 1 }
    }

    pub fn build_pool(&self) -> Result<rayon::ThreadPool> {
        if self.num_threads == 0 {
            return Err(TbError::InvalidOption(
                "the worker pool needs at least one thread".to_string(),
            ));
        }
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
            .map_err(|e| TbError::ThreadPool(e.to_string()))
    }
}

/// Options of [`System::from_w90`](crate::System::from_w90).
///
/// ```
/// use wannier_tb::W90Options;
/// let opts = W90Options::default().with_berry(true).with_use_ws(false);
/// assert!(opts.berry && !opts.use_ws);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct W90Options {
    /// Position operator `AA`.
    pub berry: bool,
    /// Spin operator `SS`.
    pub spin: bool,
    /// Orbital moment: `AA`, `BB` and `CC`.
    pub morb: bool,
    /// Spin Hall conductivity: `AA`, `SS`, `SA` and `SHA`.
    pub shc: bool,
    pub use_ws: bool,
    pub transl_inv: bool,
    pub ws_metric: WsMetric,
    pub fft: FftMethod,
    pub parallelism: Parallelism,
    pub conservation: ConservationPolicy,
    /// Read `.spn` as text instead of Fortran binary.
    pub formatted_spn: bool,
    /// Read `.uHu`, `.uIu`, `.sHu` and `.sIu` as text.
    pub formatted_uxu: bool,
}

impl Default for W90Options {
    fn default() -> Self {
        W90Options {
            berry: false,
            spin: false,
            morb: false,
            shc: false,
            use_ws: true,
            transl_inv: true,
            ws_metric: WsMetric::default(),
            fft: FftMethod::default(),
            parallelism: Parallelism::default(),
            conservation: ConservationPolicy::default(),
            formatted_spn: false,
            formatted_uxu: false,
        }
    }
}

impl W90Options {
    pub fn with_berry(mut self, berry: bool) -> Self {
        self.berry = berry;
        self
    }
    pub fn with_spin(mut self, spin: bool) -> Self {
        self.spin = spin;
        self
    }
    pub fn with_morb(mut self, morb: bool) -> Self {
        self.morb = morb;
        self
    }
    pub fn with_shc(mut self, shc: bool) -> Self {
        self.shc = shc;
        self
    }
    pub fn with_use_ws(mut self, use_ws: bool) -> Self {
        self.use_ws = use_ws;
        self
    }
    pub fn with_transl_inv(mut self, transl_inv: bool) -> Self {
        self.transl_inv = transl_inv;
        self
    }
    pub fn with_ws_metric(mut self, ws_metric: WsMetric) -> Self {
        self.ws_metric = ws_metric;
        self
    }
    pub fn with_fft(mut self, fft: FftMethod) -> Self {
        self.fft = fft;
        self
    }
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.parallelism = Parallelism::new(num_threads);
        self
    }
    pub fn with_conservation(mut self, conservation: ConservationPolicy) -> Self {
        self.conservation = conservation;
        self
    }
    pub fn with_formatted(mut self, spn: bool, uxu: bool) -> Self {
        self.formatted_spn = spn;
        self.formatted_uxu = uxu;
        self
    }

    pub fn need_aa(&self) -> bool {
        self.berry || self.morb || self.shc
    }
    pub fn need_bb(&self) -> bool {
        self.morb
    }
    pub fn need_cc(&self) -> bool {
        self.morb
    }
    pub fn need_ss(&self) -> bool {
        self.spin || self.shc
    }
    pub fn need_sa(&self) -> bool {
        self.shc
    }
    pub fn need_sha(&self) -> bool {
        self.shc
    }
}

/// Options of [`System::from_r_files`](crate::System::from_r_files), which
/// reads operators already transformed to real space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RFileOptions {
    pub aa: bool,
    pub bb: bool,
    pub cc: bool,
    pub ss: bool,
    pub ff: bool,
    pub sa: bool,
    pub sha: bool,
    pub use_ws: bool,
    /// `seedname_HH_save.info` and `seedname_XX_R.dat` file names.
    pub old_format: bool,
    pub conservation: ConservationPolicy,
}

impl Default for RFileOptions {
    fn default() -> Self {
        RFileOptions {
            aa: false,
            bb: false,
            cc: false,
            ss: false,
            ff: false,
            sa: false,
            sha: false,
            use_ws: true,
            old_format: false,
            conservation: ConservationPolicy::default(),
        }
    }
}

impl RFileOptions {
    pub fn with_aa(mut self, aa: bool) -> Self {
        self.aa = aa;
        self
    }
    pub fn with_bb(mut self, bb: bool) -> Self {
        self.bb = bb;
        self
    }
    /// `CC` is built together with `BB`.
    pub fn with_cc(mut self, cc: bool) -> Self {
        self.cc = cc;
        if cc {
            self.bb = true;
        }
        self
    }
    pub fn with_ss(mut self, ss: bool) -> Self {
        self.ss = ss;
        self
    }
    pub fn with_ff(mut self, ff: bool) -> Self {
        self.ff = ff;
        self
    }
    pub fn with_sa(mut self, sa: bool) -> Self {
        self.sa = sa;
        self
    }
    pub fn with_sha(mut self, sha: bool) -> Self {
        self.sha = sha;
        self
    }
    pub fn with_use_ws(mut self, use_ws: bool) -> Self {
        self.use_ws = use_ws;
        self
    }
    pub fn with_old_format(mut self, old_format: bool) -> Self {
        self.old_format = old_format;
        self
    }
    pub fn with_conservation(mut self, conservation: ConservationPolicy) -> Self {
        self.conservation = conservation;
        self
    }
}
