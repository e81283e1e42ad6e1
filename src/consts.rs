//! Numeric tolerances and search sizes shared by the geometric searches and
//! consistency checks. The values are tuned to reproduce wannier90 output
//! bit for bit, so they must not be changed casually.

/// Two squared distances closer than this are the same shell in the Wigner-Seitz search.
pub const WS_SEARCH_TOLERANCE: f64 = 1e-7;
/// Two distances closer than this are tied images in the minimal-distance search.
pub const WS_DISTANCE_TOLERANCE: f64 = 1e-5;
/// Number of supercells searched on each side in the minimal-distance search (plus one).
pub const WS_SEARCH_SIZE: isize = 2;
/// Supercell shifts scanned by the Wigner-Seitz search, per axis: `-2..=2`.
pub const WS_SUPERCELL_RANGE: isize = 2;
/// Summed absolute error allowed when checking that redistributed weights add up to one.
pub const WEIGHT_CONSERVATION_TOLERANCE: f64 = 1e-12;
/// Max abs error allowed on `Σ_R T(R)` before and after the minimal-distance remap.
pub const SUM_RULE_TOLERANCE: f64 = 1e-12;
/// `|real · recipᵀ / 2π - I|` allowed for lattices read from a checkpoint.
pub const LATTICE_DUALITY_TOLERANCE: f64 = 1e-14;
/// Same check for a reciprocal lattice derived numerically from the real one.
pub const LATTICE_DERIVED_TOLERANCE: f64 = 1e-8;
/// b-vectors whose lengths differ by more than this belong to different shells.
pub const SHELL_LENGTH_TOLERANCE: f64 = 1e-7;
/// `|Σ_s w_s Σ_b b bᵀ - I|` allowed for the finite-difference shell weights.
pub const BVECTOR_COMPLETENESS_TOLERANCE: f64 = 1e-7;
/// Singular values of the shell matrix below this fraction of the largest are dropped.
pub const SVD_CUTOFF: f64 = 1e-10;
/// Largest $|O_{mn}(\bm R) - O_{nm}(-\bm R)^*|$ accepted for operators built Hermitian.
pub const HERMITICITY_TOLERANCE: f64 = 1e-8;
/// Largest imaginary part tolerated on the diagonal of the spin matrices.
pub const SPN_DIAGONAL_TOLERANCE: f64 = 1e-10;
/// Number of degeneracies written per line of a `_tb.dat` file.
pub const TB_DEGENERACY_LINE: usize = 15;
