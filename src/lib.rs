//! Real-space tight-binding models from Wannier90 output.
//!
//! The crate turns the k-space data of a Wannier90 calculation into
//! operators on a set of lattice vectors $\bm R$:
//!
//! 1: Wigner-Seitz search of the R-vectors belonging to the k-mesh,
//!
//! 2: rotation of band-space matrices to the Wannier gauge and Fourier
//! transform $O(\bm q) \to O(\bm R)$,
//!
//! 3: optional minimal-distance remapping of every hopping, as
//! `use_ws_distance` does in Wannier90.
//!
//! The usual entry points are [`System::from_w90`], [`System::from_r_files`]
//! and [`System::from_tb_file`]; [`SystemBuilder`] assembles a model from
//! tensors that are already in memory.
//!
//! ```no_run
//! use wannier_tb::{System, W90Options};
//! use ndarray::array;
//!
//! let opts = W90Options::default().with_berry(true);
//! let model = System::from_w90("wannier90", &opts).unwrap();
//! let ham = model.gen_ham(&array![0.0, 0.0, 0.0]).unwrap();
//! println!("H(Γ) = {}", ham);
//! ```
pub mod consts;
pub mod error;
pub mod fortran;
pub mod fourier;
pub mod gauge;
pub mod io;
pub mod lattice;
pub mod math;
pub mod operators;
pub mod options;
pub mod system;
pub mod tb_file;
pub mod w90_files;
pub mod wannier90;
pub mod wigner_seitz;
pub mod ws_dist;

pub use crate::error::{Result, TbError};
pub use crate::fourier::FourierInterpolator;
pub use crate::gauge::GaugeRotation;
pub use crate::lattice::LatticeVectors;
pub use crate::options::{ConservationPolicy, FftMethod, Parallelism, RFileOptions, W90Options, WsMetric};
pub use crate::system::{OperatorKind, Operators, Stage, System, SystemBuilder};
pub use crate::w90_files::{BVectors, CheckPoint, Eig, Mmn, Spn, Sxu, Uxu};
pub use crate::ws_dist::WsDistMap;
