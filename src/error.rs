//! src/error.rs
//! Custom error type for the whole crate. File/record errors abort the model
//! construction immediately; numeric consistency failures are raised once per
//! whole operation, never per element.

use thiserror::Error;
use crate::system::OperatorKind;

/// The primary error type for all fallible operations in this library.
#[derive(Error, Debug)]
pub enum TbError {
    // --- I/O and Parsing Errors ---
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse data from file '{file}': {message}")]
    FileParse { file: String, message: String },

    /// The requested file does not exist. This is the only error that
    /// triggers a fallback to an alternate input format.
    #[error("Resource '{path}' does not exist")]
    MissingResource { path: String },

    #[error("Invalid number of components {ncomp} in '{file}', expected 1, 3 or 9")]
    InvalidComponentCount { file: String, ncomp: usize },

    // --- Shapes and dimensions ---
    #[error("Dimension mismatch for '{context}': expected {expected}, got {found}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Array shape error")]
    Shape(#[from] ndarray::ShapeError),

    // --- Linear Algebra ---
    #[error("Linear algebra operation failed")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    // --- Numerical consistency ---
    #[error("Real and reciprocal lattices are not dual: |A·Bᵀ/2π - I| = {deviation:e}")]
    LatticeDuality { deviation: f64 },

    #[error("'{context}' breaks Hermiticity, deviation {deviation:e}")]
    NotHermitian { context: String, deviation: f64 },

    #[error("Weight of R-vector #{ir} is not conserved by the minimal-distance map, check sum {deviation:e}")]
    WeightConservation { ir: usize, deviation: f64 },

    #[error("Minimal-distance remap changed Σ_R of the tensor by {deviation:e}")]
    SumRuleViolated { deviation: f64 },

    #[error("FFT grid {fft:?} is too small: R-vectors overlap modulo the grid")]
    FftIncompatible { fft: [usize; 3] },

    #[error("Finite-difference b-vectors are inconsistent: {0}")]
    BVectorShells(String),

    // --- Model life cycle ---
    #[error("Invalid construction order: expected stage {expected}, but the model is at {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Operator {0:?} was not loaded")]
    MissingOperator(OperatorKind),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// A specialized `Result` type for this library's operations.
pub type Result<T> = std::result::Result<T, TbError>;
