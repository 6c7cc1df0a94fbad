//! Contract of the external modal decomposition collaborator.
//!
//! The surrogate never computes the reduced basis itself: snapshot scaling,
//! the POD/CPOD decomposition and the basis-to-full-state reconstruction are
//! delegated to an implementation of [`ModalDecomposition`] supplied at
//! construction.

use crate::errors::Result;
use crate::scaling::ScaleScheme;
use ndarray::{Array1, Array2, ArrayView2};

/// Decomposition family used to extract the reduced basis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum DecompType {
    /// Proper orthogonal decomposition
    #[default]
    Pod,
    /// Constrained proper orthogonal decomposition
    CPod,
}

/// How the number of retained modes is chosen.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ModeSelection {
    /// Retain enough modes to explain the given percentage of variance
    Variance(f64),
    /// Retain a fixed number of modes
    Number(usize),
}

impl Default for ModeSelection {
    fn default() -> Self {
        ModeSelection::Variance(99.)
    }
}

/// Options forwarded verbatim to the decomposition collaborator.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DecompositionOptions {
    /// Decomposition family
    pub decomp_type: DecompType,
    /// Mode retention rule
    pub select_modes: ModeSelection,
    /// Constrained solver name, only meaningful for [`DecompType::CPod`]
    pub solver: String,
    /// Absolute accuracy of the constrained solver
    pub abstol: f64,
}

impl Default for DecompositionOptions {
    fn default() -> Self {
        DecompositionOptions {
            decomp_type: DecompType::default(),
            select_modes: ModeSelection::default(),
            solver: "ECOS".to_string(),
            abstol: 1e-3,
        }
    }
}

/// Product of the decomposition: spatial basis, coefficients and the
/// variance explained by each retained mode.
#[derive(Clone, Debug)]
pub struct ModalBasis {
    /// Orthonormal spatial basis `Ur` (n, r)
    pub basis: Array2<f64>,
    /// Coefficient matrix `Ar` (p, r)
    pub coefficients: Array2<f64>,
    /// Explained variance per retained mode (r,)
    pub explained_variance: Array1<f64>,
}

/// External collaborator producing and consuming the reduced basis.
pub trait ModalDecomposition {
    /// Center/scale the raw snapshot matrix before decomposition.
    fn scale_data(&self, x: &ArrayView2<f64>, scheme: ScaleScheme) -> Result<Array2<f64>>;

    /// Decompose the scaled snapshot matrix into a [`ModalBasis`].
    fn decompose(&self, x0: &ArrayView2<f64>, opts: &DecompositionOptions) -> Result<ModalBasis>;

    /// Map latent coefficients `a` (n, r) back to full-state space (n_state, n).
    fn reconstruct(&self, basis: &ModalBasis, a: &ArrayView2<f64>) -> Result<Array2<f64>>;
}
