//! Latent-space [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process)
//! surrogate modeling for parametric reduced-order models.
//!
//! A snapshot matrix is compressed into a handful of latent modes by an
//! external modal decomposition (POD or a constrained variant), and the
//! latent coefficient trajectories are regressed against the design
//! parameters with exact Gaussian processes, one per mode or jointly over
//! all of them. Predictions at new parameter points return both the latent
//! amplitudes and their posterior uncertainty, and new observations can be
//! appended afterwards, with or without retraining.
//!
//! The surrogate is implemented by [`GprRom`] parameterized by [`GprConfig`].
//!
//! ```
//! use ndarray::{array, Array, Array1, Array2, ArrayView2, Axis};
//! use rom_gpr::{
//!     DecompositionOptions, GprConfig, GprRom, ModalBasis, ModalDecomposition, Result,
//!     ScaleScheme,
//! };
//!
//! // Decompositions are pluggable; this one hands back precomputed modes.
//! struct PrecomputedPod {
//!     basis: Array2<f64>,
//!     coefficients: Array2<f64>,
//! }
//!
//! impl ModalDecomposition for PrecomputedPod {
//!     fn scale_data(&self, x: &ArrayView2<f64>, _scheme: ScaleScheme) -> Result<Array2<f64>> {
//!         Ok(x.to_owned())
//!     }
//!     fn decompose(
//!         &self,
//!         _x0: &ArrayView2<f64>,
//!         _opts: &DecompositionOptions,
//!     ) -> Result<ModalBasis> {
//!         Ok(ModalBasis {
//!             basis: self.basis.to_owned(),
//!             coefficients: self.coefficients.to_owned(),
//!             explained_variance: Array1::from_elem(self.coefficients.ncols(), 99.9),
//!         })
//!     }
//!     fn reconstruct(&self, basis: &ModalBasis, a: &ArrayView2<f64>) -> Result<Array2<f64>> {
//!         Ok(basis.basis.dot(&a.t()))
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     // 8 snapshots of a 4-component state, driven by one design parameter
//!     let p = Array::linspace(0., 3., 8).insert_axis(Axis(1));
//!     let a = p.mapv(|v: f64| (1.2 * v).sin() + 2.);
//!     let ur = Array2::from_elem((4, 1), 0.5);
//!     let x = ur.dot(&a.t());
//!
//!     let decomposer = PrecomputedPod {
//!         basis: ur,
//!         coefficients: a,
//!     };
//!     let config = GprConfig {
//!         max_iter: 50,
//!         ..GprConfig::default()
//!     };
//!     let mut rom = GprRom::new(x, p, decomposer, config)?;
//!     rom.fit()?;
//!
//!     let (amplitudes, stddev) = rom.predict(&array![[1.5]])?;
//!     assert_eq!(amplitudes.dim(), (1, 1));
//!     assert!(stddev[[0, 0]] >= 0.);
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod bank;
mod basis;
pub mod correlation_models;
mod decomposition;
mod errors;
pub mod mean_models;
mod model;
mod scaling;
mod surrogate;
mod training;

mod utils;

pub use bank::*;
pub use basis::*;
pub use correlation_models::{CorrelationModel, Matern32Corr, Matern52Corr, SquaredExponentialCorr};
pub use decomposition::*;
pub use errors::*;
pub use mean_models::{ConstantMean, LinearMean, RegressionModel};
pub use model::*;
pub use scaling::*;
pub use surrogate::*;
pub use training::*;
