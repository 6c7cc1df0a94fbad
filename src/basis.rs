//! Normalization of the decomposition coefficient matrix into an orthonormal
//! latent trajectory `Vr` and per-mode norms `Sigma_r`, decoupling magnitude
//! from direction. The invariant `Ar[:,i] = Sigma_r[i] * Vr[:,i]` holds for
//! every mode and is what predictions are rescaled with.

use crate::errors::{Result, RomGprError};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Unit-norm latent directions and their norms, fixed at fit time.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct LatentBasis {
    /// Column-normalized direction matrix (p, r)
    vr: Array2<f64>,
    /// Per-mode Euclidean norm of the coefficient columns (r,)
    sigma: Array1<f64>,
}

impl LatentBasis {
    /// Build the basis from the coefficient matrix `Ar` (p, r) produced by
    /// the external decomposition.
    pub fn from_coefficients(ar: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<LatentBasis> {
        let r = ar.ncols();
        if r == 0 {
            return Err(RomGprError::InvalidValueError(
                "the decomposition retained no latent mode (r must be >= 1)".to_string(),
            ));
        }
        let mut vr = Array2::zeros(ar.raw_dim());
        let mut sigma = Array1::zeros(r);
        for (i, col) in ar.columns().into_iter().enumerate() {
            let norm = col.dot(&col).sqrt();
            if norm == 0. {
                return Err(RomGprError::DegenerateModeError(format!(
                    "latent mode {i} has zero energy and cannot be normalized"
                )));
            }
            sigma[i] = norm;
            vr.column_mut(i).assign(&col.mapv(|v| v / norm));
        }
        Ok(LatentBasis { vr, sigma })
    }

    /// Number of retained latent modes
    pub fn n_modes(&self) -> usize {
        self.sigma.len()
    }

    /// Unit-norm direction matrix (p, r)
    pub fn directions(&self) -> &Array2<f64> {
        &self.vr
    }

    /// Per-mode norms (r,)
    pub fn norms(&self) -> &Array1<f64> {
        &self.sigma
    }

    /// Convert latent amplitudes (n, r) to normalized-direction space,
    /// dividing each column by its mode norm.
    pub fn to_directions(&self, a: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        a / &self.sigma
    }

    /// Convert normalized-direction values (n, r) back to latent amplitudes.
    pub fn to_amplitudes(&self, v: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        v * &self.sigma
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_invariant() {
        let ar = array![[1., 0.5], [2., -0.5], [2., 0.5]];
        let basis = LatentBasis::from_coefficients(&ar).unwrap();
        assert_eq!(basis.n_modes(), 2);
        let rebuilt = basis.to_amplitudes(basis.directions());
        assert_abs_diff_eq!(rebuilt, ar, epsilon = 1e-12);
        // columns of Vr are unit norm
        for col in basis.directions().columns() {
            assert_abs_diff_eq!(col.dot(&col), 1., epsilon = 1e-12);
        }
        assert_abs_diff_eq!(basis.norms()[0], 3., epsilon = 1e-12);
    }

    #[test]
    fn test_direction_amplitude_roundtrip() {
        let ar = array![[1., 4.], [2., 5.], [3., 6.]];
        let basis = LatentBasis::from_coefficients(&ar).unwrap();
        let v = basis.to_directions(&ar);
        assert_abs_diff_eq!(basis.to_amplitudes(&v), ar, epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_mode() {
        let ar = array![[1., 0.], [2., 0.]];
        let err = LatentBasis::from_coefficients(&ar).unwrap_err();
        assert!(matches!(err, RomGprError::DegenerateModeError(_)));
    }

    #[test]
    fn test_no_modes() {
        let ar = Array2::<f64>::zeros((3, 0));
        assert!(LatentBasis::from_coefficients(&ar).is_err());
    }
}
