//! Trend models for the Gaussian process mean. The mean coefficients are not
//! free hyperparameters: they are profiled out in closed form during the
//! likelihood evaluation, so a trend model only has to provide its regression
//! matrix.

use linfa::Float;
use ndarray::{concatenate, Array2, ArrayBase, Axis, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for mean (trend) models used by the latent Gaussian processes.
pub trait RegressionModel<F: Float>: Clone + Copy + Default + fmt::Display + Sync + Send {
    /// Compute the regression matrix at the given points `x` (n, nx),
    /// as a (n, m) array where m is the number of mean coefficients.
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F>;
}

/// A constant mean, the default. One coefficient shared by all points.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct ConstantMean();

impl<F: Float> RegressionModel<F> for ConstantMean {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        Array2::<F>::ones((x.nrows(), 1))
    }
}

impl fmt::Display for ConstantMean {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Constant")
    }
}

/// A linear mean: intercept plus one slope coefficient per input dimension.
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct LinearMean();

impl<F: Float> RegressionModel<F> for LinearMean {
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        let res = concatenate![Axis(1), Array2::ones((x.nrows(), 1)), x.to_owned()];
        res
    }
}

impl fmt::Display for LinearMean {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Linear")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_constant() {
        let x = array![[1., 2.], [3., 4.]];
        let mean: Array2<f64> = ConstantMean().value(&x);
        assert_eq!(mean, array![[1.], [1.]]);
    }

    #[test]
    fn test_linear() {
        let x = array![[1., 2.], [3., 4.]];
        let mean: Array2<f64> = LinearMean().value(&x);
        assert_eq!(mean, array![[1., 1., 2.], [1., 3., 4.]]);
    }
}
