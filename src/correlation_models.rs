//! Stationary correlation kernels parameterized by per-dimension inverse
//! lengthscales `theta`. A kernel evaluates the unit-variance correlation for
//! a batch of componentwise distances; the output scale and the noise live in
//! the covariance assembly, not here.

use linfa::Float;
use ndarray::{Array1, ArrayBase, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for stationary correlation kernels.
pub trait CorrelationModel<F: Float>: Clone + Copy + Default + fmt::Display + Sync + Send {
    /// Compute the correlation for each row of componentwise distances
    /// `d` (n, nx) given inverse lengthscales `theta` (nx,), as a (n,) array
    /// of values in [0, 1].
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F>;
}

/// Squared exponential (RBF) kernel:
/// `r(d) = exp(-0.5 * sum_j theta_j^2 * d_j^2)`
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SquaredExponentialCorr();

impl<F: Float> CorrelationModel<F> for SquaredExponentialCorr {
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F> {
        let mut r = Array1::zeros(d.nrows());
        let half = F::cast(0.5);
        Zip::from(&mut r).and(d.rows()).for_each(|ri, drow| {
            let s = drow
                .iter()
                .zip(theta.iter())
                .fold(F::zero(), |acc, (&dj, &tj)| acc + (tj * dj) * (tj * dj));
            *ri = F::exp(-half * s);
        });
        r
    }
}

impl fmt::Display for SquaredExponentialCorr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SquaredExponential")
    }
}

/// Matern 3/2 kernel:
/// `r(d) = prod_j (1 + sqrt(3) theta_j |d_j|) * exp(-sqrt(3) sum_j theta_j |d_j|)`
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Matern32Corr();

impl<F: Float> CorrelationModel<F> for Matern32Corr {
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F> {
        let sqrt3 = F::cast(3.).sqrt();
        let mut r = Array1::zeros(d.nrows());
        Zip::from(&mut r).and(d.rows()).for_each(|ri, drow| {
            let mut poly = F::one();
            let mut decay = F::zero();
            for (&dj, &tj) in drow.iter().zip(theta.iter()) {
                let a = sqrt3 * tj * dj.abs();
                poly = poly * (F::one() + a);
                decay = decay + a;
            }
            *ri = poly * F::exp(-decay);
        });
        r
    }
}

impl fmt::Display for Matern32Corr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern3/2")
    }
}

/// Matern 5/2 kernel, the default:
/// `r(d) = prod_j (1 + sqrt(5) theta_j |d_j| + 5/3 theta_j^2 d_j^2) * exp(-sqrt(5) sum_j theta_j |d_j|)`
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Matern52Corr();

impl<F: Float> CorrelationModel<F> for Matern52Corr {
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = F>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Array1<F> {
        let sqrt5 = F::cast(5.).sqrt();
        let five_thirds = F::cast(5. / 3.);
        let mut r = Array1::zeros(d.nrows());
        Zip::from(&mut r).and(d.rows()).for_each(|ri, drow| {
            let mut poly = F::one();
            let mut decay = F::zero();
            for (&dj, &tj) in drow.iter().zip(theta.iter()) {
                let a = sqrt5 * tj * dj.abs();
                poly = poly * (F::one() + a + five_thirds * (tj * dj) * (tj * dj));
                decay = decay + a;
            }
            *ri = poly * F::exp(-decay);
        });
        r
    }
}

impl fmt::Display for Matern52Corr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Matern5/2")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use paste::paste;

    #[test]
    fn test_correlation_at_zero_distance() {
        let d = array![[0., 0.]];
        let theta = array![2., 0.5];
        assert_abs_diff_eq!(SquaredExponentialCorr().value(&d, &theta)[0], 1.);
        assert_abs_diff_eq!(Matern32Corr().value(&d, &theta)[0], 1.);
        assert_abs_diff_eq!(Matern52Corr().value(&d, &theta)[0], 1.);
    }

    macro_rules! test_correlation_decay {
        ($corr:ident) => {
            paste! {
                #[test]
                fn [<test_ $corr:snake _decay>]() {
                    let theta = array![1.5];
                    let near = [<$corr Corr>]().value(&array![[0.1]], &theta)[0];
                    let far = [<$corr Corr>]().value(&array![[2.0]], &theta)[0];
                    assert!(near > far);
                    assert!(near < 1.0 && near > 0.0);
                    assert!(far > 0.0);
                }
            }
        };
    }

    test_correlation_decay!(SquaredExponential);
    test_correlation_decay!(Matern32);
    test_correlation_decay!(Matern52);

    #[test]
    fn test_squared_exponential_value() {
        let d = array![[1., 2.]];
        let theta = array![0.5, 0.25];
        // -0.5 * (0.25 + 0.25) = -0.25
        assert_abs_diff_eq!(
            SquaredExponentialCorr().value(&d, &theta)[0],
            f64::exp(-0.25),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_matern52_value() {
        let d = array![[0.8]];
        let theta = array![1.2];
        let a = f64::sqrt(5.) * 1.2 * 0.8;
        let expected = (1. + a + 5. / 3. * (1.2f64 * 0.8).powi(2)) * f64::exp(-a);
        assert_abs_diff_eq!(Matern52Corr().value(&d, &theta)[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_sharper_theta_decays_faster() {
        let d = array![[1.0]];
        let wide = Matern52Corr().value(&d, &array![0.5])[0];
        let sharp = Matern52Corr().value(&d, &array![5.0])[0];
        assert!(wide > sharp);
    }
}
