//! Centering/scaling of the design parameter matrix and of latent coefficient
//! matrices. Statistics are computed once at fit time and reused, unscaled,
//! for every later batch so that new observations stay consistent with the
//! training distribution of the models.

use crate::errors::{Result, RomGprError};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix2};
use ndarray_stats::QuantileExt;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column scaling schemes. Every scheme centers on the column mean; they
/// differ in the divisor applied afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum ScaleScheme {
    /// standard deviation
    Std,
    /// no scaling (divisor 1)
    None,
    /// square root of the standard deviation
    Pareto,
    /// variance over mean
    Vast,
    /// max - min
    Range,
    /// mean
    Level,
    /// max
    Max,
    /// variance
    Variance,
    /// median
    Median,
    /// square root of the mean
    Poisson,
    /// variance times squared excess kurtosis, over mean
    Vast2,
    /// variance times squared excess kurtosis, over max
    Vast3,
    /// variance times squared excess kurtosis, over range
    Vast4,
    /// Euclidean norm of the column
    L2Norm,
}

impl ScaleScheme {
    /// All supported schemes, mostly useful for tests and diagnostics.
    pub const ALL: [ScaleScheme; 14] = [
        ScaleScheme::Std,
        ScaleScheme::None,
        ScaleScheme::Pareto,
        ScaleScheme::Vast,
        ScaleScheme::Range,
        ScaleScheme::Level,
        ScaleScheme::Max,
        ScaleScheme::Variance,
        ScaleScheme::Median,
        ScaleScheme::Poisson,
        ScaleScheme::Vast2,
        ScaleScheme::Vast3,
        ScaleScheme::Vast4,
        ScaleScheme::L2Norm,
    ];
}

impl FromStr for ScaleScheme {
    type Err = RomGprError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "std" => Ok(ScaleScheme::Std),
            "none" => Ok(ScaleScheme::None),
            "pareto" => Ok(ScaleScheme::Pareto),
            "vast" => Ok(ScaleScheme::Vast),
            "range" => Ok(ScaleScheme::Range),
            "level" => Ok(ScaleScheme::Level),
            "max" => Ok(ScaleScheme::Max),
            "variance" => Ok(ScaleScheme::Variance),
            "median" => Ok(ScaleScheme::Median),
            "poisson" => Ok(ScaleScheme::Poisson),
            "vast_2" => Ok(ScaleScheme::Vast2),
            "vast_3" => Ok(ScaleScheme::Vast3),
            "vast_4" => Ok(ScaleScheme::Vast4),
            "l2-norm" => Ok(ScaleScheme::L2Norm),
            _ => Err(RomGprError::UnsupportedScalingScheme(s.to_string())),
        }
    }
}

impl fmt::Display for ScaleScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ScaleScheme::Std => "std",
            ScaleScheme::None => "none",
            ScaleScheme::Pareto => "pareto",
            ScaleScheme::Vast => "vast",
            ScaleScheme::Range => "range",
            ScaleScheme::Level => "level",
            ScaleScheme::Max => "max",
            ScaleScheme::Variance => "variance",
            ScaleScheme::Median => "median",
            ScaleScheme::Poisson => "poisson",
            ScaleScheme::Vast2 => "vast_2",
            ScaleScheme::Vast3 => "vast_3",
            ScaleScheme::Vast4 => "vast_4",
            ScaleScheme::L2Norm => "l2-norm",
        };
        write!(f, "{name}")
    }
}

/// Fitted per-column centering and scaling statistics.
///
/// `apply` and `invert` are exact inverses of each other for any scheme;
/// rows scaled after the fit may fall outside the nominal range of the
/// scheme, which is intended.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Scaling {
    scheme: ScaleScheme,
    center: Array1<f64>,
    scale: Array1<f64>,
}

impl Scaling {
    /// Compute centering/scaling statistics for each column of `m` (p, k).
    pub fn fit(m: &ArrayBase<impl Data<Elem = f64>, Ix2>, scheme: ScaleScheme) -> Result<Scaling> {
        let center = m
            .mean_axis(Axis(0))
            .ok_or_else(|| RomGprError::InvalidValueError("empty matrix".to_string()))?;
        let mut scale = Array1::zeros(m.ncols());
        for (i, col) in m.columns().into_iter().enumerate() {
            scale[i] = column_scale(&col, scheme)?;
        }
        // constant columns (e.g. a single-row fit) get a unit divisor so
        // apply/invert stay finite
        scale.mapv_inplace(|v| if v == 0. { 1. } else { v });
        Ok(Scaling {
            scheme,
            center,
            scale,
        })
    }

    /// Scale `m` column-wise with the stored statistics.
    pub fn apply(&self, m: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        (m - &self.center) / &self.scale
    }

    /// Invert the scaling, recovering the original units.
    pub fn invert(&self, m0: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        m0 * &self.scale + &self.center
    }

    /// Scheme the statistics were computed with
    pub fn scheme(&self) -> ScaleScheme {
        self.scheme
    }

    /// Per-column centers
    pub fn center(&self) -> &Array1<f64> {
        &self.center
    }

    /// Per-column scale factors
    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

fn column_scale(x: &ArrayView1<f64>, scheme: ScaleScheme) -> Result<f64> {
    let mean = x.mean().unwrap_or(f64::NAN);
    let value = match scheme {
        ScaleScheme::Std => x.std(0.),
        ScaleScheme::None => 1.,
        ScaleScheme::Pareto => x.std(0.).sqrt(),
        ScaleScheme::Vast => x.var(0.) / mean,
        ScaleScheme::Range => column_max(x)? - column_min(x)?,
        ScaleScheme::Level => mean,
        ScaleScheme::Max => column_max(x)?,
        ScaleScheme::Variance => x.var(0.),
        ScaleScheme::Median => column_median(x),
        ScaleScheme::Poisson => mean.sqrt(),
        ScaleScheme::Vast2 => x.var(0.) * excess_kurtosis(x).powi(2) / mean,
        ScaleScheme::Vast3 => x.var(0.) * excess_kurtosis(x).powi(2) / column_max(x)?,
        ScaleScheme::Vast4 => {
            x.var(0.) * excess_kurtosis(x).powi(2) / (column_max(x)? - column_min(x)?)
        }
        ScaleScheme::L2Norm => x.dot(x).sqrt(),
    };
    Ok(value)
}

fn column_max(x: &ArrayView1<f64>) -> Result<f64> {
    x.max()
        .map(|v| *v)
        .map_err(|_| RomGprError::InvalidValueError("column has no finite maximum".to_string()))
}

fn column_min(x: &ArrayView1<f64>) -> Result<f64> {
    x.min()
        .map(|v| *v)
        .map_err(|_| RomGprError::InvalidValueError("column has no finite minimum".to_string()))
}

fn column_median(x: &ArrayView1<f64>) -> f64 {
    let mut v = x.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        0.5 * (v[n / 2 - 1] + v[n / 2])
    }
}

/// Fisher (excess) kurtosis with population moments, the scipy default.
fn excess_kurtosis(x: &ArrayView1<f64>) -> f64 {
    let mean = x.mean().unwrap_or(f64::NAN);
    let m2 = x.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(f64::NAN);
    let m4 = x.mapv(|v| (v - mean).powi(4)).mean().unwrap_or(f64::NAN);
    m4 / (m2 * m2) - 3.
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample() -> Array2<f64> {
        array![
            [1.2, 40., -3.],
            [2.5, 38., -1.],
            [3.9, 51., 2.],
            [0.7, 44., 7.],
            [5.1, 47., 4.]
        ]
    }

    #[test]
    fn test_roundtrip_all_schemes() {
        let m = sample();
        for scheme in ScaleScheme::ALL {
            let scaling = Scaling::fit(&m, scheme).expect("scaling fit");
            let m0 = scaling.apply(&m);
            let back = scaling.invert(&m0);
            assert_abs_diff_eq!(back, m, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_unknown_scheme() {
        let err = "autoscale".parse::<ScaleScheme>().unwrap_err();
        assert!(matches!(err, RomGprError::UnsupportedScalingScheme(_)));
    }

    #[test]
    fn test_scheme_names_roundtrip() {
        for scheme in ScaleScheme::ALL {
            let parsed: ScaleScheme = scheme.to_string().parse().unwrap();
            assert_eq!(parsed, scheme);
        }
    }

    #[test]
    fn test_std_scaling_values() {
        let m = array![[1.], [2.], [3.], [4.]];
        let scaling = Scaling::fit(&m, ScaleScheme::Std).unwrap();
        assert_abs_diff_eq!(scaling.center()[0], 2.5);
        // population std of 1..4
        assert_abs_diff_eq!(scaling.scale()[0], f64::sqrt(1.25), epsilon = 1e-12);
    }

    #[test]
    fn test_excess_kurtosis() {
        let x = array![1., 2., 3., 4., 10.];
        // m2 = 10, m4 = 278.8 -> g2 = -0.212
        assert_abs_diff_eq!(excess_kurtosis(&x.view()), -0.212, epsilon = 1e-12);
    }

    #[test]
    fn test_single_row_gets_unit_scale() {
        let m = array![[1.5, -2.]];
        let scaling = Scaling::fit(&m, ScaleScheme::Std).unwrap();
        assert_abs_diff_eq!(scaling.scale()[0], 1.);
        assert_abs_diff_eq!(scaling.scale()[1], 1.);
        let m0 = scaling.apply(&m);
        assert!(m0.iter().all(|v| v.is_finite()));
        assert_abs_diff_eq!(scaling.invert(&m0), m, epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_fit_rows_use_stored_stats() {
        let m = sample();
        let scaling = Scaling::fit(&m, ScaleScheme::Range).unwrap();
        let fresh = array![[100., 100., 100.]];
        let scaled = scaling.apply(&fresh);
        // scaled with the *original* statistics, even far outside the range
        let expected = (&fresh - scaling.center()) / scaling.scale();
        assert_abs_diff_eq!(scaled, expected, epsilon = 1e-12);
    }
}
