use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A (n, dim) matrix stored together with the per-column mean and standard
/// deviation it was normalized with.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub(crate) struct NormalizedData {
    /// normalized data
    pub data: Array2<f64>,
    /// mean vector computed from data
    pub mean: Array1<f64>,
    /// standard deviation vector computed from data
    pub std: Array1<f64>,
}

impl NormalizedData {
    /// Normalize `x` with its own statistics.
    pub fn new(x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> NormalizedData {
        let mean = x.mean_axis(Axis(0)).unwrap();
        let mut std = x.std_axis(Axis(0), 0.);
        std.mapv_inplace(|v| if v == 0. { 1. } else { v });
        let data = (x - &mean) / &std;
        NormalizedData { data, mean, std }
    }

    /// Normalize `x` reusing the statistics of `self`. Used when the training
    /// set is replaced on update: the original statistics must survive so that
    /// trained hyperparameters keep their meaning.
    pub fn with_same_stats(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> NormalizedData {
        let data = (x - &self.mean) / &self.std;
        NormalizedData {
            data,
            mean: self.mean.to_owned(),
            std: self.std.to_owned(),
        }
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }
}

/// Condensed pairwise componentwise absolute differences between training
/// points, with the index pairs needed to scatter correlation values back
/// into the full symmetric matrix.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub(crate) struct DiffMatrix {
    /// Differences as a (n_obs * (n_obs - 1) / 2, dim) array
    pub d: Array2<f64>,
    /// Indices of the differences in the original data array
    pub d_indices: Array2<usize>,
    /// Number of observations
    pub n_obs: usize,
}

impl DiffMatrix {
    /// Compute differences for points given as a (n_obs, dim) array
    pub fn new(x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> DiffMatrix {
        let n_obs = x.nrows();
        let dim = x.ncols();
        let n_pairs = n_obs * n_obs.saturating_sub(1) / 2;
        let mut indices = Array2::<usize>::zeros((n_pairs, 2));
        let mut d = Array2::zeros((n_pairs, dim));
        let mut idx = 0;
        for k in 0..n_obs.saturating_sub(1) {
            let idx0 = idx;
            idx = idx0 + n_obs - k - 1;
            for i in (k + 1)..n_obs {
                let row = idx0 + i - k - 1;
                indices[[row, 0]] = k;
                indices[[row, 1]] = i;
            }
            let diff = &x.slice(s![k, ..]) - &x.slice(s![k + 1..n_obs, ..]);
            d.slice_mut(s![idx0..idx, ..]).assign(&diff);
        }
        d.mapv_inplace(|v| v.abs());

        DiffMatrix { d, d_indices: indices, n_obs }
    }
}

/// Componentwise differences between each row of `x` and each row of `y`,
/// as a (nrows(x) * nrows(y), ncols) array. *Panics* if the column counts
/// disagree.
pub(crate) fn pairwise_differences(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Array2<f64> {
    assert!(x.ncols() == y.ncols());
    let ny = y.nrows();
    let mut result = Array2::zeros((x.nrows() * ny, x.ncols()));
    for (i, x_row) in x.rows().into_iter().enumerate() {
        for (j, y_row) in y.rows().into_iter().enumerate() {
            let mut out = result.row_mut(i * ny + j);
            out.assign(&(&x_row - &y_row));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_normalized_data() {
        let x = array![[1., 2.], [3., 4.]];
        let xnorm = NormalizedData::new(&x);
        assert_eq!(xnorm.ncols(), 2);
        assert_eq!(array![2., 3.], xnorm.mean);
        assert_eq!(array![1., 1.], xnorm.std);
    }

    #[test]
    fn test_normalized_data_constant_column() {
        let x = array![[1., 5.], [1., 7.]];
        let xnorm = NormalizedData::new(&x);
        // zero spread columns get unit scale to stay invertible
        assert_eq!(xnorm.std[0], 1.);
    }

    #[test]
    fn test_with_same_stats() {
        let x = array![[0.], [2.], [4.]];
        let xnorm = NormalizedData::new(&x);
        let more = xnorm.with_same_stats(&array![[0.], [2.], [4.], [8.]]);
        assert_eq!(more.mean, xnorm.mean);
        assert_eq!(more.std, xnorm.std);
        assert_abs_diff_eq!(
            more.data[[3, 0]],
            (8. - 2.) / xnorm.std[0],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_diff_matrix() {
        let xt = array![[0.5], [1.2], [2.0], [3.0]];
        let dm = DiffMatrix::new(&xt);
        assert_eq!(dm.n_obs, 4);
        assert_abs_diff_eq!(
            dm.d,
            array![[0.7], [1.5], [2.5], [0.8], [1.8], [1.]],
            epsilon = 1e-12
        );
        assert_eq!(
            dm.d_indices,
            array![[0, 1], [0, 2], [0, 3], [1, 2], [1, 3], [2, 3]]
        );
    }

    #[test]
    fn test_diff_matrix_single_point() {
        let dm = DiffMatrix::new(&array![[1., 2.]]);
        assert_eq!(dm.n_obs, 1);
        assert_eq!(dm.d.nrows(), 0);
    }

    #[test]
    fn test_pairwise_differences() {
        let x = array![[-0.9486833], [-0.82219219]];
        let y = array![[-1.26491106], [-0.63245553], [0.]];
        assert_abs_diff_eq!(
            pairwise_differences(&x, &y),
            array![
                [0.31622776],
                [-0.31622777],
                [-0.9486833],
                [0.44271887],
                [-0.18973666],
                [-0.82219219]
            ],
            epsilon = 1e-6
        );
    }
}
