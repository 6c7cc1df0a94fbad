//! Exact Gaussian process models over the latent coefficients.
//!
//! Two flavors are provided: [`LatentGp`] regresses a single latent mode and
//! owns its full set of hyperparameters, while [`JointLatentGp`] regresses all
//! modes at once over shared training inputs, with a shared noise level and
//! either shared or per-task kernel hyperparameters.
//!
//! The covariance is assembled as `K = sigma2 * C(theta) + diag(noise)` with a
//! small jitter on the diagonal. The mean coefficients `beta` are profiled out
//! by generalized least squares inside the likelihood evaluation, so the free
//! hyperparameters are the inverse lengthscales `theta`, the output scale
//! `sigma2` and, for a learned Gaussian likelihood, the noise variance.

use crate::correlation_models::CorrelationModel;
use crate::errors::{Result, RomGprError};
use crate::mean_models::RegressionModel;
use crate::training::TrainableModel;
use crate::utils::{pairwise_differences, DiffMatrix, NormalizedData};
use linfa_linalg::{cholesky::*, qr::*, svd::*, triangular::*};
use log::warn;
use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default inverse lengthscale used before training
pub(crate) const DEFAULT_THETA_INIT: f64 = 1e-1;
/// Default output scale used before training
pub(crate) const DEFAULT_SIGMA2_INIT: f64 = 1.;

/// Observation noise attached to a latent model.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum NoiseModel {
    /// Homoskedastic variance learned together with the kernel
    /// hyperparameters, in target units.
    Gaussian {
        /// current noise variance
        variance: f64,
    },
    /// Known per-observation variances in target units. Not optimized; used
    /// when retraining against measured coefficient uncertainties.
    FixedVariance(Array1<f64>),
}

/// Quantities computed during conditioning and reused by every prediction.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub(crate) struct InnerParams {
    /// Profiled mean coefficients (m, 1)
    beta: Array2<f64>,
    /// Weights of the covariance term, `K^-1 (y - F beta)` (n, 1)
    gamma: Array2<f64>,
    /// Cholesky factor of the covariance matrix
    k_chol: Array2<f64>,
    /// Whitened regression matrix `L^-1 F`
    ft: Array2<f64>,
    /// R factor of the QR decomposition of `ft`
    ft_qr_r: Array2<f64>,
}

/// Negative marginal log-likelihood of one task together with the caches
/// needed to predict.
///
/// `fx`: regression matrix at the training points,
/// `rxx`: condensed correlation values at the training pair distances,
/// `x_distances`: pairwise distances between training points,
/// `y`: normalized target column (n, 1),
/// `noise`: per-observation noise variances, normalized units,
/// `nugget`: relative diagonal jitter.
fn task_likelihood(
    fx: &Array2<f64>,
    rxx: &Array1<f64>,
    x_distances: &DiffMatrix,
    y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    sigma2: f64,
    noise: &Array1<f64>,
    nugget: f64,
) -> Result<(f64, InnerParams)> {
    // Set up K
    let n_obs = x_distances.n_obs;
    let mut k_mx = Array2::<f64>::zeros((n_obs, n_obs));
    for (i, ij) in x_distances.d_indices.outer_iter().enumerate() {
        let kij = sigma2 * rxx[i];
        k_mx[[ij[0], ij[1]]] = kij;
        k_mx[[ij[1], ij[0]]] = kij;
    }
    for i in 0..n_obs {
        k_mx[[i, i]] = sigma2 * (1. + nugget) + noise[i];
    }

    // K cholesky decomposition
    let k_chol = k_mx.cholesky()?;
    // Solve generalized least squared problem
    let ft = k_chol.solve_triangular(fx, UPLO::Lower)?;
    let (ft_qr_q, ft_qr_r) = ft.qr()?.into_decomp();

    // Check whether we have an ill-conditionned problem
    let (_, sv_qr_r, _) = ft_qr_r.svd(false, false)?;
    let cond_ft = sv_qr_r[sv_qr_r.len() - 1] / sv_qr_r[0];
    if cond_ft < 1e-10 {
        let (_, sv_f, _) = fx.svd(false, false)?;
        let cond_fx = sv_f[0] / sv_f[sv_f.len() - 1];
        if cond_fx > 1e15 {
            return Err(RomGprError::LikelihoodComputationError(
                "F is too ill conditioned. Poor combination \
                of mean model and observations."
                    .to_string(),
            ));
        } else {
            // ft is too ill conditioned, get out (try different theta)
            return Err(RomGprError::LikelihoodComputationError(
                "ft is too ill conditioned, try another theta again".to_string(),
            ));
        }
    }

    let yt = k_chol.solve_triangular(y, UPLO::Lower)?;
    let beta = ft_qr_r.solve_triangular_into(ft_qr_q.t().dot(&yt), UPLO::Upper)?;
    let rho = yt - ft.dot(&beta);
    let rho_sqr = rho.mapv(|v| v * v).sum();
    let gamma = k_chol.t().solve_triangular_into(rho, UPLO::Upper)?;

    // log|K| is twice the sum of the log diagonal of its Cholesky factor
    let half_logdet = k_chol.diag().mapv(f64::ln).sum();
    let nll = 0.5 * rho_sqr
        + half_logdet
        + 0.5 * n_obs as f64 * (2. * std::f64::consts::PI).ln();

    Ok((
        nll,
        InnerParams {
            beta,
            gamma,
            k_chol,
            ft,
            ft_qr_r,
        },
    ))
}

/// Posterior mean and variance of one task at query points, in normalized
/// target units. `f` is the regression matrix at the query points and
/// `kstar` the cross covariance (n, n_train).
fn task_valvar(
    f: &Array2<f64>,
    kstar: &Array2<f64>,
    inner: &InnerParams,
    sigma2: f64,
) -> Result<(Array1<f64>, Array1<f64>)> {
    let y_ = (f.dot(&inner.beta) + kstar.dot(&inner.gamma)).remove_axis(Axis(1));

    let kstar_t = kstar.t().to_owned();
    let rt = inner.k_chol.solve_triangular(&kstar_t, UPLO::Lower)?;
    let rhs = inner.ft.t().dot(&rt) - &f.t();
    let u = inner.ft_qr_r.t().solve_triangular(&rhs, UPLO::Lower)?;

    let mut var = Array1::from_elem(kstar.nrows(), sigma2)
        - rt.mapv(|v| v * v).sum_axis(Axis(0))
        + u.mapv(|v| v * v).sum_axis(Axis(0));
    // variance might be slightly negative depending on machine precision
    var.mapv_inplace(|v| v.max(0.));
    Ok((y_, var))
}

fn warn_on_duplicate_inputs(x_distances: &DiffMatrix) {
    if x_distances.n_obs > 1 {
        let sums = x_distances.d.sum_axis(Axis(1));
        if sums.iter().any(|s| *s == 0.) {
            warn!("Multiple input points have the same value (at least same row twice)");
        }
    }
}

/// Exact Gaussian process over a single latent mode.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct LatentGp<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> {
    /// Mean model
    mean: Mean,
    /// Correlation kernel
    corr: Corr,
    /// Inverse lengthscales (d,)
    theta: Array1<f64>,
    /// Output scale
    sigma2: f64,
    /// Observation noise
    noise: NoiseModel,
    /// Relative diagonal jitter
    nugget: f64,
    /// Normalized training inputs
    xt_norm: NormalizedData,
    /// Normalized training targets (n, 1)
    yt_norm: NormalizedData,
    /// Training data as given
    training_data: (Array2<f64>, Array1<f64>),
    /// Pairwise distances between training points
    x_distances: DiffMatrix,
    /// Regression matrix at the training points
    fx: Array2<f64>,
    /// Conditioning caches, present in eval mode only
    inner: Option<InnerParams>,
}

impl<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> LatentGp<Mean, Corr> {
    /// Build an unconditioned model on `(x, y)` with default hyperparameters.
    pub fn new(
        mean: Mean,
        corr: Corr,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        noise_init: f64,
        nugget: f64,
    ) -> Result<LatentGp<Mean, Corr>> {
        if x.nrows() != y.len() {
            return Err(RomGprError::ConfigurationError(format!(
                "mismatched training set: {} input points for {} target values",
                x.nrows(),
                y.len()
            )));
        }
        let xt_norm = NormalizedData::new(x);
        let y2 = y.to_owned().insert_axis(Axis(1));
        let yt_norm = NormalizedData::new(&y2);
        let x_distances = DiffMatrix::new(&xt_norm.data);
        warn_on_duplicate_inputs(&x_distances);
        let fx = mean.value(&xt_norm.data);
        Ok(LatentGp {
            mean,
            corr,
            theta: Array1::from_elem(x.ncols(), DEFAULT_THETA_INIT),
            sigma2: DEFAULT_SIGMA2_INIT,
            noise: NoiseModel::Gaussian {
                variance: noise_init,
            },
            nugget,
            xt_norm,
            yt_norm,
            training_data: (x.to_owned(), y.to_owned()),
            x_distances,
            fx,
            inner: None,
        })
    }

    /// Inverse lengthscales
    pub fn theta(&self) -> &Array1<f64> {
        &self.theta
    }

    /// Output scale
    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    /// Current noise model
    pub fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    /// Per-observation noise variances in target units, as conditioning sees
    /// them.
    pub fn noise_variances(&self) -> Array1<f64> {
        match &self.noise {
            NoiseModel::Gaussian { variance } => {
                Array1::from_elem(self.xt_norm.nrows(), *variance)
            }
            NoiseModel::FixedVariance(v) => v.to_owned(),
        }
    }

    /// Training data as given at construction or through `set_train_data`
    pub fn training_data(&self) -> (&Array2<f64>, &Array1<f64>) {
        (&self.training_data.0, &self.training_data.1)
    }

    /// Number of training observations
    pub fn n_obs(&self) -> usize {
        self.xt_norm.nrows()
    }

    /// Override the kernel hyperparameters. Drops the conditioning caches.
    pub fn set_hyperparameters(&mut self, theta: Array1<f64>, sigma2: f64) -> Result<()> {
        if theta.len() != self.theta.len() {
            return Err(RomGprError::ConfigurationError(format!(
                "expected {} inverse lengthscales, got {}",
                self.theta.len(),
                theta.len()
            )));
        }
        self.theta = theta;
        self.sigma2 = sigma2;
        self.inner = None;
        Ok(())
    }

    /// Replace the noise model. Drops the conditioning caches.
    pub fn set_noise(&mut self, noise: NoiseModel) {
        self.noise = noise;
        self.inner = None;
    }

    /// Replace the training set without touching the hyperparameters, then
    /// recondition on the new data. Normalization statistics of the original
    /// fit are kept so that the hyperparameters keep their meaning.
    pub fn set_train_data(
        &mut self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(RomGprError::ConfigurationError(format!(
                "mismatched training set: {} input points for {} target values",
                x.nrows(),
                y.len()
            )));
        }
        self.xt_norm = self.xt_norm.with_same_stats(x);
        let y2 = y.to_owned().insert_axis(Axis(1));
        self.yt_norm = self.yt_norm.with_same_stats(&y2);
        self.x_distances = DiffMatrix::new(&self.xt_norm.data);
        warn_on_duplicate_inputs(&self.x_distances);
        self.fx = self.mean.value(&self.xt_norm.data);
        self.training_data = (x.to_owned(), y.to_owned());
        self.inner = None;
        self.condition()
    }

    /// Drop the conditioning caches (train mode).
    pub fn set_train_mode(&mut self) {
        self.inner = None;
    }

    /// Condition on the training data at the current hyperparameters
    /// (eval mode).
    pub fn set_eval_mode(&mut self) -> Result<()> {
        self.condition()
    }

    /// Predict mean and standard deviation at `x` (n, d), in target units.
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let xnorm = (x - &self.xt_norm.mean) / &self.xt_norm.std;
        self.valvar_norm(&xnorm)
    }

    fn valvar_norm(&self, xnorm: &Array2<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
        let inner = self.inner.as_ref().ok_or_else(|| {
            RomGprError::ModelNotFittedError(
                "latent model is not conditioned, train it or switch to eval mode".to_string(),
            )
        })?;
        let f = self.mean.value(xnorm);
        let kstar = self.cross_covariance(xnorm, &self.theta.view(), self.sigma2);
        let (y_, var) = task_valvar(&f, &kstar, inner, self.sigma2)?;

        let ystd = self.yt_norm.std[0];
        let ymean = self.yt_norm.mean[0];
        let yp = y_.mapv(|v| v * ystd + ymean);
        let sp = var.mapv(|v| v.sqrt() * ystd);
        Ok((yp, sp))
    }

    fn cross_covariance(
        &self,
        xnorm: &Array2<f64>,
        theta: &ndarray::ArrayView1<f64>,
        sigma2: f64,
    ) -> Array2<f64> {
        let dx = pairwise_differences(xnorm, &self.xt_norm.data);
        let r = self.corr.value(&dx, theta);
        let mut kstar = r
            .into_shape((xnorm.nrows(), self.xt_norm.nrows()))
            .unwrap();
        kstar.mapv_inplace(|v| sigma2 * v);
        kstar
    }

    /// Per-observation noise variances in normalized target units.
    fn noise_diag(&self, variance: Option<f64>) -> Result<Array1<f64>> {
        let n = self.xt_norm.nrows();
        let ystd2 = self.yt_norm.std[0] * self.yt_norm.std[0];
        match (&self.noise, variance) {
            (NoiseModel::Gaussian { .. }, Some(v)) => Ok(Array1::from_elem(n, v / ystd2)),
            (NoiseModel::Gaussian { variance }, None) => {
                Ok(Array1::from_elem(n, variance / ystd2))
            }
            (NoiseModel::FixedVariance(v), _) => {
                if v.len() != n {
                    return Err(RomGprError::ConfigurationError(format!(
                        "fixed noise carries {} variances for {} training points",
                        v.len(),
                        n
                    )));
                }
                Ok(v.mapv(|x| x / ystd2))
            }
        }
    }

    /// Split a packed log10 hyperparameter vector into its components.
    fn split(&self, w: &Array1<f64>) -> (Array1<f64>, f64, Option<f64>) {
        let d = self.theta.len();
        let theta = w.slice(s![..d]).mapv(|v| 10f64.powf(v));
        let sigma2 = 10f64.powf(w[d]);
        let noise = match self.noise {
            NoiseModel::Gaussian { .. } => Some(10f64.powf(w[d + 1])),
            NoiseModel::FixedVariance(_) => None,
        };
        (theta, sigma2, noise)
    }

    fn nll_at(&self, theta: &Array1<f64>, sigma2: f64, noise_var: Option<f64>) -> Result<f64> {
        let rxx = self.corr.value(&self.x_distances.d, theta);
        let noise = self.noise_diag(noise_var)?;
        let (nll, _) = task_likelihood(
            &self.fx,
            &rxx,
            &self.x_distances,
            &self.yt_norm.data,
            sigma2,
            &noise,
            self.nugget,
        )?;
        Ok(nll)
    }
}

impl<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> TrainableModel
    for LatentGp<Mean, Corr>
{
    fn n_params(&self) -> usize {
        self.theta.len()
            + 1
            + match self.noise {
                NoiseModel::Gaussian { .. } => 1,
                NoiseModel::FixedVariance(_) => 0,
            }
    }

    fn pack(&self) -> Array1<f64> {
        let mut w = Array1::zeros(self.n_params());
        let d = self.theta.len();
        w.slice_mut(s![..d]).assign(&self.theta.mapv(f64::log10));
        w[d] = self.sigma2.log10();
        if let NoiseModel::Gaussian { variance } = &self.noise {
            w[d + 1] = variance.log10();
        }
        w
    }

    fn unpack(&mut self, w: &Array1<f64>) {
        let (theta, sigma2, noise) = self.split(w);
        self.theta = theta;
        self.sigma2 = sigma2;
        if let Some(variance) = noise {
            self.noise = NoiseModel::Gaussian { variance };
        }
        self.inner = None;
    }

    fn loss(&self, w: &Array1<f64>) -> f64 {
        let (theta, sigma2, noise) = self.split(w);
        self.nll_at(&theta, sigma2, noise).unwrap_or(f64::INFINITY)
    }

    fn mean_noise(&self, w: &Array1<f64>) -> f64 {
        match &self.noise {
            NoiseModel::Gaussian { .. } => 10f64.powf(w[self.theta.len() + 1]),
            NoiseModel::FixedVariance(v) => v.mean().unwrap_or(f64::NAN),
        }
    }

    fn condition(&mut self) -> Result<()> {
        let rxx = self.corr.value(&self.x_distances.d, &self.theta);
        let noise = self.noise_diag(None)?;
        let (_, inner) = task_likelihood(
            &self.fx,
            &rxx,
            &self.x_distances,
            &self.yt_norm.data,
            self.sigma2,
            &noise,
            self.nugget,
        )?;
        self.inner = Some(inner);
        Ok(())
    }

    fn posterior_train_stddev(&self) -> Result<Array2<f64>> {
        let (_, stddev) = self.valvar_norm(&self.xt_norm.data)?;
        Ok(stddev.insert_axis(Axis(1)))
    }
}

/// Exact Gaussian process over all latent modes at once, sharing training
/// inputs and the noise level across tasks.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct JointLatentGp<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> {
    mean: Mean,
    corr: Corr,
    /// Inverse lengthscales, one row shared by all tasks or one row per task
    thetas: Array2<f64>,
    /// Output scales, matching the rows of `thetas`
    sigma2s: Array1<f64>,
    /// Shared noise variance in target units
    noise_variance: f64,
    nugget: f64,
    xt_norm: NormalizedData,
    /// Normalized training targets (n, r)
    yt_norm: NormalizedData,
    training_data: (Array2<f64>, Array2<f64>),
    x_distances: DiffMatrix,
    fx: Array2<f64>,
    /// Conditioning caches per task, present in eval mode only
    inners: Option<Vec<InnerParams>>,
}

impl<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> JointLatentGp<Mean, Corr> {
    /// Build an unconditioned joint model on `(x, y)` where `y` holds one
    /// column per task. With `shared_theta` a single hyperparameter row
    /// drives every task, otherwise each task gets its own row.
    pub fn new(
        mean: Mean,
        corr: Corr,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        shared_theta: bool,
        noise_init: f64,
        nugget: f64,
    ) -> Result<JointLatentGp<Mean, Corr>> {
        if x.nrows() != y.nrows() {
            return Err(RomGprError::ConfigurationError(format!(
                "mismatched training set: {} input points for {} target rows",
                x.nrows(),
                y.nrows()
            )));
        }
        if y.ncols() == 0 {
            return Err(RomGprError::ConfigurationError(
                "joint model needs at least one task".to_string(),
            ));
        }
        let batch = if shared_theta { 1 } else { y.ncols() };
        let xt_norm = NormalizedData::new(x);
        let yt_norm = NormalizedData::new(y);
        let x_distances = DiffMatrix::new(&xt_norm.data);
        warn_on_duplicate_inputs(&x_distances);
        let fx = mean.value(&xt_norm.data);
        Ok(JointLatentGp {
            mean,
            corr,
            thetas: Array2::from_elem((batch, x.ncols()), DEFAULT_THETA_INIT),
            sigma2s: Array1::from_elem(batch, DEFAULT_SIGMA2_INIT),
            noise_variance: noise_init,
            nugget,
            xt_norm,
            yt_norm,
            training_data: (x.to_owned(), y.to_owned()),
            x_distances,
            fx,
            inners: None,
        })
    }

    /// Number of regressed tasks
    pub fn n_tasks(&self) -> usize {
        self.yt_norm.ncols()
    }

    /// Number of training observations
    pub fn n_obs(&self) -> usize {
        self.xt_norm.nrows()
    }

    /// Inverse lengthscale rows (shared or per task)
    pub fn thetas(&self) -> &Array2<f64> {
        &self.thetas
    }

    /// Shared noise variance in target units
    pub fn noise_variance(&self) -> f64 {
        self.noise_variance
    }

    /// Training data as given at construction or through `set_train_data`
    pub fn training_data(&self) -> (&Array2<f64>, &Array2<f64>) {
        (&self.training_data.0, &self.training_data.1)
    }

    fn batch_index(&self, task: usize) -> usize {
        if self.thetas.nrows() == 1 {
            0
        } else {
            task
        }
    }

    /// Replace the training set without touching the hyperparameters, then
    /// recondition on the new data.
    pub fn set_train_data(
        &mut self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<()> {
        if x.nrows() != y.nrows() || y.ncols() != self.n_tasks() {
            return Err(RomGprError::ConfigurationError(format!(
                "mismatched training set: inputs {:?}, targets {:?} for {} tasks",
                x.dim(),
                y.dim(),
                self.n_tasks()
            )));
        }
        self.xt_norm = self.xt_norm.with_same_stats(x);
        self.yt_norm = self.yt_norm.with_same_stats(y);
        self.x_distances = DiffMatrix::new(&self.xt_norm.data);
        warn_on_duplicate_inputs(&self.x_distances);
        self.fx = self.mean.value(&self.xt_norm.data);
        self.training_data = (x.to_owned(), y.to_owned());
        self.inners = None;
        self.condition()
    }

    /// Drop the conditioning caches (train mode).
    pub fn set_train_mode(&mut self) {
        self.inners = None;
    }

    /// Condition on the training data at the current hyperparameters
    /// (eval mode).
    pub fn set_eval_mode(&mut self) -> Result<()> {
        self.condition()
    }

    /// Predict per-task means and standard deviations at `x` (n, d), in
    /// target units, as two (n, r) arrays.
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let xnorm = (x - &self.xt_norm.mean) / &self.xt_norm.std;
        self.valvar_norm(&xnorm)
    }

    fn valvar_norm(&self, xnorm: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
        let inners = self.inners.as_ref().ok_or_else(|| {
            RomGprError::ModelNotFittedError(
                "joint model is not conditioned, train it or switch to eval mode".to_string(),
            )
        })?;
        let f = self.mean.value(xnorm);
        let dx = pairwise_differences(xnorm, &self.xt_norm.data);

        let mut means = Array2::zeros((xnorm.nrows(), self.n_tasks()));
        let mut stddevs = Array2::zeros((xnorm.nrows(), self.n_tasks()));
        for task in 0..self.n_tasks() {
            let b = self.batch_index(task);
            let sigma2 = self.sigma2s[b];
            let r = self.corr.value(&dx, &self.thetas.row(b));
            let mut kstar = r
                .into_shape((xnorm.nrows(), self.xt_norm.nrows()))
                .unwrap();
            kstar.mapv_inplace(|v| sigma2 * v);

            let (y_, var) = task_valvar(&f, &kstar, &inners[task], sigma2)?;
            let ystd = self.yt_norm.std[task];
            let ymean = self.yt_norm.mean[task];
            means
                .column_mut(task)
                .assign(&y_.mapv(|v| v * ystd + ymean));
            stddevs
                .column_mut(task)
                .assign(&var.mapv(|v| v.sqrt() * ystd));
        }
        Ok((means, stddevs))
    }

    /// Split a packed log10 hyperparameter vector into its components.
    fn split(&self, w: &Array1<f64>) -> (Array2<f64>, Array1<f64>, f64) {
        let (b, d) = self.thetas.dim();
        let thetas = w
            .slice(s![..b * d])
            .to_owned()
            .into_shape((b, d))
            .unwrap()
            .mapv(|v| 10f64.powf(v));
        let sigma2s = w.slice(s![b * d..b * d + b]).mapv(|v| 10f64.powf(v));
        let noise = 10f64.powf(w[b * d + b]);
        (thetas, sigma2s, noise)
    }

    fn nll_at(&self, thetas: &Array2<f64>, sigma2s: &Array1<f64>, noise_var: f64) -> Result<f64> {
        let mut total = 0.;
        for task in 0..self.n_tasks() {
            let b = self.batch_index(task);
            let rxx = self
                .corr
                .value(&self.x_distances.d, &thetas.row(b));
            let ystd2 = self.yt_norm.std[task] * self.yt_norm.std[task];
            let noise = Array1::from_elem(self.n_obs(), noise_var / ystd2);
            let y = self
                .yt_norm
                .data
                .column(task)
                .to_owned()
                .insert_axis(Axis(1));
            let (nll, _) = task_likelihood(
                &self.fx,
                &rxx,
                &self.x_distances,
                &y,
                sigma2s[b],
                &noise,
                self.nugget,
            )?;
            total += nll;
        }
        Ok(total)
    }
}

impl<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> TrainableModel
    for JointLatentGp<Mean, Corr>
{
    fn n_params(&self) -> usize {
        let (b, d) = self.thetas.dim();
        b * d + b + 1
    }

    fn pack(&self) -> Array1<f64> {
        let (b, d) = self.thetas.dim();
        let mut w = Array1::zeros(self.n_params());
        w.slice_mut(s![..b * d]).assign(
            &self
                .thetas
                .mapv(f64::log10)
                .into_shape(b * d)
                .unwrap(),
        );
        w.slice_mut(s![b * d..b * d + b])
            .assign(&self.sigma2s.mapv(f64::log10));
        w[b * d + b] = self.noise_variance.log10();
        w
    }

    fn unpack(&mut self, w: &Array1<f64>) {
        let (thetas, sigma2s, noise) = self.split(w);
        self.thetas = thetas;
        self.sigma2s = sigma2s;
        self.noise_variance = noise;
        self.inners = None;
    }

    fn loss(&self, w: &Array1<f64>) -> f64 {
        let (thetas, sigma2s, noise) = self.split(w);
        self.nll_at(&thetas, &sigma2s, noise)
            .unwrap_or(f64::INFINITY)
    }

    fn mean_noise(&self, w: &Array1<f64>) -> f64 {
        let (b, d) = self.thetas.dim();
        10f64.powf(w[b * d + b])
    }

    fn condition(&mut self) -> Result<()> {
        let mut inners = Vec::with_capacity(self.n_tasks());
        for task in 0..self.n_tasks() {
            let b = self.batch_index(task);
            let rxx = self
                .corr
                .value(&self.x_distances.d, &self.thetas.row(b));
            let ystd2 = self.yt_norm.std[task] * self.yt_norm.std[task];
            let noise = Array1::from_elem(self.n_obs(), self.noise_variance / ystd2);
            let y = self
                .yt_norm
                .data
                .column(task)
                .to_owned()
                .insert_axis(Axis(1));
            let (_, inner) = task_likelihood(
                &self.fx,
                &rxx,
                &self.x_distances,
                &y,
                self.sigma2s[b],
                &noise,
                self.nugget,
            )?;
            inners.push(inner);
        }
        self.inners = Some(inners);
        Ok(())
    }

    fn posterior_train_stddev(&self) -> Result<Array2<f64>> {
        let (_, stddev) = self.valvar_norm(&self.xt_norm.data)?;
        Ok(stddev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::Matern52Corr;
    use crate::mean_models::ConstantMean;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};

    fn training_set() -> (Array2<f64>, Array1<f64>) {
        let x = Array::linspace(0., 4., 8).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v: f64| (1.3 * v).sin() + 0.5);
        (x, y)
    }

    fn conditioned_gp() -> LatentGp<ConstantMean, Matern52Corr> {
        let (x, y) = training_set();
        let mut gp =
            LatentGp::new(ConstantMean(), Matern52Corr(), &x, &y, 1e-6, 10. * f64::EPSILON)
                .unwrap();
        // well-conditioned lengthscale for the normalized spacing of the set
        gp.set_hyperparameters(array![1.5], 1.).unwrap();
        gp.set_eval_mode().unwrap();
        gp
    }

    #[test]
    fn test_interpolation_at_training_points() {
        let gp = conditioned_gp();
        let (x, y) = training_set();
        let (yp, sp) = gp.predict_valvar(&x).unwrap();
        for i in 0..y.len() {
            assert_abs_diff_eq!(yp[i], y[i], epsilon = 1e-3);
            assert!(sp[i] < 1e-2);
        }
    }

    #[test]
    fn test_uncertainty_grows_away_from_data() {
        let gp = conditioned_gp();
        let (_, s_near) = gp.predict_valvar(&array![[2.0]]).unwrap();
        let (_, s_far) = gp.predict_valvar(&array![[9.0]]).unwrap();
        assert!(s_far[0] > s_near[0]);
    }

    #[test]
    fn test_predict_requires_conditioning() {
        let (x, y) = training_set();
        let gp =
            LatentGp::new(ConstantMean(), Matern52Corr(), &x, &y, 1e-2, 10. * f64::EPSILON)
                .unwrap();
        let err = gp.predict_valvar(&x).unwrap_err();
        assert!(matches!(err, RomGprError::ModelNotFittedError(_)));
    }

    #[test]
    fn test_loss_is_finite_at_default_params() {
        let (x, y) = training_set();
        let gp =
            LatentGp::new(ConstantMean(), Matern52Corr(), &x, &y, 1e-2, 10. * f64::EPSILON)
                .unwrap();
        let w = gp.pack();
        assert!(gp.loss(&w).is_finite());
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let (x, y) = training_set();
        let mut gp =
            LatentGp::new(ConstantMean(), Matern52Corr(), &x, &y, 1e-2, 10. * f64::EPSILON)
                .unwrap();
        let w = gp.pack();
        assert_eq!(w.len(), 3);
        gp.unpack(&w);
        assert_abs_diff_eq!(gp.theta()[0], DEFAULT_THETA_INIT, epsilon = 1e-12);
        assert_abs_diff_eq!(gp.sigma2(), DEFAULT_SIGMA2_INIT, epsilon = 1e-12);
    }

    #[test]
    fn test_fixed_noise_drops_noise_parameter() {
        let (x, y) = training_set();
        let mut gp =
            LatentGp::new(ConstantMean(), Matern52Corr(), &x, &y, 1e-2, 10. * f64::EPSILON)
                .unwrap();
        gp.set_noise(NoiseModel::FixedVariance(Array1::from_elem(y.len(), 1e-4)));
        assert_eq!(gp.pack().len(), 2);
        assert!(gp.loss(&gp.pack()).is_finite());
        assert_abs_diff_eq!(gp.noise_variances()[0], 1e-4, epsilon = 1e-18);
    }

    #[test]
    fn test_fixed_noise_length_mismatch() {
        let (x, y) = training_set();
        let mut gp =
            LatentGp::new(ConstantMean(), Matern52Corr(), &x, &y, 1e-2, 10. * f64::EPSILON)
                .unwrap();
        gp.set_noise(NoiseModel::FixedVariance(array![1e-4, 1e-4]));
        assert!(gp.set_eval_mode().is_err());
    }

    #[test]
    fn test_set_train_data_keeps_stats_and_hyperparameters() {
        let mut gp = conditioned_gp();
        let theta_before = gp.theta().to_owned();
        let mean_before = gp.xt_norm.mean.to_owned();
        let (x, y) = training_set();
        let x_tot = ndarray::concatenate![Axis(0), x, array![[5.0]]];
        let y_tot = ndarray::concatenate![Axis(0), y, array![0.1]];
        gp.set_train_data(&x_tot, &y_tot).unwrap();
        assert_eq!(gp.n_obs(), 9);
        assert_eq!(gp.theta(), &theta_before);
        assert_eq!(gp.xt_norm.mean, mean_before);
        // predictions still go through after reconditioning
        let (yp, _) = gp.predict_valvar(&array![[5.0]]).unwrap();
        assert_abs_diff_eq!(yp[0], 0.1, epsilon = 1e-2);
    }

    #[test]
    fn test_single_training_point() {
        let x = array![[1.0, 2.0]];
        let y = array![3.0];
        let mut gp =
            LatentGp::new(ConstantMean(), Matern52Corr(), &x, &y, 1e-6, 10. * f64::EPSILON)
                .unwrap();
        gp.set_eval_mode().unwrap();
        let (yp, _) = gp.predict_valvar(&x).unwrap();
        assert_abs_diff_eq!(yp[0], 3.0, epsilon = 1e-6);
    }

    fn joint_training_set() -> (Array2<f64>, Array2<f64>) {
        let x = Array::linspace(0., 4., 8).insert_axis(Axis(1));
        let y0 = x.column(0).mapv(|v: f64| (1.3 * v).sin() + 0.5);
        let y1 = x.column(0).mapv(|v: f64| 2. * (0.9 * v).cos());
        let y = ndarray::stack![Axis(1), y0, y1];
        (x, y)
    }

    #[test]
    fn test_joint_model_predicts_all_tasks() {
        let (x, y) = joint_training_set();
        let mut gp = JointLatentGp::new(
            ConstantMean(),
            Matern52Corr(),
            &x,
            &y,
            false,
            1e-6,
            10. * f64::EPSILON,
        )
        .unwrap();
        gp.thetas = Array2::from_elem((2, 1), 1.5);
        gp.set_eval_mode().unwrap();
        let (yp, sp) = gp.predict_valvar(&x).unwrap();
        assert_eq!(yp.dim(), (8, 2));
        assert_eq!(sp.dim(), (8, 2));
        for task in 0..2 {
            for i in 0..8 {
                assert_abs_diff_eq!(yp[[i, task]], y[[i, task]], epsilon = 1e-2);
            }
        }
    }

    #[test]
    fn test_joint_shared_theta_packs_single_row() {
        let (x, y) = joint_training_set();
        let gp = JointLatentGp::new(
            ConstantMean(),
            Matern52Corr(),
            &x,
            &y,
            true,
            1e-2,
            10. * f64::EPSILON,
        )
        .unwrap();
        // one theta, one sigma2, one noise
        assert_eq!(gp.pack().len(), 3);
        assert!(gp.loss(&gp.pack()).is_finite());
    }

    #[test]
    fn test_joint_per_task_theta_packs_one_row_per_task() {
        let (x, y) = joint_training_set();
        let gp = JointLatentGp::new(
            ConstantMean(),
            Matern52Corr(),
            &x,
            &y,
            false,
            1e-2,
            10. * f64::EPSILON,
        )
        .unwrap();
        // two thetas, two sigma2s, one shared noise
        assert_eq!(gp.pack().len(), 5);
    }
}
