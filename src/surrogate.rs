//! The reduced-order surrogate itself: snapshot scaling and decomposition are
//! delegated to a [`ModalDecomposition`] collaborator, the latent coefficient
//! trajectories are regressed against the design parameters by a
//! [`ModelBank`], and predictions are mapped back to amplitude units through
//! the [`LatentBasis`] norms.

use crate::bank::ModelBank;
use crate::basis::LatentBasis;
use crate::correlation_models::{CorrelationModel, Matern52Corr};
use crate::decomposition::{DecompositionOptions, ModalBasis, ModalDecomposition};
use crate::errors::{Result, RomGprError};
use crate::mean_models::{ConstantMean, RegressionModel};
use crate::model::{JointLatentGp, LatentGp};
use crate::scaling::{ScaleScheme, Scaling};
use crate::training::{Trainer, TrainingReport, DEFAULT_LEARNING_RATE, DEFAULT_MAX_ITER, DEFAULT_REL_ERROR};
use ndarray::{concatenate, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};

/// Which kind of latent model bank the surrogate trains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serializable",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum GprKind {
    /// One independent Gaussian process per latent mode
    SingleTask,
    /// A single joint model over all modes with shared inputs and noise
    MultiTask,
}

/// Surrogate configuration. `Default` gives a single-task bank with a
/// constant mean, a Matern 5/2 kernel and standard scaling on both matrices.
#[derive(Clone, Debug)]
pub struct GprConfig<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> {
    /// Latent bank kind
    pub kind: GprKind,
    /// Scaling scheme applied to the snapshot matrix before decomposition
    pub scale_x: ScaleScheme,
    /// Scaling scheme applied to the design parameter matrix
    pub scale_p: ScaleScheme,
    /// Options forwarded to the decomposition collaborator
    pub decomposition: DecompositionOptions,
    /// Mean model shared by every latent model
    pub mean: Mean,
    /// Correlation kernel shared by every latent model
    pub corr: Corr,
    /// Share one kernel hyperparameter set across the tasks of a joint bank
    pub shared_theta: bool,
    /// Training iteration budget
    pub max_iter: usize,
    /// Loss-delta convergence threshold
    pub rel_error: f64,
    /// Adam learning rate
    pub lr: f64,
    /// Initial noise variance of the learned Gaussian likelihood
    pub noise_init: f64,
    /// Relative diagonal jitter of the covariance matrices
    pub nugget: f64,
}

impl Default for GprConfig<ConstantMean, Matern52Corr> {
    fn default() -> Self {
        GprConfig {
            kind: GprKind::SingleTask,
            scale_x: ScaleScheme::Std,
            scale_p: ScaleScheme::Std,
            decomposition: DecompositionOptions::default(),
            mean: ConstantMean(),
            corr: Matern52Corr(),
            shared_theta: false,
            max_iter: DEFAULT_MAX_ITER,
            rel_error: DEFAULT_REL_ERROR,
            lr: DEFAULT_LEARNING_RATE,
            noise_init: 1e-2,
            nugget: 100. * f64::EPSILON,
        }
    }
}

/// Everything produced by `fit` and maintained by `update`.
struct Fitted<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> {
    /// Design parameter scaling statistics, frozen at fit time
    p_scaling: Scaling,
    /// Spatial basis and explained variance from the decomposition
    modal: ModalBasis,
    /// Latent mode norms and unit directions, frozen at fit time
    basis: LatentBasis,
    /// Scaled design parameters, grows on update
    p0: Array2<f64>,
    /// Latent targets in direction units, grows on update
    vr: Array2<f64>,
    /// Posterior standard deviation at the training inputs, direction units
    vr_sigma: Array2<f64>,
    /// The trained latent models
    bank: ModelBank<Mean, Corr>,
    /// One report per trained model from the last training run
    reports: Vec<TrainingReport>,
}

/// Latent-space Gaussian process surrogate of a parametric reduced-order
/// model.
///
/// Built from a snapshot matrix `X` (n_state, p) whose columns are
/// observations and a design parameter matrix `P` (p, d) with one row per
/// observation.
pub struct GprRom<D, Mean, Corr>
where
    D: ModalDecomposition,
    Mean: RegressionModel<f64>,
    Corr: CorrelationModel<f64>,
{
    x: Array2<f64>,
    p: Array2<f64>,
    decomposer: D,
    config: GprConfig<Mean, Corr>,
    fitted: Option<Fitted<Mean, Corr>>,
}

impl<D, Mean, Corr> GprRom<D, Mean, Corr>
where
    D: ModalDecomposition,
    Mean: RegressionModel<f64>,
    Corr: CorrelationModel<f64>,
{
    /// Build an unfitted surrogate. The number of snapshot columns must match
    /// the number of design parameter rows.
    pub fn new(
        x: Array2<f64>,
        p: Array2<f64>,
        decomposer: D,
        config: GprConfig<Mean, Corr>,
    ) -> Result<GprRom<D, Mean, Corr>> {
        if x.ncols() != p.nrows() {
            return Err(RomGprError::ConfigurationError(format!(
                "snapshot matrix has {} observations but the design parameter \
                matrix has {} rows",
                x.ncols(),
                p.nrows()
            )));
        }
        Ok(GprRom {
            x,
            p,
            decomposer,
            config,
            fitted: None,
        })
    }

    /// Snapshot matrix (n_state, p)
    pub fn snapshots(&self) -> &Array2<f64> {
        &self.x
    }

    /// Design parameter matrix (p, d), grows on update
    pub fn parameters(&self) -> &Array2<f64> {
        &self.p
    }

    fn trainer(&self) -> Trainer {
        Trainer {
            max_iter: self.config.max_iter,
            rel_error: self.config.rel_error,
            lr: self.config.lr,
        }
    }

    fn fitted(&self) -> Result<&Fitted<Mean, Corr>> {
        self.fitted.as_ref().ok_or_else(|| {
            RomGprError::ModelNotFittedError(
                "the surrogate has no trained latent models yet, call fit first".to_string(),
            )
        })
    }

    /// Scale the snapshots, extract the latent basis, scale the design
    /// parameters and train one latent model per retained mode (or a joint
    /// model over all of them).
    pub fn fit(&mut self) -> Result<()> {
        let trainer = self.trainer();

        let x0 = self
            .decomposer
            .scale_data(&self.x.view(), self.config.scale_x)?;
        let modal = self
            .decomposer
            .decompose(&x0.view(), &self.config.decomposition)?;
        let basis = LatentBasis::from_coefficients(&modal.coefficients)?;

        let p_scaling = Scaling::fit(&self.p, self.config.scale_p)?;
        let p0 = p_scaling.apply(&self.p);
        let vr = basis.directions().to_owned();

        let mut bank = match self.config.kind {
            GprKind::SingleTask => {
                let models = (0..basis.n_modes())
                    .map(|i| {
                        LatentGp::new(
                            self.config.mean,
                            self.config.corr,
                            &p0,
                            &vr.column(i),
                            self.config.noise_init,
                            self.config.nugget,
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                ModelBank::Independent(models)
            }
            GprKind::MultiTask => ModelBank::Joint(JointLatentGp::new(
                self.config.mean,
                self.config.corr,
                &p0,
                &vr,
                self.config.shared_theta,
                self.config.noise_init,
                self.config.nugget,
            )?),
        };

        let (vr_sigma, reports) = bank.train(&trainer)?;

        self.fitted = Some(Fitted {
            p_scaling,
            modal,
            basis,
            p0,
            vr,
            vr_sigma,
            bank,
            reports,
        });
        Ok(())
    }

    /// Predict latent amplitudes and their standard deviations at the query
    /// parameters `p_star` (n, d), as two (n, r) arrays in amplitude units.
    pub fn predict(
        &self,
        p_star: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let fitted = self.fitted()?;
        if p_star.ncols() != self.p.ncols() {
            return Err(RomGprError::ConfigurationError(format!(
                "query points have {} parameters, the surrogate was fitted with {}",
                p_star.ncols(),
                self.p.ncols()
            )));
        }
        let p0_star = fitted.p_scaling.apply(p_star);
        let (v_mean, v_sigma) = fitted.bank.predict(&p0_star)?;
        let a_mean = fitted.basis.to_amplitudes(&v_mean);
        let a_sigma = fitted.basis.to_amplitudes(&v_sigma);
        Ok((a_mean, a_sigma))
    }

    /// Predict at a single parameter point (d,).
    pub fn predict_one(
        &self,
        p_star: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let batch = p_star.to_owned().insert_axis(Axis(0));
        let (a_mean, a_sigma) = self.predict(&batch)?;
        Ok((a_mean.row(0).to_owned(), a_sigma.row(0).to_owned()))
    }

    /// Map latent amplitudes `a` (n, r) back to full-state space through the
    /// decomposition collaborator.
    pub fn reconstruct(&self, a: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array2<f64>> {
        let fitted = self.fitted()?;
        self.decomposer.reconstruct(&fitted.modal, &a.view())
    }

    /// Append new observations to the training set.
    ///
    /// `p_new` (n_new, d) and `a_new` (n_new, r) are scaled with the frozen
    /// fit-time statistics and appended; the latent models recondition on the
    /// grown set without touching their hyperparameters. With `retrain` the
    /// bank is optimized again from its current hyperparameters, and when
    /// coefficient uncertainties `a_sigma_new` are given a single-task bank
    /// retrains against them through a fixed-noise likelihood built from the
    /// stored uncertainties concatenated with the new ones. A joint bank
    /// keeps its shared learned noise either way.
    pub fn update(
        &mut self,
        p_new: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        a_new: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        a_sigma_new: Option<&Array2<f64>>,
        retrain: bool,
    ) -> Result<()> {
        let trainer = self.trainer();
        let d = self.p.ncols();
        let fitted = self.fitted.as_mut().ok_or_else(|| {
            RomGprError::ModelNotFittedError(
                "the surrogate has no trained latent models yet, call fit first".to_string(),
            )
        })?;

        let r = fitted.basis.n_modes();
        if p_new.ncols() != d || a_new.ncols() != r || p_new.nrows() != a_new.nrows() {
            return Err(RomGprError::ConfigurationError(format!(
                "new observations have shapes {:?} and {:?}, expected (n, {}) and (n, {})",
                p_new.dim(),
                a_new.dim(),
                d,
                r
            )));
        }
        if let Some(sigma) = a_sigma_new {
            if sigma.dim() != a_new.dim() {
                return Err(RomGprError::ConfigurationError(format!(
                    "coefficient uncertainties have shape {:?}, expected {:?}",
                    sigma.dim(),
                    a_new.dim()
                )));
            }
        }

        let p0_new = fitted.p_scaling.apply(p_new);
        let vr_new = fitted.basis.to_directions(a_new);
        let p0_tot = concatenate![Axis(0), fitted.p0, p0_new];
        let vr_tot = concatenate![Axis(0), fitted.vr, vr_new];

        match a_sigma_new {
            Some(sigma) => {
                let vr_sigma_new = fitted.basis.to_directions(sigma);
                let vr_sigma_tot = concatenate![Axis(0), fitted.vr_sigma, vr_sigma_new];
                if retrain || fitted.bank.has_fixed_noise() {
                    fitted
                        .bank
                        .set_fixed_noise(&vr_sigma_tot.mapv(|v| v * v))?;
                }
                fitted.vr_sigma = vr_sigma_tot;
            }
            None => {
                if fitted.bank.has_fixed_noise() && fitted.vr_sigma.nrows() != p0_tot.nrows() {
                    return Err(RomGprError::InvalidValueError(
                        "the latent models carry fixed per-observation noise, updating them \
                        requires coefficient uncertainties for the new observations"
                            .to_string(),
                    ));
                }
            }
        }

        fitted.bank.set_train_data(&p0_tot, &vr_tot)?;
        fitted.p0 = p0_tot;
        fitted.vr = vr_tot;
        self.p = concatenate![Axis(0), self.p, p_new.to_owned()];

        if retrain {
            let (vr_sigma, reports) = fitted.bank.train(&trainer)?;
            fitted.vr_sigma = vr_sigma;
            fitted.reports = reports;
        }
        Ok(())
    }

    /// Number of retained latent modes
    pub fn n_modes(&self) -> Result<usize> {
        Ok(self.fitted()?.basis.n_modes())
    }

    /// Variance explained by each retained mode
    pub fn explained_variance(&self) -> Result<&Array1<f64>> {
        Ok(&self.fitted()?.modal.explained_variance)
    }

    /// Latent mode norms and unit directions
    pub fn basis(&self) -> Result<&LatentBasis> {
        Ok(&self.fitted()?.basis)
    }

    /// Design parameter scaling statistics
    pub fn parameter_scaling(&self) -> Result<&Scaling> {
        Ok(&self.fitted()?.p_scaling)
    }

    /// Posterior standard deviation at the training inputs (n, r), in
    /// direction units
    pub fn coefficient_uncertainty(&self) -> Result<&Array2<f64>> {
        Ok(&self.fitted()?.vr_sigma)
    }

    /// The trained latent model bank
    pub fn bank(&self) -> Result<&ModelBank<Mean, Corr>> {
        Ok(&self.fitted()?.bank)
    }

    /// Reports from the last training run, one per trained model
    pub fn training_reports(&self) -> Result<&[TrainingReport]> {
        Ok(&self.fitted()?.reports)
    }
}
