//! The bank of latent models behind the surrogate: either one independent
//! Gaussian process per latent mode, trained in parallel, or a single joint
//! model over all modes.

use crate::correlation_models::CorrelationModel;
use crate::errors::{Result, RomGprError};
use crate::mean_models::RegressionModel;
use crate::model::{JointLatentGp, LatentGp, NoiseModel};
use crate::training::{Trainer, TrainingReport};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use rayon::prelude::*;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// The latent models of a fitted surrogate.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum ModelBank<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> {
    /// One Gaussian process per latent mode over shared inputs
    Independent(Vec<LatentGp<Mean, Corr>>),
    /// A single model regressing every mode at once
    Joint(JointLatentGp<Mean, Corr>),
}

impl<Mean: RegressionModel<f64>, Corr: CorrelationModel<f64>> ModelBank<Mean, Corr> {
    /// Number of latent modes covered by the bank
    pub fn n_modes(&self) -> usize {
        match self {
            ModelBank::Independent(models) => models.len(),
            ModelBank::Joint(model) => model.n_tasks(),
        }
    }

    /// Number of training observations
    pub fn n_obs(&self) -> usize {
        match self {
            ModelBank::Independent(models) => {
                models.first().map(|m| m.n_obs()).unwrap_or(0)
            }
            ModelBank::Joint(model) => model.n_obs(),
        }
    }

    /// The per-mode models of an independent bank
    pub fn models(&self) -> Option<&[LatentGp<Mean, Corr>]> {
        match self {
            ModelBank::Independent(models) => Some(models),
            ModelBank::Joint(_) => None,
        }
    }

    /// The joint model of a joint bank
    pub fn joint_model(&self) -> Option<&JointLatentGp<Mean, Corr>> {
        match self {
            ModelBank::Independent(_) => None,
            ModelBank::Joint(model) => Some(model),
        }
    }

    /// Train every model of the bank. Independent modes are trained in
    /// parallel, each on its own column. Returns the posterior standard
    /// deviation at the training inputs as a (n, r) array, in target units,
    /// plus one report per trained model.
    pub fn train(&mut self, trainer: &Trainer) -> Result<(Array2<f64>, Vec<TrainingReport>)> {
        match self {
            ModelBank::Independent(models) => {
                let n_modes = models.len();
                let outcomes = models
                    .par_iter_mut()
                    .enumerate()
                    .map(|(i, gp)| {
                        let label = format!("Mode {}/{}", i + 1, n_modes);
                        trainer.train(gp, &label)
                    })
                    .collect::<Result<Vec<_>>>()?;

                let n_obs = models.first().map(|m| m.n_obs()).unwrap_or(0);
                let mut stddev = Array2::zeros((n_obs, n_modes));
                let mut reports = Vec::with_capacity(n_modes);
                for (i, (sd, report)) in outcomes.into_iter().enumerate() {
                    stddev.column_mut(i).assign(&sd.column(0));
                    reports.push(report);
                }
                Ok((stddev, reports))
            }
            ModelBank::Joint(model) => {
                let (stddev, report) = trainer.train(model, "Joint model")?;
                Ok((stddev, vec![report]))
            }
        }
    }

    /// Predict per-mode means and standard deviations at `x` (n, d), as two
    /// (n, r) arrays in target units.
    pub fn predict(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        match self {
            ModelBank::Independent(models) => {
                let mut means = Array2::zeros((x.nrows(), models.len()));
                let mut stddevs = Array2::zeros((x.nrows(), models.len()));
                for (i, gp) in models.iter().enumerate() {
                    let (m, s) = gp.predict_valvar(x)?;
                    means.column_mut(i).assign(&m);
                    stddevs.column_mut(i).assign(&s);
                }
                Ok((means, stddevs))
            }
            ModelBank::Joint(model) => model.predict_valvar(x),
        }
    }

    /// Replace the training set of every model without touching its
    /// hyperparameters, then recondition.
    pub fn set_train_data(&mut self, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
        if y.ncols() != self.n_modes() {
            return Err(RomGprError::ConfigurationError(format!(
                "expected targets for {} modes, got {}",
                self.n_modes(),
                y.ncols()
            )));
        }
        match self {
            ModelBank::Independent(models) => {
                for (i, gp) in models.iter_mut().enumerate() {
                    gp.set_train_data(x, &y.column(i))?;
                }
                Ok(())
            }
            ModelBank::Joint(model) => model.set_train_data(x, y),
        }
    }

    /// Condition every model on its training data (eval mode).
    pub fn set_eval_mode(&mut self) -> Result<()> {
        match self {
            ModelBank::Independent(models) => {
                for gp in models.iter_mut() {
                    gp.set_eval_mode()?;
                }
                Ok(())
            }
            ModelBank::Joint(model) => model.set_eval_mode(),
        }
    }

    /// Drop the conditioning caches of every model (train mode).
    pub fn set_train_mode(&mut self) {
        match self {
            ModelBank::Independent(models) => {
                for gp in models.iter_mut() {
                    gp.set_train_mode();
                }
            }
            ModelBank::Joint(model) => model.set_train_mode(),
        }
    }

    /// Give every independent mode a fixed-noise likelihood, one variance
    /// column per mode. Joint banks keep their shared learned noise and
    /// ignore the call, matching the update protocol.
    pub fn set_fixed_noise(&mut self, variances: &Array2<f64>) -> Result<()> {
        match self {
            ModelBank::Independent(models) => {
                if variances.ncols() != models.len() {
                    return Err(RomGprError::ConfigurationError(format!(
                        "expected noise variances for {} modes, got {}",
                        models.len(),
                        variances.ncols()
                    )));
                }
                for (i, gp) in models.iter_mut().enumerate() {
                    gp.set_noise(NoiseModel::FixedVariance(variances.column(i).to_owned()));
                }
                Ok(())
            }
            ModelBank::Joint(_) => {
                log::debug!("joint bank keeps its shared learned noise, fixed noise ignored");
                Ok(())
            }
        }
    }

    /// Training inputs shared by every model of the bank (n, d).
    pub fn training_inputs(&self) -> Option<&Array2<f64>> {
        match self {
            ModelBank::Independent(models) => models.first().map(|m| m.training_data().0),
            ModelBank::Joint(model) => Some(model.training_data().0),
        }
    }

    /// Training targets, one column per mode (n, r).
    pub fn training_targets(&self) -> Array2<f64> {
        match self {
            ModelBank::Independent(models) => {
                let n_obs = models.first().map(|m| m.n_obs()).unwrap_or(0);
                let mut targets = Array2::zeros((n_obs, models.len()));
                for (i, gp) in models.iter().enumerate() {
                    targets.column_mut(i).assign(gp.training_data().1);
                }
                targets
            }
            ModelBank::Joint(model) => model.training_data().1.to_owned(),
        }
    }

    /// Whether any model of the bank carries fixed per-observation noise.
    pub fn has_fixed_noise(&self) -> bool {
        match self {
            ModelBank::Independent(models) => models
                .iter()
                .any(|m| matches!(m.noise(), NoiseModel::FixedVariance(_))),
            ModelBank::Joint(_) => false,
        }
    }

    /// Per-observation noise variances of one mode in target units.
    pub fn mode_noise_variances(&self, mode: usize) -> Result<Array1<f64>> {
        if mode >= self.n_modes() {
            return Err(RomGprError::InvalidValueError(format!(
                "mode index {} out of range for {} modes",
                mode,
                self.n_modes()
            )));
        }
        match self {
            ModelBank::Independent(models) => Ok(models[mode].noise_variances()),
            ModelBank::Joint(model) => Ok(Array1::from_elem(
                model.n_obs(),
                model.noise_variance(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::Matern52Corr;
    use crate::mean_models::ConstantMean;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, concatenate, Array, Axis};

    fn targets(x: &Array2<f64>) -> Array2<f64> {
        let y0 = x.column(0).mapv(|v| (1.1 * v).sin());
        let y1 = x.column(0).mapv(|v| 0.5 * v - 1.);
        ndarray::stack![Axis(1), y0, y1]
    }

    fn independent_bank(
        x: &Array2<f64>,
        y: &Array2<f64>,
    ) -> ModelBank<ConstantMean, Matern52Corr> {
        let models = (0..y.ncols())
            .map(|i| {
                LatentGp::new(
                    ConstantMean(),
                    Matern52Corr(),
                    x,
                    &y.column(i),
                    1e-2,
                    10. * f64::EPSILON,
                )
            })
            .collect::<Result<Vec<_>>>()
            .unwrap();
        ModelBank::Independent(models)
    }

    #[test]
    fn test_independent_training_and_prediction_shapes() {
        let x = Array::linspace(0., 3., 7).insert_axis(Axis(1));
        let y = targets(&x);
        let mut bank = independent_bank(&x, &y);
        let trainer = Trainer {
            max_iter: 5,
            ..Trainer::default()
        };
        let (stddev, reports) = bank.train(&trainer).unwrap();
        assert_eq!(stddev.dim(), (7, 2));
        assert_eq!(reports.len(), 2);
        let (m, s) = bank.predict(&array![[0.5], [2.5]]).unwrap();
        assert_eq!(m.dim(), (2, 2));
        assert_eq!(s.dim(), (2, 2));
    }

    #[test]
    fn test_joint_training_yields_single_report() {
        let x = Array::linspace(0., 3., 7).insert_axis(Axis(1));
        let y = targets(&x);
        let joint = JointLatentGp::new(
            ConstantMean(),
            Matern52Corr(),
            &x,
            &y,
            false,
            1e-2,
            10. * f64::EPSILON,
        )
        .unwrap();
        let mut bank = ModelBank::Joint(joint);
        let trainer = Trainer {
            max_iter: 5,
            ..Trainer::default()
        };
        let (stddev, reports) = bank.train(&trainer).unwrap();
        assert_eq!(stddev.dim(), (7, 2));
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn test_set_train_data_grows_every_mode() {
        let x = Array::linspace(0., 3., 7).insert_axis(Axis(1));
        let y = targets(&x);
        let mut bank = independent_bank(&x, &y);
        bank.set_eval_mode().unwrap();
        let x_tot = concatenate![Axis(0), x, array![[4.0]]];
        let y_tot = concatenate![Axis(0), y, array![[0.3, 0.9]]];
        bank.set_train_data(&x_tot, &y_tot).unwrap();
        assert_eq!(bank.n_obs(), 8);
        assert_eq!(bank.training_inputs().unwrap(), &x_tot);
        assert_eq!(bank.training_targets(), y_tot);
        // still predicts after reconditioning
        assert!(bank.predict(&array![[1.0]]).is_ok());
    }

    #[test]
    fn test_fixed_noise_is_installed_per_mode() {
        let x = Array::linspace(0., 3., 7).insert_axis(Axis(1));
        let y = targets(&x);
        let mut bank = independent_bank(&x, &y);
        let variances = Array2::from_elem((7, 2), 1e-3);
        bank.set_fixed_noise(&variances).unwrap();
        let noise = bank.mode_noise_variances(1).unwrap();
        assert_abs_diff_eq!(noise, Array1::from_elem(7, 1e-3), epsilon = 1e-15);
    }

    #[test]
    fn test_joint_bank_ignores_fixed_noise() {
        let x = Array::linspace(0., 3., 7).insert_axis(Axis(1));
        let y = targets(&x);
        let joint = JointLatentGp::new(
            ConstantMean(),
            Matern52Corr(),
            &x,
            &y,
            true,
            1e-2,
            10. * f64::EPSILON,
        )
        .unwrap();
        let mut bank = ModelBank::Joint(joint);
        let noise_before = bank.mode_noise_variances(0).unwrap();
        bank.set_fixed_noise(&Array2::from_elem((7, 2), 1e-3)).unwrap();
        assert_eq!(bank.mode_noise_variances(0).unwrap(), noise_before);
    }
}
