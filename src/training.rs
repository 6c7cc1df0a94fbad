//! Marginal likelihood training loop.
//!
//! Hyperparameters are optimized in log10 space with Adam, gradients coming
//! from central finite differences of the negative marginal log-likelihood.
//! The loop stops when the absolute change of the loss between two iterations
//! falls under `rel_error` or when the iteration budget is spent; running out
//! of budget is not an error, the model simply keeps the parameters reached
//! so far.

use crate::errors::Result;
use finitediff::FiniteDiff;
use log::{debug, info, warn};
use ndarray::{Array1, Array2};

/// Default iteration budget
pub const DEFAULT_MAX_ITER: usize = 1000;
/// Default loss-delta convergence threshold
pub const DEFAULT_REL_ERROR: f64 = 1e-5;
/// Default Adam learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 0.1;

/// Sentinel previous-loss value for the first iteration
const LOSS_SENTINEL: f64 = 1e10;

/// A model whose hyperparameters can be optimized by marginal likelihood.
///
/// The packed representation is a flat log10 vector; `loss` must return
/// `f64::INFINITY` when the likelihood cannot be evaluated at the candidate
/// point so the optimizer steps away from it.
pub trait TrainableModel {
    /// Number of packed hyperparameters
    fn n_params(&self) -> usize;
    /// Current hyperparameters as a flat log10 vector
    fn pack(&self) -> Array1<f64>;
    /// Install hyperparameters from a flat log10 vector
    fn unpack(&mut self, w: &Array1<f64>);
    /// Negative marginal log-likelihood at the candidate point
    fn loss(&self, w: &Array1<f64>) -> f64;
    /// Mean noise variance at the candidate point, for progress logging
    fn mean_noise(&self, w: &Array1<f64>) -> f64;
    /// Condition on the training data at the current hyperparameters
    fn condition(&mut self) -> Result<()>;
    /// Posterior standard deviation at the training inputs, one column per
    /// task, in target units. Requires conditioning.
    fn posterior_train_stddev(&self) -> Result<Array2<f64>>;
}

/// Outcome of one training run.
#[derive(Clone, Debug)]
pub struct TrainingReport {
    /// Iterations actually spent
    pub iterations: usize,
    /// Loss at the last evaluated point
    pub final_loss: f64,
    /// Whether the loss-delta criterion was met within the budget
    pub converged: bool,
}

/// Marginal likelihood trainer shared by all latent models.
#[derive(Clone, Debug)]
pub struct Trainer {
    /// Iteration budget
    pub max_iter: usize,
    /// Absolute loss-delta convergence threshold
    pub rel_error: f64,
    /// Adam learning rate
    pub lr: f64,
}

impl Default for Trainer {
    fn default() -> Self {
        Trainer {
            max_iter: DEFAULT_MAX_ITER,
            rel_error: DEFAULT_REL_ERROR,
            lr: DEFAULT_LEARNING_RATE,
        }
    }
}

impl Trainer {
    /// Optimize the hyperparameters of `model`, leave it conditioned at the
    /// optimum and return the posterior standard deviation at its training
    /// inputs together with a report. `label` tags the progress log lines.
    pub fn train<M: TrainableModel>(
        &self,
        model: &mut M,
        label: &str,
    ) -> Result<(Array2<f64>, TrainingReport)> {
        let mut w = model.pack();
        let mut adam = Adam::new(self.lr, w.len());
        let mut loss_old = LOSS_SENTINEL;
        let mut e = f64::INFINITY;
        let mut iterations = 0;

        while e > self.rel_error && iterations < self.max_iter {
            let loss = model.loss(&w);
            let grad = w.central_diff(&|wi: &Array1<f64>| model.loss(wi));
            e = (loss - loss_old).abs();
            loss_old = loss;
            debug!(
                "Iter {}/{} - {} - Loss: {:.3e} - Mean noise: {:.3e}",
                iterations + 1,
                self.max_iter,
                label,
                loss,
                model.mean_noise(&w)
            );
            if !grad.iter().all(|g| g.is_finite()) {
                warn!(
                    "{}: non-finite likelihood gradient at iteration {}, stopping",
                    label,
                    iterations + 1
                );
                iterations += 1;
                break;
            }
            adam.step(&mut w, &grad);
            iterations += 1;
        }

        model.unpack(&w);
        model.condition()?;
        let stddev = model.posterior_train_stddev()?;
        info!(
            "{}: {} after {} iteration(s), final loss {:.3e}",
            label,
            if e <= self.rel_error {
                "converged"
            } else {
                "budget exhausted"
            },
            iterations,
            loss_old
        );
        Ok((
            stddev,
            TrainingReport {
                iterations,
                final_loss: loss_old,
                converged: e <= self.rel_error,
            },
        ))
    }
}

/// Plain Adam with bias correction.
struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    m: Array1<f64>,
    v: Array1<f64>,
    t: i32,
}

impl Adam {
    fn new(lr: f64, n: usize) -> Adam {
        Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            m: Array1::zeros(n),
            v: Array1::zeros(n),
            t: 0,
        }
    }

    fn step(&mut self, w: &mut Array1<f64>, grad: &Array1<f64>) {
        self.t += 1;
        self.m = &self.m * self.beta1 + grad * (1. - self.beta1);
        self.v = &self.v * self.beta2 + &grad.mapv(|g| g * g) * (1. - self.beta2);
        let m_hat = &self.m / (1. - self.beta1.powi(self.t));
        let v_hat = &self.v / (1. - self.beta2.powi(self.t));
        *w -= &(m_hat / (v_hat.mapv(f64::sqrt) + self.eps) * self.lr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::Matern52Corr;
    use crate::mean_models::ConstantMean;
    use crate::model::LatentGp;
    use ndarray::{array, Array, Axis};

    fn make_gp() -> LatentGp<ConstantMean, Matern52Corr> {
        let x = Array::linspace(0., 4., 6).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v| v * v - 2. * v);
        LatentGp::new(ConstantMean(), Matern52Corr(), &x, &y, 1e-2, 10. * f64::EPSILON).unwrap()
    }

    #[test]
    fn test_single_step_budget() {
        let trainer = Trainer {
            max_iter: 1,
            ..Trainer::default()
        };
        let mut gp = make_gp();
        let (_, report) = trainer.train(&mut gp, "Mode 1/1").unwrap();
        assert_eq!(report.iterations, 1);
    }

    #[test]
    fn test_budget_exhaustion_is_not_an_error() {
        let trainer = Trainer {
            max_iter: 3,
            rel_error: 0.,
            ..Trainer::default()
        };
        let mut gp = make_gp();
        let (stddev, report) = trainer.train(&mut gp, "Mode 1/1").unwrap();
        assert_eq!(report.iterations, 3);
        assert!(!report.converged);
        assert!(report.final_loss.is_finite());
        // model is left conditioned and usable
        assert_eq!(stddev.dim(), (6, 1));
        assert!(gp.predict_valvar(&array![[1.5]]).is_ok());
    }

    #[test]
    fn test_training_moves_hyperparameters() {
        let trainer = Trainer {
            max_iter: 10,
            rel_error: 1e-12,
            ..Trainer::default()
        };
        let mut gp = make_gp();
        let theta_before = gp.theta().to_owned();
        trainer.train(&mut gp, "Mode 1/1").unwrap();
        assert!((gp.theta()[0] - theta_before[0]).abs() > 1e-6);
    }

    #[test]
    fn test_adam_descends_on_quadratic() {
        let mut adam = Adam::new(0.1, 2);
        let mut w = array![3., -2.];
        for _ in 0..200 {
            let grad = w.mapv(|v| 2. * v);
            adam.step(&mut w, &grad);
        }
        assert!(w[0].abs() < 1e-2);
        assert!(w[1].abs() < 1e-2);
    }
}
