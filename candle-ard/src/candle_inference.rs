use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, ModuleT, Optimizer, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

use crate::candle_loss_functions::gaussian_likelihood;
use crate::candle_model_traits::ArdModuleT;

pub struct TrainConfig {
    pub learning_rate: f64,
    pub num_iters: usize,
    /// weight of the KL penalty relative to the log-likelihood
    pub kl_weight: f64,
    pub device: Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-2,
            num_iters: 1000,
            kl_weight: 1.0,
            device: Device::Cpu,
            verbose: false,
            show_progress: true,
        }
    }
}

/// Fit an ARD regression model by minimizing the negative ELBO per sample
///
/// loss = [ -llik(y | model(x)) + kl_weight * sum penalty ] / n
///
/// Every step draws the model's output in training mode, so the
/// log-likelihood is a one-sample Monte Carlo estimate.
///
/// * `model` - stochastic model with ARD penalty
/// * `varmap` - all trainable variables of the model
/// * `x_nd` - input (n x d)
/// * `y_nk` - response (n x k)
/// * `train_config` - training configuration
///
/// # Returns the loss trace
pub fn train_ard_regression<M>(
    model: &M,
    varmap: &VarMap,
    x_nd: &Tensor,
    y_nk: &Tensor,
    train_config: &TrainConfig,
) -> anyhow::Result<Vec<f32>>
where
    M: ModuleT + ArdModuleT,
{
    let nn = x_nd.dim(0)? as f64;
    let num_iters = train_config.num_iters;

    let mut adam = AdamW::new_lr(varmap.all_vars(), train_config.learning_rate)?;

    let pb = ProgressBar::new(num_iters as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut loss_trace = Vec::with_capacity(num_iters);

    for iter in 0..num_iters {
        let y_hat_nk = model.forward_t(x_nd, true)?;
        let llik = gaussian_likelihood(y_nk, &y_hat_nk)?.sum_all()?;
        let kl = model.penalty()?.sum_all()?;

        let loss = ((kl * train_config.kl_weight)?.sub(&llik)? / nn)?;
        adam.backward_step(&loss)?;

        // Move to CPU for dtype conversion (Metal doesn't support F64)
        let loss_val = loss
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F32)?
            .to_scalar::<f32>()?;
        loss_trace.push(loss_val);
        pb.inc(1);

        if train_config.verbose && (iter % 50 == 0 || iter == num_iters - 1) {
            info!("iter {:4}: loss = {:10.4}", iter, loss_val);
        }
    }

    pb.finish_and_clear();
    Ok(loss_trace)
}
