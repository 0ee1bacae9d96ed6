use candle_core::{DType, Device, Result, Tensor, TensorId};
use candle_nn::{Linear, Module, ModuleT, VarBuilder};
use log::debug;

use crate::candle_loss_functions::ard_kl_penalty;
use crate::candle_model_traits::{ArdModuleT, SparsityStatsT};
use crate::candle_noise::NoiseSource;

/// Initial log σ²; every weight starts out relevant
pub const INIT_LOG_SIGMA2: f64 = -10.0;

/// keeps log|w| finite for weights that collapsed to zero
const LOG_ABS_EPS: f64 = 1e-12;

/// keeps the noise standard deviation real
const NOISE_VAR_EPS: f64 = 1e-20;

//////////////////////////////////////////////////////////
// Linear module with automatic relevance determination //
//////////////////////////////////////////////////////////

/// Linear layer with automatic relevance determination
///
/// The weight `W` (out x in) is the mean of a factorised Gaussian
/// posterior `N(w | θ, σ²)` with a learned log-variance `log_sigma2` of
/// the same shape (Kingma et al. 2015; Molchanov et al. 2017). The
/// ratio of the noise to the squared weight,
///
/// ```text
/// log α = log σ² - 2 log |θ|
/// ```
///
/// measures how irrelevant each weight is. Training with the KL
/// `penalty` drives α of unneeded weights up; after training they are
/// masked out with `relevance`.
///
/// In training mode the forward pass uses the local reparameterization
/// trick: the output is sampled from
/// `N(x Wᵀ + b, (x ⊙ x) exp(log σ²)ᵀ)`.
#[derive(Clone, Debug)]
pub struct LinearArd {
    in_dim: usize,
    out_dim: usize,
    linear: Linear,
    log_sigma2: Tensor,
    noise: NoiseSource,
}

impl LinearArd {
    /// Build from existing parameters
    ///
    /// * `weight` - mean weights (out x in)
    /// * `bias` - optional bias (out)
    /// * `log_sigma2` - log noise variance, same shape as `weight`
    /// * `noise` - random source for the training-mode forward pass
    pub fn new(
        weight: Tensor,
        bias: Option<Tensor>,
        log_sigma2: Tensor,
        noise: NoiseSource,
    ) -> Result<Self> {
        let (out_dim, in_dim) = weight.dims2()?;

        if log_sigma2.shape() != weight.shape() {
            candle_core::bail!(
                "log_sigma2 {:?} must have the same shape as weight {:?}",
                log_sigma2.shape(),
                weight.shape()
            );
        }

        Ok(Self {
            in_dim,
            out_dim,
            linear: Linear::new(weight, bias),
            log_sigma2,
            noise,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn weight(&self) -> &Tensor {
        self.linear.weight()
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.linear.bias()
    }

    pub fn log_sigma2(&self) -> &Tensor {
        &self.log_sigma2
    }

    /// log α = log σ² - 2 log(|θ| + ε), element-wise (out x in)
    ///
    /// Gradients flow through this to both `weight` and `log_sigma2`.
    pub fn log_alpha(&self) -> Result<Tensor> {
        log_alpha(self.weight(), &self.log_sigma2)
    }

    /// A plain linear layer keeping only the relevant weights
    ///
    /// The masked weights and the bias are detached from the training
    /// graph.
    pub fn to_masked_linear(&self, threshold: f64) -> Result<Linear> {
        let mask = self.relevance(threshold)?;
        let weight = self.weight().detach().mul(&mask)?;
        Ok(Linear::new(weight, self.bias().map(|b| b.detach())))
    }
}

fn log_alpha(weight: &Tensor, log_sigma2: &Tensor) -> Result<Tensor> {
    let log_abs_w = (weight.abs()? + LOG_ABS_EPS)?.log()?;
    log_sigma2.sub(&(log_abs_w * 2.0)?)
}

impl ModuleT for LinearArd {
    /// * `x_nd` - input (.. x n x in)
    /// * `train` - sample the output (true) or return its mean (false)
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<Tensor> {
        let mu_nk = self.linear.forward(x_nd)?;

        if !train {
            return Ok(mu_nk);
        }

        let var_weight = Linear::new(self.log_sigma2.exp()?, None);
        let s2_nk = var_weight.forward(&x_nd.sqr()?)?;
        let eps_nk = self.noise.randn_like(&s2_nk)?;

        mu_nk.add(&eps_nk.mul(&(s2_nk + NOISE_VAR_EPS)?.sqrt()?)?)
    }
}

impl ArdModuleT for LinearArd {
    fn penalty(&self) -> Result<Tensor> {
        ard_kl_penalty(&self.log_alpha()?)
    }

    fn relevance(&self, threshold: f64) -> Result<Tensor> {
        let log_alpha = log_alpha(&self.weight().detach(), &self.log_sigma2.detach())?;
        log_alpha.le(threshold)?.to_dtype(log_alpha.dtype())
    }
}

impl SparsityStatsT for LinearArd {
    fn sparsity(&self, threshold: f64) -> Result<Vec<(TensorId, usize)>> {
        // Move to CPU for dtype conversion (Metal doesn't support F64)
        let n_relevant = self
            .relevance(threshold)?
            .to_device(&Device::Cpu)?
            .to_dtype(DType::F64)?
            .sum_all()?
            .to_scalar::<f64>()?
            .round() as usize;

        let n_weights = self.weight().elem_count();
        debug!(
            "linear ard {} x {}: {} of {} weights relevant at log α <= {}",
            self.out_dim, self.in_dim, n_relevant, n_weights, threshold
        );

        Ok(vec![(self.weight().id(), n_weights - n_relevant)])
    }

    fn sparsity_ignore(&self) -> Vec<TensorId> {
        vec![self.log_sigma2.id()]
    }
}

/// Create a linear ARD layer with parameters `weight`, `bias` and
/// `log_sigma2` registered in `vb`
///
/// `weight` and `bias` follow `candle_nn::linear` initialization;
/// `log_sigma2` is filled with the constant `INIT_LOG_SIGMA2`.
///
/// * `in_dim` - input dimension
/// * `out_dim` - output dimension
/// * `bias` - whether to add a bias
/// * `vb` - variable builder
/// * `noise` - random source for training-mode forward passes
pub fn linear_ard_b(
    in_dim: usize,
    out_dim: usize,
    bias: bool,
    vb: VarBuilder,
    noise: NoiseSource,
) -> Result<LinearArd> {
    let init_ws = candle_nn::init::DEFAULT_KAIMING_NORMAL;
    let ws = vb.get_with_hints((out_dim, in_dim), "weight", init_ws)?;

    let bs = if bias {
        let bound = 1. / (in_dim as f64).sqrt();
        let init_bs = candle_nn::Init::Uniform {
            lo: -bound,
            up: bound,
        };
        Some(vb.get_with_hints(out_dim, "bias", init_bs)?)
    } else {
        None
    };

    let log_sigma2 = vb.get_with_hints(
        (out_dim, in_dim),
        "log_sigma2",
        candle_nn::Init::Const(INIT_LOG_SIGMA2),
    )?;

    debug!("linear ard {} -> {} (bias: {})", in_dim, out_dim, bias);

    LinearArd::new(ws, bs, log_sigma2, noise)
}

pub fn linear_ard(
    in_dim: usize,
    out_dim: usize,
    vb: VarBuilder,
    noise: NoiseSource,
) -> Result<LinearArd> {
    linear_ard_b(in_dim, out_dim, true, vb, noise)
}

pub fn linear_ard_no_bias(
    in_dim: usize,
    out_dim: usize,
    vb: VarBuilder,
    noise: NoiseSource,
) -> Result<LinearArd> {
    linear_ard_b(in_dim, out_dim, false, vb, noise)
}
