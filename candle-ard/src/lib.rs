//! Linear layers with automatic relevance determination (ARD)
//!
//! `LinearArd` is a linear layer trained with variational dropout: each
//! weight carries a learned noise variance, and a closed-form KL penalty
//! pushes the noise of unneeded weights up. After training, weights whose
//! log α = log σ² - 2 log |θ| exceeds a threshold are pruned.
//!
//! ```ignore
//! use candle_ard::candle_ard_linear::linear_ard;
//! use candle_ard::candle_model_traits::{ArdModuleT, SparsityStatsT};
//! use candle_ard::candle_noise::NoiseSource;
//!
//! let layer = linear_ard(in_dim, out_dim, vb.pp("fc"), NoiseSource::from_seed(42))?;
//!
//! // training loop
//! let y_hat = layer.forward_t(&x, true)?;
//! let loss = (nll(&y, &y_hat)? + layer.penalty()?.sum_all()?)?;
//! // optimizer.backward_step(&loss)?;
//!
//! // afterwards
//! let mask = layer.relevance(3.0)?;
//! let pruned = layer.sparsity(3.0)?;
//! ```

pub mod candle_ard_linear;
pub mod candle_ard_simulate;
pub mod candle_ard_stats;
pub mod candle_aux_layers;
pub mod candle_inference;
pub mod candle_loss_functions;
pub mod candle_model_traits;
pub mod candle_noise;
pub mod cli;

pub use candle_core;
pub use candle_nn;
