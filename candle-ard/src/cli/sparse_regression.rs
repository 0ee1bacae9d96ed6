use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, ModuleT, VarBuilder, VarMap};
use clap::Args;
use log::{info, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use crate::candle_ard_linear::{linear_ard, LinearArd};
use crate::candle_ard_simulate::{generate_sparse_regression_data, SimArgs};
use crate::candle_ard_stats::SparsityReport;
use crate::candle_aux_layers::StackLayers;
use crate::candle_inference::{train_ard_regression, TrainConfig};
use crate::candle_model_traits::ArdModuleT;
use crate::candle_noise::NoiseSource;

#[derive(Args, Debug, Clone)]
pub struct SparseRegressionArgs {
    #[arg(long, default_value = "500", help = "Number of samples")]
    pub rows: usize,

    #[arg(long, default_value = "50", help = "Number of features")]
    pub cols: usize,

    #[arg(long, default_value = "1", help = "Number of outputs")]
    pub outputs: usize,

    #[arg(long, default_value = "5", help = "Number of causal features")]
    pub causal: usize,

    #[arg(long, default_value = "0.5")]
    pub noise_sd: f32,

    #[arg(long, help = "Hidden layer size (a single ARD layer if omitted)")]
    pub hidden: Option<usize>,

    #[arg(long, default_value = "1000")]
    pub iters: usize,

    #[arg(long, default_value = "0.01")]
    pub lr: f64,

    #[arg(long, default_value = "1.0", help = "Weight of the KL penalty")]
    pub kl_weight: f64,

    #[arg(long, default_value = "3.0", help = "log α threshold for relevance")]
    pub threshold: f64,

    #[arg(long, help = "Random seed for simulation and noise")]
    pub seed: Option<u64>,

    #[arg(short, long, help = "Output JSON file for the sparsity report")]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub gpu: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

/// How many true-signal and null weights survive the relevance mask
struct FeatureRecovery {
    kept_causal: usize,
    num_causal: usize,
    kept_null: usize,
    num_null: usize,
}

fn feature_recovery(layer: &LinearArd, beta_pk: &Tensor, threshold: f64) -> Result<FeatureRecovery> {
    let mask_pk = layer
        .relevance(threshold)?
        .t()?
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .to_vec2::<f32>()?;
    let beta_pk = beta_pk
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .to_vec2::<f32>()?;

    let mut ret = FeatureRecovery {
        kept_causal: 0,
        num_causal: 0,
        kept_null: 0,
        num_null: 0,
    };

    for (mask_k, beta_k) in mask_pk.iter().zip(beta_pk.iter()) {
        for (&m, &b) in mask_k.iter().zip(beta_k.iter()) {
            let kept = (m > 0.5) as usize;
            if b != 0.0 {
                ret.num_causal += 1;
                ret.kept_causal += kept;
            } else {
                ret.num_null += 1;
                ret.kept_null += kept;
            }
        }
    }
    Ok(ret)
}

fn select_device(gpu: bool) -> Device {
    if !gpu {
        return Device::Cpu;
    }
    match Device::new_cuda(0).or_else(|_| Device::new_metal(0)) {
        Ok(dev) => dev,
        Err(err) => {
            warn!("no GPU available ({}), falling back to CPU", err);
            Device::Cpu
        }
    }
}

//
// Main entry point
//

pub fn run(args: &SparseRegressionArgs) -> Result<SparsityReport> {
    let device = select_device(args.gpu);
    info!("Using device: {:?}", device);

    let sim = generate_sparse_regression_data(
        &SimArgs {
            rows: args.rows,
            cols: args.cols,
            outputs: args.outputs,
            causal: args.causal,
            noise_sd: args.noise_sd,
            rseed: args.seed,
        },
        &device,
    )?;
    info!("  X shape: {:?}", sim.x_np.dims());
    info!("  Y shape: {:?}", sim.y_nk.dims());
    info!("  causal features: {:?}", sim.causal);

    let noise = match args.seed {
        Some(seed) => NoiseSource::from_seed(seed),
        None => NoiseSource::from_os_rng(),
    };

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let mut model = StackLayers::new();
    match args.hidden {
        Some(hh) => {
            info!("Model: {} -> {} (relu) -> {}", args.cols, hh, args.outputs);
            model.push_with_act(
                linear_ard(args.cols, hh, vb.pp("fc1"), noise.clone())?,
                Activation::Relu,
            );
            model.push(linear_ard(hh, args.outputs, vb.pp("fc2"), noise)?);
        }
        None => {
            info!("Model: {} -> {}", args.cols, args.outputs);
            model.push(linear_ard(args.cols, args.outputs, vb.pp("fc"), noise)?);
        }
    }

    let train_config = TrainConfig {
        learning_rate: args.lr,
        num_iters: args.iters,
        kl_weight: args.kl_weight,
        device: device.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let loss_trace = train_ard_regression(&model, &varmap, &sim.x_np, &sim.y_nk, &train_config)?;
    if let Some(loss) = loss_trace.last() {
        info!("final loss: {:.4}", loss);
    }

    let y_hat_nk = model.forward_t(&sim.x_np, false)?;
    let mse = sim
        .y_nk
        .sub(&y_hat_nk)?
        .sqr()?
        .mean_all()?
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F32)?
        .to_scalar::<f32>()?;
    info!("training MSE (evaluation mode): {:.4}", mse);

    let report = SparsityReport::collect(&varmap, &[&model], args.threshold)?;
    for entry in report.entries.iter() {
        info!("{:>16}: {:6} / {:6} dropped", entry.name, entry.dropped, entry.numel);
    }
    info!(
        "total sparsity at log α <= {}: {:.3} ({} / {})",
        report.threshold,
        report.ratio(),
        report.dropped(),
        report.numel()
    );

    if args.hidden.is_none() {
        let rec = feature_recovery(&model.layers()[0], &sim.beta_pk, args.threshold)?;
        info!(
            "kept {}/{} causal weights and {}/{} null weights",
            rec.kept_causal, rec.num_causal, rec.kept_null, rec.num_null
        );
    }

    if let Some(ref p) = args.output {
        let writer = BufWriter::new(File::create(p)?);
        serde_json::to_writer_pretty(writer, &report)?;
        info!("Saved sparsity report to {:?}", p);
    }

    Ok(report)
}
