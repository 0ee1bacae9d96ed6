use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};

pub struct SimArgs {
    pub rows: usize,
    pub cols: usize,
    pub outputs: usize,
    pub causal: usize,
    pub noise_sd: f32,
    pub rseed: Option<u64>,
}

pub struct SimOut {
    /// design matrix (n x p)
    pub x_np: Tensor,
    /// response (n x k)
    pub y_nk: Tensor,
    /// true coefficients (p x k)
    pub beta_pk: Tensor,
    /// indexes of the causal features, sorted
    pub causal: Vec<usize>,
}

/// Generate a sparse linear regression problem
///
/// ```text
/// X(i,j) ~ N(0, 1)
/// β(j,k) = ±U(1, 2) if j is causal, 0 otherwise
/// Y(i,k) = sum_j X(i,j) β(j,k) + N(0, noise_sd²)
/// ```
///
/// The same `causal` features drive every output.
///
pub fn generate_sparse_regression_data(args: &SimArgs, device: &Device) -> anyhow::Result<SimOut> {
    let nn = args.rows;
    let pp = args.cols;
    let kk = args.outputs;
    let rseed = args.rseed.unwrap_or(42);

    if args.causal > pp {
        anyhow::bail!("{} causal features requested out of {}", args.causal, pp);
    }

    let mut rng = StdRng::seed_from_u64(rseed);

    // 1. causal features
    let mut causal = rand::seq::index::sample(&mut rng, pp, args.causal).into_vec();
    causal.sort_unstable();

    // 2. effect sizes
    let runif = Uniform::new(1_f32, 2_f32)?;
    let mut beta = vec![0_f32; pp * kk];
    for &j in causal.iter() {
        for k in 0..kk {
            let sign = if rng.random_bool(0.5) { 1. } else { -1. };
            beta[j * kk + k] = sign * runif.sample(&mut rng);
        }
    }
    let beta_pk = Tensor::from_vec(beta, (pp, kk), &Device::Cpu)?;

    // 3. design matrix
    let rnorm = Normal::new(0_f32, 1_f32)?;
    let x_np = Tensor::from_vec(
        (0..(nn * pp))
            .map(|_| rnorm.sample(&mut rng))
            .collect::<Vec<f32>>(),
        (nn, pp),
        &Device::Cpu,
    )?;

    // 4. response
    let rnoise = Normal::new(0_f32, args.noise_sd)?;
    let eps_nk = Tensor::from_vec(
        (0..(nn * kk))
            .map(|_| rnoise.sample(&mut rng))
            .collect::<Vec<f32>>(),
        (nn, kk),
        &Device::Cpu,
    )?;
    let y_nk = x_np.matmul(&beta_pk)?.add(&eps_nk)?;

    Ok(SimOut {
        x_np: x_np.to_device(device)?,
        y_nk: y_nk.to_device(device)?,
        beta_pk: beta_pk.to_device(device)?,
        causal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(rseed: u64) -> SimArgs {
        SimArgs {
            rows: 30,
            cols: 12,
            outputs: 2,
            causal: 3,
            noise_sd: 0.1,
            rseed: Some(rseed),
        }
    }

    #[test]
    fn test_shapes_and_support() -> anyhow::Result<()> {
        let sim = generate_sparse_regression_data(&args(1), &Device::Cpu)?;

        assert_eq!(sim.x_np.dims(), &[30, 12]);
        assert_eq!(sim.y_nk.dims(), &[30, 2]);
        assert_eq!(sim.beta_pk.dims(), &[12, 2]);
        assert_eq!(sim.causal.len(), 3);

        let beta = sim.beta_pk.to_vec2::<f32>()?;
        for (j, row) in beta.iter().enumerate() {
            for b in row.iter() {
                if sim.causal.contains(&j) {
                    assert!((1.0..=2.0).contains(&b.abs()));
                } else {
                    assert_eq!(*b, 0.0);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_seeded() -> anyhow::Result<()> {
        let a = generate_sparse_regression_data(&args(7), &Device::Cpu)?;
        let b = generate_sparse_regression_data(&args(7), &Device::Cpu)?;
        assert_eq!(a.causal, b.causal);
        assert_eq!(a.y_nk.to_vec2::<f32>()?, b.y_nk.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_too_many_causal() {
        let mut bad = args(0);
        bad.causal = 13;
        assert!(generate_sparse_regression_data(&bad, &Device::Cpu).is_err());
    }
}
