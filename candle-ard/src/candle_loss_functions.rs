use candle_core::{Result, Tensor};
use candle_nn::ops;

/// Constants of the sigmoid-softplus fit to the KL divergence
/// (Molchanov et al. 2017, arxiv:1701.05369, eq. 14)
pub const ARD_K1: f64 = 0.63576;
pub const ARD_K2: f64 = 1.87320;
pub const ARD_K3: f64 = 1.48695;

/// Numerically stable softplus
///
/// log(1 + exp(x)) = log(1 + exp(-|x|)) + max(x, 0)
///
pub fn stable_softplus(x: &Tensor) -> Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    tail.add(&x.relu()?)
}

/// KL divergence between the weights' variational posterior
/// N(w | θ, α θ²) and the scale-free log-uniform prior 1/|w|
///
/// kl(α) = 0.5 * softplus(-log α) + k1 * sigmoid(-k3 * log α - k2)
///
/// The additive constant is chosen to be -k1, so `kl` is the
/// divergence up to that offset, element-wise, and no reduction is
/// made here.
///
/// * `log_alpha` - log of the multiplicative noise variance
///
pub fn ard_kl_penalty(log_alpha: &Tensor) -> Result<Tensor> {
    let neg_log_alpha = log_alpha.neg()?;
    let sigmoid = ops::sigmoid(&neg_log_alpha.affine(ARD_K3, -ARD_K2)?)?;
    let half_softplus = (stable_softplus(&neg_log_alpha)? * 0.5)?;
    half_softplus.add(&(sigmoid * ARD_K1)?)
}

/// Gaussian log-likelihood with unit variance
///
/// llik(i) = -0.5 * sum_w [ x(i,w) - xhat(i,w) ]^2
///
/// * `x_nd` - data tensor (observed data)
/// * `hat_nd` - reconstruction
///
pub fn gaussian_likelihood(x_nd: &Tensor, hat_nd: &Tensor) -> Result<Tensor> {
    x_nd.sub(hat_nd)?.sqr()?.sum(x_nd.rank() - 1)? * (-0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    fn softplus_ref(x: f64) -> f64 {
        (1.0 + x.exp()).ln()
    }

    fn sigmoid_ref(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn test_softplus_matches_naive_form() -> Result<()> {
        let xs = [-5.0, -1.0, 0.0, 0.5, 3.0];
        let x = Tensor::new(&xs, &Device::Cpu)?;
        let sp = stable_softplus(&x)?.to_vec1::<f64>()?;

        for (a, &b) in sp.iter().zip(xs.iter()) {
            assert_abs_diff_eq!(*a, softplus_ref(b), epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_penalty_closed_form() -> Result<()> {
        let las = [-3.0, -0.5, 0.0, 1.0, 4.0];
        let log_alpha = Tensor::new(&las, &Device::Cpu)?;
        let kl = ard_kl_penalty(&log_alpha)?.to_vec1::<f64>()?;

        for (a, &la) in kl.iter().zip(las.iter()) {
            let expected = 0.5 * softplus_ref(-la) + ARD_K1 * sigmoid_ref(-ARD_K3 * la - ARD_K2);
            assert_abs_diff_eq!(*a, expected, epsilon = 1e-10);
        }
        Ok(())
    }

    #[test]
    fn test_penalty_is_finite_at_extremes() -> Result<()> {
        for dtype in [DType::F32, DType::F64] {
            let log_alpha = Tensor::new(&[-1e6f64, 1e6], &Device::Cpu)?.to_dtype(dtype)?;
            let kl = ard_kl_penalty(&log_alpha)?
                .to_dtype(DType::F64)?
                .to_vec1::<f64>()?;

            assert!(kl.iter().all(|v| v.is_finite()), "{:?}", kl);
            // very relevant: 0.5 * 1e6 + k1; irrelevant: ~0
            assert_abs_diff_eq!(kl[0], 0.5e6 + ARD_K1, epsilon = 1e-1);
            assert_abs_diff_eq!(kl[1], 0.0, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_penalty_decreases_with_log_alpha() -> Result<()> {
        let log_alpha = Tensor::arange(-8.0f64, 8.0, &Device::Cpu)?;
        let kl = ard_kl_penalty(&log_alpha)?.to_vec1::<f64>()?;
        assert!(kl.windows(2).all(|w| w[0] > w[1]));
        Ok(())
    }

    #[test]
    fn test_gaussian_likelihood() -> Result<()> {
        let x = Tensor::new(&[[1.0f64, 2.0], [0.0, -1.0]], &Device::Cpu)?;
        let xhat = Tensor::new(&[[1.0f64, 0.0], [1.0, 1.0]], &Device::Cpu)?;
        let llik = gaussian_likelihood(&x, &xhat)?.to_vec1::<f64>()?;
        assert_eq!(llik, vec![-2.0, -2.5]);
        Ok(())
    }
}
