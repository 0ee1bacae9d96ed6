use std::sync::{Arc, Mutex, MutexGuard};

use candle_core::{DType, Device, Result, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// A shared stream of standard normal noise
///
/// Clones point to the same generator, so every stochastic layer that
/// holds a clone draws from one logical sequence. Seeding the source
/// makes the whole model's training-mode forward passes reproducible.
///
/// Candle's own `randn` cannot be seeded on the CPU device, hence the
/// samples are drawn here and moved onto the target device.
#[derive(Clone, Debug)]
pub struct NoiseSource {
    rng: Arc<Mutex<StdRng>>,
}

impl NoiseSource {
    /// Deterministic stream
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Stream seeded by the operating system
    pub fn from_os_rng() -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
        }
    }

    /// Restart the shared stream from `seed`; affects every clone
    pub fn reseed(&self, seed: u64) -> Result<()> {
        *self.lock()? = StdRng::seed_from_u64(seed);
        Ok(())
    }

    /// Draw `N(0, 1)` samples
    ///
    /// * `shape` - output shape
    /// * `dtype` - output type (sampled in f64, then converted)
    /// * `device` - target device
    pub fn randn<S: Into<Shape>>(&self, shape: S, dtype: DType, device: &Device) -> Result<Tensor> {
        let shape: Shape = shape.into();
        let nelem = shape.elem_count();

        let z = {
            let mut rng = self.lock()?;
            (0..nelem)
                .map(|_| rng.sample::<f64, _>(StandardNormal))
                .collect::<Vec<f64>>()
        };

        // convert on CPU before moving (Metal doesn't support F64)
        Tensor::from_vec(z, shape, &Device::Cpu)?
            .to_dtype(dtype)?
            .to_device(device)
    }

    /// Draw `N(0, 1)` samples shaped, typed and placed like `x`
    pub fn randn_like(&self, x: &Tensor) -> Result<Tensor> {
        self.randn(x.shape().clone(), x.dtype(), x.device())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StdRng>> {
        self.rng
            .lock()
            .map_err(|_| candle_core::Error::Msg("noise source lock poisoned".to_string()))
    }
}

impl Default for NoiseSource {
    fn default() -> Self {
        Self::from_os_rng()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_vec(x: &Tensor) -> Result<Vec<f32>> {
        x.flatten_all()?.to_vec1::<f32>()
    }

    #[test]
    fn test_same_seed_same_draws() -> Result<()> {
        let a = NoiseSource::from_seed(7).randn((4, 3), DType::F32, &Device::Cpu)?;
        let b = NoiseSource::from_seed(7).randn((4, 3), DType::F32, &Device::Cpu)?;

        assert_eq!(a.dims(), &[4, 3]);
        assert_eq!(to_vec(&a)?, to_vec(&b)?);
        Ok(())
    }

    #[test]
    fn test_clones_share_one_stream() -> Result<()> {
        let noise = NoiseSource::from_seed(11);
        let other = noise.clone();

        let first = noise.randn(5, DType::F32, &Device::Cpu)?;
        let second = other.randn(5, DType::F32, &Device::Cpu)?;
        assert_ne!(to_vec(&first)?, to_vec(&second)?);

        // rewinding through either handle replays the sequence
        other.reseed(11)?;
        let replay = noise.randn(5, DType::F32, &Device::Cpu)?;
        assert_eq!(to_vec(&first)?, to_vec(&replay)?);
        Ok(())
    }

    #[test]
    fn test_randn_like_matches_layout() -> Result<()> {
        let x = Tensor::zeros((2, 3, 4), DType::F64, &Device::Cpu)?;
        let z = NoiseSource::from_seed(0).randn_like(&x)?;
        assert_eq!(z.dims(), x.dims());
        assert_eq!(z.dtype(), DType::F64);
        Ok(())
    }
}
