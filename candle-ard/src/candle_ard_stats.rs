use std::collections::{HashMap, HashSet};

use candle_core::{Result, Tensor, TensorId};
use candle_nn::VarMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::candle_ard_linear::LinearArd;
use crate::candle_model_traits::{ArdModuleT, SparsityStatsT};

/// Total penalty of many ARD layers, a scalar to add to the loss
///
/// sum_l sum_w kl_l(w)
///
pub fn sum_penalties(layers: &[&dyn ArdModuleT]) -> Result<Tensor> {
    let mut total: Option<Tensor> = None;
    for layer in layers {
        let kl = layer.penalty()?.sum_all()?;
        total = Some(match total {
            None => kl,
            Some(acc) => acc.add(&kl)?,
        });
    }
    total.ok_or_else(|| candle_core::Error::Msg("no ARD layers to penalize".to_string()))
}

/// Relevance masks of linear ARD layers keyed by their weight
pub fn compute_ard_masks(
    layers: &[&LinearArd],
    threshold: f64,
) -> Result<HashMap<TensorId, Tensor>> {
    layers
        .iter()
        .map(|layer| Ok((layer.weight().id(), layer.relevance(threshold)?)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsityEntry {
    /// variable name in the `VarMap`
    pub name: String,
    /// number of elements
    pub numel: usize,
    /// number of prunable elements
    pub dropped: usize,
}

/// Sparsity of all the variables in a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparsityReport {
    pub threshold: f64,
    pub entries: Vec<SparsityEntry>,
}

impl SparsityReport {
    /// Visit every variable of `varmap`
    ///
    /// - variables listed by any layer's `sparsity_ignore` are skipped
    /// - variables reported by a layer's `sparsity` take that count
    /// - everything else is dense (nothing dropped)
    ///
    /// * `varmap` - all the model's variables
    /// * `layers` - the sparsity-aware layers of the model
    /// * `threshold` - log α threshold
    pub fn collect(
        varmap: &VarMap,
        layers: &[&dyn SparsityStatsT],
        threshold: f64,
    ) -> Result<Self> {
        let mut ignored: HashSet<TensorId> = HashSet::new();
        let mut dropped: HashMap<TensorId, usize> = HashMap::new();

        for layer in layers {
            ignored.extend(layer.sparsity_ignore());
            for (id, n) in layer.sparsity(threshold)? {
                *dropped.entry(id).or_default() += n;
            }
        }

        let vars = varmap
            .data()
            .lock()
            .map_err(|_| candle_core::Error::Msg("variable map lock poisoned".to_string()))?;

        let mut entries = vars
            .iter()
            .filter(|(_, var)| !ignored.contains(&var.as_tensor().id()))
            .map(|(name, var)| SparsityEntry {
                name: name.clone(),
                numel: var.as_tensor().elem_count(),
                dropped: dropped.get(&var.as_tensor().id()).copied().unwrap_or(0),
            })
            .collect::<Vec<_>>();

        entries.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(
            "sparsity over {} variables, {} ignored",
            entries.len(),
            ignored.len()
        );

        Ok(Self { threshold, entries })
    }

    pub fn numel(&self) -> usize {
        self.entries.iter().map(|e| e.numel).sum()
    }

    pub fn dropped(&self) -> usize {
        self.entries.iter().map(|e| e.dropped).sum()
    }

    /// fraction of dropped elements; 0 if there is nothing to count
    pub fn ratio(&self) -> f64 {
        match self.numel() {
            0 => 0.0,
            n => self.dropped() as f64 / n as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_ard_linear::linear_ard;
    use crate::candle_noise::NoiseSource;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    #[test]
    fn test_sum_penalties() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let noise = NoiseSource::from_seed(0);

        let fc1 = linear_ard(5, 3, vb.pp("fc1"), noise.clone())?;
        let fc2 = linear_ard(3, 2, vb.pp("fc2"), noise)?;

        let total = sum_penalties(&[&fc1, &fc2])?.to_scalar::<f32>()?;
        let each = fc1.penalty()?.sum_all()?.to_scalar::<f32>()?
            + fc2.penalty()?.sum_all()?.to_scalar::<f32>()?;
        assert_abs_diff_eq!(total, each, epsilon = 1e-3);

        assert!(sum_penalties(&[]).is_err());
        Ok(())
    }

    #[test]
    fn test_masks_are_keyed_by_weight() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let noise = NoiseSource::from_seed(0);

        let fc1 = linear_ard(5, 3, vb.pp("fc1"), noise.clone())?;
        let fc2 = linear_ard(3, 2, vb.pp("fc2"), noise)?;

        let masks = compute_ard_masks(&[&fc1, &fc2], 3.0)?;
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[&fc1.weight().id()].dims(), &[3, 5]);
        assert_eq!(masks[&fc2.weight().id()].dims(), &[2, 3]);
        Ok(())
    }

    #[test]
    fn test_report_skips_noise_and_counts_dense() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = linear_ard(4, 3, vb.pp("ard"), NoiseSource::from_seed(0))?;

        // a dense parameter that is not part of any ARD layer
        let _scale = vb.get_with_hints(7, "scale", candle_nn::Init::Const(1.0))?;

        // everything is prunable below this threshold
        let report = SparsityReport::collect(&varmap, &[&layer], -1e6)?;

        let names = report.entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["ard.bias", "ard.weight", "scale"]);

        assert_eq!(report.numel(), 3 + 12 + 7);
        assert_eq!(report.dropped(), 12);
        assert_abs_diff_eq!(report.ratio(), 12.0 / 22.0);
        Ok(())
    }

    #[test]
    fn test_report_serializes() -> Result<()> {
        let report = SparsityReport {
            threshold: 3.0,
            entries: vec![SparsityEntry {
                name: "fc.weight".into(),
                numel: 10,
                dropped: 4,
            }],
        };
        let json = serde_json::to_string(&report).expect("serialize");
        let back: SparsityReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, report);
        assert_abs_diff_eq!(back.ratio(), 0.4);

        let empty = SparsityReport {
            threshold: 0.0,
            entries: vec![],
        };
        assert_eq!(empty.ratio(), 0.0);
        Ok(())
    }
}
