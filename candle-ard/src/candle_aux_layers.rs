use candle_core::{Result, Tensor, TensorId};
use candle_nn::{Activation, Module, ModuleT};

use crate::candle_model_traits::{ArdModuleT, SparsityStatsT};

/// build a stack of alternating `M` and `A` layers
pub struct StackLayers<M>
where
    M: ModuleT,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> ModuleT for StackLayers<M>
where
    M: ModuleT,
{
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward_t(&x, train)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: ModuleT,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }

    pub fn layers(&self) -> &[M] {
        &self.module_layers
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: ModuleT,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Per-weight penalties and masks of all layers, flattened and
/// concatenated in layer order
impl<M> ArdModuleT for StackLayers<M>
where
    M: ModuleT + ArdModuleT,
{
    fn penalty(&self) -> Result<Tensor> {
        let penalties = self
            .module_layers
            .iter()
            .map(|m| m.penalty()?.flatten_all())
            .collect::<Result<Vec<_>>>()?;
        Tensor::cat(&penalties, 0)
    }

    fn relevance(&self, threshold: f64) -> Result<Tensor> {
        let masks = self
            .module_layers
            .iter()
            .map(|m| m.relevance(threshold)?.flatten_all())
            .collect::<Result<Vec<_>>>()?;
        Tensor::cat(&masks, 0)
    }
}

impl<M> SparsityStatsT for StackLayers<M>
where
    M: ModuleT + SparsityStatsT,
{
    fn sparsity(&self, threshold: f64) -> Result<Vec<(TensorId, usize)>> {
        let mut ret = vec![];
        for m in self.module_layers.iter() {
            ret.extend(m.sparsity(threshold)?);
        }
        Ok(ret)
    }

    fn sparsity_ignore(&self) -> Vec<TensorId> {
        self.module_layers
            .iter()
            .flat_map(|m| m.sparsity_ignore())
            .collect()
    }
}
