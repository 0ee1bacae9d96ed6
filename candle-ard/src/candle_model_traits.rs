use candle_core::{Result, Tensor, TensorId};

/// Layers with automatic relevance determination
pub trait ArdModuleT {
    /// Penalty (KL divergence to the sparsifying prior), one value per
    /// weight. The caller reduces it into the loss.
    fn penalty(&self) -> Result<Tensor>;

    /// Relevance mask: 1 for weights to keep, 0 for prunable ones, in
    /// the float type of the weights so that it can multiply them.
    /// Computed outside of the gradient graph.
    ///
    /// * `threshold` - upper bound on log α for a relevant weight
    fn relevance(&self, threshold: f64) -> Result<Tensor>;
}

/// Layers that can report how many of their parameters are prunable
pub trait SparsityStatsT {
    /// `(parameter identity, number of prunable elements)` pairs
    ///
    /// * `threshold` - upper bound on log α for a relevant weight
    fn sparsity(&self, threshold: f64) -> Result<Vec<(TensorId, usize)>>;

    /// Parameters that total sparsity aggregation must skip
    /// (auxiliary or noise parameters rather than weights)
    fn sparsity_ignore(&self) -> Vec<TensorId> {
        vec![]
    }
}
