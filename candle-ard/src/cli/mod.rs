pub mod sparse_regression;

use clap::{Parser, Subcommand};

pub use sparse_regression::SparseRegressionArgs;

#[derive(Parser)]
#[command(name = "candle-ard")]
#[command(about = "Sparse linear models with automatic relevance determination")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit ARD regression to simulated sparse data and report sparsity
    SparseRegression(SparseRegressionArgs),
}
