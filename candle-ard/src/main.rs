use anyhow::Result;
use candle_ard::cli::{sparse_regression, Cli, Commands};
use clap::Parser;

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::SparseRegression(args) => {
            sparse_regression::run(args)?;
        }
    }

    Ok(())
}
