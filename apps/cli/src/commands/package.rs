//! Package the model of a run that already finished.

use super::print_outcome;
use anyhow::Context;
use flowpack_training::library::LibraryPackage;
use flowpack_training::{LibraryOptions, PackagingMode, Pipeline, RunOptions, RunnerConfig, parse_training_request};
use std::path::{Path, PathBuf};

pub async fn execute(
    config: RunnerConfig,
    run_id: &str,
    mt_file: &Path,
    target: Option<PathBuf>,
    library_output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let request = parse_training_request(mt_file)?;
    let options = RunOptions {
        target: target.unwrap_or_else(|| config.default_target()),
        mode: PackagingMode::Gppi,
        library: library_output.map(|output| LibraryOptions { output, package: LibraryPackage::default() }),
    };

    let pipeline = Pipeline::from_config(config).context("Failed to set up the training pipeline")?;
    let outcome = pipeline.package_existing_run(run_id, request, &options).await?;

    print_outcome(&outcome);
    Ok(())
}
