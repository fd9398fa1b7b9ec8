//! Full pipeline: parse, prepare, run, locate, package.

use super::print_outcome;
use crate::Mode;
use anyhow::Context;
use flowpack_training::library::LibraryPackage;
use flowpack_training::{
    LibraryOptions, PackagingMode, Pipeline, RunOptions, RunnerConfig, parse_training_request,
};
use std::path::{Path, PathBuf};
use tracing::info;

pub async fn execute(
    config: RunnerConfig,
    mt_file: &Path,
    target: Option<PathBuf>,
    mode: Mode,
    library_output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let target = target.unwrap_or_else(|| config.default_target());
    let mode = match mode {
        Mode::Gppi => PackagingMode::Gppi,
        Mode::Project => PackagingMode::Project,
    };
    let options = RunOptions {
        target,
        mode,
        library: library_output.map(|output| LibraryOptions { output, package: LibraryPackage::default() }),
    };

    info!(resource = %mt_file.display(), target = %options.target.display(), "Starting training");
    let request = parse_training_request(mt_file)?;
    let pipeline = Pipeline::from_config(config).context("Failed to set up the training pipeline")?;
    let outcome = pipeline.run_request(request, &options).await?;

    print_outcome(&outcome);
    Ok(())
}
