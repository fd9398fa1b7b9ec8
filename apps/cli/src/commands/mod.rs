//! Command implementations for the Flowpack CLI.

pub mod library;
pub mod package;
pub mod schema;
pub mod train;

use anyhow::Context;
use colored::Colorize;
use flowpack_training::{PipelineOutcome, RunnerConfig};
use std::path::Path;

/// Load configuration: global file, then `--config` or `./.flowpackrc`, then environment.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<RunnerConfig> {
    RunnerConfig::discover_and_load(explicit).context("Failed to load configuration")
}

/// Summary printed to stdout once a model is packaged.
pub fn print_outcome(outcome: &PipelineOutcome) {
    println!();
    println!("{}", "Model packaged".bold().green());
    println!("  Training: {}", outcome.request.id.cyan());
    println!("  Model:    {} {}", outcome.request.name, outcome.request.version);
    println!("  Run ID:   {}", outcome.run_id.cyan());
    println!("  Target:   {}", outcome.target.display());
    if let Some(library) = &outcome.library {
        println!("  Library:  {}", library.display());
    }
}
