//! Python library generation around a packaged model.

use clap::Args;
use colored::Colorize;
use flowpack_training::library::{LibraryPackage, package_dir_name};
use flowpack_training::{ModelLibraryInfo, generate_model_library};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct LibraryArgs {
    /// Packaged GPPI directory to embed
    #[arg(long)]
    pub binaries: PathBuf,

    /// Directory the library project is written into
    #[arg(long, short)]
    pub output: PathBuf,

    /// Name registered under the `odahuflow.models` entry point group
    #[arg(long)]
    pub name: String,

    /// Python package directory (default: derived from --name)
    #[arg(long)]
    pub package_dir: Option<String>,

    #[arg(long, default_value = "model")]
    pub package_name: String,

    #[arg(long, default_value = "1.0.0")]
    pub package_version: String,

    /// Top-level project directory name
    #[arg(long, default_value = "model")]
    pub project_name: String,
}

pub fn execute(args: &LibraryArgs) -> anyhow::Result<()> {
    let package_dir = args.package_dir.clone().unwrap_or_else(|| package_dir_name(&args.name));
    let mut info = ModelLibraryInfo::new(args.name.clone(), package_dir, args.binaries.clone());
    info.project_name.clone_from(&args.project_name);
    info.package = LibraryPackage { name: args.package_name.clone(), version: args.package_version.clone() };

    let path = generate_model_library(&info, &args.output)?;
    println!("{} {}", "Library generated:".bold().green(), path.display());
    Ok(())
}
