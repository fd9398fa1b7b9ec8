//! Python library generation around a packaged model.
//!
//! ```text
//! <output>/<project_name>/
//!   setup.py
//!   <entrypoint.dir>/
//!     __init__.py
//!     <entrypoint.file>.py
//!     binaries/          # copy of the packaged GPPI tree
//! ```

use crate::error::{TrainingError, TrainingResult};
use crate::inference::{INPUT_SAMPLE_FILE, OUTPUT_SAMPLE_FILE};
use crate::layout::{MODEL_SUBFOLDER, copy_tree};
use crate::manifest::PYFUNC_FLAVOR;
use crate::templates::{LIBRARY_ENTRYPOINT, LIBRARY_INIT, LIBRARY_SETUP, TemplateRenderer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

pub const BINARIES_DIR: &str = "binaries";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryEntrypoint {
    #[serde(default = "default_entrypoint_file")]
    pub file: String,
    pub dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryPackage {
    pub name: String,
    pub version: String,
}

impl Default for LibraryPackage {
    fn default() -> Self {
        Self { name: "model".to_string(), version: "1.0.0".to_string() }
    }
}

/// Python package name derived from a model name: `wine-quality` becomes `wine_quality`.
pub fn package_dir_name(model_name: &str) -> String {
    let mut name: String = model_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "model_");
    }
    name
}

fn is_unsafe_literal_char(c: char) -> bool {
    matches!(c, '\'' | '"' | '=' | '\\') || c.is_whitespace() || c.is_control()
}

fn default_entrypoint_file() -> String {
    "entrypoint".to_string()
}

fn default_project_name() -> String {
    "model".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLibraryInfo {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    /// Name registered under the `odahuflow.models` entry point group.
    pub model_entrypoint_name: String,
    pub entrypoint: LibraryEntrypoint,
    #[serde(default)]
    pub package: LibraryPackage,
    /// Packaged GPPI tree to embed.
    pub binaries_path: PathBuf,
}

impl ModelLibraryInfo {
    pub fn new(
        model_entrypoint_name: impl Into<String>,
        entrypoint_dir: impl Into<String>,
        binaries_path: PathBuf,
    ) -> Self {
        Self {
            project_name: default_project_name(),
            model_entrypoint_name: model_entrypoint_name.into(),
            entrypoint: LibraryEntrypoint { file: default_entrypoint_file(), dir: entrypoint_dir.into() },
            package: LibraryPackage::default(),
            binaries_path,
        }
    }

    fn validate(&self) -> TrainingResult<()> {
        if self.binaries_path.as_os_str().is_empty() {
            return Err(TrainingError::Packaging("Binaries path variable is empty".to_string()));
        }
        if !self.binaries_path.is_dir() {
            return Err(TrainingError::Packaging(format!(
                "binaries path {} is not a directory",
                self.binaries_path.display()
            )));
        }

        let names = [
            ("project_name", &self.project_name),
            ("model_entrypoint_name", &self.model_entrypoint_name),
            ("entrypoint.file", &self.entrypoint.file),
            ("entrypoint.dir", &self.entrypoint.dir),
        ];
        for (field, value) in names {
            let invalid = value.trim().is_empty()
                || value.contains(['/', '\\'])
                || value.as_str() == ".."
                || value.as_str() == ".";
            if invalid {
                return Err(TrainingError::Packaging(format!("invalid {field}: {value:?}")));
            }
        }

        // Rendered into single-quoted literals and the entry point spec of setup.py
        let literals = [
            ("model_entrypoint_name", &self.model_entrypoint_name),
            ("package.name", &self.package.name),
            ("package.version", &self.package.version),
        ];
        for (field, value) in literals {
            if value.trim().is_empty() || value.contains(is_unsafe_literal_char) {
                return Err(TrainingError::Packaging(format!(
                    "invalid {field}: {value:?} must not be empty or contain quotes, '=' or whitespace"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    #[serde(flatten)]
    info: &'a ModelLibraryInfo,
    model_dir: &'a str,
    pyfunc_flavor: &'a str,
    input_sample_file: &'a str,
    output_sample_file: &'a str,
}

/// Render the library sources and embed the binaries. Returns the project directory.
pub fn generate_model_library(info: &ModelLibraryInfo, output: &Path) -> TrainingResult<PathBuf> {
    info.validate()?;

    let renderer = TemplateRenderer::new()?;
    let context = TemplateContext {
        info,
        model_dir: MODEL_SUBFOLDER,
        pyfunc_flavor: PYFUNC_FLAVOR,
        input_sample_file: INPUT_SAMPLE_FILE,
        output_sample_file: OUTPUT_SAMPLE_FILE,
    };

    let staging = TempDir::new()?;
    let project = staging.path().join(&info.project_name);
    let package_dir = project.join(&info.entrypoint.dir);
    std::fs::create_dir_all(&package_dir)?;

    std::fs::write(project.join("setup.py"), renderer.render(LIBRARY_SETUP, &context)?)?;
    std::fs::write(package_dir.join("__init__.py"), renderer.render(LIBRARY_INIT, &context)?)?;
    std::fs::write(
        package_dir.join(format!("{}.py", info.entrypoint.file)),
        renderer.render(LIBRARY_ENTRYPOINT, &context)?,
    )?;

    let binaries = copy_tree(&info.binaries_path, &package_dir.join(BINARIES_DIR))?;
    info!(files = binaries, source = %info.binaries_path.display(), "Binaries embedded");

    let destination = output.join(&info.project_name);
    copy_tree(&project, &destination)?;
    info!(path = %destination.display(), "Model library generated");
    Ok(destination)
}
