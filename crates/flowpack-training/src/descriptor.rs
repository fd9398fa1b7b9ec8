//! Project descriptors consumed by the serving platform.
//!
//! Field names and their order are a contract with the downstream GPPI loader.
//! Keys are emitted in lexical order, matching the files produced so far.

use crate::error::{TrainingError, TrainingResult};
use crate::layout::{ENTRYPOINT_FILE, ENTRYPOINT_MODULE, MODEL_SUBFOLDER};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DESCRIPTOR_FORMAT_VERSION: &str = "1.0";
pub const BINARIES_TYPE: &str = "python";
pub const CONDA_DEPENDENCIES: &str = "conda";
pub const TOOLCHAIN_NAME: &str = "mlflow";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binaries {
    pub conda_path: String,
    pub dependencies: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorModel {
    pub entrypoint: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "workDir")]
    pub work_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub name: String,
    pub version: String,
}

/// `odahuflow.project.yaml` for a packaged GPPI model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDescriptor {
    pub binaries: Binaries,
    pub model: DescriptorModel,
    #[serde(rename = "odahuflowVersion")]
    pub odahuflow_version: String,
    pub output: RunOutput,
    pub toolchain: Toolchain,
}

impl ProjectDescriptor {
    /// Descriptor for a conda-backed python model living in the model subfolder.
    pub fn for_conda_model(
        name: &str,
        version: &str,
        conda_path: String,
        toolchain_version: &str,
        run_id: &str,
    ) -> Self {
        Self {
            binaries: Binaries {
                conda_path,
                dependencies: CONDA_DEPENDENCIES.to_string(),
                kind: BINARIES_TYPE.to_string(),
            },
            model: DescriptorModel {
                entrypoint: ENTRYPOINT_MODULE.to_string(),
                name: name.to_string(),
                version: version.to_string(),
                work_dir: MODEL_SUBFOLDER.to_string(),
            },
            odahuflow_version: DESCRIPTOR_FORMAT_VERSION.to_string(),
            output: RunOutput { run_id: run_id.to_string() },
            toolchain: Toolchain {
                name: TOOLCHAIN_NAME.to_string(),
                version: toolchain_version.to_string(),
            },
        }
    }

    pub fn to_yaml(&self) -> TrainingResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn save(&self, path: &Path) -> TrainingResult<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Verify that a packaged tree rooted at `root` matches this descriptor.
    pub fn self_check(&self, root: &Path) -> TrainingResult<()> {
        if self.binaries.kind != BINARIES_TYPE {
            return Err(TrainingError::Packaging(format!(
                "unsupported binaries type: {}",
                self.binaries.kind
            )));
        }

        let work_dir = root.join(&self.model.work_dir);
        if !work_dir.is_dir() {
            return Err(TrainingError::Packaging(format!(
                "model directory {} is missing",
                work_dir.display()
            )));
        }

        let conda = root.join(&self.binaries.conda_path);
        if !conda.is_file() {
            return Err(TrainingError::Packaging(format!(
                "conda environment file {} is missing",
                conda.display()
            )));
        }

        let entrypoint = work_dir.join(format!("{}.py", self.model.entrypoint));
        if !entrypoint.is_file() {
            return Err(TrainingError::Packaging(format!(
                "entrypoint {} is missing",
                entrypoint.display()
            )));
        }
        Ok(())
    }
}

/// `odahuflow.project.yaml` written by project-data packaging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDataDescriptor {
    pub name: String,
    pub output: RunOutput,
    pub version: String,
}

impl ProjectDataDescriptor {
    pub fn new(name: &str, version: &str, run_id: &str) -> Self {
        Self {
            name: name.to_string(),
            output: RunOutput { run_id: run_id.to_string() },
            version: version.to_string(),
        }
    }

    pub fn save(&self, path: &Path) -> TrainingResult<()> {
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}
