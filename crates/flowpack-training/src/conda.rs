//! Conda environment preparation.
//!
//! The environment *name* is fixed by configuration, while the dependency file
//! is discovered from the project's own `MLproject` descriptor.

use crate::error::{TrainingError, TrainingResult};
use crate::process::{CommandSpec, run_streaming};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MLPROJECT_FILE_NAME: &str = "mlproject";
pub const DEFAULT_CONDA_FILE_NAME: &str = "conda.yaml";

#[derive(Debug, Default, Deserialize)]
struct MlProject {
    #[serde(default)]
    conda_env: Option<String>,
}

/// Find the `MLproject` file in `work_dir`, matching the name case-insensitively.
pub fn find_mlproject_file(work_dir: &Path) -> TrainingResult<PathBuf> {
    let mut entries = std::fs::read_dir(work_dir)?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect::<Vec<_>>();
    entries.sort();

    entries
        .into_iter()
        .find(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().to_lowercase() == MLPROJECT_FILE_NAME)
        })
        .ok_or_else(|| {
            TrainingError::Environment(format!(
                "can't find an MLproject file in the '{}' dir",
                work_dir.display()
            ))
        })
}

/// Read the conda dependency file name declared by an `MLproject` file.
pub fn extract_conda_file_name(mlproject: &Path) -> TrainingResult<String> {
    let content = std::fs::read_to_string(mlproject)?;
    let project: Option<MlProject> = serde_yaml::from_str(&content)?;
    Ok(project
        .and_then(|p| p.conda_env)
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CONDA_FILE_NAME.to_string()))
}

#[derive(Debug, Clone)]
pub struct EnvironmentPreparer {
    conda_command: String,
    env_name: String,
}

impl EnvironmentPreparer {
    pub fn new(conda_command: impl Into<String>, env_name: impl Into<String>) -> Self {
        Self { conda_command: conda_command.into(), env_name: env_name.into() }
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    /// `conda env update -n <env> -f <conda file>`, run from the project directory.
    pub fn update_command(&self, work_dir: &Path) -> TrainingResult<CommandSpec> {
        let conda_file = extract_conda_file_name(&find_mlproject_file(work_dir)?)?;
        Ok(CommandSpec::new(&self.conda_command)
            .args(["env", "update", "-n", self.env_name.as_str(), "-f", conda_file.as_str()])
            .current_dir(work_dir))
    }

    pub async fn prepare(&self, work_dir: &Path) -> TrainingResult<()> {
        info!(env = %self.env_name, work_dir = %work_dir.display(), "Updating conda dependencies");
        let command = self.update_command(work_dir)?;
        run_streaming(&command).await?.ensure_success(&command)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mlproject_lookup_is_case_insensitive() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("MLProject"), "name: wine\nconda_env: env.yml\n").unwrap();

        let found = find_mlproject_file(temp.path()).unwrap();
        assert!(found.ends_with("MLProject"));
        assert_eq!(extract_conda_file_name(&found).unwrap(), "env.yml");
    }

    #[test]
    fn test_conda_file_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("MLproject");
        std::fs::write(&path, "name: wine\nentry_points:\n  main:\n    command: python train.py\n").unwrap();
        assert_eq!(extract_conda_file_name(&path).unwrap(), DEFAULT_CONDA_FILE_NAME);

        std::fs::write(&path, "").unwrap();
        assert_eq!(extract_conda_file_name(&path).unwrap(), DEFAULT_CONDA_FILE_NAME);
    }

    #[test]
    fn test_missing_mlproject() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("mlproject")).unwrap();
        let err = find_mlproject_file(temp.path()).unwrap_err();
        assert!(matches!(err, TrainingError::Environment(_)));
    }

    #[test]
    fn test_update_command_uses_configured_env_name() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("MLproject"), "conda_env: deps.yaml\n").unwrap();

        let preparer = EnvironmentPreparer::new("conda", "custom_env");
        let command = preparer.update_command(temp.path()).unwrap();
        assert_eq!(command.to_string(), "conda env update -n custom_env -f deps.yaml");
        assert_eq!(command.cwd.as_deref(), Some(temp.path()));
    }
}
