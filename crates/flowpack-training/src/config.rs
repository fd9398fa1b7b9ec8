//! Runner configuration.
//!
//! Built once at startup and passed down explicitly.
//!
//! Configuration precedence (highest first):
//! 1. CLI arguments (applied by the binary)
//! 2. Environment variables
//! 3. Local config file (./.flowpackrc)
//! 4. Global config file (~/.flowpack/config.toml)
//! 5. Defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";
pub const TRACKING_TOKEN_ENV: &str = "MLFLOW_TRACKING_TOKEN";
pub const OUTPUT_DIR_ENV: &str = "ODAHUFLOW_OUTPUT_DIR";
pub const STATIC_ARTIFACTS_DIR_ENV: &str = "ODAHUFLOW_STATIC_ARTIFACTS_DIR";
pub const CONDA_ENV_NAME_ENV: &str = "ODAHU_CONDA_ENV_NAME";

pub const DEFAULT_CONDA_ENV_NAME: &str = "odahu_model";
pub const DEFAULT_TARGET_DIR: &str = "mlflow_output";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Tracking server location, e.g. `http://mlflow:5000` or `file:///data/mlruns`.
    pub tracking_uri: Option<String>,

    /// Bearer token for tracking servers behind authentication.
    #[serde(skip_serializing)]
    pub tracking_token: Option<String>,

    /// Output directory used when `--target` is not given.
    pub output_dir: Option<PathBuf>,

    /// Directory holding overrides for bundled files (e.g. `entrypoint.py`).
    pub static_artifacts_dir: Option<PathBuf>,

    /// Conda environment the project dependencies are installed into.
    pub conda_env_name: String,

    pub mlflow_command: String,

    pub conda_command: String,

    /// Run `conda env update` before training.
    pub prepare_environment: bool,

    /// Run `mlflow run` inside `conda run -n <conda_env_name>`.
    pub use_conda_env: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tracking_uri: None,
            tracking_token: None,
            output_dir: None,
            static_artifacts_dir: None,
            conda_env_name: DEFAULT_CONDA_ENV_NAME.to_string(),
            mlflow_command: "mlflow".to_string(),
            conda_command: "conda".to_string(),
            prepare_environment: true,
            use_conda_env: true,
        }
    }
}

/// Partial config as it appears in a file; unset keys leave the base untouched.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    tracking_uri: Option<String>,
    tracking_token: Option<String>,
    output_dir: Option<PathBuf>,
    static_artifacts_dir: Option<PathBuf>,
    conda_env_name: Option<String>,
    mlflow_command: Option<String>,
    conda_command: Option<String>,
    prepare_environment: Option<bool>,
    use_conda_env: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("failed to read configuration file: {0}")]
    ReadError(String),

    #[error("failed to parse configuration file: {0}")]
    ParseError(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl RunnerConfig {
    pub fn default_global_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowpack")
            .join("config.toml")
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from(".flowpackrc")
    }

    /// Overlay a single TOML file onto this configuration.
    pub fn merge_file(&mut self, path: &Path) -> ConfigResult<()> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let file: ConfigFile = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        self.merge(file);
        Ok(())
    }

    fn merge(&mut self, other: ConfigFile) {
        if other.tracking_uri.is_some() {
            self.tracking_uri = other.tracking_uri;
        }
        if other.tracking_token.is_some() {
            self.tracking_token = other.tracking_token;
        }
        if other.output_dir.is_some() {
            self.output_dir = other.output_dir;
        }
        if other.static_artifacts_dir.is_some() {
            self.static_artifacts_dir = other.static_artifacts_dir;
        }
        if let Some(name) = other.conda_env_name {
            self.conda_env_name = name;
        }
        if let Some(cmd) = other.mlflow_command {
            self.mlflow_command = cmd;
        }
        if let Some(cmd) = other.conda_command {
            self.conda_command = cmd;
        }
        if let Some(flag) = other.prepare_environment {
            self.prepare_environment = flag;
        }
        if let Some(flag) = other.use_conda_env {
            self.use_conda_env = flag;
        }
    }

    /// Apply environment overrides through `lookup`, normally `std::env::var`.
    ///
    /// Empty values are treated as unset.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(uri) = get(TRACKING_URI_ENV) {
            self.tracking_uri = Some(uri);
        }
        if let Some(token) = get(TRACKING_TOKEN_ENV) {
            self.tracking_token = Some(token);
        }
        if let Some(dir) = get(OUTPUT_DIR_ENV) {
            self.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get(STATIC_ARTIFACTS_DIR_ENV) {
            self.static_artifacts_dir = Some(PathBuf::from(dir));
        }
        if let Some(name) = get(CONDA_ENV_NAME_ENV) {
            self.conda_env_name = name;
        }
        self
    }

    /// Discover config files and environment overrides.
    ///
    /// `explicit` replaces the local `.flowpackrc` lookup and must exist.
    pub fn discover_and_load(explicit: Option<&Path>) -> ConfigResult<Self> {
        let mut config = Self::default();

        // Missing or broken global config is not fatal
        let _ = config.merge_file(&Self::default_global_path());

        match explicit {
            Some(path) => config.merge_file(path)?,
            None => {
                let _ = config.merge_file(&Self::default_local_path());
            }
        }

        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// The target directory when the CLI does not name one.
    pub fn default_target(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR))
    }
}
