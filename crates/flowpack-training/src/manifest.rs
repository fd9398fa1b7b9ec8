//! MLflow `MLmodel` manifest.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Marker file identifying a model directory.
pub const MLMODEL_FILE: &str = "MLmodel";

/// Flavor every packaged model must expose.
pub const PYFUNC_FLAVOR: &str = "python_function";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    #[serde(default)]
    pub artifact_path: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub utc_time_created: Option<String>,
    #[serde(default)]
    pub flavors: BTreeMap<String, serde_yaml::Value>,
}

/// Environment reference of the `python_function` flavor.
///
/// MLflow 1.x stores a single conda file name, 2.x a map per environment manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvReference {
    Path(String),
    Managers {
        #[serde(default)]
        conda: Option<String>,
        #[serde(default)]
        virtualenv: Option<String>,
    },
}

impl EnvReference {
    /// Conda environment file, relative to the model directory.
    pub fn conda_file(&self) -> Option<&str> {
        let file = match self {
            Self::Path(path) => Some(path.as_str()),
            Self::Managers { conda, .. } => conda.as_deref(),
        };
        file.filter(|p| !p.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PyFuncFlavor {
    #[serde(default)]
    pub loader_module: Option<String>,
    #[serde(default)]
    pub python_version: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub env: Option<EnvReference>,
}

impl ModelManifest {
    /// Load `<model_dir>/MLmodel`.
    pub fn load(model_dir: &Path) -> TrainingResult<Self> {
        let path = model_dir.join(MLMODEL_FILE);
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn has_flavor(&self, flavor: &str) -> bool {
        self.flavors.contains_key(flavor)
    }

    pub fn flavor_names(&self) -> Vec<&str> {
        self.flavors.keys().map(String::as_str).collect()
    }

    /// The `python_function` flavor, if declared.
    pub fn pyfunc(&self) -> TrainingResult<Option<PyFuncFlavor>> {
        self.flavors
            .get(PYFUNC_FLAVOR)
            .map(|value| {
                serde_yaml::from_value::<PyFuncFlavor>(value.clone()).map_err(|e| {
                    TrainingError::Packaging(format!("invalid {PYFUNC_FLAVOR} flavor: {e}"))
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MLFLOW_1_MANIFEST: &str = r"
artifact_path: model
flavors:
  python_function:
    data: model.pkl
    env: conda.yaml
    loader_module: mlflow.sklearn
    python_version: 3.6.9
  sklearn:
    pickled_model: model.pkl
    sklearn_version: 0.22.1
run_id: 5c1b
utc_time_created: '2020-02-03 10:00:00.000000'
";

    #[test]
    fn test_load_mlflow_1_manifest() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(MLMODEL_FILE), MLFLOW_1_MANIFEST).unwrap();

        let manifest = ModelManifest::load(temp.path()).unwrap();
        assert!(manifest.has_flavor(PYFUNC_FLAVOR));
        assert_eq!(manifest.flavor_names(), vec!["python_function", "sklearn"]);

        let pyfunc = manifest.pyfunc().unwrap().unwrap();
        assert_eq!(pyfunc.env.unwrap().conda_file(), Some("conda.yaml"));
        assert_eq!(pyfunc.loader_module.as_deref(), Some("mlflow.sklearn"));
    }

    #[test]
    fn test_env_manager_map() {
        let yaml = "flavors:\n  python_function:\n    env:\n      conda: conda.yaml\n      virtualenv: python_env.yaml\n";
        let manifest: ModelManifest = serde_yaml::from_str(yaml).unwrap();
        let env = manifest.pyfunc().unwrap().unwrap().env.unwrap();
        assert_eq!(env.conda_file(), Some("conda.yaml"));

        let yaml = "flavors:\n  python_function:\n    env:\n      virtualenv: python_env.yaml\n";
        let manifest: ModelManifest = serde_yaml::from_str(yaml).unwrap();
        let env = manifest.pyfunc().unwrap().unwrap().env.unwrap();
        assert_eq!(env.conda_file(), None);
    }

    #[test]
    fn test_missing_pyfunc_flavor() {
        let manifest: ModelManifest = serde_yaml::from_str("flavors:\n  keras: {}\n").unwrap();
        assert!(!manifest.has_flavor(PYFUNC_FLAVOR));
        assert!(manifest.pyfunc().unwrap().is_none());
    }
}
