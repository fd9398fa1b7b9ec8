//! Model training resource parsing.
//!
//! A resource file is JSON or YAML. JSON is tried first; YAML is the fallback.
//! The canonical layout keeps everything under `spec`:
//!
//! ```yaml
//! id: wine-training        # optional, defaults to the model name
//! spec:
//!   name: wine
//!   version: "1.0"
//!   workDir: ./proj
//!   entrypoint: main       # optional
//!   hyperparameters:       # optional, scalar values only
//!     alpha: "0.5"
//! ```
//!
//! Older layouts are still read: the model name may come from `spec.model.name`
//! or `metadata.name`, the version from `spec.model.version`, and
//! `hyperParameters` is accepted as an alias.

use crate::error::{TrainingError, TrainingResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_ENTRY_POINT: &str = "main";

/// A parsed, validated training request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingRequest {
    /// Training identifier, recorded on the run as `training_id`.
    pub id: String,
    pub name: String,
    pub version: String,
    /// Project directory handed to the run. Always exists when parsed.
    pub work_dir: PathBuf,
    pub entry_point: String,
    pub hyperparameters: BTreeMap<String, String>,
}

/// Parse a resource file, resolving a relative `workDir` against the current directory.
pub fn parse_training_request(path: &Path) -> TrainingResult<TrainingRequest> {
    let base_dir = std::env::current_dir()?;
    parse_training_request_in(path, &base_dir)
}

/// Parse a resource file, resolving a relative `workDir` against `base_dir`.
pub fn parse_training_request_in(path: &Path, base_dir: &Path) -> TrainingResult<TrainingRequest> {
    info!(path = %path.display(), "Parsing model training file");

    if !path.is_file() {
        return Err(TrainingError::FileNotReadable(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|_| TrainingError::FileNotReadable(path.to_path_buf()))?;
    debug!(path = %path.display(), content = %content, "Model training file content");

    parse_training_request_str(&content, base_dir)
}

/// Parse resource text that has already been read.
pub fn parse_training_request_str(content: &str, base_dir: &Path) -> TrainingResult<TrainingRequest> {
    let value = decode(content)?;
    from_value(&value, base_dir)
}

fn decode(content: &str) -> TrainingResult<Value> {
    match serde_json::from_str::<Value>(content) {
        Ok(value) => Ok(value),
        Err(json_err) => {
            debug!(error = %json_err, "Resource is not JSON, trying YAML");
            serde_yaml::from_str::<Value>(content).map_err(|e| TrainingError::Decode(e.to_string()))
        }
    }
}

fn from_value(value: &Value, base_dir: &Path) -> TrainingResult<TrainingRequest> {
    let root = value
        .as_object()
        .ok_or_else(|| TrainingError::Schema("resource must be a mapping".to_string()))?;

    let spec = root
        .get("spec")
        .and_then(Value::as_object)
        .ok_or_else(|| TrainingError::Schema("cannot find spec field or it is not a mapping".to_string()))?;
    let model = optional_mapping(spec, "model", "spec.model")?;
    let metadata = optional_mapping(root, "metadata", "metadata")?;

    let name = string_field(spec.get("name"), "spec.name")?
        .or(string_field(model.and_then(|m| m.get("name")), "spec.model.name")?)
        .or(string_field(metadata.and_then(|m| m.get("name")), "metadata.name")?)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| TrainingError::Schema("model name is required".to_string()))?;

    let version = scalar_field(spec.get("version"), "spec.version")?
        .or(scalar_field(model.and_then(|m| m.get("version")), "spec.model.version")?)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TrainingError::Schema("model version is required".to_string()))?;

    let work_dir = string_field(spec.get("workDir"), "spec.workDir")?
        .ok_or_else(|| TrainingError::Schema("spec.workDir is required".to_string()))?;
    let work_dir = resolve_work_dir(&work_dir, base_dir)?;

    let entry_point = string_field(spec.get("entrypoint"), "spec.entrypoint")?
        .unwrap_or_else(|| DEFAULT_ENTRY_POINT.to_string());

    let hyperparameters = match spec.get("hyperparameters").or_else(|| spec.get("hyperParameters")) {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => hyperparameters_from(map)?,
        Some(other) => {
            return Err(TrainingError::Schema(format!("invalid hyperparameters: {other}")));
        }
    };

    let id = string_field(root.get("id"), "id")?.unwrap_or_else(|| name.clone());

    Ok(TrainingRequest { id, name, version, work_dir, entry_point, hyperparameters })
}

fn optional_mapping<'a>(
    parent: &'a Map<String, Value>,
    key: &str,
    field: &str,
) -> TrainingResult<Option<&'a Map<String, Value>>> {
    match parent.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(TrainingError::Schema(format!("{field} must be a mapping"))),
    }
}

fn string_field(value: Option<&Value>, field: &str) -> TrainingResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(TrainingError::Schema(format!("{field} should be a string, got {other}"))),
    }
}

fn scalar_field(value: Option<&Value>, field: &str) -> TrainingResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(TrainingError::Schema(format!("{field} should be a scalar, got {other}"))),
    }
}

fn hyperparameters_from(map: &Map<String, Value>) -> TrainingResult<BTreeMap<String, String>> {
    map.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(TrainingError::Schema(format!(
                        "hyperparameter {key} must be a scalar, got {other}"
                    )));
                }
            };
            Ok((key.clone(), value))
        })
        .collect()
}

fn resolve_work_dir(work_dir: &str, base_dir: &Path) -> TrainingResult<PathBuf> {
    let path = Path::new(work_dir);
    let resolved = if path.is_absolute() { path.to_path_buf() } else { base_dir.join(path) };

    if !resolved.is_dir() || std::fs::read_dir(&resolved).is_err() {
        return Err(TrainingError::Schema(format!(
            "workDir {} does not exist or is not a readable directory",
            resolved.display()
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn project(temp: &TempDir) -> PathBuf {
        let dir = temp.path().join("proj");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_json_and_yaml_parse_identically() {
        let temp = TempDir::new().unwrap();
        project(&temp);

        let json = r#"{"spec": {"name": "wine", "version": "1.0", "workDir": "./proj",
            "entrypoint": "main", "hyperparameters": {"alpha": "0.5"}}}"#;
        let yaml = "spec:\n  name: wine\n  version: \"1.0\"\n  workDir: ./proj\n  entrypoint: main\n  hyperparameters:\n    alpha: \"0.5\"\n";

        let from_json = parse_training_request_str(json, temp.path()).unwrap();
        let from_yaml = parse_training_request_str(yaml, temp.path()).unwrap();
        assert_eq!(from_json, from_yaml);
        assert_eq!(from_json.hyperparameters.get("alpha").map(String::as_str), Some("0.5"));
        assert_eq!(from_json.id, "wine");
    }

    #[test]
    fn test_defaults_for_entrypoint_and_hyperparameters() {
        let temp = TempDir::new().unwrap();
        let dir = project(&temp);

        let yaml = "spec:\n  name: wine\n  version: 2\n  workDir: proj\n";
        let request = parse_training_request_str(yaml, temp.path()).unwrap();
        assert_eq!(request.entry_point, DEFAULT_ENTRY_POINT);
        assert!(request.hyperparameters.is_empty());
        assert_eq!(request.version, "2");
        assert_eq!(request.work_dir, dir);
    }

    #[test]
    fn test_legacy_metadata_name_and_alias() {
        let temp = TempDir::new().unwrap();
        project(&temp);

        let yaml = "id: train-42\nmetadata:\n  name: legacy\nspec:\n  model:\n    version: \"3.1\"\n  workDir: proj\n  hyperParameters:\n    epochs: 10\n    verbose: true\n";
        let request = parse_training_request_str(yaml, temp.path()).unwrap();
        assert_eq!(request.name, "legacy");
        assert_eq!(request.version, "3.1");
        assert_eq!(request.id, "train-42");
        assert_eq!(request.hyperparameters.get("epochs").map(String::as_str), Some("10"));
        assert_eq!(request.hyperparameters.get("verbose").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_missing_work_dir_is_schema_error() {
        let temp = TempDir::new().unwrap();
        let err = parse_training_request_str("spec:\n  name: a\n  version: '1'\n", temp.path()).unwrap_err();
        assert!(matches!(err, TrainingError::Schema(_)));

        let err = parse_training_request_str(
            "spec:\n  name: a\n  version: '1'\n  workDir: nowhere\n",
            temp.path(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_non_scalar_hyperparameter_is_rejected() {
        let temp = TempDir::new().unwrap();
        project(&temp);
        let yaml = "spec:\n  name: a\n  version: '1'\n  workDir: proj\n  hyperparameters:\n    nested: [1, 2]\n";
        let err = parse_training_request_str(yaml, temp.path()).unwrap_err();
        assert!(matches!(err, TrainingError::Schema(_)));
    }

    #[test]
    fn test_mistyped_entrypoint_is_rejected() {
        let temp = TempDir::new().unwrap();
        project(&temp);
        let yaml = "spec:\n  name: a\n  version: '1'\n  workDir: proj\n  entrypoint: [main]\n";
        assert!(matches!(
            parse_training_request_str(yaml, temp.path()),
            Err(TrainingError::Schema(_))
        ));
    }

    #[test]
    fn test_undecodable_content() {
        let temp = TempDir::new().unwrap();
        let err = parse_training_request_str("spec: [unclosed", temp.path()).unwrap_err();
        assert!(matches!(err, TrainingError::Decode(_)));
    }

    #[test]
    fn test_missing_file_is_not_readable() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("mt.yaml");
        let err = parse_training_request_in(&missing, temp.path()).unwrap_err();
        assert!(matches!(err, TrainingError::FileNotReadable(_)));

        let err = parse_training_request_in(temp.path(), temp.path()).unwrap_err();
        assert!(matches!(err, TrainingError::FileNotReadable(_)));
    }
}
