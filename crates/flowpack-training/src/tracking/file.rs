//! MLflow file store (`mlruns/` directory).
//!
//! ```text
//! <root>/<experiment_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/meta.yaml
//! <root>/<experiment_id>/<run_id>/tags/<key>
//! <root>/<experiment_id>/<run_id>/artifacts/
//! ```

use super::{Experiment, RunInfo, TrackingStore};
use crate::error::{TrainingError, TrainingResult};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

const META_FILE: &str = "meta.yaml";
const TAGS_DIR: &str = "tags";
const ARTIFACTS_DIR: &str = "artifacts";
const LIFECYCLE_ACTIVE: &str = "active";
const LIFECYCLE_DELETED: &str = "deleted";

#[derive(Debug, Clone)]
pub struct FileTrackingStore {
    root: PathBuf,
    uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExperimentMeta {
    #[serde(default)]
    artifact_location: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    experiment_id: String,
    #[serde(default)]
    lifecycle_stage: Option<String>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    creation_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_update_time: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunMeta {
    artifact_uri: String,
    #[serde(deserialize_with = "string_or_number")]
    experiment_id: String,
    #[serde(default)]
    lifecycle_stage: Option<String>,
    run_id: String,
    #[serde(default)]
    run_uuid: Option<String>,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    status: Option<serde_yaml::Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number, got {other:?}"))),
    }
}

/// MLflow stores run status as the numeric `RunStatus` enum.
fn status_name(status: &serde_yaml::Value) -> Option<String> {
    match status {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => {
            let name = match n.as_i64()? {
                1 => "RUNNING",
                2 => "SCHEDULED",
                3 => "FINISHED",
                4 => "FAILED",
                5 => "KILLED",
                _ => return None,
            };
            Some(name.to_string())
        }
        _ => None,
    }
}

impl FileTrackingStore {
    pub fn new(root: PathBuf) -> Self {
        let uri = root.display().to_string();
        Self { root, uri }
    }

    pub fn with_uri(root: PathBuf, uri: String) -> Self {
        Self { root, uri }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn location_uri(path: &Path) -> String {
        Url::from_file_path(path).map_or_else(|()| path.display().to_string(), |u| u.to_string())
    }

    fn experiment_dirs(&self) -> TrainingResult<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let hidden = path.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.'));
            if path.is_dir() && !hidden && path.join(META_FILE).is_file() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn read_experiment(dir: &Path) -> TrainingResult<ExperimentMeta> {
        let content = std::fs::read_to_string(dir.join(META_FILE))?;
        Ok(serde_yaml::from_str(&content)?)
    }

    fn run_dir(&self, run_id: &str) -> TrainingResult<PathBuf> {
        for experiment_dir in self.experiment_dirs()? {
            let candidate = experiment_dir.join(run_id);
            if candidate.join(META_FILE).is_file() {
                return Ok(candidate);
            }
        }
        Err(TrainingError::Tracking(format!("run '{run_id}' not found in {}", self.root.display())))
    }

    /// Register a new run directory, as `mlflow run` does against a file store.
    pub fn create_run(&self, experiment_id: &str, run_id: &str) -> TrainingResult<RunInfo> {
        let run_dir = self.root.join(experiment_id).join(run_id);
        std::fs::create_dir_all(run_dir.join(ARTIFACTS_DIR))?;
        std::fs::create_dir_all(run_dir.join(TAGS_DIR))?;

        let artifact_uri = Self::location_uri(&run_dir.join(ARTIFACTS_DIR));
        let meta = RunMeta {
            artifact_uri: artifact_uri.clone(),
            experiment_id: experiment_id.to_string(),
            lifecycle_stage: Some(LIFECYCLE_ACTIVE.to_string()),
            run_id: run_id.to_string(),
            run_uuid: Some(run_id.to_string()),
            start_time: Some(chrono::Utc::now().timestamp_millis()),
            status: Some(serde_yaml::Value::Number(3.into())),
        };
        std::fs::write(run_dir.join(META_FILE), serde_yaml::to_string(&meta)?)?;

        Ok(RunInfo {
            run_id: run_id.to_string(),
            experiment_id: experiment_id.to_string(),
            artifact_uri,
            status: Some("FINISHED".to_string()),
        })
    }
}

#[async_trait]
impl TrackingStore for FileTrackingStore {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn get_experiment_by_name(&self, name: &str) -> TrainingResult<Option<Experiment>> {
        for dir in self.experiment_dirs()? {
            let meta = match Self::read_experiment(&dir) {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "Skipping unreadable experiment");
                    continue;
                }
            };
            if meta.name == name && meta.lifecycle_stage.as_deref() != Some(LIFECYCLE_DELETED) {
                return Ok(Some(Experiment {
                    experiment_id: meta.experiment_id,
                    name: meta.name,
                    artifact_location: meta.artifact_location,
                    lifecycle_stage: meta.lifecycle_stage,
                }));
            }
        }
        Ok(None)
    }

    async fn create_experiment(&self, name: &str) -> TrainingResult<String> {
        if self.get_experiment_by_name(name).await?.is_some() {
            return Err(TrainingError::Tracking(format!("experiment '{name}' already exists")));
        }

        let next_id = self
            .experiment_dirs()?
            .iter()
            .filter_map(|d| d.file_name()?.to_str()?.parse::<u64>().ok())
            .max()
            .map_or(0, |max| max + 1);
        let experiment_id = next_id.to_string();

        let dir = self.root.join(&experiment_id);
        std::fs::create_dir_all(&dir)?;
        let now = chrono::Utc::now().timestamp_millis();
        let meta = ExperimentMeta {
            artifact_location: Some(Self::location_uri(&dir)),
            experiment_id: experiment_id.clone(),
            lifecycle_stage: Some(LIFECYCLE_ACTIVE.to_string()),
            name: name.to_string(),
            creation_time: Some(now),
            last_update_time: Some(now),
        };
        std::fs::write(dir.join(META_FILE), serde_yaml::to_string(&meta)?)?;
        Ok(experiment_id)
    }

    async fn get_run(&self, run_id: &str) -> TrainingResult<RunInfo> {
        let dir = self.run_dir(run_id)?;
        let content = std::fs::read_to_string(dir.join(META_FILE))?;
        let meta: RunMeta = serde_yaml::from_str(&content)?;
        Ok(RunInfo {
            run_id: meta.run_id,
            experiment_id: meta.experiment_id,
            artifact_uri: meta.artifact_uri,
            status: meta.status.as_ref().and_then(status_name),
        })
    }

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> TrainingResult<()> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') {
            return Err(TrainingError::Tracking(format!("invalid tag key: {key}")));
        }
        let tag_path = self.run_dir(run_id)?.join(TAGS_DIR).join(key);
        if let Some(parent) = tag_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(tag_path, value)?;
        Ok(())
    }
}
