//! Experiment tracking collaborator.
//!
//! Two backends speak to MLflow tracking: the REST API of a tracking server
//! and the on-disk file store MLflow uses for `file://` tracking URIs.

pub mod file;
pub mod rest;

pub use file::FileTrackingStore;
pub use rest::RestTrackingStore;

use crate::error::{TrainingError, TrainingResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    #[serde(default)]
    pub artifact_location: Option<String>,
    #[serde(default)]
    pub lifecycle_stage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    pub artifact_uri: String,
    pub status: Option<String>,
}

#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Tracking URI handed to MLflow subprocesses.
    fn uri(&self) -> &str;

    async fn get_experiment_by_name(&self, name: &str) -> TrainingResult<Option<Experiment>>;

    /// Create an experiment and return its id.
    async fn create_experiment(&self, name: &str) -> TrainingResult<String>;

    async fn get_run(&self, run_id: &str) -> TrainingResult<RunInfo>;

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> TrainingResult<()>;
}

/// Open the store matching `tracking_uri`.
///
/// `http(s)://` goes to the REST API; `file://` and plain paths to the file store.
pub fn open_store(
    tracking_uri: Option<&str>,
    token: Option<&str>,
) -> TrainingResult<Arc<dyn TrackingStore>> {
    let uri = tracking_uri
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| TrainingError::Environment("can not get tracking URI".to_string()))?;

    info!(tracking_uri = %uri, "Using MLflow tracking store");

    match Url::parse(uri) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            Ok(Arc::new(RestTrackingStore::new(uri, token.map(str::to_string))))
        }
        Ok(url) if url.scheme() == "file" => {
            let root = url.to_file_path().unwrap_or_else(|()| PathBuf::from(url.path()));
            Ok(Arc::new(FileTrackingStore::with_uri(root, uri.to_string())))
        }
        Ok(url) if url.scheme().len() > 1 => Err(TrainingError::Environment(format!(
            "unsupported tracking URI scheme: {}",
            url.scheme()
        ))),
        _ => Ok(Arc::new(FileTrackingStore::new(PathBuf::from(uri)))),
    }
}

/// Get-or-create of experiments by name.
///
/// The read-then-create sequence is serialized per name within this registry.
/// Concurrent processes registering the same name can still race.
pub struct ExperimentRegistry {
    store: Arc<dyn TrackingStore>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ExperimentRegistry {
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        Self { store, locks: Mutex::new(HashMap::new()) }
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(name.to_string()).or_default().clone()
    }

    pub async fn get_or_create(&self, name: &str) -> TrainingResult<String> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        info!(experiment = %name, "Searching for experiment");
        if let Some(experiment) = self.store.get_experiment_by_name(name).await? {
            info!(experiment_id = %experiment.experiment_id, "Experiment has been found");
            return Ok(experiment.experiment_id);
        }

        info!(experiment = %name, "Creating new experiment");
        let experiment_id = self.store.create_experiment(name).await?;
        info!(experiment_id = %experiment_id, "Experiment has been created");
        Ok(experiment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_store_requires_uri() {
        assert!(matches!(open_store(None, None), Err(TrainingError::Environment(_))));
        assert!(matches!(open_store(Some("  "), None), Err(TrainingError::Environment(_))));
        assert!(matches!(
            open_store(Some("databricks://profile"), None),
            Err(TrainingError::Environment(_))
        ));
    }

    #[test]
    fn test_open_store_schemes() {
        let store = open_store(Some("http://mlflow:5000"), None).unwrap();
        assert_eq!(store.uri(), "http://mlflow:5000");

        let store = open_store(Some("file:///tmp/mlruns"), None).unwrap();
        assert_eq!(store.uri(), "file:///tmp/mlruns");

        let store = open_store(Some("./mlruns"), None).unwrap();
        assert_eq!(store.uri(), "./mlruns");
    }

    #[tokio::test]
    async fn test_registry_creates_once() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn TrackingStore> = Arc::new(FileTrackingStore::new(temp.path().to_path_buf()));
        let registry = ExperimentRegistry::new(store.clone());

        let first = registry.get_or_create("wine").await.unwrap();
        let second = registry.get_or_create("wine").await.unwrap();
        assert_eq!(first, second);

        let other = registry.get_or_create("iris").await.unwrap();
        assert_ne!(first, other);
    }

    /// In-memory store that yields to the scheduler inside every call.
    #[derive(Default)]
    struct YieldingStore {
        experiments: Mutex<Vec<Experiment>>,
        creates: Mutex<usize>,
    }

    #[async_trait]
    impl TrackingStore for YieldingStore {
        fn uri(&self) -> &str {
            "memory"
        }

        async fn get_experiment_by_name(&self, name: &str) -> TrainingResult<Option<Experiment>> {
            let found = self.experiments.lock().unwrap().iter().find(|e| e.name == name).cloned();
            tokio::task::yield_now().await;
            Ok(found)
        }

        async fn create_experiment(&self, name: &str) -> TrainingResult<String> {
            tokio::task::yield_now().await;
            *self.creates.lock().unwrap() += 1;
            let mut experiments = self.experiments.lock().unwrap();
            let experiment_id = experiments.len().to_string();
            experiments.push(Experiment {
                experiment_id: experiment_id.clone(),
                name: name.to_string(),
                artifact_location: None,
                lifecycle_stage: None,
            });
            Ok(experiment_id)
        }

        async fn get_run(&self, run_id: &str) -> TrainingResult<RunInfo> {
            Err(TrainingError::Tracking(format!("unknown run {run_id}")))
        }

        async fn set_tag(&self, _run_id: &str, _key: &str, _value: &str) -> TrainingResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_creates_once() {
        let store = Arc::new(YieldingStore::default());
        let registry = ExperimentRegistry::new(store.clone());

        let (first, second) = tokio::join!(registry.get_or_create("wine"), registry.get_or_create("wine"));
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(*store.creates.lock().unwrap(), 1);
        assert_eq!(store.experiments.lock().unwrap().len(), 1);
    }
}
