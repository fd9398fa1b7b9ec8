//! Submitting MLflow project runs and tagging them.

use crate::config::{RunnerConfig, TRACKING_URI_ENV};
use crate::error::{TrainingError, TrainingResult};
use crate::locator::ArtifactLocation;
use crate::process::{CommandSpec, run_captured, run_streaming};
use crate::resource::TrainingRequest;
use crate::tracking::{ExperimentRegistry, TrackingStore};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Version, VersionReq};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// MLflow versions the packaging layout is known to work with.
pub const SUPPORTED_MLFLOW_VERSIONS: &str = ">=1.0.0, <2.0.0";

pub const TRAINING_ID_TAG: &str = "training_id";
pub const MODEL_NAME_TAG: &str = "model_name";
pub const MODEL_VERSION_TAG: &str = "model_version";

static RUN_SUCCEEDED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"=== Run \(ID '([^']+)'\) succeeded ===").expect("run id regex should be valid")
});

static VERSION_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)*)").expect("version regex should be valid"));

/// Everything a runner needs to start one project run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSubmission {
    pub work_dir: PathBuf,
    pub entry_point: String,
    pub parameters: BTreeMap<String, String>,
    pub experiment_id: String,
}

impl RunSubmission {
    pub fn for_request(request: &TrainingRequest, experiment_id: impl Into<String>) -> Self {
        Self {
            work_dir: request.work_dir.clone(),
            entry_point: request.entry_point.clone(),
            parameters: request.hyperparameters.clone(),
            experiment_id: experiment_id.into(),
        }
    }
}

/// Executes a project synchronously and reports the run it created.
#[async_trait]
pub trait ProjectRunner: Send + Sync {
    fn id(&self) -> &'static str;

    /// Version of the tracking framework doing the run, as reported by it.
    async fn framework_version(&self) -> TrainingResult<String>;

    /// Run to completion and return the run id.
    async fn run(&self, submission: &RunSubmission, tracking_uri: &str) -> TrainingResult<String>;
}

/// Extract the run id from `mlflow run` output.
pub fn parse_run_id<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    lines
        .iter()
        .rev()
        .find_map(|line| RUN_SUCCEEDED.captures(line.as_ref()))
        .map(|caps| caps[1].to_string())
}

/// Pull the version out of `mlflow --version` output (`mlflow, version 1.5.0`).
pub fn parse_framework_version(output: &str) -> TrainingResult<String> {
    let line = output.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    let version = line
        .rsplit_once("version")
        .map_or(line, |(_, rest)| rest)
        .trim()
        .to_string();

    if version.is_empty() || !version.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(TrainingError::Environment(format!(
            "can not determine MLflow version from output: {output:?}"
        )));
    }
    Ok(version)
}

/// Lenient semver: `1.5` becomes `1.5.0`, suffixes like `rc0` or `.dev0` are dropped.
fn to_semver(raw: &str) -> Option<Version> {
    let numeric = VERSION_NUMBER.captures(raw)?.get(1)?.as_str();
    let mut parts: Vec<&str> = numeric.split('.').take(3).collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    Version::parse(&parts.join(".")).ok()
}

pub fn check_supported_version(raw: &str) -> TrainingResult<Version> {
    let version = to_semver(raw)
        .ok_or_else(|| TrainingError::Environment(format!("invalid MLflow version: {raw}")))?;
    let requirement = VersionReq::parse(SUPPORTED_MLFLOW_VERSIONS)
        .map_err(|e| TrainingError::Environment(format!("invalid version requirement: {e}")))?;

    if !requirement.matches(&version) {
        return Err(TrainingError::Environment(format!(
            "Unsupported version {raw}. Please use MLflow versions {SUPPORTED_MLFLOW_VERSIONS}"
        )));
    }
    Ok(version)
}

/// Runs projects through the `mlflow` command line.
pub struct MlflowCliRunner {
    mlflow_command: String,
    conda_command: String,
    conda_env: Option<String>,
    version: OnceCell<String>,
}

impl MlflowCliRunner {
    pub fn new(mlflow_command: impl Into<String>) -> Self {
        Self {
            mlflow_command: mlflow_command.into(),
            conda_command: "conda".to_string(),
            conda_env: None,
            version: OnceCell::new(),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        let runner = Self::new(&config.mlflow_command);
        if config.use_conda_env {
            runner.in_conda_env(&config.conda_command, &config.conda_env_name)
        } else {
            runner
        }
    }

    /// Run every MLflow command inside `conda run -n <env>`.
    #[must_use]
    pub fn in_conda_env(mut self, conda_command: &str, env_name: &str) -> Self {
        self.conda_command = conda_command.to_string();
        self.conda_env = Some(env_name.to_string());
        self
    }

    fn wrap(&self, command: CommandSpec) -> CommandSpec {
        match &self.conda_env {
            Some(env) => command.wrapped_in(
                CommandSpec::new(&self.conda_command).args(["run", "--no-capture-output", "-n", env.as_str()]),
            ),
            None => command,
        }
    }

    /// The `mlflow run` invocation for `submission` against an MLflow of `version`.
    pub fn run_command(
        &self,
        submission: &RunSubmission,
        tracking_uri: &str,
        version: &Version,
    ) -> CommandSpec {
        let mut command = CommandSpec::new(&self.mlflow_command)
            .arg("run")
            .arg(submission.work_dir.display().to_string())
            .args(["-e", submission.entry_point.as_str()]);

        for (key, value) in &submission.parameters {
            command = command.arg("-P").arg(format!("{key}={value}"));
        }

        command = command
            .args(["--experiment-id", submission.experiment_id.as_str()])
            .args(["--backend", "local"]);

        // Dependencies are already installed in the active environment
        command = if *version < Version::new(1, 26, 0) {
            command.arg("--no-conda")
        } else {
            command.args(["--env-manager", "local"])
        };

        self.wrap(command.env(TRACKING_URI_ENV, tracking_uri))
    }
}

#[async_trait]
impl ProjectRunner for MlflowCliRunner {
    fn id(&self) -> &'static str {
        "mlflow-cli"
    }

    async fn framework_version(&self) -> TrainingResult<String> {
        self.version
            .get_or_try_init(|| async {
                let command = self.wrap(CommandSpec::new(&self.mlflow_command).arg("--version"));
                let output = run_captured(&command).await?.ensure_success(&command)?;
                let version = parse_framework_version(&output.lines.join("\n"))?;
                debug!(%version, "Detected MLflow version");
                Ok::<_, TrainingError>(version)
            })
            .await
            .cloned()
    }

    async fn run(&self, submission: &RunSubmission, tracking_uri: &str) -> TrainingResult<String> {
        let version = check_supported_version(&self.framework_version().await?)?;
        let command = self.run_command(submission, tracking_uri, &version);

        let output = run_streaming(&command).await?.ensure_success(&command)?;
        parse_run_id(output.lines.as_slice()).ok_or_else(|| {
            TrainingError::Runner(format!("`{command}` finished without reporting a run id"))
        })
    }
}

/// A finished, tagged run and where its artifacts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
    pub artifact_location: ArtifactLocation,
}

/// Drives one training: experiment lookup, the run itself and run tagging.
pub struct RunInvoker {
    store: Arc<dyn TrackingStore>,
    registry: ExperimentRegistry,
    runner: Arc<dyn ProjectRunner>,
}

impl RunInvoker {
    pub fn new(store: Arc<dyn TrackingStore>, runner: Arc<dyn ProjectRunner>) -> Self {
        let registry = ExperimentRegistry::new(store.clone());
        Self { store, registry, runner }
    }

    pub fn runner(&self) -> &dyn ProjectRunner {
        self.runner.as_ref()
    }

    /// Validated framework version, as recorded in the project descriptor.
    pub async fn toolchain_version(&self) -> TrainingResult<String> {
        debug!(runner = self.runner.id(), "Validating MLflow version");
        let version = self.runner.framework_version().await?;
        check_supported_version(&version)?;
        Ok(version)
    }

    pub async fn train(&self, request: &TrainingRequest) -> TrainingResult<RunHandle> {
        let experiment_id = self.registry.get_or_create(&request.name).await?;
        let submission = RunSubmission::for_request(request, experiment_id);

        info!(
            work_dir = %submission.work_dir.display(),
            entry_point = %submission.entry_point,
            parameters = ?submission.parameters,
            experiment_id = %submission.experiment_id,
            "Starting MLflow run"
        );
        let run_id = self.runner.run(&submission, self.store.uri()).await?;

        self.store.set_tag(&run_id, TRAINING_ID_TAG, &request.id).await?;
        self.store.set_tag(&run_id, MODEL_NAME_TAG, &request.name).await?;
        self.store.set_tag(&run_id, MODEL_VERSION_TAG, &request.version).await?;
        info!(%run_id, "MLflow run finished");

        self.resolve(&run_id).await
    }

    /// Look up where an existing run stored its artifacts.
    pub async fn resolve(&self, run_id: &str) -> TrainingResult<RunHandle> {
        let run = self.store.get_run(run_id).await?;
        debug!(%run_id, artifact_uri = %run.artifact_uri, status = ?run.status, "Resolved run");
        Ok(RunHandle {
            run_id: run.run_id,
            artifact_location: ArtifactLocation::parse(&run.artifact_uri)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::FileTrackingStore;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingRunner {
        store: FileTrackingStore,
        submissions: Mutex<Vec<RunSubmission>>,
    }

    #[async_trait]
    impl ProjectRunner for RecordingRunner {
        fn id(&self) -> &'static str {
            "recording"
        }

        async fn framework_version(&self) -> TrainingResult<String> {
            Ok("1.5.0".to_string())
        }

        async fn run(&self, submission: &RunSubmission, _tracking_uri: &str) -> TrainingResult<String> {
            self.submissions.lock().unwrap().push(submission.clone());
            self.store.create_run(&submission.experiment_id, "run-1")?;
            Ok("run-1".to_string())
        }
    }

    fn request(work_dir: PathBuf) -> TrainingRequest {
        TrainingRequest {
            id: "wine-training".to_string(),
            name: "wine".to_string(),
            version: "1.0".to_string(),
            work_dir,
            entry_point: "main".to_string(),
            hyperparameters: BTreeMap::from([("alpha".to_string(), "0.5".to_string())]),
        }
    }

    #[test]
    fn test_parse_run_id() {
        let lines = [
            "2020/02/03 10:00:00 INFO mlflow.projects: === Running command 'python train.py' ===",
            "2020/02/03 10:00:05 INFO mlflow.projects: === Run (ID '5c1b9e') succeeded ===",
        ];
        assert_eq!(parse_run_id(&lines).as_deref(), Some("5c1b9e"));
        assert_eq!(parse_run_id(&["=== Run (ID 'x') failed ==="]), None);
    }

    #[test]
    fn test_framework_version() {
        assert_eq!(parse_framework_version("mlflow, version 1.5.0\n").unwrap(), "1.5.0");
        assert_eq!(parse_framework_version("1.4").unwrap(), "1.4");
        assert!(parse_framework_version("command not found").is_err());
    }

    #[test]
    fn test_supported_versions() {
        assert!(check_supported_version("1.0").is_ok());
        assert!(check_supported_version("1.5.0").is_ok());
        assert!(check_supported_version("1.30.1rc0").is_ok());
        assert!(matches!(check_supported_version("0.9.1"), Err(TrainingError::Environment(_))));
        assert!(matches!(check_supported_version("2.3.0"), Err(TrainingError::Environment(_))));
    }

    #[test]
    fn test_run_command_line() {
        let submission = RunSubmission {
            work_dir: PathBuf::from("/proj"),
            entry_point: "main".to_string(),
            parameters: BTreeMap::from([
                ("alpha".to_string(), "0.5".to_string()),
                ("l1_ratio".to_string(), "0.1".to_string()),
            ]),
            experiment_id: "3".to_string(),
        };

        let runner = MlflowCliRunner::new("mlflow");
        let old = runner.run_command(&submission, "http://mlflow:5000", &Version::new(1, 5, 0));
        assert_eq!(
            old.to_string(),
            "mlflow run /proj -e main -P alpha=0.5 -P l1_ratio=0.1 --experiment-id 3 --backend local --no-conda"
        );
        assert_eq!(old.env, vec![(TRACKING_URI_ENV.to_string(), "http://mlflow:5000".to_string())]);

        let runner = runner.in_conda_env("conda", "odahu_model");
        let new = runner.run_command(&submission, "file:///mlruns", &Version::new(1, 30, 0));
        assert!(new.to_string().starts_with("conda run --no-capture-output -n odahu_model mlflow run /proj"));
        assert!(new.to_string().ends_with("--env-manager local"));
    }

    #[tokio::test]
    async fn test_train_tags_run_and_resolves_artifacts() {
        let temp = TempDir::new().unwrap();
        let store = FileTrackingStore::new(temp.path().join("mlruns"));
        let runner = Arc::new(RecordingRunner { store: store.clone(), submissions: Mutex::new(Vec::new()) });
        let invoker = RunInvoker::new(Arc::new(store.clone()), runner.clone());

        let handle = invoker.train(&request(temp.path().to_path_buf())).await.unwrap();
        assert_eq!(handle.run_id, "run-1");
        assert_eq!(
            handle.artifact_location.root(),
            temp.path().join("mlruns").join("0").join("run-1").join("artifacts")
        );

        let submissions = runner.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].experiment_id, "0");
        assert_eq!(submissions[0].parameters["alpha"], "0.5");

        let tags = temp.path().join("mlruns").join("0").join("run-1").join("tags");
        assert_eq!(std::fs::read_to_string(tags.join(TRAINING_ID_TAG)).unwrap(), "wine-training");
        assert_eq!(std::fs::read_to_string(tags.join(MODEL_NAME_TAG)).unwrap(), "wine");
        assert_eq!(std::fs::read_to_string(tags.join(MODEL_VERSION_TAG)).unwrap(), "1.0");
    }

    #[tokio::test]
    async fn test_resolve_unknown_run() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileTrackingStore::new(temp.path().to_path_buf()));
        let runner = Arc::new(RecordingRunner {
            store: FileTrackingStore::new(temp.path().to_path_buf()),
            submissions: Mutex::new(Vec::new()),
        });
        let invoker = RunInvoker::new(store, runner);
        assert!(matches!(invoker.resolve("nope").await, Err(TrainingError::Tracking(_))));
        assert_eq!(invoker.toolchain_version().await.unwrap(), "1.5.0");
    }
}
