//! The end-to-end flow: parse, prepare, run, locate, package.

use crate::conda::EnvironmentPreparer;
use crate::config::RunnerConfig;
use crate::descriptor::ProjectDescriptor;
use crate::error::TrainingResult;
use crate::library::{LibraryPackage, ModelLibraryInfo, generate_model_library, package_dir_name};
use crate::locator::discover_model;
use crate::packager::Packager;
use crate::progress::{PipelineEvent, ProgressSink, TracingProgressSink};
use crate::project::package_project_data;
use crate::resource::{TrainingRequest, parse_training_request};
use crate::runner::{MlflowCliRunner, ProjectRunner, RunHandle, RunInvoker};
use crate::tracking::{TrackingStore, open_store};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// What ends up in the target directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackagingMode {
    /// The located model, an entrypoint and `odahuflow.project.yaml`.
    #[default]
    Gppi,
    /// The project's `data` directory and a name/version descriptor.
    Project,
}

/// Optional library generation after GPPI packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryOptions {
    pub output: PathBuf,
    pub package: LibraryPackage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub target: PathBuf,
    pub mode: PackagingMode,
    pub library: Option<LibraryOptions>,
}

impl RunOptions {
    pub fn gppi(target: PathBuf) -> Self {
        Self { target, mode: PackagingMode::Gppi, library: None }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub request: TrainingRequest,
    pub run_id: String,
    pub target: PathBuf,
    /// Present for GPPI packaging.
    pub descriptor: Option<ProjectDescriptor>,
    pub library: Option<PathBuf>,
}

pub struct Pipeline {
    config: RunnerConfig,
    invoker: RunInvoker,
    preparer: EnvironmentPreparer,
    sink: Arc<dyn ProgressSink>,
}

impl Pipeline {
    pub fn new(
        config: RunnerConfig,
        store: Arc<dyn TrackingStore>,
        runner: Arc<dyn ProjectRunner>,
    ) -> Self {
        let preparer = EnvironmentPreparer::new(&config.conda_command, &config.conda_env_name);
        Self {
            config,
            invoker: RunInvoker::new(store, runner),
            preparer,
            sink: Arc::new(TracingProgressSink),
        }
    }

    /// Tracking store from the configured URI, runs through the `mlflow` CLI.
    pub fn from_config(config: RunnerConfig) -> TrainingResult<Self> {
        let store = open_store(config.tracking_uri.as_deref(), config.tracking_token.as_deref())?;
        let runner = Arc::new(MlflowCliRunner::from_config(&config));
        Ok(Self::new(config, store, runner))
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Train and package as GPPI into `target`.
    pub async fn run(&self, resource_path: &Path, target: &Path) -> TrainingResult<PipelineOutcome> {
        self.run_with(resource_path, &RunOptions::gppi(target.to_path_buf())).await
    }

    pub async fn run_with(
        &self,
        resource_path: &Path,
        options: &RunOptions,
    ) -> TrainingResult<PipelineOutcome> {
        let request = parse_training_request(resource_path)?;
        self.run_request(request, options).await
    }

    /// Run every stage after parsing for a request that is already parsed.
    pub async fn run_request(
        &self,
        request: TrainingRequest,
        options: &RunOptions,
    ) -> TrainingResult<PipelineOutcome> {
        self.sink.on_event(PipelineEvent::Parsed {
            training_id: request.id.clone(),
            model: request.name.clone(),
            version: request.version.clone(),
        });

        if self.config.prepare_environment {
            self.preparer.prepare(&request.work_dir).await?;
            self.sink.on_event(PipelineEvent::EnvironmentPrepared {
                env_name: self.preparer.env_name().to_string(),
            });
        } else {
            info!("Skipping conda environment preparation");
        }

        let toolchain_version = self.invoker.toolchain_version().await?;

        self.sink.on_event(PipelineEvent::RunStarted { experiment: request.name.clone() });
        let handle = self.invoker.train(&request).await?;
        self.sink.on_event(PipelineEvent::RunFinished { run_id: handle.run_id.clone() });

        match options.mode {
            PackagingMode::Gppi => {
                self.package_handle(request, &handle, &toolchain_version, options)
            }
            PackagingMode::Project => {
                package_project_data(&request, &handle.run_id, &options.target)?;
                self.sink.on_event(PipelineEvent::Packaged { target: options.target.clone() });
                if options.library.is_some() {
                    warn!("Library generation needs a packaged model, skipping in project mode");
                }
                Ok(PipelineOutcome {
                    request,
                    run_id: handle.run_id,
                    target: options.target.clone(),
                    descriptor: None,
                    library: None,
                })
            }
        }
    }

    /// Locate and package the model of a run that already finished.
    pub async fn package_existing_run(
        &self,
        run_id: &str,
        request: TrainingRequest,
        options: &RunOptions,
    ) -> TrainingResult<PipelineOutcome> {
        let toolchain_version = self.invoker.toolchain_version().await?;
        let handle = self.invoker.resolve(run_id).await?;
        self.package_handle(request, &handle, &toolchain_version, options)
    }

    fn package_handle(
        &self,
        request: TrainingRequest,
        handle: &RunHandle,
        toolchain_version: &str,
        options: &RunOptions,
    ) -> TrainingResult<PipelineOutcome> {
        let model = discover_model(handle.artifact_location.root())?;
        self.sink.on_event(PipelineEvent::ModelLocated {
            name: model.name.clone(),
            path: model.path.clone(),
        });

        let packager = Packager::new(options.target.clone())?
            .with_static_artifacts(self.config.static_artifacts_dir.clone());
        let descriptor = packager.package(&model, &request, &handle.run_id, toolchain_version)?;
        self.sink.on_event(PipelineEvent::Packaged { target: options.target.clone() });

        let library = match &options.library {
            Some(library) => {
                let mut info = ModelLibraryInfo::new(
                    request.name.clone(),
                    package_dir_name(&request.name),
                    options.target.clone(),
                );
                info.package = library.package.clone();
                let path = generate_model_library(&info, &library.output)?;
                self.sink.on_event(PipelineEvent::LibraryGenerated { path: path.clone() });
                Some(path)
            }
            None => None,
        };

        Ok(PipelineOutcome {
            request,
            run_id: handle.run_id.clone(),
            target: options.target.clone(),
            descriptor: Some(descriptor),
            library,
        })
    }
}
