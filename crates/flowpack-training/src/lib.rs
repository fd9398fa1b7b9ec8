//! Flowpack Training
//!
//! Turns a model training resource into a deployable model binary:
//! - Parsing training resources (`TrainingRequest`)
//! - Preparing the conda environment and running the MLflow project
//! - Locating the single `python_function` model a run produced
//! - Packaging it as a GPPI tree with `odahuflow.project.yaml`
//! - Generating a Python library around the packaged binary

pub mod conda;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod inference;
pub mod layout;
pub mod library;
pub mod locator;
pub mod manifest;
pub mod packager;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod project;
pub mod resource;
pub mod runner;
pub mod templates;
pub mod tracking;

pub use conda::EnvironmentPreparer;
pub use config::{ConfigError, RunnerConfig};
pub use descriptor::{ProjectDataDescriptor, ProjectDescriptor};
pub use error::{ErrorCategory, TrainingError, TrainingResult};
pub use inference::{PredictionResult, Predictor, PyFuncModel, SampleSchemas};
pub use layout::OutputLayout;
pub use library::{ModelLibraryInfo, generate_model_library};
pub use locator::{ArtifactLocation, DiscoveredModel, discover_model};
pub use manifest::ModelManifest;
pub use packager::Packager;
pub use pipeline::{LibraryOptions, PackagingMode, Pipeline, PipelineOutcome, RunOptions};
pub use progress::{PipelineEvent, ProgressSink, TracingProgressSink};
pub use resource::{TrainingRequest, parse_training_request};
pub use runner::{MlflowCliRunner, ProjectRunner, RunHandle, RunInvoker, RunSubmission};
pub use tracking::{ExperimentRegistry, FileTrackingStore, RestTrackingStore, TrackingStore, open_store};
