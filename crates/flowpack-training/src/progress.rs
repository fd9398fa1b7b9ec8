use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Stage transitions of one packaging pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Parsed { training_id: String, model: String, version: String },
    EnvironmentPrepared { env_name: String },
    RunStarted { experiment: String },
    RunFinished { run_id: String },
    ModelLocated { name: String, path: PathBuf },
    Packaged { target: PathBuf },
    LibraryGenerated { path: PathBuf },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: PipelineEvent);
}

/// Reports stage transitions through the log.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::Parsed { training_id, model, version } => {
                info!(%training_id, %model, %version, "Model training resource parsed");
            }
            PipelineEvent::EnvironmentPrepared { env_name } => {
                info!(%env_name, "Conda environment prepared");
            }
            PipelineEvent::RunStarted { experiment } => info!(%experiment, "MLflow run started"),
            PipelineEvent::RunFinished { run_id } => info!(%run_id, "MLflow run finished"),
            PipelineEvent::ModelLocated { name, path } => {
                info!(model = %name, path = %path.display(), "Model located");
            }
            PipelineEvent::Packaged { target } => {
                info!(target = %target.display(), "Model packaged");
            }
            PipelineEvent::LibraryGenerated { path } => {
                info!(path = %path.display(), "Model library generated");
            }
        }
    }
}
