use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

/// Coarse failure category, used for reporting only.
///
/// Every category is fatal and maps to the same process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Environment,
    Discovery,
    Packaging,
    Tracking,
    Io,
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("file {} is not readable", .0.display())]
    FileNotReadable(PathBuf),

    #[error("cannot decode model training resource file: {0}")]
    Decode(String),

    #[error("invalid model training resource: {0}")]
    Schema(String),

    #[error("invalid prediction input: {0}")]
    InvalidInput(String),

    #[error("environment error: {0}")]
    Environment(String),

    #[error("unsupported scheme of artifact url: {0}")]
    UnsupportedArtifactScheme(String),

    #[error("can not find any model in {}", .0.display())]
    NoModelFound(PathBuf),

    #[error("found models: {candidates:?}. Only 1 model allowed")]
    TooManyModels { candidates: Vec<String> },

    #[error("packaging error: {0}")]
    Packaging(String),

    #[error("tracking error: {0}")]
    Tracking(String),

    #[error("run error: {0}")]
    Runner(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::FileNotReadable(_)
            | Self::Decode(_)
            | Self::Schema(_)
            | Self::InvalidInput(_) => ErrorCategory::Input,
            Self::Environment(_) | Self::UnsupportedArtifactScheme(_) | Self::Runner(_) => {
                ErrorCategory::Environment
            }
            Self::NoModelFound(_) | Self::TooManyModels { .. } => ErrorCategory::Discovery,
            Self::Packaging(_) => ErrorCategory::Packaging,
            Self::Tracking(_) | Self::Http(_) => ErrorCategory::Tracking,
            Self::Io(_) | Self::Json(_) | Self::Yaml(_) | Self::Other(_) => ErrorCategory::Io,
        }
    }
}
