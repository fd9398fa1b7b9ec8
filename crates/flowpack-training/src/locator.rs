use crate::error::{TrainingError, TrainingResult};
use crate::manifest::{MLMODEL_FILE, ModelManifest, PYFUNC_FLAVOR};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

/// A run's artifact storage, restricted to the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    root: PathBuf,
}

impl ArtifactLocation {
    /// Accepts `file://` URIs and plain paths. Any other scheme is rejected.
    pub fn parse(uri: &str) -> TrainingResult<Self> {
        let root = match Url::parse(uri) {
            Ok(url) if url.scheme() == "file" => {
                url.to_file_path().unwrap_or_else(|()| PathBuf::from(url.path()))
            }
            // Windows drive letters parse as one-letter schemes
            Ok(url) if url.scheme().len() == 1 => PathBuf::from(uri),
            Ok(url) => {
                return Err(TrainingError::UnsupportedArtifactScheme(format!(
                    "{uri} (scheme {})",
                    url.scheme()
                )));
            }
            Err(_) => PathBuf::from(uri),
        };
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// The single model picked out of a run's artifacts.
#[derive(Debug, Clone)]
pub struct DiscoveredModel {
    /// Name of the artifact subdirectory (e.g. `model`).
    pub name: String,
    pub path: PathBuf,
    pub manifest: ModelManifest,
}

/// Scan the immediate subdirectories of `artifact_root` for exactly one model
/// exposing the `python_function` flavor.
///
/// Candidates that fail to load or lack the flavor are skipped with a warning.
/// Zero or several remaining candidates is an error; no tie-break is attempted.
pub fn discover_model(artifact_root: &Path) -> TrainingResult<DiscoveredModel> {
    info!(root = %artifact_root.display(), "Analyzing directory for models");

    let dir = match std::fs::read_dir(artifact_root) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TrainingError::NoModelFound(artifact_root.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut subdirs = Vec::new();
    for entry in dir {
        let path = entry?.path();
        if path.is_dir() && path.join(MLMODEL_FILE).exists() {
            subdirs.push(path);
        }
    }
    subdirs.sort();

    let mut found = Vec::new();
    for path in subdirs {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        debug!(candidate = %name, path = %path.display(), "Analyzing model candidate");

        let manifest = match ModelManifest::load(&path) {
            Ok(m) => m,
            Err(e) => {
                warn!(candidate = %name, error = %e, "Not an MLflow model, skipping");
                continue;
            }
        };

        if !manifest.has_flavor(PYFUNC_FLAVOR) {
            warn!(
                candidate = %name,
                flavors = ?manifest.flavor_names(),
                "Model does not have the {PYFUNC_FLAVOR} flavor, skipping"
            );
            continue;
        }

        info!(candidate = %name, "Registering model");
        found.push(DiscoveredModel { name, path, manifest });
    }

    if found.len() > 1 {
        return Err(TrainingError::TooManyModels {
            candidates: found.into_iter().map(|m| m.name).collect(),
        });
    }

    found.pop().ok_or_else(|| TrainingError::NoModelFound(artifact_root.to_path_buf()))
}
