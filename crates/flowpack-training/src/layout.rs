use crate::error::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const MODEL_SUBFOLDER: &str = "odahuflow_model";
pub const PROJECT_DESCRIPTOR_FILE: &str = "odahuflow.project.yaml";
pub const ENTRYPOINT_MODULE: &str = "entrypoint";
pub const ENTRYPOINT_FILE: &str = "entrypoint.py";

/// Filesystem layout of a packaged model.
///
/// ```text
/// <target>/
///   odahuflow.project.yaml
///   odahuflow_model/
///     MLmodel
///     conda.yaml
///     entrypoint.py
///     ...
/// ```
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.root.join(MODEL_SUBFOLDER)
    }

    #[must_use]
    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(PROJECT_DESCRIPTOR_FILE)
    }

    #[must_use]
    pub fn entrypoint_path(&self) -> PathBuf {
        self.model_dir().join(ENTRYPOINT_FILE)
    }

    /// Path of a model-relative file as recorded in the descriptor.
    ///
    /// Always `/`-separated, independent of the host platform.
    #[must_use]
    pub fn descriptor_relative(file: &str) -> String {
        format!("{MODEL_SUBFOLDER}/{file}")
    }

    pub fn ensure_model_dir(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(self.model_dir())?;
        Ok(())
    }
}

/// Recursively copy the contents of `src` into `dst`, overwriting existing files.
///
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> TrainingResult<usize> {
    debug!(src = %src.display(), dst = %dst.display(), "Copying tree");
    std::fs::create_dir_all(dst)?;

    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true).min_depth(1) {
        let entry = entry.map_err(|e| TrainingError::Io(e.into()))?;
        let relative = entry.path().strip_prefix(src).map_err(|e| {
            TrainingError::Packaging(format!("{} is outside {}: {e}", entry.path().display(), src.display()))
        })?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = OutputLayout::new(temp.path().join("out"));

        assert!(layout.model_dir().ends_with("out/odahuflow_model"));
        assert!(layout.descriptor_path().ends_with("out/odahuflow.project.yaml"));
        assert!(layout.entrypoint_path().ends_with("odahuflow_model/entrypoint.py"));
        assert_eq!(OutputLayout::descriptor_relative("conda.yaml"), "odahuflow_model/conda.yaml");

        layout.ensure_model_dir().unwrap();
        assert!(layout.model_dir().is_dir());
    }

    #[test]
    fn test_copy_tree_keeps_structure() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("model");
        std::fs::create_dir_all(src.join("code").join("nested")).unwrap();
        std::fs::write(src.join("MLmodel"), "flavors: {}\n").unwrap();
        std::fs::write(src.join("code").join("nested").join("util.py"), "x = 1\n").unwrap();
        std::fs::create_dir_all(src.join("empty")).unwrap();

        let dst = temp.path().join("out");
        assert_eq!(copy_tree(&src, &dst).unwrap(), 2);
        assert_eq!(std::fs::read_to_string(dst.join("code/nested/util.py")).unwrap(), "x = 1\n");
        assert!(dst.join("empty").is_dir());

        // Second copy over the same target overwrites in place
        assert_eq!(copy_tree(&src, &dst).unwrap(), 2);
    }
}
