//! Project-data packaging: ship the project's `data` directory instead of a model.

use crate::descriptor::ProjectDataDescriptor;
use crate::error::{TrainingError, TrainingResult};
use crate::layout::{PROJECT_DESCRIPTOR_FILE, copy_tree};
use crate::resource::TrainingRequest;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info};

/// Directory inside the project holding the files to ship.
pub const PROJECT_DATA_DIR: &str = "data";

/// Stage `<work_dir>/data` with a descriptor, then copy the staged tree into `target`.
///
/// The target is only touched once staging has fully succeeded.
pub fn package_project_data(
    request: &TrainingRequest,
    run_id: &str,
    target: &Path,
) -> TrainingResult<ProjectDataDescriptor> {
    let data_dir = request.work_dir.join(PROJECT_DATA_DIR);
    if !data_dir.is_dir() {
        return Err(TrainingError::Packaging(format!(
            "project data directory {} does not exist",
            data_dir.display()
        )));
    }

    let staging = TempDir::new()?;
    debug!(staging = %staging.path().display(), "Staging project data");
    copy_tree(&data_dir, staging.path())?;

    let descriptor = ProjectDataDescriptor::new(&request.name, &request.version, run_id);
    descriptor.save(&staging.path().join(PROJECT_DESCRIPTOR_FILE))?;

    info!(target = %target.display(), "Preparing target directory");
    let copied = copy_tree(staging.path(), target)?;
    info!(files = copied, "Project data copied");
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(work_dir: &Path) -> TrainingRequest {
        TrainingRequest {
            id: "reports".to_string(),
            name: "reports".to_string(),
            version: "2".to_string(),
            work_dir: work_dir.to_path_buf(),
            entry_point: "main".to_string(),
            hyperparameters: BTreeMap::new(),
        }
    }

    #[test]
    fn test_project_data_is_copied_with_descriptor() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        std::fs::create_dir_all(project.join("data").join("csv")).unwrap();
        std::fs::write(project.join("data").join("csv").join("a.csv"), "x,y\n1,2\n").unwrap();

        let target = temp.path().join("out");
        let descriptor = package_project_data(&request(&project), "run-9", &target).unwrap();
        assert_eq!(descriptor.output.run_id, "run-9");

        assert!(target.join("csv").join("a.csv").is_file());
        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(target.join(PROJECT_DESCRIPTOR_FILE)).unwrap()).unwrap();
        assert_eq!(yaml["name"].as_str(), Some("reports"));
        assert_eq!(yaml["version"].as_str(), Some("2"));
        assert_eq!(yaml["output"]["run_id"].as_str(), Some("run-9"));
    }

    #[test]
    fn test_missing_data_dir() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("out");
        let err = package_project_data(&request(temp.path()), "run-9", &target).unwrap_err();
        assert!(matches!(err, TrainingError::Packaging(_)));
        assert!(!target.exists());
    }
}
