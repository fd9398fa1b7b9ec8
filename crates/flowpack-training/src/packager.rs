//! Repackaging a located MLflow model as a GPPI binary.

use crate::descriptor::ProjectDescriptor;
use crate::error::{TrainingError, TrainingResult};
use crate::inference::{
    INPUT_SAMPLE_FILE, INTEGER_DTYPES, NUMBER_DTYPES, OUTPUT_SAMPLE_FILE, STRING_DTYPES, python_tuple,
};
use crate::layout::{ENTRYPOINT_FILE, OutputLayout, copy_tree};
use crate::locator::DiscoveredModel;
use crate::manifest::{ModelManifest, PYFUNC_FLAVOR};
use crate::resource::TrainingRequest;
use crate::templates::{GPPI_ENTRYPOINT, TemplateRenderer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
struct EntrypointContext<'a> {
    model_name: &'a str,
    model_version: &'a str,
    pyfunc_flavor: &'a str,
    input_sample_file: &'a str,
    output_sample_file: &'a str,
    integer_dtypes: String,
    number_dtypes: String,
    string_dtypes: String,
}

/// Conda file referenced by the model's `python_function` flavor.
fn conda_reference(manifest: &ModelManifest) -> TrainingResult<String> {
    manifest
        .pyfunc()?
        .and_then(|flavor| flavor.env)
        .as_ref()
        .and_then(|env| env.conda_file().map(str::to_string))
        .ok_or_else(|| TrainingError::Packaging("Unknown type of env - empty".to_string()))
}

pub struct Packager {
    layout: OutputLayout,
    renderer: TemplateRenderer,
    static_artifacts_dir: Option<PathBuf>,
}

impl Packager {
    pub fn new(target: PathBuf) -> TrainingResult<Self> {
        Ok(Self {
            layout: OutputLayout::new(target),
            renderer: TemplateRenderer::new()?,
            static_artifacts_dir: None,
        })
    }

    /// Prefer `entrypoint.py` from `dir`, when present, over the bundled template.
    #[must_use]
    pub fn with_static_artifacts(mut self, dir: Option<PathBuf>) -> Self {
        self.static_artifacts_dir = dir;
        self
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    fn write_entrypoint(&self, request: &TrainingRequest) -> TrainingResult<()> {
        let target = self.layout.entrypoint_path();

        if let Some(custom) = self.static_entrypoint() {
            info!(source = %custom.display(), "Using entrypoint from static artifacts");
            std::fs::copy(&custom, &target)?;
            return Ok(());
        }

        let script = self.renderer.render(
            GPPI_ENTRYPOINT,
            &EntrypointContext {
                model_name: &request.name,
                model_version: &request.version,
                pyfunc_flavor: PYFUNC_FLAVOR,
                input_sample_file: INPUT_SAMPLE_FILE,
                output_sample_file: OUTPUT_SAMPLE_FILE,
                integer_dtypes: python_tuple(INTEGER_DTYPES),
                number_dtypes: python_tuple(NUMBER_DTYPES),
                string_dtypes: python_tuple(STRING_DTYPES),
            },
        )?;
        std::fs::write(&target, script)?;
        Ok(())
    }

    fn static_entrypoint(&self) -> Option<PathBuf> {
        self.static_artifacts_dir
            .as_deref()
            .map(|dir| dir.join(ENTRYPOINT_FILE))
            .filter(|path| path.is_file())
    }

    /// Copy `model` under the target and describe it for the serving platform.
    pub fn package(
        &self,
        model: &DiscoveredModel,
        request: &TrainingRequest,
        run_id: &str,
        toolchain_version: &str,
    ) -> TrainingResult<ProjectDescriptor> {
        // Refuse before anything lands in the target
        conda_reference(&model.manifest)?;

        let model_dir = self.layout.model_dir();
        info!(
            source = %model.path.display(),
            target = %model_dir.display(),
            "Copying MLflow model"
        );
        self.layout.ensure_model_dir()?;
        let copied = copy_tree(&model.path, &model_dir)?;

        let conda_file = conda_reference(&ModelManifest::load(&model_dir)?)?;
        let conda_path = OutputLayout::descriptor_relative(&conda_file);
        info!(files = copied, %conda_path, "Conda env located");

        self.write_entrypoint(request)?;

        let descriptor = ProjectDescriptor::for_conda_model(
            &request.name,
            &request.version,
            conda_path,
            toolchain_version,
            run_id,
        );
        descriptor.save(&self.layout.descriptor_path())?;
        info!(path = %self.layout.descriptor_path().display(), "Project descriptor written");
        Ok(descriptor)
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }
}
