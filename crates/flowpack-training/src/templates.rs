//! Python sources generated around a packaged model.

use crate::error::{TrainingError, TrainingResult};
use handlebars::Handlebars;
use serde::Serialize;

pub const GPPI_ENTRYPOINT: &str = "gppi_entrypoint";
pub const LIBRARY_SETUP: &str = "library_setup";
pub const LIBRARY_INIT: &str = "library_init";
pub const LIBRARY_ENTRYPOINT: &str = "library_entrypoint";

const EMBEDDED: [(&str, &str); 4] = [
    (GPPI_ENTRYPOINT, include_str!("../templates/entrypoint.py.hbs")),
    (LIBRARY_SETUP, include_str!("../templates/library/setup.py.hbs")),
    (LIBRARY_INIT, include_str!("../templates/library/__init__.py.hbs")),
    (LIBRARY_ENTRYPOINT, include_str!("../templates/library/entrypoint.py.hbs")),
];

/// Handlebars registry preloaded with the embedded templates.
///
/// Strict mode is on: a template referencing a missing variable fails to render.
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn new() -> TrainingResult<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);

        for (name, source) in EMBEDDED {
            registry.register_template_string(name, source).map_err(|e| {
                TrainingError::Packaging(format!("invalid embedded template {name}: {e}"))
            })?;
        }
        Ok(Self { registry })
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> TrainingResult<String> {
        self.registry
            .render(name, data)
            .map_err(|e| TrainingError::Packaging(format!("failed to render {name}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedded_templates_register() {
        let renderer = TemplateRenderer::new().unwrap();
        let rendered = renderer
            .render(
                LIBRARY_SETUP,
                &json!({
                    "package": {"name": "wine-model", "version": "1.0.0"},
                    "model_entrypoint_name": "wine",
                    "entrypoint": {"dir": "wine_model", "file": "entrypoint"},
                }),
            )
            .unwrap();
        assert!(rendered.contains("name='wine-model'"));
        assert!(rendered.contains("'wine = wine_model.entrypoint:MLflowModel'"));
    }

    #[test]
    fn test_missing_variable_fails() {
        let renderer = TemplateRenderer::new().unwrap();
        let err = renderer.render(LIBRARY_INIT, &json!({})).unwrap_err();
        assert!(matches!(err, TrainingError::Packaging(_)));
    }
}
