//! Serving-side contract of a packaged model.
//!
//! Mirrors what the generated entrypoint does at prediction time: optional
//! input/output samples describe the columns, inputs are reindexed to the
//! input sample and results are normalized into a matrix plus column names.
//! Samples are loaded once and handed around explicitly.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

pub const INPUT_SAMPLE_FILE: &str = "head_input.json";
pub const OUTPUT_SAMPLE_FILE: &str = "head_output.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleColumn {
    pub name: String,
    pub dtype: String,
}

/// Column description of a sample frame: `{"columns": [{"name", "dtype"}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFrame {
    #[serde(default)]
    pub columns: Vec<SampleColumn>,
}

impl SampleFrame {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// OpenAPI parameter derived from one sample column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<&'static str>,
    pub example: Value,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelProperties {
    pub input: Vec<Property>,
    pub output: Vec<Property>,
}

/// Dtypes typed as OpenAPI `integer`. Rendered verbatim into the GPPI entrypoint.
pub const INTEGER_DTYPES: &[&str] =
    &["int8", "int16", "int32", "int64", "uint8", "uint16", "uint32", "uint64"];
pub const NUMBER_DTYPES: &[&str] = &["float16", "float32", "float64"];
pub const STRING_DTYPES: &[&str] =
    &["object", "str", "string", "bool", "boolean", "complex64", "complex128"];

/// OpenAPI `(type, example)` for a pandas/numpy dtype name.
///
/// Exact, case-sensitive membership in the dtype tables, as the served model does it.
pub fn open_api_type(dtype: &str) -> Option<(&'static str, Value)> {
    if INTEGER_DTYPES.contains(&dtype) {
        Some(("integer", Value::from(0)))
    } else if NUMBER_DTYPES.contains(&dtype) {
        Some(("number", Value::from(0)))
    } else if STRING_DTYPES.contains(&dtype) {
        Some(("string", Value::from("")))
    } else {
        None
    }
}

/// A dtype table as a Python tuple literal: `('int8', 'int16')`.
pub fn python_tuple(dtypes: &[&str]) -> String {
    let items: Vec<String> = dtypes.iter().map(|d| format!("'{d}'")).collect();
    match items.as_slice() {
        [single] => format!("({single},)"),
        _ => format!("({})", items.join(", ")),
    }
}

fn properties_of(frame: Option<&SampleFrame>) -> Vec<Property> {
    frame
        .map(|frame| {
            frame
                .columns
                .iter()
                .map(|column| {
                    let (kind, example) = open_api_type(&column.dtype)
                        .map_or((None, Value::Null), |(kind, example)| (Some(kind), example));
                    Property { name: column.name.clone(), kind, example, required: true }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSchemas {
    pub input: Option<SampleFrame>,
    pub output: Option<SampleFrame>,
}

impl SampleSchemas {
    /// Read the optional sample files next to a model.
    pub fn load(model_dir: &Path) -> TrainingResult<Self> {
        Ok(Self {
            input: Self::load_frame(&model_dir.join(INPUT_SAMPLE_FILE))?,
            output: Self::load_frame(&model_dir.join(OUTPUT_SAMPLE_FILE))?,
        })
    }

    fn load_frame(path: &Path) -> TrainingResult<Option<SampleFrame>> {
        if !path.is_file() {
            debug!(path = %path.display(), "No sample");
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn properties(&self) -> ModelProperties {
        ModelProperties {
            input: properties_of(self.input.as_ref()),
            output: properties_of(self.output.as_ref()),
        }
    }
}

/// What a python_function model may return.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionResult {
    /// A frame: named columns win over any output sample.
    Tabular { columns: Vec<String>, rows: Vec<Vec<Value>> },
    /// A two-dimensional array without column names.
    Array(Vec<Vec<Value>>),
    /// A flat list or series; each value becomes a one-column row.
    RawSequence(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl PredictionResult {
    pub fn into_matrix(self, schemas: &SampleSchemas) -> PredictionMatrix {
        let sample_columns =
            || schemas.output.as_ref().map(SampleFrame::column_names).unwrap_or_default();

        match self {
            Self::Tabular { columns, rows } => PredictionMatrix { columns, rows },
            Self::Array(rows) => PredictionMatrix { columns: sample_columns(), rows },
            Self::RawSequence(values) => PredictionMatrix {
                columns: sample_columns(),
                rows: values.into_iter().map(|v| vec![v]).collect(),
            },
        }
    }
}

/// Input matrix, optionally with the caller's column names.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFrame {
    pub columns: Option<Vec<String>>,
    pub rows: Vec<Vec<Value>>,
}

/// A loaded python_function model. Loading and execution live outside this crate.
pub trait PyFuncModel: Send + Sync {
    fn predict(&self, input: &InputFrame) -> TrainingResult<PredictionResult>;
}

pub struct Predictor<M> {
    model: M,
    schemas: SampleSchemas,
}

impl<M: PyFuncModel> Predictor<M> {
    pub fn new(model: M, schemas: SampleSchemas) -> Self {
        Self { model, schemas }
    }

    pub fn schemas(&self) -> &SampleSchemas {
        &self.schemas
    }

    /// Named inputs are reordered to the input sample's columns; columns the
    /// caller did not send become nulls, extra columns are dropped.
    fn reindex(&self, columns: Option<Vec<String>>, rows: Vec<Vec<Value>>) -> TrainingResult<InputFrame> {
        let Some(columns) = columns else {
            return Ok(InputFrame { columns: None, rows });
        };
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(TrainingError::InvalidInput(format!(
                "row has {} values but {} column names were provided",
                row.len(),
                columns.len()
            )));
        }
        let Some(sample) = self.schemas.input.as_ref() else {
            return Ok(InputFrame { columns: Some(columns), rows });
        };

        let target = sample.column_names();
        let positions: Vec<Option<usize>> =
            target.iter().map(|name| columns.iter().position(|c| c == name)).collect();
        let rows = rows
            .into_iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|pos| pos.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(InputFrame { columns: Some(target), rows })
    }

    pub fn predict(
        &self,
        rows: Vec<Vec<Value>>,
        columns: Option<Vec<String>>,
    ) -> TrainingResult<PredictionMatrix> {
        let input = self.reindex(columns, rows)?;
        let result = self.model.predict(&input)?;
        Ok(result.into_matrix(&self.schemas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn frame(columns: &[(&str, &str)]) -> SampleFrame {
        SampleFrame {
            columns: columns
                .iter()
                .map(|(name, dtype)| SampleColumn { name: (*name).to_string(), dtype: (*dtype).to_string() })
                .collect(),
        }
    }

    /// Sums each row and remembers what it was given.
    struct SumModel {
        seen: Mutex<Vec<InputFrame>>,
    }

    impl PyFuncModel for SumModel {
        fn predict(&self, input: &InputFrame) -> TrainingResult<PredictionResult> {
            self.seen.lock().unwrap().push(input.clone());
            Ok(PredictionResult::RawSequence(
                input.rows.iter().map(|r| json!(r.iter().filter_map(Value::as_f64).sum::<f64>())).collect(),
            ))
        }
    }

    #[test]
    fn test_open_api_types() {
        assert_eq!(open_api_type("int64"), Some(("integer", json!(0))));
        assert_eq!(open_api_type("uint8"), Some(("integer", json!(0))));
        assert_eq!(open_api_type("float32"), Some(("number", json!(0))));
        assert_eq!(open_api_type("object"), Some(("string", json!(""))));
        assert_eq!(open_api_type("bool"), Some(("string", json!(""))));
        assert_eq!(open_api_type("complex128"), Some(("string", json!(""))));
        assert_eq!(open_api_type("datetime64[ns]"), None);
        assert_eq!(open_api_type("Int64"), None);
        assert_eq!(open_api_type("float"), None);
        assert_eq!(open_api_type("bytes"), None);
    }

    #[test]
    fn test_python_tuple() {
        assert_eq!(python_tuple(NUMBER_DTYPES), "('float16', 'float32', 'float64')");
        assert_eq!(python_tuple(&["object"]), "('object',)");
    }

    #[test]
    fn test_load_and_properties() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(INPUT_SAMPLE_FILE),
            r#"{"columns": [{"name": "alcohol", "dtype": "float64"}, {"name": "when", "dtype": "datetime64[ns]"}]}"#,
        )
        .unwrap();

        let schemas = SampleSchemas::load(temp.path()).unwrap();
        assert!(schemas.output.is_none());

        let props = schemas.properties();
        assert!(props.output.is_empty());
        assert_eq!(props.input.len(), 2);
        assert_eq!(props.input[0].kind, Some("number"));
        assert_eq!(props.input[1].kind, None);
        assert_eq!(props.input[1].example, Value::Null);

        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["input"][0], json!({"name": "alcohol", "type": "number", "example": 0, "required": true}));
    }

    #[test]
    fn test_into_matrix_column_precedence() {
        let schemas = SampleSchemas { input: None, output: Some(frame(&[("quality", "float64")])) };

        let tabular = PredictionResult::Tabular { columns: vec!["score".into()], rows: vec![vec![json!(1)]] };
        assert_eq!(tabular.into_matrix(&schemas).columns, vec!["score".to_string()]);

        let array = PredictionResult::Array(vec![vec![json!(1)]]);
        assert_eq!(array.into_matrix(&schemas).columns, vec!["quality".to_string()]);

        let raw = PredictionResult::RawSequence(vec![json!(1), json!(2)]).into_matrix(&SampleSchemas::default());
        assert!(raw.columns.is_empty());
        assert_eq!(raw.rows, vec![vec![json!(1)], vec![json!(2)]]);
    }

    #[test]
    fn test_predictor_reindexes_named_input() {
        let schemas = SampleSchemas {
            input: Some(frame(&[("a", "int64"), ("b", "int64"), ("c", "int64")])),
            output: Some(frame(&[("sum", "float64")])),
        };
        let predictor = Predictor::new(SumModel { seen: Mutex::new(Vec::new()) }, schemas);

        let result = predictor
            .predict(vec![vec![json!(2), json!(1), json!(9)]], Some(vec!["b".into(), "a".into(), "z".into()]))
            .unwrap();
        assert_eq!(result.columns, vec!["sum".to_string()]);
        assert_eq!(result.rows, vec![vec![json!(3.0)]]);

        let seen = predictor.model.seen.lock().unwrap();
        assert_eq!(seen[0].columns, Some(vec!["a".to_string(), "b".to_string(), "c".to_string()]));
        assert_eq!(seen[0].rows, vec![vec![json!(1), json!(2), Value::Null]]);
    }

    #[test]
    fn test_predictor_rejects_ragged_rows() {
        let predictor = Predictor::new(SumModel { seen: Mutex::new(Vec::new()) }, SampleSchemas::default());
        let err = predictor.predict(vec![vec![json!(1)]], Some(vec!["a".into(), "b".into()])).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidInput(_)));

        let unnamed = predictor.predict(vec![vec![json!(1), json!(2)]], None).unwrap();
        assert_eq!(unnamed.rows, vec![vec![json!(3.0)]]);
    }
}
