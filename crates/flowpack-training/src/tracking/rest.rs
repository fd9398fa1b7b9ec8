//! MLflow tracking server REST API (2.0).

use super::{Experiment, RunInfo, TrackingStore};
use crate::error::{TrainingError, TrainingResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const API_PREFIX: &str = "api/2.0/mlflow";

#[derive(Debug, Clone)]
pub struct RestTrackingStore {
    /// Tracking server base URL, as configured.
    uri: String,
    /// Bearer token (`MLFLOW_TRACKING_TOKEN`), if the server requires one.
    token: Option<String>,
    client: Client,
}

#[derive(Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Serialize)]
struct CreateExperimentRequest<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct GetRunResponse {
    run: RestRun,
}

#[derive(Deserialize)]
struct RestRun {
    info: RestRunInfo,
}

#[derive(Deserialize)]
struct RestRunInfo {
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    run_uuid: Option<String>,
    experiment_id: String,
    artifact_uri: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Serialize)]
struct SetTagRequest<'a> {
    run_id: &'a str,
    run_uuid: &'a str,
    key: &'a str,
    value: &'a str,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

impl RestTrackingStore {
    pub fn new(uri: &str, token: Option<String>) -> Self {
        Self { uri: uri.to_string(), token, client: Client::new() }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{API_PREFIX}/{path}", self.uri.trim_end_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> TrainingResult<Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            error!(error = %e, tracking_uri = %self.uri, "Failed to reach tracking server");
            TrainingError::Tracking(format!("{what}: tracking server {} not reachable: {e}", self.uri))
        })?;
        debug!(status = %response.status(), what, "Tracking server responded");
        Ok(response)
    }

    async fn api_error(response: Response, what: &str) -> TrainingError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiError>(&body) {
            Ok(err) => TrainingError::Tracking(format!(
                "{what} failed ({status}): {} {}",
                err.error_code, err.message
            )),
            Err(_) => TrainingError::Tracking(format!("{what} failed ({status}): {body}")),
        }
    }
}

#[async_trait]
impl TrackingStore for RestTrackingStore {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn get_experiment_by_name(&self, name: &str) -> TrainingResult<Option<Experiment>> {
        let request = self
            .client
            .get(self.endpoint("experiments/get-by-name"))
            .query(&[("experiment_name", name)]);
        let response = self.send(request, "get experiment").await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response, "get experiment").await);
        }
        let body: GetExperimentResponse = response.json().await?;
        Ok(Some(body.experiment))
    }

    async fn create_experiment(&self, name: &str) -> TrainingResult<String> {
        let request = self
            .client
            .post(self.endpoint("experiments/create"))
            .json(&CreateExperimentRequest { name });
        let response = self.send(request, "create experiment").await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response, "create experiment").await);
        }
        let body: CreateExperimentResponse = response.json().await?;
        Ok(body.experiment_id)
    }

    async fn get_run(&self, run_id: &str) -> TrainingResult<RunInfo> {
        let request = self.client.get(self.endpoint("runs/get")).query(&[("run_id", run_id)]);
        let response = self.send(request, "get run").await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response, "get run").await);
        }
        let body: GetRunResponse = response.json().await?;
        let info = body.run.info;
        Ok(RunInfo {
            run_id: info.run_id.or(info.run_uuid).unwrap_or_else(|| run_id.to_string()),
            experiment_id: info.experiment_id,
            artifact_uri: info.artifact_uri,
            status: info.status,
        })
    }

    async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> TrainingResult<()> {
        let request = self
            .client
            .post(self.endpoint("runs/set-tag"))
            .json(&SetTagRequest { run_id, run_uuid: run_id, key, value });
        let response = self.send(request, "set tag").await?;

        if !response.status().is_success() {
            return Err(Self::api_error(response, "set tag").await);
        }
        Ok(())
    }
}
