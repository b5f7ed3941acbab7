//! Control Client (C8): HTTP client for the service control protocol
//! (`execute`/`status`/`output`) against a per-service base URL.

use crate::dataref::DataReference;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("base_url is required"))]
    EmptyBaseUrl,

    #[snafu(display("task_id is required"))]
    EmptyTaskId,

    #[snafu(display("Connection failed: {source}"))]
    Connect { source: reqwest::Error },

    #[snafu(display("Request timed out: {source}"))]
    Timeout { source: reqwest::Error },

    #[snafu(display("Request failed: {source}"))]
    Request { source: reqwest::Error },

    #[snafu(display("HTTP {status}: {body}"))]
    Status { status: u16, body: String },

    #[snafu(display("Invalid response: {source}"))]
    InvalidResponse { source: reqwest::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub method: String,
    pub workflow_id: String,
    pub task_id: String,
    #[serde(default)]
    pub inputs: Vec<DataReference>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteStatus {
    Complete,
    Running,
    Failed,
    /// Any status string the protocol doesn't define. Carries the raw
    /// value so the worker can fail the task with a message naming it,
    /// instead of a JSON error or a lost status string.
    Unknown(String),
}

impl<'de> Deserialize<'de> for ExecuteStatus {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "complete" => ExecuteStatus::Complete,
            "running" => ExecuteStatus::Running,
            "failed" => ExecuteStatus::Failed,
            _ => ExecuteStatus::Unknown(raw),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    pub status: ExecuteStatus,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub output: Option<DataReference>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Complete,
    Failed,
    Unknown(String),
}

impl<'de> Deserialize<'de> for PollStatus {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "running" => PollStatus::Running,
            "complete" => PollStatus::Complete,
            "failed" => PollStatus::Failed,
            _ => PollStatus::Unknown(raw),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: PollStatus,
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputResponse {
    pub output: DataReference,
}

/// Thin wrapper over a shared `reqwest::Client`, constructed once and
/// reused across calls rather than rebuilt per request.
#[derive(Debug, Clone)]
pub struct ControlClient {
    client: reqwest::Client,
}

impl ControlClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| Error::Request { source })?;
        Ok(Self { client })
    }

    fn join(base_url: &str, path: &str) -> Result<String> {
        ensure!(!base_url.trim().is_empty(), EmptyBaseUrlSnafu);
        Ok(format!("{}{}", base_url.trim_end_matches('/'), path))
    }

    async fn send_and_parse<T: serde::de::DeserializeOwned>(
        request: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|source| Error::InvalidResponse { source })
    }

    pub async fn execute(
        &self,
        base_url: &str,
        method: &str,
        workflow_id: &str,
        task_id: &str,
        inputs: Vec<DataReference>,
    ) -> Result<ExecuteResponse> {
        ensure!(!task_id.trim().is_empty(), EmptyTaskIdSnafu);
        let url = Self::join(base_url, "/control/execute")?;
        let request = ExecuteRequest {
            method: method.to_string(),
            workflow_id: workflow_id.to_string(),
            task_id: task_id.to_string(),
            inputs,
            parameters: serde_json::Map::new(),
        };
        Self::send_and_parse(self.client.post(url).json(&request)).await
    }

    pub async fn get_status(&self, base_url: &str, task_id: &str) -> Result<StatusResponse> {
        ensure!(!task_id.trim().is_empty(), EmptyTaskIdSnafu);
        let url = Self::join(base_url, &format!("/control/status/{task_id}"))?;
        Self::send_and_parse(self.client.get(url)).await
    }

    pub async fn get_output(&self, base_url: &str, task_id: &str) -> Result<OutputResponse> {
        ensure!(!task_id.trim().is_empty(), EmptyTaskIdSnafu);
        let url = Self::join(base_url, &format!("/control/output/{task_id}"))?;
        Self::send_and_parse(self.client.get(url)).await
    }
}

fn classify_send_error(source: reqwest::Error) -> Error {
    if source.is_timeout() {
        Error::Timeout { source }
    } else if source.is_connect() {
        Error::Connect { source }
    } else {
        Error::Request { source }
    }
}
