//! Client for the workflow queue API.
//!
//! Not tied to a request context: a script may submit follow-up work for
//! any project. The bearer token is passed in by the caller (usually from
//! [`ClientSettings`]); it is never logged.

pub use conductor_config::{ClientSettings, ExecutionMode};

use conductor_config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const APPEND_CSV_PATH: &str = "/api/workflows/append-csv";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// The queue stores at most this many step triplets per row.
pub const MAX_STEPS: usize = 5;
pub const DRY_RUN_STATUS: &str = "DRY_RUN";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("at least one step is required")]
    NoSteps,

    #[error("workflow request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("workflow api returned status={status} body={body}")]
    Http { status: u16, body: String },

    #[error("workflow api response decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub operation: String,
    pub method: String,
    pub device: String,
}

impl Step {
    pub fn new(operation: impl Into<String>, method: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            method: method.into(),
            device: device.into(),
        }
    }

    fn trimmed(&self) -> Self {
        Self::new(self.operation.trim(), self.method.trim(), self.device.trim())
    }
}

/// One new row in the workflow queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitWorkflowRequest {
    pub project_id: String,
    pub experiment_id: String,
    pub created_by: String,
    pub source_plate_name: String,
    pub source_plate_format: String,
    pub steps: Vec<Step>,
}

impl SubmitWorkflowRequest {
    /// The body actually sent: fields trimmed, steps capped at [`MAX_STEPS`].
    pub fn to_payload(&self) -> Result<Self, ClientError> {
        if self.steps.is_empty() {
            return Err(ClientError::NoSteps);
        }
        Ok(Self {
            project_id: self.project_id.trim().to_string(),
            experiment_id: self.experiment_id.trim().to_string(),
            created_by: self.created_by.trim().to_string(),
            source_plate_name: self.source_plate_name.trim().to_string(),
            source_plate_format: self.source_plate_format.trim().to_string(),
            steps: self.steps.iter().take(MAX_STEPS).map(Step::trimmed).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub ok: bool,
    pub request_id: String,
    pub status: String,
}

#[derive(Clone)]
pub struct WorkflowClient {
    base_url: String,
    bearer_token: Option<String>,
    mode: ExecutionMode,
    http: reqwest::blocking::Client,
}

impl std::fmt::Debug for WorkflowClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowClient")
            .field("base_url", &self.base_url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<REDACTED>"))
            .field("mode", &self.mode)
            .finish()
    }
}

impl WorkflowClient {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, bearer_token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
            mode: ExecutionMode::Normal,
            http,
        })
    }

    /// Build from environment settings.
    ///
    /// A dry-run client needs no API base since it never sends anything.
    pub fn from_settings(settings: &ClientSettings, mode: ExecutionMode) -> Result<Self, ClientError> {
        let base = match (settings.require_api_base(), mode) {
            (Ok(base), _) => base.to_string(),
            (Err(_), ExecutionMode::DryRun) => String::new(),
            (Err(e), ExecutionMode::Normal) => return Err(e.into()),
        };
        Ok(Self::new(base, settings.bearer_token.clone())?.with_mode(mode))
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn append_csv_url(&self) -> String {
        format!("{}{}", self.base_url, APPEND_CSV_PATH)
    }

    pub fn submit_workflow(&self, request: &SubmitWorkflowRequest) -> Result<SubmitResponse, ClientError> {
        let payload = request.to_payload()?;

        if self.mode.is_dry_run() {
            info!(payload = ?payload, "dry run: workflow not submitted");
            return Ok(SubmitResponse {
                ok: true,
                request_id: format!("DRYRUN-{}", uuid::Uuid::new_v4()),
                status: DRY_RUN_STATUS.to_string(),
            });
        }

        let url = self.append_csv_url();
        debug!(url = %url, project_id = %payload.project_id, steps = payload.steps.len(), "submitting workflow");

        let mut req = self.http.post(&url).json(&payload);
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send()?;

        let status = resp.status();
        let text = resp.text()?;
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        let parsed: SubmitResponse = serde_json::from_str(&text).map_err(ClientError::Decode)?;
        info!(request_id = %parsed.request_id, status = %parsed.status, "workflow submitted");
        Ok(parsed)
    }
}
