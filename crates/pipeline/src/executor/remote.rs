//! HTTP client for an external generator service.
//!
//! Each stage is a `POST {base_url}/stages/{name}` carrying the job inputs
//! and prior stage outputs. A JSON response becomes the stage data; any
//! other content type is treated as a rendered document.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::json;

use super::{StageContext, StageError, StageExecutor, StageOutput};
use crate::stage::Stage;

pub struct RemoteExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteExecutor {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, StageError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn stage_url(&self, stage: &Stage) -> String {
        format!("{}/stages/{}", self.base_url, stage.name)
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or an
    /// [`StageError::Api`] with the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StageError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StageError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl StageExecutor for RemoteExecutor {
    async fn execute(&self, stage: &Stage, ctx: &StageContext) -> Result<StageOutput, StageError> {
        let body = json!({
            "job_id": ctx.job_id,
            "job_type": ctx.job_type,
            "owner_id": ctx.owner_id,
            "parameters": ctx.parameters,
            "outputs": ctx.outputs,
            "source_project": ctx.source_project,
        });

        let response = self
            .client
            .post(self.stage_url(stage))
            .json(&body)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if is_json {
            let data = response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| StageError::InvalidResponse(e.to_string()))?;
            return Ok(StageOutput::data(data));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(StageError::InvalidResponse(format!(
                "stage '{}' returned an empty document",
                stage.name
            )));
        }
        Ok(StageOutput::data(json!({
            "content_type": content_type,
            "size_bytes": bytes.len(),
        }))
        .with_bytes(bytes))
    }

    fn name(&self) -> &str {
        "remote"
    }
}
