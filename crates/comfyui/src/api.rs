//! REST client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission (`POST /prompt`), history retrieval
//! (`GET /history/{prompt_id}`), and artifact download (`GET /view`)
//! using [`reqwest`]. No retries happen at this layer; callers that
//! want resilience wrap these calls in
//! [`retry_with_backoff`](crate::retry::retry_with_backoff).

use bytes::Bytes;
use serde::Deserialize;

use crate::graph::{GraphError, WorkflowGraph};
use crate::history::{HistoryResponse, ImageRef};

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUiApi {
    client: reqwest::Client,
    base_url: String,
}

/// Result of successfully queuing a workflow.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Server-assigned job identifier.
    pub prompt_id: String,
    /// Position in the execution queue.
    pub queue_position: i32,
    /// Client-generated correlation token sent with the request.
    pub client_id: String,
}

/// Raw `/prompt` response body.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: String,
    #[serde(default)]
    number: i32,
}

/// Errors from the ComfyUI REST layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUiApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    Api {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The graph failed validation before submission.
    #[error("Workflow graph rejected: {0}")]
    InvalidGraph(#[from] GraphError),
}

impl ComfyUiApi {
    /// New API client for the instance at `base_url`
    /// (e.g. `http://127.0.0.1:8188`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base HTTP URL this client targets.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a workflow graph for execution.
    ///
    /// Validates the graph, attaches a fresh uuid-v4 correlation token,
    /// and POSTs `{"prompt": <graph>, "client_id": <token>}` to
    /// `/prompt`. Returns the server-assigned prompt id.
    pub async fn submit(&self, graph: &WorkflowGraph) -> Result<Submission, ComfyUiApiError> {
        graph.validate()?;

        let client_id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::json!({
            "prompt": graph,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .send()
            .await?;

        let parsed: SubmitResponse = Self::parse_response(response).await?;
        tracing::info!(
            prompt_id = %parsed.prompt_id,
            queue_position = parsed.number,
            "Workflow queued",
        );

        Ok(Submission {
            prompt_id: parsed.prompt_id,
            queue_position: parsed.number,
            client_id,
        })
    }

    /// Retrieve the execution history record for a prompt.
    pub async fn history(&self, prompt_id: &str) -> Result<HistoryResponse, ComfyUiApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.base_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the raw bytes of a server-side image.
    pub async fn view(&self, image: &ImageRef) -> Result<Bytes, ComfyUiApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.base_url))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.folder_type.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?)
    }

    // ---- private helpers ----

    /// Return the response unchanged on a success status, or an
    /// [`ComfyUiApiError::Api`] carrying the status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUiApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUiApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUiApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
