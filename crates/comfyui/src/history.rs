//! Typed payloads for the ComfyUI `/history/{prompt_id}` endpoint.
//!
//! The response is a map from prompt id to an execution record with a
//! `status` block and a per-node `outputs` map. Fields the server omits
//! while a job is still queued are defaulted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Full `/history/{prompt_id}` response body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct HistoryResponse(pub BTreeMap<String, HistoryEntry>);

impl HistoryResponse {
    /// The record for a specific prompt, if the server has one yet.
    pub fn entry(&self, prompt_id: &str) -> Option<&HistoryEntry> {
        self.0.get(prompt_id)
    }
}

/// One prompt's execution record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub outputs: JobOutputs,
}

/// Execution status block.
///
/// Unknown fields are preserved so a failure can be surfaced with the
/// complete payload the server sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub status_str: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobStatus {
    /// Whether the status string signals a remote execution error.
    pub fn is_error(&self) -> bool {
        self.status_str.to_lowercase().contains("error")
    }

    /// The raw status payload, for failure reporting.
    pub fn detail(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.status_str.clone())
    }
}

/// Per-node outputs of a completed prompt.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct JobOutputs(pub BTreeMap<String, NodeOutput>);

impl JobOutputs {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First image reference found in any node's output.
    ///
    /// Render graphs carry exactly one save node, so the first image is
    /// the artifact.
    pub fn first_image(&self) -> Option<&ImageRef> {
        self.0.values().flat_map(|out| out.images.iter()).next()
    }
}

/// Output of one node. Only image lists are of interest here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Reference to one server-side image file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage area ("output", "input", "temp").
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}
