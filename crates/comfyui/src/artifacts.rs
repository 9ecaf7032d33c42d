//! Artifact download and local persistence.

use std::path::{Path, PathBuf};

use crate::api::{ComfyUiApi, ComfyUiApiError};
use crate::history::JobOutputs;

/// A downloaded artifact written to local storage.
#[derive(Debug, Clone)]
pub struct SavedArtifact {
    pub path: PathBuf,
    /// Size of the payload in bytes.
    pub len: usize,
}

/// Errors while fetching or persisting an artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The outputs map carried no image reference anywhere. The graph
    /// executed in an unexpected shape; never substitute a placeholder.
    #[error("Completed job produced no image outputs")]
    NoImages,

    #[error(transparent)]
    Api(#[from] ComfyUiApiError),

    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Download the first image a completed job produced and write it to
/// `dest`.
///
/// Render graphs are built with exactly one save node, so the first
/// image reference is the artifact; remaining references, if any, are
/// ignored.
pub async fn fetch_first_artifact(
    api: &ComfyUiApi,
    outputs: &JobOutputs,
    dest: &Path,
) -> Result<SavedArtifact, ArtifactError> {
    let image = outputs.first_image().ok_or(ArtifactError::NoImages)?;

    let bytes = api.view(image).await?;
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(dest, &bytes).await?;

    tracing::info!(
        filename = %image.filename,
        path = %dest.display(),
        bytes = bytes.len(),
        "Artifact saved",
    );

    Ok(SavedArtifact {
        path: dest.to_path_buf(),
        len: bytes.len(),
    })
}
