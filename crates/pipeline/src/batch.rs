//! Batch definitions: one shared prompt and set of reference images,
//! plus the per-variant parameter bundles.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use homeforge_core::error::CoreError;
use homeforge_core::variant::VariantRequest;

/// One batch of generation variants.
///
/// All image paths are local files; the orchestrator stages them into
/// the server's input directory before submission.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    /// Positive text prompt shared by every variant.
    pub prompt: String,
    /// Reference photo for img2img / inpainting.
    #[serde(default)]
    pub reference_photo: Option<PathBuf>,
    /// Inpainting mask; requires `reference_photo`.
    #[serde(default)]
    pub mask: Option<PathBuf>,
    /// Depth map for ControlNet conditioning.
    #[serde(default)]
    pub depth_map: Option<PathBuf>,
    /// Canny edge map for ControlNet conditioning.
    #[serde(default)]
    pub canny_map: Option<PathBuf>,
    pub variants: Vec<VariantRequest>,
}

impl BatchRequest {
    /// Load a batch description from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("Cannot read batch file {}: {e}", path.display()))
        })?;
        let batch: Self = serde_json::from_str(&raw).map_err(|e| {
            CoreError::Config(format!("Invalid batch file {}: {e}", path.display()))
        })?;
        batch.validate()?;
        Ok(batch)
    }

    /// Validate batch-level invariants. Per-variant parameter checks
    /// happen at submission time so one bad variant cannot sink the
    /// whole batch.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prompt.trim().is_empty() {
            return Err(CoreError::Validation("Batch prompt must not be empty".into()));
        }
        if self.variants.is_empty() {
            return Err(CoreError::Validation(
                "Batch must contain at least one variant".into(),
            ));
        }
        if self.mask.is_some() && self.reference_photo.is_none() {
            return Err(CoreError::Validation(
                "A mask requires a reference photo".into(),
            ));
        }

        let mut names = HashSet::new();
        for variant in &self.variants {
            if !names.insert(variant.name.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Duplicate variant name '{}'",
                    variant.name
                )));
            }
        }
        Ok(())
    }
}
