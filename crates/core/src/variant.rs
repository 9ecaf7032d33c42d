//! Variant-request parameter bundles.
//!
//! One [`VariantRequest`] parameterizes one remote generation job; a
//! batch of them shares a prompt and reference images but differs by
//! seed and sampling settings.

use serde::Deserialize;

use crate::error::CoreError;

/// Default sampling step count.
pub const DEFAULT_STEPS: u32 = 20;
/// Default classifier-free guidance scale for Flux inpainting.
pub const DEFAULT_GUIDANCE: f64 = 3.5;
/// Default denoise strength. Values below 1.0 keep the unmasked
/// region anchored to the encoded reference image.
pub const DEFAULT_DENOISE: f64 = 0.75;

/// Latent-space images require dimensions divisible by this.
const DIMENSION_MULTIPLE: u32 = 8;

/// Parameters for one generation variant.
#[derive(Debug, Clone, Deserialize)]
pub struct VariantRequest {
    /// Label for this variant; also the output file stem.
    pub name: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Sampling step count.
    #[serde(default = "default_steps")]
    pub steps: u32,
    /// Guidance (cfg) scale.
    #[serde(default = "default_guidance")]
    pub guidance: f64,
    /// Denoise strength in (0, 1].
    #[serde(default = "default_denoise")]
    pub denoise: f64,
    /// Random seed. When absent, a time-derived seed is chosen at
    /// graph-build time and reported back.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_steps() -> u32 {
    DEFAULT_STEPS
}

fn default_guidance() -> f64 {
    DEFAULT_GUIDANCE
}

fn default_denoise() -> f64 {
    DEFAULT_DENOISE
}

impl VariantRequest {
    /// Validate the request before it is turned into a workflow graph.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("Variant name must not be empty".into()));
        }
        for (label, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % DIMENSION_MULTIPLE != 0 {
                return Err(CoreError::Validation(format!(
                    "Variant '{}': {label} must be a positive multiple of {DIMENSION_MULTIPLE}, got {value}",
                    self.name
                )));
            }
        }
        if self.steps == 0 {
            return Err(CoreError::Validation(format!(
                "Variant '{}': steps must be at least 1",
                self.name
            )));
        }
        if !(self.denoise > 0.0 && self.denoise <= 1.0) {
            return Err(CoreError::Validation(format!(
                "Variant '{}': denoise must be in (0, 1], got {}",
                self.name, self.denoise
            )));
        }
        Ok(())
    }

    /// Output filename for this variant.
    pub fn output_filename(&self) -> String {
        format!("{}.png", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> VariantRequest {
        VariantRequest {
            name: "inpaint_v1".into(),
            width: 512,
            height: 384,
            steps: 12,
            guidance: 3.5,
            denoise: 0.78,
            seed: Some(42),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let mut req = request();
        req.name = "  ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn non_multiple_of_eight_rejected() {
        let mut req = request();
        req.width = 500;
        assert!(req.validate().is_err());
    }

    #[test]
    fn zero_steps_rejected() {
        let mut req = request();
        req.steps = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn denoise_out_of_range_rejected() {
        let mut req = request();
        req.denoise = 1.2;
        assert!(req.validate().is_err());
        req.denoise = 0.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn output_filename_appends_png() {
        assert_eq!(request().output_filename(), "inpaint_v1.png");
    }

    #[test]
    fn deserializes_with_defaults() {
        let req: VariantRequest =
            serde_json::from_str(r#"{"name":"v1","width":512,"height":384}"#).unwrap();
        assert_eq!(req.steps, DEFAULT_STEPS);
        assert_eq!(req.guidance, DEFAULT_GUIDANCE);
        assert_eq!(req.denoise, DEFAULT_DENOISE);
        assert!(req.seed.is_none());
    }
}
