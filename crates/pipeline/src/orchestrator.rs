//! Batch orchestration: submit one job per variant, poll all of them
//! concurrently, and collect artifacts.
//!
//! Submission follows the input order; completion order is up to the
//! remote scheduler. A failure or timeout on one variant never aborts
//! the others — it becomes a row in the final [`BatchReport`].

use std::path::PathBuf;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use homeforge_core::config::RenderConfig;
use homeforge_core::error::CoreError;
use homeforge_core::variant::VariantRequest;
use homeforge_comfyui::api::{ComfyUiApi, ComfyUiApiError};
use homeforge_comfyui::artifacts::{fetch_first_artifact, ArtifactError};
use homeforge_comfyui::graph::{ControlMap, GraphError, GraphSpec, ModelSet};
use homeforge_comfyui::poller::{poll_job, JobOutcome};
use homeforge_comfyui::retry::{retry_with_backoff, RetryConfig};

use crate::batch::BatchRequest;
use crate::report::{BatchReport, VariantOutcome, VariantReport};
use crate::staging::{stage_input, StagingError};

/// Errors that abort a whole batch before any job is submitted.
///
/// Per-variant failures are downgraded to report rows instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("Failed to prepare output directory: {0}")]
    OutputDir(#[from] std::io::Error),
}

/// Why one variant never made it onto the remote queue.
#[derive(Debug, thiserror::Error)]
enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Api(#[from] ComfyUiApiError),
}

/// Filenames of batch inputs after staging.
#[derive(Debug, Default, Clone)]
struct StagedInputs {
    reference: Option<String>,
    mask: Option<String>,
    depth: Option<String>,
    canny: Option<String>,
}

impl StagedInputs {
    fn control_maps(&self) -> Vec<ControlMap> {
        let mut maps = Vec::new();
        if let Some(depth) = &self.depth {
            maps.push(ControlMap::depth(depth.clone()));
        }
        if let Some(canny) = &self.canny {
            maps.push(ControlMap::canny(canny.clone()));
        }
        maps
    }
}

/// Runs batches of generation variants against one ComfyUI instance.
pub struct Orchestrator {
    api: ComfyUiApi,
    config: RenderConfig,
    models: ModelSet,
    retry: RetryConfig,
}

impl Orchestrator {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            api: ComfyUiApi::new(config.server_url.clone()),
            config,
            models: ModelSet::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Override the model set (non-default ComfyUI installation).
    pub fn with_models(mut self, models: ModelSet) -> Self {
        self.models = models;
        self
    }

    /// Override the retry policy for submission and artifact download.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run one batch to completion and return the per-variant report.
    ///
    /// Rows appear in submission order regardless of completion order.
    /// Cancelling `cancel` abandons outstanding polls; the remote jobs
    /// themselves keep running.
    pub async fn run_batch(
        &self,
        batch: &BatchRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, PipelineError> {
        batch.validate()?;
        let staged = self.stage_inputs(batch).await?;
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        tracing::info!(
            variants = batch.variants.len(),
            server = %self.api.base_url(),
            "Starting batch",
        );

        // Submit in input order; a rejected variant becomes a report
        // row immediately and does not block the rest.
        let mut jobs: Vec<(String, Option<u64>, JoinHandle<VariantOutcome>)> = Vec::new();
        for variant in &batch.variants {
            match self.submit_variant(batch, &staged, variant).await {
                Ok((prompt_id, seed)) => {
                    tracing::info!(
                        variant = %variant.name,
                        seed,
                        prompt_id = %prompt_id,
                        "Variant queued",
                    );
                    let handle = self.spawn_job(
                        prompt_id,
                        self.config.output_dir.join(variant.output_filename()),
                        cancel.clone(),
                    );
                    jobs.push((variant.name.clone(), Some(seed), handle));
                }
                Err(e) => {
                    tracing::error!(variant = %variant.name, error = %e, "Submission failed");
                    let handle = tokio::spawn(immediate_failure(e.to_string()));
                    jobs.push((variant.name.clone(), variant.seed, handle));
                }
            }
        }

        // Collect every job; they poll concurrently once spawned.
        let mut report = BatchReport::default();
        for (name, seed, handle) in jobs {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => VariantOutcome::Failed {
                    reason: format!("Job task panicked: {e}"),
                },
            };
            report.rows.push(VariantReport { name, seed, outcome });
        }

        report.log_summary();
        Ok(report)
    }

    /// Copy every referenced batch input into the server's input
    /// directory.
    async fn stage_inputs(&self, batch: &BatchRequest) -> Result<StagedInputs, StagingError> {
        let mut staged = StagedInputs::default();
        if let Some(path) = &batch.reference_photo {
            staged.reference = Some(stage_input(path, &self.config.input_dir).await?);
        }
        if let Some(path) = &batch.mask {
            staged.mask = Some(stage_input(path, &self.config.input_dir).await?);
        }
        if let Some(path) = &batch.depth_map {
            staged.depth = Some(stage_input(path, &self.config.input_dir).await?);
        }
        if let Some(path) = &batch.canny_map {
            staged.canny = Some(stage_input(path, &self.config.input_dir).await?);
        }
        Ok(staged)
    }

    /// Validate, build, and submit one variant's graph. Returns the
    /// server prompt id and the seed baked into the graph.
    async fn submit_variant(
        &self,
        batch: &BatchRequest,
        staged: &StagedInputs,
        variant: &VariantRequest,
    ) -> Result<(String, u64), SubmitError> {
        variant.validate()?;

        let spec = GraphSpec {
            prompt: batch.prompt.clone(),
            reference_image: staged.reference.clone(),
            mask_image: staged.mask.clone(),
            control_maps: staged.control_maps(),
            width: variant.width,
            height: variant.height,
            steps: variant.steps,
            guidance: variant.guidance,
            denoise: variant.denoise,
            seed: variant.seed,
            filename_prefix: variant.name.clone(),
        };
        let built = spec.build(&self.models)?;

        let submission = retry_with_backoff(&self.retry, "Workflow submission", || {
            self.api.submit(&built.graph)
        })
        .await?;

        Ok((submission.prompt_id, built.seed))
    }

    /// Spawn the poll-then-fetch task for one submitted job.
    fn spawn_job(
        &self,
        prompt_id: String,
        dest: PathBuf,
        cancel: CancellationToken,
    ) -> JoinHandle<VariantOutcome> {
        let api = self.api.clone();
        let poll = self.config.poll.clone();
        let retry = self.retry.clone();

        tokio::spawn(async move {
            match poll_job(&api, &prompt_id, &poll, &cancel).await {
                None => VariantOutcome::Cancelled,
                Some(JobOutcome::Failed { detail }) => VariantOutcome::Failed { reason: detail },
                Some(JobOutcome::TimedOut { waited }) => VariantOutcome::TimedOut { waited },
                Some(JobOutcome::Completed(outputs)) => {
                    // Imageless outputs are a malformed result, not a
                    // transient fault; retrying cannot change them.
                    if outputs.first_image().is_none() {
                        return VariantOutcome::Failed {
                            reason: ArtifactError::NoImages.to_string(),
                        };
                    }
                    let fetched = retry_with_backoff(&retry, "Artifact download", || {
                        fetch_first_artifact(&api, &outputs, &dest)
                    })
                    .await;
                    match fetched {
                        Ok(saved) => VariantOutcome::Saved {
                            path: saved.path,
                            bytes: saved.len,
                        },
                        Err(e) => VariantOutcome::Failed {
                            reason: e.to_string(),
                        },
                    }
                }
            }
        })
    }
}

/// Trivial task so rejected variants flow through the same collection
/// path as submitted ones.
async fn immediate_failure(reason: String) -> VariantOutcome {
    VariantOutcome::Failed { reason }
}
