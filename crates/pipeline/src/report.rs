//! Per-variant outcome reporting.

use std::path::PathBuf;
use std::time::Duration;

/// Terminal outcome of one variant, from the orchestrator's view.
#[derive(Debug, Clone)]
pub enum VariantOutcome {
    /// Artifact downloaded and written locally.
    Saved { path: PathBuf, bytes: usize },
    /// Submission, remote execution, or artifact fetch failed.
    Failed { reason: String },
    /// The job never reached a terminal state within the ceiling.
    TimedOut { waited: Duration },
    /// Polling was abandoned before the job finished.
    Cancelled,
}

impl VariantOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }
}

/// One row of the final batch report.
#[derive(Debug, Clone)]
pub struct VariantReport {
    /// Variant label from the request.
    pub name: String,
    /// Seed baked into the submitted graph, when a graph was built.
    pub seed: Option<u64>,
    pub outcome: VariantOutcome,
}

/// Aggregate result of one batch run, in submission order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub rows: Vec<VariantReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.rows.iter().filter(|row| row.outcome.is_saved()).count()
    }

    pub fn failed(&self) -> usize {
        self.rows.len() - self.succeeded()
    }

    /// Emit one summary line per variant plus the aggregate count.
    pub fn log_summary(&self) {
        for row in &self.rows {
            match &row.outcome {
                VariantOutcome::Saved { path, bytes } => {
                    tracing::info!(
                        variant = %row.name,
                        seed = row.seed,
                        path = %path.display(),
                        bytes,
                        "Variant saved",
                    );
                }
                VariantOutcome::Failed { reason } => {
                    tracing::error!(variant = %row.name, seed = row.seed, %reason, "Variant failed");
                }
                VariantOutcome::TimedOut { waited } => {
                    tracing::error!(
                        variant = %row.name,
                        seed = row.seed,
                        waited_secs = waited.as_secs(),
                        "Variant timed out",
                    );
                }
                VariantOutcome::Cancelled => {
                    tracing::warn!(variant = %row.name, seed = row.seed, "Variant cancelled");
                }
            }
        }
        tracing::info!(
            completed = self.succeeded(),
            failed = self.failed(),
            total = self.rows.len(),
            "Batch finished",
        );
    }
}
