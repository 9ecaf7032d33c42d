//! Completion polling for submitted jobs.
//!
//! A job observed through `/history` moves through
//! `Submitted -> Running -> {Completed | Failed | TimedOut}` and never
//! regresses. Transient poll errors do not change state; only a
//! definitive error, a completion signal, the timeout ceiling, or
//! cancellation ends the loop.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use homeforge_core::config::PollConfig;

use crate::api::ComfyUiApi;
use crate::history::JobOutputs;

/// Terminal outcome of one job, as seen by the poller.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The job finished and produced outputs.
    Completed(JobOutputs),
    /// The server reported an execution error; `detail` is the raw
    /// status payload.
    Failed { detail: String },
    /// The job did not reach a terminal state within the ceiling.
    TimedOut { waited: Duration },
}

/// Poll `/history/{prompt_id}` until the job reaches a terminal state.
///
/// Returns `None` if `cancel` is triggered first, letting a caller
/// abandon a job early; the remote execution itself continues.
/// Transient API errors are logged and swallowed; the next interval
/// proceeds normally.
pub async fn poll_job(
    api: &ComfyUiApi,
    prompt_id: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Option<JobOutcome> {
    let started = Instant::now();
    let mut last_progress = Duration::ZERO;

    loop {
        match api.history(prompt_id).await {
            Ok(history) => {
                if let Some(entry) = history.entry(prompt_id) {
                    if entry.status.completed || !entry.outputs.is_empty() {
                        tracing::info!(
                            prompt_id,
                            elapsed_secs = started.elapsed().as_secs(),
                            "Job completed",
                        );
                        return Some(JobOutcome::Completed(entry.outputs.clone()));
                    }
                    if entry.status.is_error() {
                        let detail = entry.status.detail();
                        tracing::error!(prompt_id, %detail, "Job failed on the server");
                        return Some(JobOutcome::Failed { detail });
                    }
                }
            }
            Err(e) => {
                // Transient: connection reset, timeout, server busy.
                tracing::warn!(prompt_id, error = %e, "History poll failed, will retry");
            }
        }

        let waited = started.elapsed();
        if waited >= config.timeout {
            tracing::error!(
                prompt_id,
                waited_secs = waited.as_secs(),
                "Job did not complete within the ceiling",
            );
            return Some(JobOutcome::TimedOut { waited });
        }

        if waited.saturating_sub(last_progress) >= config.progress_every {
            tracing::info!(prompt_id, elapsed_secs = waited.as_secs(), "Still waiting");
            last_progress = waited;
        }

        // Never sleep past the timeout ceiling.
        let sleep_for = config.interval.min(config.timeout - waited);
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(prompt_id, "Polling cancelled");
                return None;
            }
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::routing::get;
    use axum::{Json, Router};

    use super::*;

    async fn spawn_server(app: Router) -> ComfyUiApi {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        ComfyUiApi::new(format!("http://{addr}"))
    }

    fn fast_poll(timeout: Duration) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(50),
            timeout,
            progress_every: Duration::from_secs(60),
        }
    }

    fn completed_body(prompt_id: &str) -> serde_json::Value {
        serde_json::json!({
            prompt_id: {
                "status": {"completed": true, "status_str": "success"},
                "outputs": {"14": {"images": [{"filename": "v1_00001_.png", "subfolder": "", "type": "output"}]}}
            }
        })
    }

    #[tokio::test]
    async fn completed_job_yields_outputs() {
        let app = Router::new().route(
            "/history/{prompt_id}",
            get(|Path(prompt_id): Path<String>| async move { Json(completed_body(&prompt_id)) }),
        );
        let api = spawn_server(app).await;

        let outcome = poll_job(
            &api,
            "job-1",
            &fast_poll(Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        match outcome {
            JobOutcome::Completed(outputs) => {
                assert_eq!(outputs.first_image().unwrap().filename, "v1_00001_.png");
            }
            other => panic!("Expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_status_yields_failed_with_detail() {
        let app = Router::new().route(
            "/history/{prompt_id}",
            get(|Path(prompt_id): Path<String>| async move {
                Json(serde_json::json!({
                    prompt_id: {"status": {"completed": false, "status_str": "error: OOM in node 12"}}
                }))
            }),
        );
        let api = spawn_server(app).await;

        let outcome = poll_job(
            &api,
            "job-1",
            &fast_poll(Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        match outcome {
            JobOutcome::Failed { detail } => assert!(detail.contains("OOM in node 12")),
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn never_completing_job_times_out_on_schedule() {
        let app = Router::new().route(
            "/history/{prompt_id}",
            get(|| async { Json(serde_json::json!({})) }),
        );
        let api = spawn_server(app).await;

        let started = std::time::Instant::now();
        let outcome = poll_job(
            &api,
            "job-1",
            &fast_poll(Duration::from_secs(2)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let elapsed = started.elapsed();

        match outcome {
            JobOutcome::TimedOut { waited } => {
                assert!(waited >= Duration::from_secs(2));
            }
            other => panic!("Expected TimedOut, got {other:?}"),
        }
        // At the ceiling, not long after it.
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn transient_errors_do_not_end_the_loop() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/history/{prompt_id}",
                get(
                    |State(hits): State<Arc<AtomicUsize>>, Path(prompt_id): Path<String>| async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        if n < 2 {
                            // Server busy: non-2xx must be swallowed.
                            Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
                        } else {
                            Ok(Json(completed_body(&prompt_id)))
                        }
                    },
                ),
            )
            .with_state(Arc::clone(&hits));
        let api = spawn_server(app).await;

        let outcome = poll_job(
            &api,
            "job-1",
            &fast_poll(Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(matches!(outcome, JobOutcome::Completed(_)));
        assert!(hits.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn cancellation_returns_none() {
        let app = Router::new().route(
            "/history/{prompt_id}",
            get(|| async { Json(serde_json::json!({})) }),
        );
        let api = spawn_server(app).await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = poll_job(&api, "job-1", &fast_poll(Duration::from_secs(5)), &cancel).await;
        assert!(outcome.is_none());
    }
}
