//! `homeforge-render` — run a batch of render variants against a
//! ComfyUI server and collect the artifacts.
//!
//! Usage: `homeforge-render <batch.json>`. Server and directory
//! settings come from `HOMEFORGE_*` environment variables (a `.env`
//! file is honored).

use std::path::PathBuf;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use homeforge_core::config::RenderConfig;
use homeforge_pipeline::batch::BatchRequest;
use homeforge_pipeline::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homeforge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let batch_path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("Usage: homeforge-render <batch.json>")?;

    let batch = BatchRequest::from_json_file(&batch_path)
        .with_context(|| format!("Failed to load batch {}", batch_path.display()))?;
    let config = RenderConfig::from_env().context("Invalid HOMEFORGE_* environment")?;

    // First Ctrl-C abandons polling; the remote jobs keep running.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, abandoning outstanding jobs");
            signal_cancel.cancel();
        }
    });

    let orchestrator = Orchestrator::new(config);
    let report = orchestrator.run_batch(&batch, &cancel).await?;

    if report.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}
