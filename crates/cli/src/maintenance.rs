//! Periodic project maintenance.
//!
//! Runs [`ProjectContextStore::maintain_all`] on a fixed interval: weekly
//! pending contexts are created on each project's input day and pending
//! contexts past retention are dropped. The first pass runs immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use slidepin_core::project::ProjectContextStore;
use tokio_util::sync::CancellationToken;

/// Run the maintenance loop until `cancel` is triggered. Returns the number
/// of passes attempted.
pub async fn run(
    registry: Arc<ProjectContextStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> u64 {
    tracing::info!(interval_secs = interval.as_secs(), "Project maintenance started");

    let mut ticker = tokio::time::interval(interval);
    let mut passes = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(passes, "Project maintenance stopping");
                break;
            }
            _ = ticker.tick() => {
                passes += 1;
                match registry.maintain_all(Utc::now()).await {
                    Ok(report) if report.contexts_created > 0 || report.pending_removed > 0 => {
                        tracing::info!(
                            projects = report.projects,
                            created = report.contexts_created,
                            removed = report.pending_removed,
                            "Project maintenance: contexts updated"
                        );
                    }
                    Ok(report) => {
                        tracing::debug!(projects = report.projects, "Project maintenance: nothing to do");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Project maintenance failed");
                    }
                }
            }
        }
    }

    passes
}
