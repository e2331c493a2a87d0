//! Background tasks for the Ringline server.
//!
//! Two reapers run for the life of the process: one force-closes idle call
//! sessions, one deletes expired audio artifacts.

use ringline_artifacts::ArtifactStore;
use ringline_calls::CallOrchestrator;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Starts the idle session reaper. Runs indefinitely.
pub async fn start_idle_reaper(orchestrator: Arc<CallOrchestrator>, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::warn!("idle session reaper disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting idle session reaper");

    loop {
        sleep(interval).await;

        let reaped = orchestrator.reap_idle().await;
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "closed idle call sessions");
        } else {
            tracing::debug!("no idle sessions to close");
        }
    }
}

/// Starts the expired-artifact reaper. Runs indefinitely.
pub async fn start_artifact_reaper(artifacts: Arc<ArtifactStore>, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::warn!("artifact reaper disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting artifact reaper");

    loop {
        sleep(interval).await;

        // File deletion is blocking I/O; keep it off the runtime workers.
        let store = artifacts.clone();
        let result = tokio::task::spawn_blocking(move || store.reap()).await;

        match result {
            Ok(count) if count > 0 => {
                tracing::info!(count, "deleted expired audio artifacts");
            }
            Ok(_) => {
                tracing::debug!("no expired artifacts to delete");
            }
            Err(e) => {
                tracing::error!(error = %e, "artifact reaper task panicked or was cancelled");
            }
        }
    }
}
