//! Completion waiting and shutdown.

use crate::error::Result;
use crate::types::{CampaignId, RunStatus};
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::Dispatcher;

/// How long shutdown waits for in-flight sends
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl Dispatcher {
    /// Wait until the campaign's current run is finished
    ///
    /// Returns the terminal status, or `None` if the campaign never ran in
    /// this dispatcher.
    pub async fn wait_for_completion(&self, id: CampaignId) -> Option<RunStatus> {
        let run = self.run_state(id).await?;
        run.done.cancelled().await;
        Some(run.status().await)
    }

    /// Gracefully shut down the dispatcher
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new runs
    /// 2. Requests a stop of every active run
    /// 3. Waits (up to 30 seconds) for in-flight sends to be drained and recorded
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);

        let runs: Vec<_> = self.runs.lock().await.values().cloned().collect();
        for run in &runs {
            if !run.done.is_cancelled() {
                tracing::debug!(campaign_id = run.campaign_id.0, "Stopping run for shutdown");
                run.stop.cancel();
            }
        }

        let wait_all = async {
            for run in &runs {
                run.done.cancelled().await;
            }
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await {
            Ok(()) => tracing::info!("All runs finished"),
            Err(_) => {
                tracing::warn!("Timeout waiting for runs to finish, proceeding with shutdown")
            }
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
