//! Progress reports, event queues and history.

use crate::error::Result;
use crate::types::{CampaignEvent, CampaignId, RunStatusReport};
use chrono::Utc;
use std::path::PathBuf;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use super::{Dispatcher, delivery_log};

impl Dispatcher {
    /// Progress of a campaign
    ///
    /// A live run reports its current counters with elapsed time and a
    /// linear-rate estimate of the remaining time. Otherwise the last tally
    /// persisted in the store is reported. `None` if the campaign does not
    /// exist.
    pub async fn get_status(&self, id: CampaignId) -> Result<Option<RunStatusReport>> {
        if let Some(run) = self.run_state(id).await {
            let status = run.status().await;
            if !status.is_terminal() {
                let progress = run.progress.lock().await.clone();
                let elapsed = progress
                    .started_at
                    .and_then(|started| (Utc::now() - started).to_std().ok());
                return Ok(Some(RunStatusReport::from_counts(
                    status,
                    progress.total,
                    progress.sent,
                    progress.errors,
                    progress.started_at,
                    elapsed,
                )));
            }
        }

        let Some(campaign) = self.store.load_campaign(id).await? else {
            return Ok(None);
        };
        let tally = campaign.tally;
        Ok(Some(RunStatusReport::from_counts(
            tally.status,
            tally.total,
            tally.sent,
            tally.errors,
            tally.started_at,
            None,
        )))
    }

    /// Take up to `limit` queued events of the campaign's latest run, oldest first
    ///
    /// Never waits: returns an empty list when nothing is queued or the
    /// campaign has not run in this process.
    pub async fn get_events(&self, id: CampaignId, limit: usize) -> Vec<CampaignEvent> {
        let Some(run) = self.run_state(id).await else {
            return Vec::new();
        };
        let mut queue = run.queued_events.lock().await;
        let take = limit.min(queue.len());
        queue.drain(..take).collect()
    }

    /// Most recent `limit` events from the durable log, oldest first
    pub async fn event_history(&self, id: CampaignId, limit: usize) -> Result<Vec<CampaignEvent>> {
        self.store.recent_events(id, limit).await
    }

    /// Live events of one campaign as a stream
    ///
    /// Events missed because the subscriber lagged are skipped with a warning.
    pub fn event_stream(&self, id: CampaignId) -> impl Stream<Item = CampaignEvent> + Send + 'static {
        BroadcastStream::new(self.subscribe()).filter_map(move |item| match item {
            Ok((campaign_id, event)) if campaign_id == id => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(campaign_id = id.0, skipped, "Event stream lagged");
                None
            }
        })
    }

    /// Delivery log of the campaign's latest run
    ///
    /// Prefers the log of a run started by this dispatcher, then the newest
    /// matching file in the logs directory.
    pub async fn latest_delivery_log(&self, id: CampaignId) -> Result<Option<PathBuf>> {
        if let Some(run) = self.run_state(id).await
            && let Some(path) = run.progress.lock().await.log_path.clone()
        {
            return Ok(Some(path));
        }

        delivery_log::latest_for(&self.config.persistence.logs_dir, id).await
    }
}
