//! Run control (start/stop/pause/resume).

use crate::error::{DispatchError, Error, Result};
use crate::transport::DeliveryTransport;
use crate::types::{CampaignEvent, CampaignId, CampaignSettings, EventLevel};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::{Dispatcher, RunState};

impl Dispatcher {
    /// Start a run over the campaign's pending recipients
    ///
    /// Returns as soon as the run is registered; sending happens on a
    /// background task. Progress is observed through [`Dispatcher::get_status`],
    /// [`Dispatcher::get_events`] and [`Dispatcher::subscribe`].
    ///
    /// # Errors
    ///
    /// - [`DispatchError::AlreadyRunning`] if a run for this campaign is
    ///   pending, running or paused
    /// - [`DispatchError::MissingDemoAddresses`] if demo mode is on without
    ///   any demo address
    /// - [`Error::ShuttingDown`] once [`Dispatcher::shutdown`] was called
    pub async fn start(
        &self,
        id: CampaignId,
        settings: CampaignSettings,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Result<()> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        if settings.demo_mode && settings.demo_emails.iter().all(|e| e.trim().is_empty()) {
            return Err(DispatchError::MissingDemoAddresses { id }.into());
        }

        let run = {
            let mut runs = self.runs.lock().await;
            if let Some(existing) = runs.get(&id) {
                let state = existing.status().await;
                if !state.is_terminal() {
                    return Err(DispatchError::AlreadyRunning {
                        id,
                        state: state.to_string(),
                    }
                    .into());
                }
            }

            let run = Arc::new(RunState::new(id, self.config.dispatch.event_buffer));
            runs.insert(id, Arc::clone(&run));
            run
        };

        tracing::info!(
            campaign_id = id.0,
            transport = transport.name(),
            "Campaign run registered"
        );

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.execute_run(run, settings, transport).await;
        });

        Ok(())
    }

    /// Request a cooperative stop
    ///
    /// No new sends are submitted afterwards; sends already submitted run to
    /// completion and are recorded. The run ends as `cancelled`.
    pub async fn stop(&self, id: CampaignId) -> Result<()> {
        let run = self.active_run(id).await?;

        tracing::info!(campaign_id = id.0, "Stop requested");
        self.emit_event(&run, CampaignEvent::new(EventLevel::Warning, "Stopping run..."))
            .await;
        run.stop.cancel();

        Ok(())
    }

    /// Halt new submissions until [`Dispatcher::resume`]
    ///
    /// In-flight sends are not interrupted. Pausing a paused run is a no-op.
    pub async fn pause(&self, id: CampaignId) -> Result<()> {
        let run = self.active_run(id).await?;

        if !run.paused.swap(true, Ordering::SeqCst) {
            tracing::info!(campaign_id = id.0, "Run paused");
            self.emit_event(&run, CampaignEvent::new(EventLevel::Info, "Run paused"))
                .await;
        }

        Ok(())
    }

    /// Continue submitting from the first unsubmitted recipient
    ///
    /// Resuming a run that is not paused is a no-op.
    pub async fn resume(&self, id: CampaignId) -> Result<()> {
        let run = self.active_run(id).await?;

        if run.paused.swap(false, Ordering::SeqCst) {
            tracing::info!(campaign_id = id.0, "Run resumed");
            self.emit_event(&run, CampaignEvent::new(EventLevel::Info, "Run resumed"))
                .await;
        }

        Ok(())
    }

    /// The campaign's run, if it has not reached a terminal status
    async fn active_run(&self, id: CampaignId) -> Result<Arc<RunState>> {
        match self.run_state(id).await {
            Some(run) if !run.status().await.is_terminal() => Ok(run),
            _ => Err(DispatchError::NoActiveRun { id }.into()),
        }
    }
}
