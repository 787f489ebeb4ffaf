//! Submission loop, bounded worker pool and completion drain.
//!
//! One task per run walks the pending recipients in order and submits each
//! send to a worker holding a semaphore permit. Workers report back over an
//! mpsc channel to a single draining task, the only writer of the run's
//! counters, the delivery log and recipient results. Stop and pause are
//! cooperative: they halt new submissions, never in-flight sends.

use crate::attachment_index::AttachmentIndex;
use crate::error::{Error, Result, TransportError};
use crate::store::RecipientResult;
use crate::transport::{DeliveryTransport, SendRequest};
use crate::types::{
    CampaignEvent, CampaignSettings, DeliveryStatus, EventLevel, Recipient, RunStatus,
    SendOutcome,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use super::delivery_log::DeliveryLog;
use super::{Dispatcher, RunState};

/// Shortest pause poll, so a zero interval cannot spin
const MIN_PAUSE_POLL: Duration = Duration::from_millis(1);

/// One finished send, reported by a worker
struct Completion {
    recipient: Recipient,
    outcome: SendOutcome,
}

/// Round-robin over demo addresses, owned by the submission loop
struct DemoRotation<'a> {
    addresses: Vec<&'a str>,
    next: usize,
}

impl<'a> DemoRotation<'a> {
    /// `None` unless demo mode is on with at least one usable address
    fn new(settings: &'a CampaignSettings) -> Option<Self> {
        if !settings.demo_mode {
            return None;
        }
        let addresses: Vec<&str> = settings
            .demo_emails
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .collect();
        if addresses.is_empty() {
            return None;
        }
        Some(Self { addresses, next: 0 })
    }

    fn next_address(&mut self) -> &'a str {
        let address = self.addresses[self.next % self.addresses.len()];
        self.next = self.next.wrapping_add(1);
        address
    }
}

/// Send on its own task so a panicking transport still yields an outcome
async fn send_isolated(transport: Arc<dyn DeliveryTransport>, request: SendRequest) -> SendOutcome {
    let address = request.original_address.clone();
    match tokio::spawn(async move { transport.send(request).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(recipient = %address, error = %e, "Delivery task failed");
            SendOutcome::failed(address, TransportError::Aborted(e.to_string()), 1)
        }
    }
}

impl Dispatcher {
    /// Drive one run to a terminal status and flush its final tally
    pub(crate) async fn execute_run(
        self,
        run: Arc<RunState>,
        settings: CampaignSettings,
        transport: Arc<dyn DeliveryTransport>,
    ) {
        let id = run.campaign_id;
        let fatal = self.run_campaign(&run, &settings, transport).await.err();

        // Persist first: once the live phase is terminal, get_status reads the store
        let tally = {
            let progress = run.progress.lock().await;
            let mut tally = progress.tally();
            tally.status = if fatal.is_some() {
                RunStatus::Error
            } else if run.stop.is_cancelled() {
                RunStatus::Cancelled
            } else if progress.errors > 0 && progress.sent == 0 {
                RunStatus::Error
            } else {
                RunStatus::Completed
            };
            tally.completed_at = Some(Utc::now());
            tally
        };

        if let Err(e) = self.store.persist_campaign_tally(id, &tally).await {
            tracing::warn!(campaign_id = id.0, error = %e, "Failed to persist final tally");
        }

        {
            let mut progress = run.progress.lock().await;
            progress.phase = tally.status;
            progress.completed_at = tally.completed_at;
        }

        if let Some(e) = &fatal {
            tracing::error!(campaign_id = id.0, error = %e, "Campaign run failed");
            self.emit_event(
                &run,
                CampaignEvent::new(EventLevel::Error, format!("Fatal error: {}", e)),
            )
            .await;
        }

        tracing::info!(
            campaign_id = id.0,
            status = %tally.status,
            total = tally.total,
            sent = tally.sent,
            errors = tally.errors,
            "Campaign run finished"
        );
        let level = if tally.status == RunStatus::Completed {
            EventLevel::Info
        } else {
            EventLevel::Warning
        };
        self.emit_event(
            &run,
            CampaignEvent::new(
                level,
                format!(
                    "Run {}: {} sent, {} failed of {}",
                    tally.status, tally.sent, tally.errors, tally.total
                ),
            )
            .with_detail("status", tally.status.as_str()),
        )
        .await;

        run.done.cancel();
    }

    /// Submit every pending recipient and drain their outcomes
    ///
    /// Returns a run-fatal error only after every submitted send was drained.
    async fn run_campaign(
        &self,
        run: &Arc<RunState>,
        settings: &CampaignSettings,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Result<()> {
        let id = run.campaign_id;

        if self.store.load_campaign(id).await?.is_none() {
            return Err(Error::CampaignNotFound(id));
        }
        let recipients = self.store.load_pending_recipients(id).await?;

        let started_at = Utc::now();
        let tally = {
            let mut progress = run.progress.lock().await;
            progress.phase = RunStatus::Running;
            progress.total = recipients.len() as u64;
            progress.started_at = Some(started_at);
            progress.tally()
        };
        self.store.persist_campaign_tally(id, &tally).await?;

        let log = DeliveryLog::create(&self.config.persistence.logs_dir, id, started_at).await?;
        run.progress.lock().await.log_path = Some(log.path().to_path_buf());

        let workers = settings
            .max_workers
            .unwrap_or(self.config.dispatch.max_workers)
            .max(1);
        let max_attempts = settings
            .max_retries
            .unwrap_or(self.config.retry.max_attempts)
            .max(1);
        let batch_pause = settings.batch_pause.max(self.config.dispatch.batch_pause);

        tracing::info!(
            campaign_id = id.0,
            recipients = recipients.len(),
            workers,
            max_attempts,
            demo_mode = settings.demo_mode,
            "Campaign run started"
        );
        self.emit_event(
            run,
            CampaignEvent::new(
                EventLevel::Info,
                format!("Run started: {} pending recipients", recipients.len()),
            )
            .with_detail("total", recipients.len().to_string())
            .with_detail("workers", workers.to_string()),
        )
        .await;

        let index = self.build_index(run, settings).await;

        // Set by the drain on a run-fatal failure
        let abort = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<Completion>(workers);
        let drain = tokio::spawn(self.clone().drain_completions(
            Arc::clone(run),
            log,
            rx,
            abort.clone(),
        ));

        let pool = Arc::new(Semaphore::new(workers));
        let mut demo = DemoRotation::new(settings);
        let mut submitted = 0usize;

        for recipient in recipients {
            let Some(permit) = self.next_permit(run, &pool, &abort).await else {
                break;
            };

            let attachments = self
                .resolve_attachments(run, settings, index.as_ref(), &recipient)
                .await;
            let destination = demo
                .as_mut()
                .map(|d| d.next_address().to_string())
                .unwrap_or_else(|| recipient.email.clone());

            let request = SendRequest {
                destination,
                original_address: recipient.email.clone(),
                subject: settings.subject.clone(),
                html: settings.html_body.clone(),
                text: settings.text_body.clone(),
                context: recipient.data.clone(),
                attachments,
                max_attempts,
            };

            let transport = Arc::clone(&transport);
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = send_isolated(transport, request).await;
                // The drain outlives every sender
                tx.send(Completion { recipient, outcome }).await.ok();
            });
            submitted += 1;

            if !batch_pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(batch_pause) => {}
                    _ = run.stop.cancelled() => {}
                    _ = abort.cancelled() => {}
                }
            }
        }
        drop(tx);

        tracing::debug!(campaign_id = id.0, submitted, "Submission finished, draining");

        match drain.await {
            Ok(result) => result,
            Err(e) => Err(Error::Other(format!("completion drain failed: {}", e))),
        }
    }

    /// Wait for a worker slot, honouring pause and stop
    ///
    /// Returns `None` once the run must stop submitting.
    async fn next_permit(
        &self,
        run: &RunState,
        pool: &Arc<Semaphore>,
        abort: &CancellationToken,
    ) -> Option<OwnedSemaphorePermit> {
        loop {
            if !self.wait_while_paused(run, abort).await {
                return None;
            }

            let permit = tokio::select! {
                _ = run.stop.cancelled() => return None,
                _ = abort.cancelled() => return None,
                permit = Arc::clone(pool).acquire_owned() => permit.ok()?,
            };

            if run.stop.is_cancelled() || abort.is_cancelled() {
                return None;
            }
            // Paused while waiting for the slot
            if run.is_paused() {
                drop(permit);
                continue;
            }
            return Some(permit);
        }
    }

    /// Idle while the run is paused
    ///
    /// Returns false if the run was stopped or aborted.
    async fn wait_while_paused(&self, run: &RunState, abort: &CancellationToken) -> bool {
        let poll = self.config.dispatch.pause_poll_interval.max(MIN_PAUSE_POLL);

        while run.is_paused() {
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = run.stop.cancelled() => return false,
                _ = abort.cancelled() => return false,
            }
        }

        !(run.stop.is_cancelled() || abort.is_cancelled())
    }

    /// Build the run's attachment index when dynamic attachments are enabled
    async fn build_index(
        &self,
        run: &RunState,
        settings: &CampaignSettings,
    ) -> Option<AttachmentIndex> {
        let dynamic = &settings.dynamic_attachment;
        if !dynamic.enabled {
            return None;
        }
        let folder = dynamic.folder.as_deref()?;

        match AttachmentIndex::build(folder).await {
            Ok(index) => {
                for collision in index.collisions() {
                    self.emit_event(
                        run,
                        CampaignEvent::new(
                            EventLevel::Warning,
                            format!(
                                "Attachment names collide: using {}, ignoring {}",
                                collision.kept.display(),
                                collision.replaced.display()
                            ),
                        ),
                    )
                    .await;
                }
                self.emit_event(
                    run,
                    CampaignEvent::new(
                        EventLevel::Debug,
                        format!("Indexed {} attachment files", index.len()),
                    )
                    .with_detail("folder", folder.display().to_string()),
                )
                .await;
                Some(index)
            }
            Err(e) => {
                tracing::warn!(
                    campaign_id = run.campaign_id.0,
                    folder = %folder.display(),
                    error = %e,
                    "Failed to index attachment folder"
                );
                self.emit_event(
                    run,
                    CampaignEvent::new(
                        EventLevel::Warning,
                        format!("Could not index {}: {}", folder.display(), e),
                    ),
                )
                .await;
                None
            }
        }
    }

    /// Apply outcomes as workers report them
    ///
    /// Ends when every worker has reported. A run-fatal failure (delivery log
    /// I/O, campaign deleted) cancels `abort` so no new sends are submitted,
    /// but outcomes of sends already in flight are still applied.
    async fn drain_completions(
        self,
        run: Arc<RunState>,
        mut log: DeliveryLog,
        mut rx: mpsc::Receiver<Completion>,
        abort: CancellationToken,
    ) -> Result<()> {
        let id = run.campaign_id;
        let mut fatal: Option<Error> = None;

        while let Some(Completion { recipient, outcome }) = rx.recv().await {
            let status = if outcome.success {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Error
            };

            let tally = {
                let mut progress = run.progress.lock().await;
                if outcome.success {
                    progress.sent += 1;
                } else {
                    progress.errors += 1;
                }
                progress.tally()
            };

            // Once the log failed it stays closed for this run
            if fatal.is_none()
                && let Err(e) = log
                    .append(&recipient.email, status, outcome.attempts, &outcome.message)
                    .await
            {
                tracing::error!(
                    campaign_id = id.0,
                    path = %log.path().display(),
                    error = %e,
                    "Delivery log write failed"
                );
                abort.cancel();
                fatal = Some(e);
            }

            let result = RecipientResult {
                status,
                error_message: (!outcome.success).then(|| outcome.message.clone()),
                attempts: outcome.attempts,
                sent_at: outcome.success.then(Utc::now),
            };
            if let Err(e) = self
                .store
                .persist_recipient_result(recipient.id, &result)
                .await
            {
                tracing::warn!(
                    campaign_id = id.0,
                    recipient = %recipient.email,
                    error = %e,
                    "Failed to persist recipient result"
                );
            }

            match self.store.persist_campaign_tally(id, &tally).await {
                Ok(()) => {}
                Err(e @ Error::CampaignNotFound(_)) => {
                    if fatal.is_none() {
                        tracing::error!(campaign_id = id.0, "Campaign disappeared mid-run");
                        abort.cancel();
                        fatal = Some(e);
                    }
                }
                Err(e) => {
                    tracing::warn!(campaign_id = id.0, error = %e, "Failed to persist tally");
                }
            }

            let event = if outcome.success {
                tracing::debug!(
                    campaign_id = id.0,
                    recipient = %recipient.email,
                    attempts = outcome.attempts,
                    "Message delivered"
                );
                CampaignEvent::new(EventLevel::Success, format!("Sent to {}", recipient.email))
            } else {
                tracing::warn!(
                    campaign_id = id.0,
                    recipient = %recipient.email,
                    attempts = outcome.attempts,
                    error = %outcome.message,
                    "Message failed"
                );
                CampaignEvent::new(
                    EventLevel::Error,
                    format!("Failed to send to {}: {}", recipient.email, outcome.message),
                )
            };
            self.emit_event(
                &run,
                event
                    .with_detail("email", recipient.email.clone())
                    .with_detail("attempts", outcome.attempts.to_string()),
            )
            .await;
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
