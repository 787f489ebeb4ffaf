//! Campaign execution engine split into focused submodules.
//!
//! The `Dispatcher` struct and its methods are organized by domain:
//! - [`control`] - Run control (start/stop/pause/resume)
//! - [`run`] - Submission loop, bounded worker pool and completion drain
//! - [`resolve`] - Per-recipient attachment resolution
//! - [`delivery_log`] - Per-run CSV delivery log
//! - [`status`] - Progress reports, event queues and history
//! - [`lifecycle`] - Completion waiting and shutdown

mod control;
pub mod delivery_log;
mod lifecycle;
mod resolve;
mod run;
mod status;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use delivery_log::DeliveryLog;

use crate::config::Config;
use crate::store::CampaignStore;
use crate::types::{CampaignEvent, CampaignId, CampaignTally, RunStatus};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

/// Live event as broadcast to subscribers
pub type DispatchEvent = (CampaignId, CampaignEvent);

/// Counters and phase of one run
///
/// Counters are written only by the run's draining task; the phase is written
/// by the run loop when it starts and finishes.
#[derive(Clone, Debug, Default)]
pub(crate) struct RunProgress {
    /// Pending, running or a terminal status (pause is tracked separately)
    pub(crate) phase: RunStatus,
    pub(crate) total: u64,
    pub(crate) sent: u64,
    pub(crate) errors: u64,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
    /// Delivery log of this run, once opened
    pub(crate) log_path: Option<PathBuf>,
}

impl RunProgress {
    /// Snapshot in the shape the store persists
    pub(crate) fn tally(&self) -> CampaignTally {
        CampaignTally {
            status: self.phase,
            total: self.total,
            sent: self.sent,
            errors: self.errors,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// State of one run, shared by the control surface, the run loop and the drain
pub(crate) struct RunState {
    pub(crate) campaign_id: CampaignId,
    pub(crate) progress: Mutex<RunProgress>,
    /// Stop requested (no new submissions)
    pub(crate) stop: CancellationToken,
    /// Pause requested (no new submissions until resumed)
    pub(crate) paused: AtomicBool,
    /// Cancelled once the run reached a terminal status and flushed its tally
    pub(crate) done: CancellationToken,
    /// Events not yet drained by `get_events`
    pub(crate) queued_events: Mutex<VecDeque<CampaignEvent>>,
    /// Oldest queued events are dropped beyond this size
    pub(crate) queue_capacity: usize,
}

impl RunState {
    pub(crate) fn new(campaign_id: CampaignId, queue_capacity: usize) -> Self {
        Self {
            campaign_id,
            progress: Mutex::new(RunProgress::default()),
            stop: CancellationToken::new(),
            paused: AtomicBool::new(false),
            done: CancellationToken::new(),
            queued_events: Mutex::new(VecDeque::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Status as seen by callers: a live run that is paused reports `Paused`
    pub(crate) async fn status(&self) -> RunStatus {
        let phase = self.progress.lock().await.phase;
        if !phase.is_terminal() && self.is_paused() {
            RunStatus::Paused
        } else {
            phase
        }
    }
}

/// Campaign dispatcher (cloneable - all fields are Arc-wrapped)
///
/// Owns the state of every run started through it. Construct one per
/// hosting process and pass it by reference (or clone it) to whoever needs
/// to control runs.
#[derive(Clone)]
pub struct Dispatcher {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Collaborator store for campaigns, recipients, tallies and events
    pub(crate) store: Arc<dyn CampaignStore>,
    /// Runs by campaign; finished runs stay until the campaign is started again
    pub(crate) runs: Arc<Mutex<HashMap<CampaignId, Arc<RunState>>>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<DispatchEvent>,
    /// Cleared during shutdown so no new runs are started
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Create a dispatcher over a campaign store
    pub fn new(config: Config, store: Arc<dyn CampaignStore>) -> Self {
        let (event_tx, _rx) = broadcast::channel(config.dispatch.event_buffer.max(1));

        Self {
            config: Arc::new(config),
            store,
            runs: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Subscribe to live events of every campaign
    ///
    /// Each subscriber receives all events independently. A subscriber that
    /// falls more than `dispatch.event_buffer` events behind receives
    /// `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    pub(crate) async fn run_state(&self, id: CampaignId) -> Option<Arc<RunState>> {
        self.runs.lock().await.get(&id).cloned()
    }

    /// Record an event everywhere it is observed
    ///
    /// The event is queued for `get_events`, broadcast to subscribers and
    /// appended to the durable log. A failing append is logged and otherwise
    /// ignored; the live paths still see the event.
    pub(crate) async fn emit_event(&self, run: &RunState, event: CampaignEvent) {
        {
            let mut queue = run.queued_events.lock().await;
            if queue.len() >= run.queue_capacity {
                queue.pop_front();
            }
            queue.push_back(event.clone());
        }

        if let Err(e) = self.store.append_event(run.campaign_id, &event).await {
            tracing::warn!(
                campaign_id = run.campaign_id.0,
                error = %e,
                "Failed to append event to durable log"
            );
        }

        // No subscribers is fine
        self.event_tx.send((run.campaign_id, event)).ok();
    }
}
