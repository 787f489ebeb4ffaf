//! Shared test helpers for creating Dispatcher instances in tests.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, TransportError};
use crate::store::{CampaignStore, Database, NewRecipient, RecipientResult};
use crate::transport::{DeliveryTransport, SendRequest};
use crate::types::{
    Campaign, CampaignEvent, CampaignId, CampaignSettings, CampaignTally, Recipient, RecipientId,
    SendOutcome,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Semaphore;

/// Helper to create a test Dispatcher over a fresh database.
/// Returns the dispatcher, the database and the tempdir (which must be kept alive).
pub(crate) async fn create_test_dispatcher() -> (Dispatcher, Arc<Database>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("test.db");
    config.persistence.logs_dir = temp_dir.path().join("logs");
    config.dispatch.pause_poll_interval = Duration::from_millis(10);
    config.dispatch.max_workers = 3;

    let db = Arc::new(
        Database::new(&config.persistence.database_path)
            .await
            .unwrap(),
    );
    let dispatcher = Dispatcher::new(config, db.clone());

    (dispatcher, db, temp_dir)
}

/// Insert a campaign with `count` recipients named r0..rN
pub(crate) async fn seed_campaign(
    db: &Database,
    settings: &CampaignSettings,
    count: usize,
) -> CampaignId {
    let id = db.insert_campaign("Test campaign", settings).await.unwrap();
    let recipients: Vec<_> = (0..count)
        .map(|i| {
            NewRecipient::new(
                format!("r{}@example.com", i),
                [("name", format!("Recipient {}", i))],
            )
        })
        .collect();
    db.insert_recipients(id, &recipients).await.unwrap();
    id
}

pub(crate) fn settings() -> CampaignSettings {
    CampaignSettings::new("Hello {{name}}", "<p>Hi {{name}}</p>")
}

/// Poll `condition` until it holds, failing the test after 5 seconds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// In-memory transport recording every request
///
/// A gated transport holds each send until a permit is added to its gate.
#[derive(Default)]
pub(crate) struct MockTransport {
    /// Requests in the order sends started
    pub(crate) requests: Mutex<Vec<SendRequest>>,
    /// Sends started (counted before waiting on the gate)
    pub(crate) started: AtomicUsize,
    /// Original addresses whose sends fail
    pub(crate) failing: HashSet<String>,
    /// Original addresses whose sends panic
    pub(crate) panicking: HashSet<String>,
    gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Transport whose sends block until the returned gate gets permits
    pub(crate) fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (transport, gate)
    }

    pub(crate) fn failing_for(mut self, addresses: &[&str]) -> Self {
        self.failing = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    pub(crate) fn panicking_for(mut self, addresses: &[&str]) -> Self {
        self.panicking = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<SendRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryTransport for MockTransport {
    async fn send(&self, request: SendRequest) -> SendOutcome {
        self.requests.lock().unwrap().push(request.clone());
        self.started.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        if self.panicking.contains(&request.original_address) {
            panic!("mock transport panicked for {}", request.original_address);
        }

        if self.failing.contains(&request.original_address) {
            SendOutcome::failed(
                request.original_address,
                TransportError::Http {
                    status: 500,
                    body: "boom".to_string(),
                },
                request.max_attempts,
            )
        } else {
            SendOutcome::delivered(request.original_address, 202, 1)
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Store that holds the final tally write until its gate gets a permit
///
/// Everything else goes straight to the wrapped database.
pub(crate) struct GatedTallyStore {
    pub(crate) inner: Arc<Database>,
    /// Set once a terminal tally write is waiting on the gate
    pub(crate) holding: AtomicBool,
    pub(crate) gate: Arc<Semaphore>,
}

impl GatedTallyStore {
    pub(crate) fn new(inner: Arc<Database>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let store = Self {
            inner,
            holding: AtomicBool::new(false),
            gate: gate.clone(),
        };
        (store, gate)
    }

    pub(crate) fn holding(&self) -> bool {
        self.holding.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CampaignStore for GatedTallyStore {
    async fn load_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        self.inner.load_campaign(id).await
    }

    async fn load_pending_recipients(&self, id: CampaignId) -> Result<Vec<Recipient>> {
        self.inner.load_pending_recipients(id).await
    }

    async fn persist_recipient_result(
        &self,
        id: RecipientId,
        result: &RecipientResult,
    ) -> Result<()> {
        self.inner.persist_recipient_result(id, result).await
    }

    async fn persist_campaign_tally(&self, id: CampaignId, tally: &CampaignTally) -> Result<()> {
        if tally.status.is_terminal() {
            self.holding.store(true, Ordering::SeqCst);
            self.gate.acquire().await.unwrap().forget();
        }
        self.inner.persist_campaign_tally(id, tally).await
    }

    async fn append_event(&self, id: CampaignId, event: &CampaignEvent) -> Result<()> {
        self.inner.append_event(id, event).await
    }

    async fn recent_events(&self, id: CampaignId, limit: usize) -> Result<Vec<CampaignEvent>> {
        self.inner.recent_events(id, limit).await
    }
}
