//! Campaign persistence
//!
//! The dispatcher only sees the [`CampaignStore`] trait: load a campaign and
//! its pending recipients, persist per-recipient results and run tallies, and
//! append to the durable event log. [`Database`] implements it on SQLite.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`campaigns`] — Campaign and fixed-attachment CRUD, run tallies
//! - [`recipients`] — Recipient import, listing, result persistence, reset
//! - [`events`] — Durable event log

use crate::Result;
use crate::types::{
    Campaign, CampaignEvent, CampaignId, CampaignTally, DeliveryStatus, Recipient, RecipientId,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::collections::HashMap;

mod campaigns;
mod events;
mod migrations;
mod recipients;

/// Storage operations the dispatcher depends on
///
/// Every call is individually transactional and safe to repeat.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Campaign with its current settings, or `None` if it does not exist
    async fn load_campaign(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Recipients still pending, in import order
    async fn load_pending_recipients(&self, id: CampaignId) -> Result<Vec<Recipient>>;

    /// Record the outcome of one send
    async fn persist_recipient_result(&self, id: RecipientId, result: &RecipientResult)
    -> Result<()>;

    /// Record a run's counters and status
    ///
    /// Fails with [`crate::Error::CampaignNotFound`] if the campaign is gone.
    async fn persist_campaign_tally(&self, id: CampaignId, tally: &CampaignTally) -> Result<()>;

    /// Append to the durable event log
    async fn append_event(&self, id: CampaignId, event: &CampaignEvent) -> Result<()>;

    /// Most recent `limit` events, oldest first
    async fn recent_events(&self, id: CampaignId, limit: usize) -> Result<Vec<CampaignEvent>>;
}

/// Terminal state of one recipient after a send
#[derive(Debug, Clone, PartialEq)]
pub struct RecipientResult {
    /// Sent or error
    pub status: DeliveryStatus,
    /// Failure message (None on success)
    pub error_message: Option<String>,
    /// Attempts consumed
    pub attempts: u32,
    /// Delivery time (None on failure)
    pub sent_at: Option<DateTime<Utc>>,
}

/// New recipient to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewRecipient {
    /// Destination address
    pub email: String,
    /// Personalisation context (spreadsheet row)
    pub data: HashMap<String, String>,
}

impl NewRecipient {
    /// Recipient with a personalisation context
    pub fn new<K, V>(email: impl Into<String>, data: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            email: email.into(),
            data: data
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Campaign record from database
#[derive(Debug, Clone, FromRow)]
pub struct CampaignRow {
    /// Unique database ID
    pub id: i64,
    /// Display name
    pub name: String,
    /// Settings as JSON (fixed attachments live in their own table)
    pub settings: String,
    /// Run status code (see [`crate::types::RunStatus::from_i32`])
    pub status: i32,
    /// Recipients in the last run
    pub total: i64,
    /// Delivered in the last run
    pub sent_count: i64,
    /// Failed in the last run
    pub error_count: i64,
    /// Unix timestamp when the campaign was created
    pub created_at: i64,
    /// Unix timestamp when the last run started
    pub started_at: Option<i64>,
    /// Unix timestamp when the last run finished
    pub completed_at: Option<i64>,
}

/// Recipient record from database
#[derive(Debug, Clone, FromRow)]
pub struct RecipientRow {
    /// Unique database ID
    pub id: i64,
    /// Owning campaign
    pub campaign_id: i64,
    /// Destination address
    pub email: String,
    /// Personalisation context as JSON
    pub data: String,
    /// Delivery status code (see [`DeliveryStatus::from_i32`])
    pub status: i32,
    /// Attempts consumed by the last send
    pub attempts: i64,
    /// Last error message
    pub error_message: Option<String>,
    /// Unix timestamp of delivery
    pub sent_at: Option<i64>,
}

impl From<RecipientRow> for Recipient {
    fn from(row: RecipientRow) -> Self {
        let data = serde_json::from_str(&row.data).unwrap_or_else(|e| {
            tracing::warn!(recipient_id = row.id, error = %e, "unreadable recipient data");
            HashMap::new()
        });

        Recipient {
            id: RecipientId(row.id),
            campaign_id: CampaignId(row.campaign_id),
            email: row.email,
            data,
            status: DeliveryStatus::from_i32(row.status),
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            error_message: row.error_message,
            sent_at: row.sent_at.and_then(from_unix),
        }
    }
}

/// Event record from database
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    /// Unique database ID
    pub id: i64,
    /// Owning campaign
    pub campaign_id: i64,
    /// Level name
    pub level: String,
    /// Human-readable message
    pub message: String,
    /// Details as JSON
    pub details: Option<String>,
    /// Unix timestamp
    pub created_at: i64,
}

impl From<EventRow> for CampaignEvent {
    fn from(row: EventRow) -> Self {
        CampaignEvent {
            level: crate::types::EventLevel::parse(&row.level),
            message: row.message,
            details: row
                .details
                .and_then(|d| serde_json::from_str(&d).ok()),
            created_at: from_unix(row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

pub(crate) fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Database handle for campaign-dispatch
pub struct Database {
    pool: SqlitePool,
}

#[async_trait]
impl CampaignStore for Database {
    async fn load_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        self.get_campaign(id).await
    }

    async fn load_pending_recipients(&self, id: CampaignId) -> Result<Vec<Recipient>> {
        self.list_recipients_by_status(id, DeliveryStatus::Pending)
            .await
    }

    async fn persist_recipient_result(
        &self,
        id: RecipientId,
        result: &RecipientResult,
    ) -> Result<()> {
        self.update_recipient_result(id, result).await
    }

    async fn persist_campaign_tally(&self, id: CampaignId, tally: &CampaignTally) -> Result<()> {
        self.update_campaign_tally(id, tally).await
    }

    async fn append_event(&self, id: CampaignId, event: &CampaignEvent) -> Result<()> {
        self.insert_event(id, event).await
    }

    async fn recent_events(&self, id: CampaignId, limit: usize) -> Result<Vec<CampaignEvent>> {
        self.list_recent_events(id, limit).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
