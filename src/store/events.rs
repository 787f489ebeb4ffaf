//! Durable event log.

use crate::error::DatabaseError;
use crate::types::{CampaignEvent, CampaignId};
use crate::{Error, Result};

use super::{Database, EventRow};

impl Database {
    /// Append an event to a campaign's log
    pub async fn insert_event(&self, campaign_id: CampaignId, event: &CampaignEvent) -> Result<()> {
        let details = event
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO events (campaign_id, level, message, details, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(campaign_id)
        .bind(event.level.as_str())
        .bind(&event.message)
        .bind(details)
        .bind(event.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert event: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Most recent `limit` events of a campaign, oldest first
    pub async fn list_recent_events(
        &self,
        campaign_id: CampaignId,
        limit: usize,
    ) -> Result<Vec<CampaignEvent>> {
        let mut rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, campaign_id, level, message, details, created_at
            FROM events
            WHERE campaign_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(campaign_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list events: {}",
                e
            )))
        })?;

        rows.reverse();
        Ok(rows.into_iter().map(CampaignEvent::from).collect())
    }
}
