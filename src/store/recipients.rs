//! Recipient import, listing and result persistence.

use crate::error::DatabaseError;
use crate::types::{CampaignId, DeliveryStatus, Recipient, RecipientId};
use crate::{Error, Result};

use super::{Database, NewRecipient, RecipientResult, RecipientRow};

impl Database {
    /// Insert recipients for a campaign, all pending
    ///
    /// Returns the number of rows inserted.
    pub async fn insert_recipients(
        &self,
        campaign_id: CampaignId,
        recipients: &[NewRecipient],
    ) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        for recipient in recipients {
            let data = serde_json::to_string(&recipient.data)?;
            sqlx::query(
                r#"
                INSERT INTO recipients (campaign_id, email, data, status, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(campaign_id)
            .bind(&recipient.email)
            .bind(&data)
            .bind(DeliveryStatus::Pending.to_i32())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert recipient: {}",
                    e
                )))
            })?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit recipients: {}",
                e
            )))
        })?;

        Ok(recipients.len() as u64)
    }

    /// All recipients of a campaign, in import order
    pub async fn list_recipients(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>> {
        let rows = sqlx::query_as::<_, RecipientRow>(
            r#"
            SELECT id, campaign_id, email, data, status, attempts, error_message, sent_at
            FROM recipients
            WHERE campaign_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list recipients: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Recipient::from).collect())
    }

    /// Recipients of a campaign with a given status, in import order
    pub async fn list_recipients_by_status(
        &self,
        campaign_id: CampaignId,
        status: DeliveryStatus,
    ) -> Result<Vec<Recipient>> {
        let rows = sqlx::query_as::<_, RecipientRow>(
            r#"
            SELECT id, campaign_id, email, data, status, attempts, error_message, sent_at
            FROM recipients
            WHERE campaign_id = ? AND status = ?
            ORDER BY id ASC
            "#,
        )
        .bind(campaign_id)
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list recipients by status: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Recipient::from).collect())
    }

    /// Record the outcome of one send
    pub async fn update_recipient_result(
        &self,
        id: RecipientId,
        result: &RecipientResult,
    ) -> Result<()> {
        let outcome = sqlx::query(
            r#"
            UPDATE recipients
            SET status = ?, error_message = ?, attempts = ?, sent_at = ?
            WHERE id = ?
            "#,
        )
        .bind(result.status.to_i32())
        .bind(&result.error_message)
        .bind(i64::from(result.attempts))
        .bind(result.sent_at.map(|t| t.timestamp()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update recipient: {}",
                e
            )))
        })?;

        if outcome.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "recipient {}",
                id
            ))));
        }
        Ok(())
    }

    /// Reset every recipient of a campaign to pending so it can be sent again
    ///
    /// Returns the number of recipients reset.
    pub async fn reset_recipients(&self, campaign_id: CampaignId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE recipients
            SET status = ?, attempts = 0, error_message = NULL, sent_at = NULL
            WHERE campaign_id = ?
            "#,
        )
        .bind(DeliveryStatus::Pending.to_i32())
        .bind(campaign_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset recipients: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}
