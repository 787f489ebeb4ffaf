//! Campaign CRUD, fixed attachments and run tallies.

use crate::error::DatabaseError;
use crate::types::{
    AttachmentDescriptor, Campaign, CampaignId, CampaignSettings, CampaignTally, RunStatus,
};
use crate::{Error, Result};
use sqlx::SqliteConnection;
use std::path::PathBuf;

use super::{CampaignRow, Database, from_unix};

impl Database {
    /// Insert a new campaign with its fixed attachments
    pub async fn insert_campaign(
        &self,
        name: &str,
        settings: &CampaignSettings,
    ) -> Result<CampaignId> {
        let now = chrono::Utc::now().timestamp();
        let settings_json = settings_to_json(settings)?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let result = sqlx::query(
            r#"
            INSERT INTO campaigns (name, settings, status, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(&settings_json)
        .bind(RunStatus::Pending.to_i32())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert campaign: {}",
                e
            )))
        })?;
        let id = CampaignId(result.last_insert_rowid());

        insert_attachments(&mut *tx, id, &settings.attachments).await?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit campaign insert: {}",
                e
            )))
        })?;

        Ok(id)
    }

    /// Get a campaign by ID, with fixed attachments folded into its settings
    pub async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>(
            r#"
            SELECT
                id, name, settings, status, total, sent_count, error_count,
                created_at, started_at, completed_at
            FROM campaigns
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get campaign: {}",
                e
            )))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut settings: CampaignSettings = serde_json::from_str(&row.settings)?;
        settings.attachments = self.list_attachments(id).await?;

        Ok(Some(Campaign {
            id,
            name: row.name,
            settings,
            tally: CampaignTally {
                status: RunStatus::from_i32(row.status),
                total: row.total.max(0) as u64,
                sent: row.sent_count.max(0) as u64,
                errors: row.error_count.max(0) as u64,
                started_at: row.started_at.and_then(from_unix),
                completed_at: row.completed_at.and_then(from_unix),
            },
        }))
    }

    /// Replace a campaign's settings and fixed attachments
    pub async fn update_campaign_settings(
        &self,
        id: CampaignId,
        settings: &CampaignSettings,
    ) -> Result<()> {
        let settings_json = settings_to_json(settings)?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let result = sqlx::query("UPDATE campaigns SET settings = ? WHERE id = ?")
            .bind(&settings_json)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update campaign settings: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::CampaignNotFound(id));
        }

        sqlx::query("DELETE FROM attachments WHERE campaign_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear attachments: {}",
                    e
                )))
            })?;
        insert_attachments(&mut *tx, id, &settings.attachments).await?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit settings update: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Delete a campaign with its attachments, recipients and events
    ///
    /// Returns false if the campaign did not exist.
    pub async fn delete_campaign(&self, id: CampaignId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete campaign: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Fixed attachments of a campaign, in insertion order
    pub async fn list_attachments(&self, id: CampaignId) -> Result<Vec<AttachmentDescriptor>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT path, filename FROM attachments WHERE campaign_id = ? ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list attachments: {}",
                e
            )))
        })?;

        Ok(rows
            .into_iter()
            .map(|(path, filename)| AttachmentDescriptor {
                path: PathBuf::from(path),
                filename,
            })
            .collect())
    }

    /// Record a run's status and counters
    pub async fn update_campaign_tally(&self, id: CampaignId, tally: &CampaignTally) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = ?, total = ?, sent_count = ?, error_count = ?,
                started_at = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(tally.status.to_i32())
        .bind(tally.total as i64)
        .bind(tally.sent as i64)
        .bind(tally.errors as i64)
        .bind(tally.started_at.map(|t| t.timestamp()))
        .bind(tally.completed_at.map(|t| t.timestamp()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update campaign tally: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::CampaignNotFound(id));
        }
        Ok(())
    }
}

/// Settings JSON without the fixed attachments, which have their own table
fn settings_to_json(settings: &CampaignSettings) -> Result<String> {
    let mut stored = settings.clone();
    stored.attachments.clear();
    Ok(serde_json::to_string(&stored)?)
}

async fn insert_attachments(
    conn: &mut SqliteConnection,
    id: CampaignId,
    attachments: &[AttachmentDescriptor],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    for attachment in attachments {
        sqlx::query(
            "INSERT INTO attachments (campaign_id, path, filename, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(attachment.path.to_string_lossy().into_owned())
        .bind(&attachment.filename)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert attachment: {}",
                e
            )))
        })?;
    }
    Ok(())
}
