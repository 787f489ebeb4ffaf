use crate::store::*;
use crate::types::{AttachmentDescriptor, CampaignSettings, CampaignTally, RunStatus};
use crate::Error;
use std::time::Duration;
use tempfile::NamedTempFile;

fn settings() -> CampaignSettings {
    let mut settings = CampaignSettings::new("Hello {{name}}", "<p>Hi {{name}}</p>");
    settings.max_workers = Some(3);
    settings.batch_pause = Duration::from_secs(2);
    settings.attachments = vec![
        AttachmentDescriptor::from_path("/srv/files/terms.pdf"),
        AttachmentDescriptor::from_path("/srv/files/map.pdf"),
    ];
    settings
}

#[tokio::test]
async fn test_insert_and_get_campaign() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_campaign("Spring gala", &settings()).await.unwrap();
    let campaign = db.get_campaign(id).await.unwrap().unwrap();

    assert_eq!(campaign.id, id);
    assert_eq!(campaign.name, "Spring gala");
    assert_eq!(campaign.settings, settings());
    assert_eq!(campaign.tally.status, RunStatus::Pending);
    assert_eq!(campaign.tally.total, 0);
    assert!(campaign.tally.started_at.is_none());

    db.close().await;
}

#[tokio::test]
async fn test_attachments_are_stored_outside_settings_json() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_campaign("Gala", &settings()).await.unwrap();

    let raw: String = sqlx::query_scalar("SELECT settings FROM campaigns WHERE id = ?")
        .bind(id)
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert!(!raw.contains("terms.pdf"));

    let attachments = db.list_attachments(id).await.unwrap();
    assert_eq!(attachments.len(), 2);
    assert_eq!(attachments[0].filename, "terms.pdf");
    assert_eq!(attachments[1].filename, "map.pdf");

    db.close().await;
}

#[tokio::test]
async fn test_get_missing_campaign_returns_none() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(db.get_campaign(CampaignId(99)).await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_update_settings_replaces_attachments() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_campaign("Gala", &settings()).await.unwrap();

    let mut updated = settings();
    updated.subject = "Reminder".to_string();
    updated.attachments = vec![AttachmentDescriptor::from_path("/srv/files/agenda.pdf")];
    db.update_campaign_settings(id, &updated).await.unwrap();

    let campaign = db.get_campaign(id).await.unwrap().unwrap();
    assert_eq!(campaign.settings.subject, "Reminder");
    assert_eq!(campaign.settings.attachments.len(), 1);
    assert_eq!(campaign.settings.attachments[0].filename, "agenda.pdf");

    db.close().await;
}

#[tokio::test]
async fn test_update_settings_of_missing_campaign_fails() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let result = db.update_campaign_settings(CampaignId(5), &settings()).await;
    assert!(matches!(result, Err(Error::CampaignNotFound(CampaignId(5)))));

    db.close().await;
}

#[tokio::test]
async fn test_update_tally_round_trips() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_campaign("Gala", &settings()).await.unwrap();
    let started = from_unix(1_700_000_000).unwrap();
    let tally = CampaignTally {
        status: RunStatus::Completed,
        total: 10,
        sent: 8,
        errors: 2,
        started_at: Some(started),
        completed_at: Some(started + chrono::Duration::seconds(30)),
    };
    db.update_campaign_tally(id, &tally).await.unwrap();

    let campaign = db.get_campaign(id).await.unwrap().unwrap();
    assert_eq!(campaign.tally, tally);

    db.close().await;
}

#[tokio::test]
async fn test_update_tally_of_deleted_campaign_is_not_found() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_campaign("Gala", &settings()).await.unwrap();
    assert!(db.delete_campaign(id).await.unwrap());
    assert!(!db.delete_campaign(id).await.unwrap());

    let result = db.update_campaign_tally(id, &CampaignTally::default()).await;
    assert!(matches!(result, Err(Error::CampaignNotFound(_))));

    db.close().await;
}

#[tokio::test]
async fn test_delete_cascades_to_children() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let id = db.insert_campaign("Gala", &settings()).await.unwrap();
    db.insert_recipients(id, &[NewRecipient::new("ana@example.com", [("name", "Ana")])])
        .await
        .unwrap();
    db.insert_event(
        id,
        &crate::types::CampaignEvent::new(crate::types::EventLevel::Info, "created"),
    )
    .await
    .unwrap();

    db.delete_campaign(id).await.unwrap();

    for table in ["attachments", "recipients", "events"] {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE campaign_id = ?"
        ))
        .bind(id)
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(count, 0, "{table} rows survived delete");
    }

    db.close().await;
}
