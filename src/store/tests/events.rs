use crate::store::*;
use crate::types::{CampaignSettings, EventLevel};
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_recent_events_are_oldest_first_and_limited() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = db
        .insert_campaign("Gala", &CampaignSettings::new("Hi", "<p>Hi</p>"))
        .await
        .unwrap();

    for i in 0..5 {
        db.append_event(id, &CampaignEvent::new(EventLevel::Info, format!("event {i}")))
            .await
            .unwrap();
    }

    let events = db.recent_events(id, 3).await.unwrap();
    let messages: Vec<_> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["event 2", "event 3", "event 4"]);

    db.close().await;
}

#[tokio::test]
async fn test_event_level_and_details_round_trip() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let id = db
        .insert_campaign("Gala", &CampaignSettings::new("Hi", "<p>Hi</p>"))
        .await
        .unwrap();

    let event = CampaignEvent::new(EventLevel::Warning, "No attachment found")
        .with_detail("search_term", "ana lopez")
        .with_detail("email", "ana@example.com");
    db.insert_event(id, &event).await.unwrap();

    let stored = db.list_recent_events(id, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].level, EventLevel::Warning);
    assert_eq!(stored[0].message, "No attachment found");
    assert_eq!(stored[0].details, event.details);
    assert_eq!(stored[0].created_at.timestamp(), event.created_at.timestamp());

    db.close().await;
}

#[tokio::test]
async fn test_event_for_missing_campaign_is_rejected() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let result = db
        .insert_event(CampaignId(77), &CampaignEvent::new(EventLevel::Info, "orphan"))
        .await;
    assert!(result.is_err());

    db.close().await;
}
