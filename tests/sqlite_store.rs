//! SQLite store against a temporary database file.

use std::sync::Arc;

use chrono::Duration;
use tempfile::TempDir;

use finsight::config::Config;
use finsight::sqlite_store::SqliteStore;
use finsight::{db, migrate};
use finsight_core::error::StoreError;
use finsight_core::models::{
    utc_now, ExtractedFields, Item, Material, Schedule, SourceRef, StatusFields,
};
use finsight_core::status::MaterialStatus;
use finsight_core::store::{ItemStore, MaterialStore, ScheduleStore};

async fn open() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data").join("finsight.sqlite");
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, SqliteStore::new(pool))
}

fn material(title: &str, offset_ms: i64) -> Material {
    Material::new(
        title,
        SourceRef::Url(format!("https://research.example.com/{}", title)),
        utc_now() + Duration::milliseconds(offset_ms),
    )
}

#[tokio::test]
async fn insert_and_get_round_trip_all_sources() {
    let (_tmp, store) = open().await;
    let sources = [
        SourceRef::Url("https://a.example.com".into()),
        SourceRef::Pdf("/srv/reports/q3.pdf".into()),
        SourceRef::YouTube("https://youtu.be/dQw4w9WgXcQ".into()),
    ];
    for source in sources {
        let m = Material::new("", source, utc_now());
        store.insert(&m).await.unwrap();
        assert_eq!(store.get(m.id).await.unwrap(), m);
    }
}

#[tokio::test]
async fn get_unknown_is_not_found() {
    let (_tmp, store) = open().await;
    let err = store.get(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn recent_orders_newest_first() {
    let (_tmp, store) = open().await;
    for (title, offset) in [("a", 0), ("b", 10), ("c", 20)] {
        store.insert(&material(title, offset)).await.unwrap();
    }

    let recent = store.list_recent(2).await.unwrap();
    let titles: Vec<&str> = recent.iter().map(|m| m.title.as_str()).collect();
    assert_eq!(titles, vec!["c", "b"]);
}

#[tokio::test]
async fn status_updates_follow_the_state_machine() {
    let (_tmp, store) = open().await;
    let m = material("flow", 0);
    store.insert(&m).await.unwrap();

    let err = store
        .update_status(m.id, MaterialStatus::Completed, StatusFields::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            from: MaterialStatus::Pending,
            to: MaterialStatus::Completed,
            ..
        }
    ));

    let checked = utc_now();
    let fetching = store
        .update_status(
            m.id,
            MaterialStatus::Fetching,
            StatusFields {
                last_checked_at: Some(checked),
                attempts: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(fetching.attempts, 1);
    assert_eq!(fetching.last_checked_at, Some(checked));

    store
        .update_status(m.id, MaterialStatus::Extracting, StatusFields::default())
        .await
        .unwrap();
    let done = store
        .update_status(
            m.id,
            MaterialStatus::Completed,
            StatusFields {
                title: Some("Extracted".to_string()),
                last_error: Some(None),
                extracted: Some(ExtractedFields {
                    content: "body".to_string(),
                    fingerprint: "ab".repeat(32),
                    title: Some("Extracted".to_string()),
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(done.status, MaterialStatus::Completed);
    assert_eq!(done.title, "Extracted");
    assert_eq!(done.extracted_content.as_deref(), Some("body"));
    assert!(done.updated_at >= m.updated_at);
    assert_eq!(store.get(m.id).await.unwrap(), done);
}

#[tokio::test]
async fn failed_recheck_keeps_previous_content() {
    let (_tmp, store) = open().await;
    let m = material("keep", 0);
    store.insert(&m).await.unwrap();
    for status in [MaterialStatus::Fetching, MaterialStatus::Extracting] {
        store.update_status(m.id, status, StatusFields::default()).await.unwrap();
    }
    store
        .update_status(
            m.id,
            MaterialStatus::Completed,
            StatusFields {
                extracted: Some(ExtractedFields {
                    content: "v1".to_string(),
                    fingerprint: "f1".to_string(),
                    title: None,
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for status in [MaterialStatus::Pending, MaterialStatus::Fetching] {
        store.update_status(m.id, status, StatusFields::default()).await.unwrap();
    }
    let failed = store
        .update_status(
            m.id,
            MaterialStatus::Failed,
            StatusFields {
                last_error: Some(Some("NotFound: gone".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(failed.extracted_content.as_deref(), Some("v1"));
    assert_eq!(failed.content_fingerprint.as_deref(), Some("f1"));
    assert_eq!(failed.last_error.as_deref(), Some("NotFound: gone"));
}

#[tokio::test]
async fn unfinished_excludes_terminal_materials() {
    let (_tmp, store) = open().await;
    let pending = material("pending", 0);
    let failed = material("failed", 1);
    store.insert(&pending).await.unwrap();
    store.insert(&failed).await.unwrap();
    store
        .update_status(failed.id, MaterialStatus::Failed, StatusFields::default())
        .await
        .unwrap();

    let unfinished = store.list_unfinished().await.unwrap();
    assert_eq!(unfinished.len(), 1);
    assert_eq!(unfinished[0].id, pending.id);
}

#[tokio::test]
async fn schedule_requires_material() {
    let (_tmp, store) = open().await;
    let s = Schedule::new(uuid::Uuid::new_v4(), 60, None, utc_now()).unwrap();
    let err = store.insert_schedule(&s).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn claims_are_exclusive_until_completed() {
    let (_tmp, store) = open().await;
    let store = Arc::new(store);
    let m = material("watched", 0);
    store.insert(&m).await.unwrap();

    let now = utc_now();
    let s = Schedule::new(m.id, 120, Some(now - Duration::seconds(5)), now).unwrap();
    store.insert_schedule(&s).await.unwrap();

    let claim_until = now + Duration::seconds(60);
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.claim_due(now, claim_until, 10).await.unwrap().len()
        }));
    }
    let mut claimed = 0;
    for t in tasks {
        claimed += t.await.unwrap();
    }
    assert_eq!(claimed, 1);

    // A lapsed claim can be taken again.
    let later = claim_until + Duration::seconds(1);
    let reclaimed = store
        .claim_due(later, later + Duration::seconds(60), 10)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    let held = reclaimed[0].claimed_until.unwrap();

    // The first claim was taken over: it can neither renew nor record.
    assert!(!store
        .renew_claim(s.id, claim_until, later + Duration::seconds(120))
        .await
        .unwrap());
    assert!(store.complete_run(s.id, claim_until, now).await.unwrap().is_none());
    assert_eq!(store.get_schedule(s.id).await.unwrap().claimed_until, Some(held));

    let renewed = held + Duration::seconds(60);
    assert!(store.renew_claim(s.id, held, renewed).await.unwrap());
    assert!(store.claim_due(held, held, 10).await.unwrap().is_empty());

    let done = store.complete_run(s.id, renewed, now).await.unwrap().unwrap();
    assert_eq!(done.last_run_at, Some(now));
    assert_eq!(done.next_run_at, now + Duration::seconds(120));
    assert!(done.claimed_until.is_none());
    assert_eq!(store.get_schedule(s.id).await.unwrap(), done);
}

#[tokio::test]
async fn deactivated_schedules_are_hidden_and_unclaimable() {
    let (_tmp, store) = open().await;
    let m = material("m", 0);
    store.insert(&m).await.unwrap();
    let now = utc_now();
    let s = Schedule::new(m.id, 60, Some(now), now).unwrap();
    store.insert_schedule(&s).await.unwrap();

    let off = store.deactivate_schedule(s.id).await.unwrap();
    assert!(!off.active);
    assert!(store.list_schedules(false).await.unwrap().is_empty());
    assert_eq!(store.list_schedules(true).await.unwrap().len(), 1);
    assert!(store
        .claim_due(now + Duration::seconds(1), now + Duration::seconds(60), 10)
        .await
        .unwrap()
        .is_empty());

    assert!(store
        .deactivate_schedule(uuid::Uuid::new_v4())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn items_are_stored() {
    let (_tmp, store) = open().await;
    let item = Item {
        id: uuid::Uuid::new_v4(),
        name: "widget".to_string(),
        description: "demo".to_string(),
    };
    store.insert_item(&item).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (_tmp, store) = open().await;
    migrate::apply(store.pool()).await.unwrap();
    migrate::apply(store.pool()).await.unwrap();
}
