mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use serde_json::json;
use tokio::sync::Barrier;
use uuid::Uuid;

use content_queue::db::{ExecutionLogStore, ManualOutcome, QueueStore};
use content_queue::models::{
    EventStatus, NewLogEntry, NewQueueEntry, Pagination, Phase, QueueFilter, QueueStatus,
    Transition,
};

fn new_entry(priority: i32, max_attempts: i32) -> NewQueueEntry {
    NewQueueEntry {
        configuration_id: Uuid::now_v7(),
        payload: json!({ "topic": "postgres" }),
        priority,
        max_attempts,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_claims_are_exclusive() {
    let db = common::spawn_db().await;
    let store = Arc::new(db.store.clone());

    let mut ids = HashSet::new();
    for _ in 0..30 {
        ids.insert(store.enqueue(new_entry(0, 3)).await.unwrap().id);
    }

    let mut handles = Vec::new();
    for n in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut won = Vec::new();
            while let Some(entry) = store.claim_next(&format!("w{n}")).await.unwrap() {
                won.push(entry.id);
            }
            won
        }));
    }

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), 30);
    assert_eq!(unique, ids);

    common::cleanup_db(db).await;
}

async fn race_for_entries(workers: usize, entries: usize) {
    let db = common::spawn_db().await;
    let store = Arc::new(db.store.clone());

    let mut ids = HashSet::new();
    for _ in 0..entries {
        ids.insert(store.enqueue(new_entry(0, 3)).await.unwrap().id);
    }

    let start = Arc::new(Barrier::new(workers));
    let mut handles = Vec::new();
    for n in 0..workers {
        let store = store.clone();
        let start = start.clone();
        handles.push(tokio::spawn(async move {
            start.wait().await;
            store.claim_next(&format!("w{n}")).await.unwrap()
        }));
    }

    let mut won = HashSet::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Some(entry) => assert!(won.insert(entry.id), "entry claimed twice"),
            None => empty += 1,
        }
    }
    assert_eq!(won, ids);
    assert_eq!(empty, workers - entries);

    common::cleanup_db(db).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn more_workers_than_entries_leaves_extras_empty_handed() {
    race_for_entries(8, 3).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires DATABASE_URL"]
async fn two_workers_one_entry() {
    race_for_entries(2, 1).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn claim_orders_by_priority_and_skips_future_retries() {
    let db = common::spawn_db().await;
    let store = &db.store;

    let low = store.enqueue(new_entry(0, 3)).await.unwrap();
    let high = store.enqueue(new_entry(5, 3)).await.unwrap();
    let later = store.enqueue(new_entry(9, 3)).await.unwrap();

    let claimed = store.claim_next("w").await.unwrap().unwrap();
    assert_eq!(claimed.id, later.id);
    assert_eq!(claimed.attempt_count, 1);
    assert_eq!(claimed.claimed_by.as_deref(), Some("w"));

    // Push it into the future
    let updated = store
        .update_status(
            &claimed,
            &Transition::retry_at(Utc::now() + TimeDelta::hours(1), "busy".into()),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, QueueStatus::RetryScheduled);

    assert_eq!(store.claim_next("w").await.unwrap().unwrap().id, high.id);
    assert_eq!(store.claim_next("w").await.unwrap().unwrap().id, low.id);
    assert!(store.claim_next("w").await.unwrap().is_none());

    common::cleanup_db(db).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn update_status_requires_processing() {
    let db = common::spawn_db().await;
    let store = &db.store;

    let entry = store.enqueue(new_entry(0, 3)).await.unwrap();
    let missed = store
        .update_status(&entry, &Transition::published(json!({ "url": "x" })))
        .await
        .unwrap();
    assert!(missed.is_none());

    let claimed = store.claim_next("w").await.unwrap().unwrap();
    let published = store
        .update_status(&claimed, &Transition::published(json!({ "url": "x" })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(published.status, QueueStatus::Published);
    assert!(published.processing_completed_at.is_some());
    assert!(published.claimed_by.is_none());

    let stats = store.get_statistics().await.unwrap();
    assert_eq!(stats.published, 1);
    assert_eq!(stats.total(), 1);

    common::cleanup_db(db).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn update_status_rejects_superseded_claim() {
    let db = common::spawn_db().await;
    let store = &db.store;

    store.enqueue(new_entry(0, 3)).await.unwrap();
    let first = store.claim_next("slow").await.unwrap().unwrap();
    let due = Utc::now() - TimeDelta::seconds(1);
    store
        .update_status(&first, &Transition::retry_at(due, "stuck".into()))
        .await
        .unwrap()
        .unwrap();
    let second = store.claim_next("fresh").await.unwrap().unwrap();
    assert_eq!(second.attempt_count, 2);

    let stale = store
        .update_status(&first, &Transition::published(json!({ "url": "old" })))
        .await
        .unwrap();
    assert!(stale.is_none());

    // Same worker name, earlier attempt
    let mut same_worker = second.clone();
    same_worker.attempt_count = 1;
    let stale = store
        .update_status(&same_worker, &Transition::published(json!({ "url": "old" })))
        .await
        .unwrap();
    assert!(stale.is_none());

    let published = store
        .update_status(&second, &Transition::published(json!({ "url": "new" })))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(published.status, QueueStatus::Published);
    assert_eq!(published.result_ref, Some(json!({ "url": "new" })));

    common::cleanup_db(db).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn operator_actions_check_status() {
    let db = common::spawn_db().await;
    let store = &db.store;

    let entry = store.enqueue(new_entry(0, 1)).await.unwrap();
    let claimed = store.claim_next("w").await.unwrap().unwrap();

    assert!(matches!(
        store.delete_queued(entry.id).await.unwrap(),
        ManualOutcome::Rejected(QueueStatus::Processing)
    ));
    assert!(matches!(
        store.requeue_failed(entry.id).await.unwrap(),
        ManualOutcome::Rejected(QueueStatus::Processing)
    ));
    assert!(matches!(
        store.delete_queued(Uuid::now_v7()).await.unwrap(),
        ManualOutcome::NotFound
    ));

    store
        .update_status(&claimed, &Transition::failed("boom".into()))
        .await
        .unwrap();
    let ManualOutcome::Applied(requeued) = store.requeue_failed(entry.id).await.unwrap() else {
        panic!("requeue rejected");
    };
    assert_eq!(requeued.status, QueueStatus::Queued);
    assert_eq!(requeued.attempt_count, 0);
    assert!(requeued.last_error.is_none());

    assert!(matches!(
        store.request_cancel(entry.id).await.unwrap(),
        ManualOutcome::Applied(_)
    ));
    assert!(store.is_cancel_requested(entry.id).await.unwrap());

    assert!(matches!(
        store.delete_queued(entry.id).await.unwrap(),
        ManualOutcome::Applied(_)
    ));
    assert!(store.get_by_id(entry.id).await.unwrap().is_none());

    common::cleanup_db(db).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn list_filters_and_counts() {
    let db = common::spawn_db().await;
    let store = &db.store;

    for _ in 0..3 {
        store.enqueue(new_entry(0, 3)).await.unwrap();
    }
    store.claim_next("w").await.unwrap();

    let filter = QueueFilter {
        status: Some(QueueStatus::Queued),
        configuration_id: None,
    };
    let page = store
        .list_by_status(&filter, Pagination::page(1, 1))
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.entries.len(), 1);

    let all = store
        .list_by_status(&QueueFilter::default(), Pagination::default())
        .await
        .unwrap();
    assert_eq!(all.total, 3);

    let oldest = store.oldest_processing().await.unwrap().unwrap();
    assert_eq!(oldest.status, QueueStatus::Processing);
    let stale = store
        .list_stale_processing(Utc::now() + TimeDelta::seconds(5))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);

    common::cleanup_db(db).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn log_is_ordered_and_append_only() {
    let db = common::spawn_db().await;
    let store = &db.store;
    let id = Uuid::now_v7();

    for phase in Phase::ORDER {
        store
            .append(NewLogEntry {
                queue_entry_id: id,
                phase: Some(phase),
                event_status: EventStatus::Started,
                message: format!("{phase} started"),
                metadata: Some(json!({ "attempt": 1 })),
                duration_ms: None,
                error_detail: None,
            })
            .await
            .unwrap();
    }

    let log = store.list_for_entry(id).await.unwrap();
    let phases: Vec<_> = log.iter().map(|l| l.phase).collect();
    let expected: Vec<_> = Phase::ORDER.iter().map(|p| Some(*p)).collect();
    assert_eq!(phases, expected);

    let rejected = sqlx::query("UPDATE execution_log SET message = 'rewritten'")
        .execute(store.pool())
        .await;
    assert!(rejected.is_err());

    common::cleanup_db(db).await;
}
