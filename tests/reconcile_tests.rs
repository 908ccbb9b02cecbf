use chrono::{Duration, TimeZone, Utc};
use dashsync::{
    Dashboard, DashboardConfig, FetchOutcome, FetchStrategy, InMemoryRecordApi, NotificationAction,
    PartitionSide, PushNotification, Record, RecomputeOutcome, RecomputeTrigger,
    ReconcileOutcome, RemoteOperation, StatusBucket, SyncError, Timestamp,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;

fn now() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap()
}

fn active(id: &str) -> Record {
    Record::new(id, "Active", now() - Duration::days(4)).with_attribute("notes", "")
}

async fn loaded() -> (Arc<Dashboard<InMemoryRecordApi>>, Arc<InMemoryRecordApi>) {
    let records = ["3", "4", "7"].into_iter().map(active);
    let api = Arc::new(InMemoryRecordApi::with_records(records).await);
    let dashboard = Dashboard::new(DashboardConfig::new("escrow", "escrows"), api.clone())
        .unwrap()
        .with_clock(now);
    dashboard.refresh().await.unwrap();
    (Arc::new(dashboard), api)
}

fn updated(id: &str) -> PushNotification {
    PushNotification::new("escrow", id, NotificationAction::Updated)
}

#[tokio::test]
async fn test_irrelevant_change_defers_next_recompute() {
    let (dashboard, api) = loaded().await;
    api.upsert(active("7").with_attribute("notes", "keys handed over"))
        .await;
    let passes = dashboard.read(|s| s.recompute_passes()).await;

    let outcome = dashboard.reconcile(&updated("7")).await;

    assert_eq!(outcome, ReconcileOutcome::Deferred);
    assert_eq!(dashboard.skip_count().await, 1);
    let record = dashboard.record("7").await.unwrap();
    assert_eq!(record.attributes["notes"], json!("keys handed over"));

    assert_eq!(
        dashboard.recompute(RecomputeTrigger::DataChange).await,
        RecomputeOutcome::Skipped
    );
    assert_eq!(dashboard.skip_count().await, 0);
    assert_eq!(dashboard.read(|s| s.recompute_passes()).await, passes);
}

#[tokio::test]
async fn test_status_change_recomputes_immediately() {
    let (dashboard, api) = loaded().await;
    let mut cancelled = active("7");
    cancelled.status = "Cancelled".to_string();
    api.upsert(cancelled).await;
    let passes = dashboard.read(|s| s.recompute_passes()).await;

    let outcome = dashboard.reconcile(&updated("7")).await;

    assert_eq!(outcome, ReconcileOutcome::Recomputed);
    assert_eq!(dashboard.skip_count().await, 0);
    assert_eq!(dashboard.read(|s| s.recompute_passes()).await, passes + 1);
    assert_eq!(dashboard.record("7").await.unwrap().status, "Cancelled");
    assert_eq!(dashboard.stats().await.value("cancellation_rate"), 33.3);
}

#[tokio::test]
async fn test_skip_counter_is_conserved_across_refreshes() {
    let (dashboard, api) = loaded().await;
    for (round, id) in ["3", "4", "7"].into_iter().enumerate() {
        api.upsert(active(id).with_attribute("notes", format!("round {round}")))
            .await;
        assert_eq!(
            dashboard.reconcile(&updated(id)).await,
            ReconcileOutcome::Deferred
        );
    }
    assert_eq!(dashboard.skip_count().await, 3);

    for _ in 0..3 {
        let outcome = dashboard.refresh().await.unwrap();
        assert!(matches!(
            outcome,
            FetchOutcome::Applied {
                recompute: RecomputeOutcome::Skipped,
                ..
            }
        ));
    }
    let outcome = dashboard.refresh().await.unwrap();
    assert!(matches!(
        outcome,
        FetchOutcome::Applied {
            recompute: RecomputeOutcome::Recomputed,
            ..
        }
    ));
    assert_eq!(dashboard.skip_count().await, 0);
}

#[tokio::test]
async fn test_bucket_change_recomputes_regardless_of_counter() {
    let (dashboard, api) = loaded().await;
    for id in ["3", "4"] {
        api.upsert(active(id).with_attribute("notes", "changed")).await;
        dashboard.reconcile(&updated(id)).await;
    }
    let passes = dashboard.read(|s| s.recompute_passes()).await;

    dashboard.set_bucket(StatusBucket::Completed).await;

    assert_eq!(dashboard.read(|s| s.recompute_passes()).await, passes + 1);
    assert_eq!(dashboard.skip_count().await, 2);
    assert_eq!(dashboard.read(|s| s.stats().value("total")).await, 0.0);
}

#[tokio::test]
async fn test_per_partition_bucket_switch_keeps_skip_credits() {
    let records = vec![active("3"), active("4").archived(now())];
    let api = Arc::new(InMemoryRecordApi::with_records(records).await);
    let config = DashboardConfig::new("escrow", "escrows")
        .fetch_strategy(FetchStrategy::PerPartition);
    let dashboard = Dashboard::new(config, api.clone()).unwrap().with_clock(now);
    dashboard.refresh().await.unwrap();

    api.upsert(active("3").with_attribute("notes", "changed")).await;
    assert_eq!(
        dashboard.reconcile(&updated("3")).await,
        ReconcileOutcome::Deferred
    );
    let passes = dashboard.read(|s| s.recompute_passes()).await;
    let lists = api.calls(RemoteOperation::ListPage).await;

    dashboard.set_bucket(StatusBucket::Archived).await;

    assert_eq!(api.calls(RemoteOperation::ListPage).await, lists + 1);
    assert_eq!(dashboard.skip_count().await, 1);
    assert_eq!(dashboard.read(|s| s.recompute_passes()).await, passes + 1);
    dashboard
        .read(|s| {
            assert_eq!(s.collection().archived().len(), 1);
            assert_eq!(s.stats().value("total"), 1.0);
        })
        .await;

    dashboard.set_bucket(StatusBucket::All).await;
    assert_eq!(dashboard.skip_count().await, 1);
}

#[tokio::test]
async fn test_foreign_entity_type_is_ignored() {
    let (dashboard, api) = loaded().await;

    let outcome = dashboard
        .reconcile(&PushNotification::new("listing", "7", NotificationAction::Updated))
        .await;

    assert_eq!(outcome, ReconcileOutcome::Ignored);
    assert_eq!(api.calls(RemoteOperation::GetById).await, 0);

    let outcome = dashboard
        .reconcile(&PushNotification::new("ESCROW", "7", NotificationAction::Updated))
        .await;
    assert_ne!(outcome, ReconcileOutcome::Ignored);
}

#[tokio::test]
async fn test_failed_refetch_drops_notification() {
    let (dashboard, api) = loaded().await;
    let before = dashboard.record("7").await.unwrap();
    api.upsert(active("7").with_attribute("notes", "never seen")).await;
    api.fail_next(RemoteOperation::GetById).await;

    let outcome = dashboard.reconcile(&updated("7")).await;

    assert_eq!(outcome, ReconcileOutcome::Dropped);
    assert_eq!(dashboard.record("7").await.unwrap(), before);
    assert_eq!(dashboard.skip_count().await, 0);
}

#[tokio::test]
async fn test_created_deleted_and_moved_records() {
    let (dashboard, api) = loaded().await;

    api.upsert(active("200")).await;
    let outcome = dashboard
        .reconcile(&PushNotification::new("escrow", "200", NotificationAction::Created))
        .await;
    assert_eq!(outcome, ReconcileOutcome::Recomputed);
    assert!(dashboard.record("200").await.is_some());

    api.upsert(active("201")).await;
    let outcome = dashboard.reconcile(&updated("201")).await;
    assert_eq!(outcome, ReconcileOutcome::NotResident);

    let gets = api.calls(RemoteOperation::GetById).await;
    let stale = dashboard
        .reconcile(&PushNotification::new("escrow", "7", NotificationAction::Deleted))
        .await;
    assert_ne!(stale, ReconcileOutcome::Removed);
    assert!(dashboard.record("7").await.is_some());
    assert_eq!(api.calls(RemoteOperation::GetById).await, gets + 1);

    api.remove("3").await;
    let outcome = dashboard
        .reconcile(&PushNotification::new("escrow", "3", NotificationAction::Deleted))
        .await;
    assert_eq!(outcome, ReconcileOutcome::Removed);
    assert!(dashboard.record("3").await.is_none());
    assert_eq!(api.calls(RemoteOperation::GetById).await, gets + 2);

    api.upsert(active("4").archived(now())).await;
    let outcome = dashboard
        .reconcile(&PushNotification::new("escrow", "4", NotificationAction::Archived))
        .await;
    assert_eq!(outcome, ReconcileOutcome::Recomputed);
    dashboard
        .read(|s| {
            assert_eq!(s.collection().locate("4"), Some(PartitionSide::Archived));
            assert!(s.collection().is_exclusive());
            assert_eq!(s.archived_count(), 1);
        })
        .await;
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(StdDuration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}

#[tokio::test]
async fn test_listener_reconciles_broadcast_notifications() {
    let (dashboard, api) = loaded().await;
    let (tx, rx) = broadcast::channel(16);

    dashboard.subscribe(rx).await.unwrap();
    assert!(dashboard.is_subscribed().await);
    let err = dashboard.subscribe(tx.subscribe()).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadySubscribed(_)));

    api.upsert(active("7").with_attribute("notes", "from push")).await;
    tx.send(updated("7")).unwrap();

    eventually(|| {
        let dashboard = dashboard.clone();
        async move {
            dashboard
                .record("7")
                .await
                .is_some_and(|record| record.attributes["notes"] == json!("from push"))
        }
    })
    .await;
    assert_eq!(dashboard.skip_count().await, 1);

    assert!(dashboard.unsubscribe().await.unwrap());
    assert!(!dashboard.unsubscribe().await.unwrap());
    assert!(!dashboard.is_subscribed().await);
    assert!(dashboard.subscribe(tx.subscribe()).await.is_err());
}
