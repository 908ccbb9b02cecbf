use chrono::{Duration, TimeZone, Utc};
use dashsync::{
    BatchDeleteOutcome, Dashboard, DashboardConfig, InMemoryRecordApi, MutationOutcome,
    PartitionSide, Record, RecordPatch, RecomputeOutcome, RemoteOperation, SyncError, Timestamp,
};
use serde_json::json;
use std::sync::Arc;

fn now() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap()
}

fn active(id: &str) -> Record {
    Record::new(id, "Active", now() - Duration::days(3)).with_attribute("purchasePrice", 500_000)
}

fn archived(id: &str) -> Record {
    Record::new(id, "Closed", now() - Duration::days(3)).archived(now() - Duration::days(1))
}

async fn loaded(records: Vec<Record>) -> (Dashboard<InMemoryRecordApi>, Arc<InMemoryRecordApi>) {
    let api = Arc::new(InMemoryRecordApi::with_records(records).await);
    let config = DashboardConfig::new("escrow", "escrows").amount_field("purchasePrice");
    let dashboard = Dashboard::new(config, api.clone()).unwrap().with_clock(now);
    dashboard.refresh().await.unwrap();
    (dashboard, api)
}

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|id| id.to_string()).collect()
}

#[tokio::test]
async fn test_archive_moves_record_and_recomputes() {
    let records = (1..=50).map(|i| active(&i.to_string())).collect();
    let (dashboard, _api) = loaded(records).await;
    let passes = dashboard.read(|s| s.recompute_passes()).await;

    let outcome = dashboard.archive("42").await.unwrap();

    assert_eq!(
        outcome,
        MutationOutcome::Applied(Some(RecomputeOutcome::Recomputed))
    );
    dashboard
        .read(|s| {
            assert!(!s.collection().active().contains("42"));
            assert!(s.collection().archived().contains("42"));
            assert_eq!(s.archived_count(), 1);
            assert_eq!(s.recompute_passes(), passes + 1);
            assert_eq!(s.stats().value("total"), 49.0);
        })
        .await;
}

#[tokio::test]
async fn test_archive_then_restore_is_an_inverse() {
    let (dashboard, _api) = loaded(vec![active("1"), active("2"), active("3")]).await;
    let before = dashboard.record("2").await.unwrap();

    dashboard.archive("2").await.unwrap();
    assert!(dashboard.record("2").await.unwrap().is_archived());
    dashboard.restore("2").await.unwrap();

    assert_eq!(dashboard.record("2").await.unwrap(), before);
    dashboard
        .read(|s| {
            assert_eq!(s.collection().locate("2"), Some(PartitionSide::Active));
            assert_eq!(s.archived_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_rejected_archive_leaves_state_untouched() {
    let (dashboard, api) = loaded(vec![active("7")]).await;

    api.reject(RemoteOperation::Archive, "7").await;
    let err = dashboard.archive("7").await.unwrap_err();
    assert!(matches!(err, SyncError::MutationRejected(_)));

    api.fail_next(RemoteOperation::Archive).await;
    let err = dashboard.archive("7").await.unwrap_err();
    assert!(matches!(err, SyncError::MutationRejected(_)));

    dashboard
        .read(|s| {
            assert_eq!(s.collection().locate("7"), Some(PartitionSide::Active));
            assert_eq!(s.archived_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_archive_of_unloaded_record_is_reported() {
    let (dashboard, api) = loaded(vec![active("1")]).await;
    api.upsert(active("2")).await;

    let outcome = dashboard.archive("2").await.unwrap();
    assert_eq!(outcome, MutationOutcome::NotResident);
    assert_eq!(dashboard.archived_count().await, 0);
}

#[tokio::test]
async fn test_update_recomputes_only_for_stats_relevant_fields() {
    let (dashboard, _api) = loaded(vec![active("5"), active("6")]).await;

    let outcome = dashboard
        .update("5", RecordPatch::new().attribute("notes", "call buyer"))
        .await
        .unwrap();
    assert_eq!(outcome, MutationOutcome::Applied(None));
    let record = dashboard.record("5").await.unwrap();
    assert_eq!(record.attributes["notes"], json!("call buyer"));
    assert!(record.attributes.contains_key("updatedAt"));

    let outcome = dashboard
        .update("5", RecordPatch::new().attribute("purchasePrice", 650_000))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        MutationOutcome::Applied(Some(RecomputeOutcome::Recomputed))
    );
    assert_eq!(dashboard.stats().await.value("total_value"), 1_150_000.0);
}

#[tokio::test]
async fn test_same_id_mutations_are_serialized() {
    let (dashboard, api) = loaded(vec![active("7")]).await;

    let (archive_result, update_result) = tokio::join!(
        dashboard.archive("7"),
        dashboard.update("7", RecordPatch::new().attribute("notes", "late"))
    );
    archive_result.unwrap();
    update_result.unwrap();

    let local = dashboard.record("7").await.unwrap();
    assert!(local.is_archived());
    assert_eq!(local.attributes["notes"], json!("late"));
    let remote = api.record("7").await.unwrap();
    assert!(remote.is_archived());
    assert_eq!(remote.attributes["notes"], json!("late"));
}

#[tokio::test]
async fn test_batch_delete_removes_exactly_the_archived_ids() {
    let (dashboard, api) =
        loaded(vec![active("1"), active("2"), archived("3"), archived("9")]).await;
    assert_eq!(dashboard.archived_count().await, 2);

    let outcome = dashboard
        .batch_delete(&ids(&["3", "9", "99", "1"]), &|_: &str| true)
        .await;

    let BatchDeleteOutcome::Completed(report) = outcome else {
        panic!("confirmation was accepted");
    };
    assert_eq!(report.success_count, 2);
    assert_eq!(report.fail_count, 0);
    assert_eq!(report.skipped, ids(&["99", "1"]));
    assert_eq!(api.calls(RemoteOperation::PermanentDelete).await, 2);
    dashboard
        .read(|s| {
            assert!(s.collection().archived().is_empty());
            assert_eq!(s.collection().active().len(), 2);
            assert_eq!(s.archived_count(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_declined_batch_delete_issues_no_calls() {
    let (dashboard, api) = loaded(vec![archived("3"), archived("9")]).await;
    let outcome = dashboard
        .batch_delete(&ids(&["3", "9"]), &|message: &str| {
            assert!(message.contains("2 escrows"));
            false
        })
        .await;
    assert_eq!(outcome, BatchDeleteOutcome::Declined);
    assert_eq!(api.calls(RemoteOperation::PermanentDelete).await, 0);
    assert_eq!(dashboard.archived_count().await, 2);
}

#[tokio::test]
async fn test_partial_batch_failure_keeps_failed_ids_selected() {
    let (dashboard, api) = loaded(vec![archived("3"), archived("9")]).await;
    api.reject(RemoteOperation::PermanentDelete, "9").await;
    dashboard.select_all_archived().await;

    let outcome = dashboard
        .batch_delete(&dashboard.selected_ids().await, &|_: &str| true)
        .await;

    let BatchDeleteOutcome::Completed(report) = outcome else {
        panic!("confirmation was accepted");
    };
    assert_eq!(report.deleted, ids(&["3"]));
    assert_eq!(report.failed, ids(&["9"]));
    assert_eq!(dashboard.selected_ids().await, ids(&["9"]));
    assert_eq!(dashboard.archived_count().await, 1);
    assert!(dashboard.record("9").await.is_some());
}

#[tokio::test]
async fn test_single_permanent_delete() {
    let (dashboard, api) = loaded(vec![archived("3")]).await;

    let outcome = dashboard.permanent_delete("3", &|_: &str| true).await;

    assert!(matches!(outcome, BatchDeleteOutcome::Completed(ref r) if r.success_count == 1));
    assert!(api.record("3").await.is_none());
    assert!(dashboard.record("3").await.is_none());
}

#[tokio::test]
async fn test_selection_is_scoped_to_archived_partition() {
    let (dashboard, _api) = loaded(vec![active("1"), archived("3")]).await;

    assert!(!dashboard.select("1").await);
    assert!(dashboard.select("3").await);
    assert!(!dashboard.toggle_selection("3").await);
    assert!(dashboard.selected_ids().await.is_empty());
}

#[tokio::test]
async fn test_update_of_archive_marker_moves_record_and_count() {
    let (dashboard, api) = loaded(vec![active("1"), active("2"), archived("3")]).await;
    assert_eq!(dashboard.archived_count().await, 1);

    dashboard
        .update("2", RecordPatch::new().archived_at(Some(now())))
        .await
        .unwrap();
    dashboard
        .read(|s| {
            assert_eq!(s.collection().locate("2"), Some(PartitionSide::Archived));
            assert!(s.collection().is_exclusive());
            assert_eq!(s.archived_count(), 2);
        })
        .await;
    assert!(api.record("2").await.unwrap().is_archived());

    dashboard
        .update("3", RecordPatch::new().archived_at(None))
        .await
        .unwrap();
    dashboard
        .read(|s| {
            assert_eq!(s.collection().locate("3"), Some(PartitionSide::Active));
            assert_eq!(s.archived_count(), 1);
        })
        .await;
}

#[tokio::test]
async fn test_confirmation_counts_only_archived_targets() {
    let (dashboard, api) = loaded(vec![active("1"), archived("3")]).await;

    let outcome = dashboard
        .batch_delete(&ids(&["3", "99", "1"]), &|message: &str| {
            assert!(message.starts_with("Permanently delete 1 escrows?"));
            false
        })
        .await;
    assert_eq!(outcome, BatchDeleteOutcome::Declined);

    let outcome = dashboard
        .batch_delete(&ids(&["99", "1"]), &|_: &str| -> bool {
            panic!("nothing archived to confirm")
        })
        .await;
    let BatchDeleteOutcome::Completed(report) = outcome else {
        panic!("no confirmation is needed without targets");
    };
    assert_eq!(report.success_count, 0);
    assert_eq!(report.skipped, ids(&["99", "1"]));
    assert_eq!(api.calls(RemoteOperation::PermanentDelete).await, 0);
}

#[tokio::test]
async fn test_batch_delete_runs_on_a_spawned_task() {
    let (dashboard, api) = loaded(vec![archived("3"), archived("9")]).await;
    let dashboard = Arc::new(dashboard);

    let handle = {
        let dashboard = dashboard.clone();
        tokio::spawn(async move {
            dashboard
                .batch_delete(&ids(&["3", "9"]), &|_: &str| true)
                .await
        })
    };

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, BatchDeleteOutcome::Completed(ref r) if r.success_count == 2));
    assert_eq!(api.len().await, 0);
    assert_eq!(dashboard.archived_count().await, 0);
}
