// ============================================================================
// dashsync Library
// ============================================================================

pub mod bucket;
pub mod config;
pub mod core;
pub mod dashboard;
pub mod fetch;
pub mod mutation;
pub mod notify;
pub mod partition;
pub mod prefs;
pub mod range;
pub mod reconcile;
pub mod remote;
pub mod stats;
pub mod view;

// Re-export main types for convenience
pub use bucket::{StatusBucket, StatusVocabulary};
pub use config::{DEFAULT_PAGE_SIZE, DashboardConfig, FetchStrategy};
pub use crate::core::{Record, RecordId, RecordPatch, Result, SyncError, Timestamp};
pub use dashboard::{
    Clock, Dashboard, DashboardState, DateSelection, RecomputeOutcome, RecomputeTrigger,
};
pub use fetch::{FetchOutcome, FetchPhase, PageCursor};
pub use mutation::{BatchDeleteOutcome, BatchDeleteReport, ConfirmationPrompt, MutationOutcome};
pub use notify::{NotificationAction, NotificationListener, PushNotification};
pub use partition::{PartitionSide, PartitionedCollection, Placement};
pub use prefs::{FilePreferenceStore, MemoryPreferenceStore, PreferenceStore};
pub use range::{DateRange, DateRangeToken};
pub use reconcile::{ReconcileOutcome, SkipCounter};
pub use remote::{
    InMemoryRecordApi, ListFilters, ListPage, MutationAck, PartitionScope, RemoteOperation,
    RemoteRecordApi,
};
pub use stats::StatsSnapshot;
pub use view::{SortDirection, SortKey};

// ============================================================================
// Quick start
// ============================================================================

/// Opens a dashboard over an in-memory authority and loads the first page.
///
/// # Examples
///
/// ```
/// use dashsync::{DashboardConfig, InMemoryRecordApi, Record, open_in_memory};
/// use chrono::Utc;
///
/// # #[tokio::main]
/// # async fn main() -> dashsync::Result<()> {
/// let api = InMemoryRecordApi::with_records([
///     Record::new("1", "Active", Utc::now()),
///     Record::new("2", "Closed", Utc::now()).archived(Utc::now()),
/// ])
/// .await;
///
/// let dashboard = open_in_memory(DashboardConfig::new("escrow", "escrows"), api).await?;
/// assert_eq!(dashboard.archived_count().await, 1);
/// # Ok(())
/// # }
/// ```
pub async fn open_in_memory(
    config: DashboardConfig,
    api: InMemoryRecordApi,
) -> Result<Dashboard<InMemoryRecordApi>> {
    let dashboard = Dashboard::new(config, std::sync::Arc::new(api))?;
    dashboard.refresh().await?;
    Ok(dashboard)
}
