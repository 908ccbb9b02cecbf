use crate::core::{Record, RecordId, RecordPatch, Result, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Which partitions a page request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionScope {
    Mixed,
    ActiveOnly,
    ArchivedOnly,
}

/// Filters sent with every page request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilters {
    pub scope: PartitionScope,
    /// Ownership scope (`my`, `team`, `broker`); `None` means everything.
    pub owner_scope: Option<String>,
}

/// One page of records as reported by the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub records: Vec<Record>,
    pub total_count: u64,
    pub total_pages: u32,
    /// Server-side archived total, when the authority reports it.
    pub archived_count: Option<u64>,
}

/// Acknowledgement of a remote mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationAck {
    pub success: bool,
    /// Server-authoritative fields of the mutated record.
    pub data: Option<RecordPatch>,
    pub message: Option<String>,
}

impl MutationAck {
    pub fn ok(data: Option<RecordPatch>) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// The remote record API the engine fetches from and mutates through.
///
/// Transport failures surface as `Err`; a reachable authority that refuses a
/// mutation answers `Ok` with `success == false`.
#[async_trait]
pub trait RemoteRecordApi: Send + Sync {
    async fn list_page(&self, filters: &ListFilters, page: u32, page_size: u32) -> Result<ListPage>;

    async fn get_by_id(&self, id: &str) -> Result<Record>;

    async fn archive(&self, id: &str) -> Result<MutationAck>;

    async fn restore(&self, id: &str) -> Result<MutationAck>;

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<MutationAck>;

    async fn permanent_delete(&self, id: &str) -> Result<MutationAck>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
    ListPage,
    GetById,
    Archive,
    Restore,
    Update,
    PermanentDelete,
}

#[derive(Default)]
struct AuthorityState {
    order: Vec<RecordId>,
    records: HashMap<RecordId, Record>,
    calls: HashMap<RemoteOperation, usize>,
    fail_next: HashSet<RemoteOperation>,
    rejected: HashSet<(RemoteOperation, RecordId)>,
    held_list_page: Option<Arc<Notify>>,
    last_filters: Option<ListFilters>,
}

impl AuthorityState {
    fn record_call(&mut self, operation: RemoteOperation) -> Result<()> {
        *self.calls.entry(operation).or_default() += 1;
        if self.fail_next.remove(&operation) {
            return Err(SyncError::Remote(format!(
                "injected transport failure for {:?}",
                operation
            )));
        }
        Ok(())
    }

    fn is_rejected(&self, operation: RemoteOperation, id: &str) -> bool {
        self.rejected.contains(&(operation, id.to_string()))
    }
}

/// An in-process remote authority.
///
/// Keeps records in insertion order, supports failure injection and can hold
/// the next page request open until released, which makes superseded and
/// concurrent fetches observable.
#[derive(Clone, Default)]
pub struct InMemoryRecordApi {
    state: Arc<Mutex<AuthorityState>>,
}

impl InMemoryRecordApi {
    /// Creates a new, empty authority.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let api = Self::new();
        for record in records {
            api.upsert(record).await;
        }
        api
    }

    /// Inserts or replaces a record on the authority side only.
    pub async fn upsert(&self, record: Record) {
        let mut state = self.state.lock().await;
        if !state.records.contains_key(&record.id) {
            state.order.push(record.id.clone());
        }
        state.records.insert(record.id.clone(), record);
    }

    pub async fn remove(&self, id: &str) -> Option<Record> {
        let mut state = self.state.lock().await;
        state.order.retain(|existing| existing != id);
        state.records.remove(id)
    }

    pub async fn record(&self, id: &str) -> Option<Record> {
        self.state.lock().await.records.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Makes the next call of `operation` fail with a transport error.
    pub async fn fail_next(&self, operation: RemoteOperation) {
        self.state.lock().await.fail_next.insert(operation);
    }

    /// Makes every `operation` on `id` answer `success == false`.
    pub async fn reject(&self, operation: RemoteOperation, id: &str) {
        self.state
            .lock()
            .await
            .rejected
            .insert((operation, id.to_string()));
    }

    /// Holds the next page request open until the returned handle is
    /// notified. The page contents are captured when the request arrives.
    pub async fn hold_next_list_page(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.state.lock().await.held_list_page = Some(release.clone());
        release
    }

    pub async fn calls(&self, operation: RemoteOperation) -> usize {
        self.state
            .lock()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or_default()
    }

    pub async fn last_filters(&self) -> Option<ListFilters> {
        self.state.lock().await.last_filters.clone()
    }
}

#[async_trait]
impl RemoteRecordApi for InMemoryRecordApi {
    async fn list_page(&self, filters: &ListFilters, page: u32, page_size: u32) -> Result<ListPage> {
        let (response, hold) = {
            let mut state = self.state.lock().await;
            state.record_call(RemoteOperation::ListPage)?;
            state.last_filters = Some(filters.clone());

            let matching: Vec<&Record> = state
                .order
                .iter()
                .filter_map(|id| state.records.get(id))
                .filter(|record| match filters.scope {
                    PartitionScope::Mixed => true,
                    PartitionScope::ActiveOnly => !record.is_archived(),
                    PartitionScope::ArchivedOnly => record.is_archived(),
                })
                .collect();

            let page_size = page_size.max(1) as usize;
            let total_count = matching.len() as u64;
            let total_pages = matching.len().div_ceil(page_size) as u32;
            let offset = (page.max(1) as usize - 1) * page_size;
            let records = matching
                .into_iter()
                .skip(offset)
                .take(page_size)
                .cloned()
                .collect();
            let archived_count = state
                .records
                .values()
                .filter(|record| record.is_archived())
                .count() as u64;

            let response = ListPage {
                records,
                total_count,
                total_pages,
                archived_count: Some(archived_count),
            };
            (response, state.held_list_page.take())
        };

        tokio::task::yield_now().await;
        if let Some(release) = hold {
            release.notified().await;
        }
        Ok(response)
    }

    async fn get_by_id(&self, id: &str) -> Result<Record> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record_call(RemoteOperation::GetById)?;
        state
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    async fn archive(&self, id: &str) -> Result<MutationAck> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record_call(RemoteOperation::Archive)?;
        if state.is_rejected(RemoteOperation::Archive, id) {
            return Ok(MutationAck::rejected("archive refused"));
        }
        let Some(record) = state.records.get_mut(id) else {
            return Ok(MutationAck::rejected(format!("record '{}' not found", id)));
        };
        let now = Utc::now();
        record.archived_at = Some(now);
        Ok(MutationAck::ok(Some(RecordPatch::new().archived_at(Some(now)))))
    }

    async fn restore(&self, id: &str) -> Result<MutationAck> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record_call(RemoteOperation::Restore)?;
        if state.is_rejected(RemoteOperation::Restore, id) {
            return Ok(MutationAck::rejected("restore refused"));
        }
        let Some(record) = state.records.get_mut(id) else {
            return Ok(MutationAck::rejected(format!("record '{}' not found", id)));
        };
        record.archived_at = None;
        Ok(MutationAck::ok(Some(RecordPatch::new().archived_at(None))))
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> Result<MutationAck> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record_call(RemoteOperation::Update)?;
        if state.is_rejected(RemoteOperation::Update, id) {
            return Ok(MutationAck::rejected("update refused"));
        }
        let Some(record) = state.records.get_mut(id) else {
            return Ok(MutationAck::rejected(format!("record '{}' not found", id)));
        };
        record.apply(patch);
        let stamp = RecordPatch::new().attribute("updatedAt", Utc::now().to_rfc3339());
        record.apply(&stamp);
        Ok(MutationAck::ok(Some(stamp)))
    }

    async fn permanent_delete(&self, id: &str) -> Result<MutationAck> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().await;
        state.record_call(RemoteOperation::PermanentDelete)?;
        if state.is_rejected(RemoteOperation::PermanentDelete, id) {
            return Ok(MutationAck::rejected("delete refused"));
        }
        if state.records.remove(id).is_none() {
            return Ok(MutationAck::rejected(format!("record '{}' not found", id)));
        }
        state.order.retain(|existing| existing != id);
        Ok(MutationAck::ok(None))
    }
}
