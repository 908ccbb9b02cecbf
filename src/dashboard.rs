// ============================================================================
// Dashboard
// ============================================================================
//
// One `Dashboard` per hosting view. It owns the state object (collection,
// cursor, filters, stats, skip counter) behind a single async mutex that is
// never held across a remote call. Fetching, mutations, reconciliation and the
// notification listener are implemented in their own modules as further
// `impl Dashboard` blocks.
//
// ============================================================================

use crate::bucket::StatusBucket;
use crate::config::DashboardConfig;
use crate::core::{Record, RecordId, Result, Timestamp};
use crate::fetch::{FetchController, FetchOutcome, FetchPhase, PageCursor, scope_for};
use crate::mutation::IdLocks;
use crate::notify::Subscription;
use crate::partition::{PartitionSide, PartitionedCollection};
use crate::prefs::{
    DashboardPreferences, MemoryPreferenceStore, PreferenceKeys, PreferenceStore,
    load_preferences, load_sort_direction,
};
use crate::range::{DateRange, DateRangeToken, resolve_at, resolve_token_at};
use crate::reconcile::SkipCounter;
use crate::remote::{ListFilters, PartitionScope, RemoteRecordApi};
use crate::stats::{self, StatsSnapshot};
use crate::view::{self, SortKey, ViewQuery, source_side};
use chrono::Utc;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Source of "now" for range resolution and bucket predicates.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Why a stats pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeTrigger {
    /// Bucket or date range changed. Never skipped.
    FilterChange,
    /// Fetch, mutation or explicit refresh. Consumes a pending skip.
    DataChange,
    /// Stats-relevant reconciliation. Never skipped.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeOutcome {
    Recomputed,
    Skipped,
}

/// The date window as the user chose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSelection {
    Preset(DateRangeToken),
    Explicit { start: String, end: String },
}

impl DateSelection {
    /// Presets are re-anchored at `now` on every resolution.
    pub fn resolve(&self, now: Timestamp) -> DateRange {
        match self {
            DateSelection::Preset(token) => resolve_token_at(*token, now),
            DateSelection::Explicit { start, end } => {
                resolve_at(None, Some(start.as_str()), Some(end.as_str()), now)
            }
        }
    }
}

/// Everything a dashboard instance owns.
#[derive(Debug)]
pub struct DashboardState {
    pub(crate) collection: PartitionedCollection,
    pub(crate) fetch: FetchController,
    pub(crate) bucket: StatusBucket,
    pub(crate) date_selection: DateSelection,
    pub(crate) date_range: DateRange,
    pub(crate) search: String,
    pub(crate) sort: SortKey,
    pub(crate) scope: String,
    pub(crate) view_mode: String,
    pub(crate) stats: StatsSnapshot,
    pub(crate) skip: SkipCounter,
    pub(crate) recompute_passes: u64,
    pub(crate) archived_count: u64,
}

impl DashboardState {
    fn new(prefs: DashboardPreferences, now: Timestamp) -> Self {
        let date_selection = DateSelection::Preset(DateRangeToken::Month);
        let date_range = date_selection.resolve(now);
        let mut sort = SortKey::default();
        sort.direction = prefs.sort_direction;

        Self {
            collection: PartitionedCollection::new(),
            fetch: FetchController::new(),
            bucket: prefs.bucket,
            date_selection,
            date_range,
            search: String::new(),
            sort,
            scope: prefs.scope,
            view_mode: prefs.view_mode,
            stats: StatsSnapshot::new(),
            skip: SkipCounter::new(),
            recompute_passes: 0,
            archived_count: 0,
        }
    }

    pub fn collection(&self) -> &PartitionedCollection {
        &self.collection
    }

    pub fn cursor(&self) -> Option<PageCursor> {
        self.fetch.cursor()
    }

    pub fn fetch_phase(&self) -> FetchPhase {
        self.fetch.phase()
    }

    pub fn bucket(&self) -> StatusBucket {
        self.bucket
    }

    pub fn date_selection(&self) -> &DateSelection {
        &self.date_selection
    }

    pub fn date_range(&self) -> &DateRange {
        &self.date_range
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn sort(&self) -> &SortKey {
        &self.sort
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn view_mode(&self) -> &str {
        &self.view_mode
    }

    pub fn stats(&self) -> &StatsSnapshot {
        &self.stats
    }

    pub fn skip_count(&self) -> u64 {
        self.skip.value()
    }

    /// Number of stats passes that actually ran.
    pub fn recompute_passes(&self) -> u64 {
        self.recompute_passes
    }

    pub fn archived_count(&self) -> u64 {
        self.archived_count
    }

    /// Partition the current bucket reads from.
    pub fn displayed_side(&self) -> PartitionSide {
        source_side(self.bucket)
    }

    pub(crate) fn list_filters(&self, scope: PartitionScope) -> ListFilters {
        let owner_scope = if self.scope.eq_ignore_ascii_case("all") {
            None
        } else {
            Some(self.scope.clone())
        };
        ListFilters { scope, owner_scope }
    }

    /// The single recompute entry point. Only `DataChange` consults the skip
    /// counter.
    pub(crate) fn recompute(
        &mut self,
        trigger: RecomputeTrigger,
        config: &DashboardConfig,
        now: Timestamp,
    ) -> RecomputeOutcome {
        if trigger == RecomputeTrigger::DataChange && self.skip.consume() {
            debug!(
                "stats recompute skipped for {}, {} deferral(s) left",
                self.bucket,
                self.skip.value()
            );
            return RecomputeOutcome::Skipped;
        }

        self.date_range = self.date_selection.resolve(now);
        let source = self.collection.partition(self.displayed_side());
        self.stats = stats::compute(source.iter(), self.bucket, &self.date_range, config, now);
        self.recompute_passes += 1;
        RecomputeOutcome::Recomputed
    }
}

/// A synchronized, partitioned view over one remote record collection.
pub struct Dashboard<A> {
    pub(crate) config: DashboardConfig,
    pub(crate) api: Arc<A>,
    pub(crate) state: Mutex<DashboardState>,
    pub(crate) id_locks: IdLocks,
    pub(crate) subscription: Mutex<Subscription>,
    prefs: Arc<dyn PreferenceStore>,
    keys: PreferenceKeys,
    clock: Clock,
}

impl<A: RemoteRecordApi> Dashboard<A> {
    /// Creates a dashboard with default preferences held in memory.
    pub fn new(config: DashboardConfig, api: Arc<A>) -> Result<Self> {
        config.validate()?;
        let prefs = DashboardPreferences::defaults(&config);
        Ok(Self::from_parts(
            config,
            api,
            Arc::new(MemoryPreferenceStore::new()),
            prefs,
        ))
    }

    /// Creates a dashboard and restores the preferences saved in `store`.
    pub async fn open(
        config: DashboardConfig,
        api: Arc<A>,
        store: Arc<dyn PreferenceStore>,
    ) -> Result<Self> {
        config.validate()?;
        let prefs = load_preferences(store.as_ref(), &config).await?;
        debug!(
            "opening {} dashboard: bucket={} scope={} view={}",
            config.entity_plural, prefs.bucket, prefs.scope, prefs.view_mode
        );
        Ok(Self::from_parts(config, api, store, prefs))
    }

    fn from_parts(
        config: DashboardConfig,
        api: Arc<A>,
        store: Arc<dyn PreferenceStore>,
        prefs: DashboardPreferences,
    ) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let state = DashboardState::new(prefs, clock());
        let keys = PreferenceKeys::new(&config.entity_plural);
        Self {
            config,
            api,
            state: Mutex::new(state),
            id_locks: IdLocks::default(),
            subscription: Mutex::new(Subscription::default()),
            prefs: store,
            keys,
            clock,
        }
    }

    /// Replaces the wall clock.
    pub fn with_clock(mut self, clock: impl Fn() -> Timestamp + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        let now = (self.clock)();
        let state = self.state.get_mut();
        state.date_range = state.date_selection.resolve(now);
        self
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn now(&self) -> Timestamp {
        (self.clock)()
    }

    /// Runs `f` against a consistent view of the state.
    pub async fn read<R>(&self, f: impl FnOnce(&DashboardState) -> R) -> R {
        let state = self.state.lock().await;
        f(&state)
    }

    /// The list the hosting view renders for the current filters.
    pub async fn display_list(&self) -> Vec<Record> {
        let now = self.now();
        let state = self.state.lock().await;
        let query = ViewQuery {
            bucket: state.bucket,
            search: &state.search,
            sort: &state.sort,
            now,
        };
        view::display_list(&state.collection, query, &self.config)
    }

    pub async fn stats(&self) -> StatsSnapshot {
        self.state.lock().await.stats.clone()
    }

    pub async fn skip_count(&self) -> u64 {
        self.state.lock().await.skip.value()
    }

    pub async fn archived_count(&self) -> u64 {
        self.state.lock().await.archived_count
    }

    pub async fn cursor(&self) -> Option<PageCursor> {
        self.state.lock().await.fetch.cursor()
    }

    pub async fn record(&self, id: &str) -> Option<Record> {
        self.state.lock().await.collection.get(id).cloned()
    }

    /// Requests a stats pass.
    pub async fn recompute(&self, trigger: RecomputeTrigger) -> RecomputeOutcome {
        let now = self.now();
        self.state
            .lock()
            .await
            .recompute(trigger, &self.config, now)
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    /// Switches the bucket. Stats are always recomputed and the skip counter
    /// is left alone. Under the per-partition strategy a switch into or out
    /// of the Archived bucket re-fetches the first page, and that fetch's
    /// stats pass counts as the filter change.
    pub async fn set_bucket(&self, bucket: StatusBucket) {
        let direction = match load_sort_direction(self.prefs.as_ref(), &self.keys, bucket).await {
            Ok(direction) => Some(direction),
            Err(err) => {
                warn!("failed to read sort order for {}: {}", bucket, err);
                None
            }
        };

        let scope_changed = {
            let mut state = self.state.lock().await;
            let strategy = self.config.fetch_strategy;
            let changed = scope_for(strategy, state.bucket) != scope_for(strategy, bucket);
            state.bucket = bucket;
            if let Some(direction) = direction {
                state.sort.direction = direction;
            }
            changed
        };
        self.persist(&self.keys.status(), bucket.as_str()).await;

        let refetched = scope_changed
            && match self
                .fetch_with(1, false, RecomputeTrigger::FilterChange)
                .await
            {
                Ok(outcome) => matches!(outcome, FetchOutcome::Applied { .. }),
                Err(err) => {
                    warn!("re-fetch after switching to {} failed: {}", bucket, err);
                    false
                }
            };

        if !refetched {
            self.recompute(RecomputeTrigger::FilterChange).await;
        }
    }

    /// Selects a preset window and recomputes stats.
    pub async fn set_date_range(&self, token: DateRangeToken) -> DateRange {
        self.select_dates(DateSelection::Preset(token)).await
    }

    /// Selects explicit bounds; they are classified back into a preset when
    /// they coincide with one.
    pub async fn set_custom_range(&self, start: &str, end: &str) -> DateRange {
        self.select_dates(DateSelection::Explicit {
            start: start.to_string(),
            end: end.to_string(),
        })
        .await
    }

    async fn select_dates(&self, selection: DateSelection) -> DateRange {
        let now = self.now();
        let mut state = self.state.lock().await;
        state.date_selection = selection;
        state.recompute(RecomputeTrigger::FilterChange, &self.config, now);
        state.date_range
    }

    pub async fn set_search(&self, query: &str) {
        self.state.lock().await.search = query.to_string();
    }

    /// Changes the sort key; the direction is remembered per bucket.
    pub async fn set_sort(&self, sort: SortKey) {
        let direction = sort.direction;
        let bucket = {
            let mut state = self.state.lock().await;
            debug!("sorting {} by {} {}", state.bucket, sort.field, direction);
            state.sort = sort;
            state.bucket
        };
        self.persist(&self.keys.sort_order(bucket), direction.as_str())
            .await;
    }

    /// Changes the ownership scope and re-fetches the first page.
    pub async fn set_scope(&self, scope: &str) -> Result<FetchOutcome> {
        self.state.lock().await.scope = scope.to_string();
        self.persist(&self.keys.scope(), scope).await;
        self.fetch(1, false).await
    }

    pub async fn set_view_mode(&self, mode: &str) {
        self.state.lock().await.view_mode = mode.to_string();
        self.persist(&self.keys.view_mode(), mode).await;
    }

    async fn persist(&self, key: &str, value: &str) {
        if let Err(err) = self.prefs.set(key, value).await {
            warn!("failed to save preference '{}': {}", key, err);
        }
    }

    // ------------------------------------------------------------------
    // Selection (archived partition)
    // ------------------------------------------------------------------

    pub async fn select(&self, id: &str) -> bool {
        self.state.lock().await.collection.select(id)
    }

    pub async fn deselect(&self, id: &str) -> bool {
        self.state.lock().await.collection.deselect(id)
    }

    pub async fn toggle_selection(&self, id: &str) -> bool {
        self.state.lock().await.collection.toggle_selection(id)
    }

    pub async fn select_all_archived(&self) {
        self.state.lock().await.collection.select_all_archived();
    }

    pub async fn clear_selection(&self) {
        self.state.lock().await.collection.clear_selection();
    }

    pub async fn selected_ids(&self) -> Vec<RecordId> {
        self.state.lock().await.collection.selected_ids()
    }
}
