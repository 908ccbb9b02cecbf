// ============================================================================
// Paginated fetch controller
// ============================================================================
//
// Page cursor plus the bookkeeping that keeps concurrent fetches honest:
// every first-page fetch bumps a generation, and a response is applied only
// if its generation is still current. At most one append is in flight.
//
// ============================================================================

use crate::bucket::StatusBucket;
use crate::config::FetchStrategy;
use crate::core::{Result, SyncError};
use crate::dashboard::{Dashboard, DashboardState, RecomputeOutcome, RecomputeTrigger};
use crate::partition::PartitionSide;
use crate::remote::{ListFilters, ListPage, PartitionScope, RemoteRecordApi};
use log::{debug, error};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageCursor {
    pub current_page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    FetchingFirstPage,
    FetchingNextPage,
}

/// Issued when a fetch starts; checked again when its response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    append_seq: Option<u64>,
    scope: PartitionScope,
    page: u32,
}

impl FetchTicket {
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn is_append(&self) -> bool {
        self.append_seq.is_some()
    }

    pub fn scope(&self) -> PartitionScope {
        self.scope
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was written into the collection.
    Applied {
        page: u32,
        received: usize,
        recompute: RecomputeOutcome,
    },
    /// A newer first-page fetch started while this one was in flight.
    Superseded,
    /// Nothing was requested: a fetch is in flight or there is no next page.
    Skipped,
}

#[derive(Debug, Default)]
pub struct FetchController {
    cursor: Option<PageCursor>,
    generation: u64,
    first_page_in_flight: bool,
    append_seq: u64,
    append_in_flight: Option<u64>,
}

impl FetchController {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until the first successful fetch.
    pub fn cursor(&self) -> Option<PageCursor> {
        self.cursor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> FetchPhase {
        if self.first_page_in_flight {
            FetchPhase::FetchingFirstPage
        } else if self.append_in_flight.is_some() {
            FetchPhase::FetchingNextPage
        } else {
            FetchPhase::Idle
        }
    }

    pub fn is_busy(&self) -> bool {
        self.phase() != FetchPhase::Idle
    }

    /// Starts a replace fetch. Always succeeds and supersedes anything in
    /// flight, appends included.
    pub fn begin_replace(&mut self, page: u32, scope: PartitionScope) -> FetchTicket {
        self.generation += 1;
        self.first_page_in_flight = true;
        self.append_in_flight = None;
        FetchTicket {
            generation: self.generation,
            append_seq: None,
            scope,
            page: page.max(1),
        }
    }

    /// Starts an append fetch, refused while another append is in flight.
    pub fn begin_append(&mut self, page: u32, scope: PartitionScope) -> Option<FetchTicket> {
        if self.append_in_flight.is_some() {
            return None;
        }
        self.append_seq += 1;
        self.append_in_flight = Some(self.append_seq);
        Some(FetchTicket {
            generation: self.generation,
            append_seq: Some(self.append_seq),
            scope,
            page: page.max(1),
        })
    }

    /// The next page `load_more` would request, if any.
    pub fn next_page(&self) -> Option<u32> {
        if self.is_busy() {
            return None;
        }
        let cursor = self.cursor?;
        cursor.has_more.then_some(cursor.current_page + 1)
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Clears the in-flight flag owned by `ticket`, if it still owns it.
    pub fn finish(&mut self, ticket: &FetchTicket) {
        match ticket.append_seq {
            Some(seq) => {
                if self.append_in_flight == Some(seq) {
                    self.append_in_flight = None;
                }
            }
            None => {
                if self.is_current(ticket) {
                    self.first_page_in_flight = false;
                }
            }
        }
    }

    pub fn advance(&mut self, page: u32, page_size: u32, total_count: u64, total_pages: u32) {
        self.cursor = Some(PageCursor {
            current_page: page,
            page_size,
            total_count,
            has_more: page < total_pages,
        });
    }
}

/// Partition scope requested for `bucket` under `strategy`.
pub fn scope_for(strategy: FetchStrategy, bucket: StatusBucket) -> PartitionScope {
    match strategy {
        FetchStrategy::Mixed => PartitionScope::Mixed,
        FetchStrategy::PerPartition if bucket.reads_archived() => PartitionScope::ArchivedOnly,
        FetchStrategy::PerPartition => PartitionScope::ActiveOnly,
    }
}

impl<A: RemoteRecordApi> Dashboard<A> {
    /// Fetches `page`, replacing the resident set or appending to it.
    ///
    /// A replace always starts and supersedes whatever is in flight. An
    /// append is skipped while another append is pending.
    pub async fn fetch(&self, page: u32, append: bool) -> Result<FetchOutcome> {
        self.fetch_with(page, append, RecomputeTrigger::DataChange)
            .await
    }

    /// Like [`fetch`](Self::fetch), with the stats pass run under `trigger`.
    pub(crate) async fn fetch_with(
        &self,
        page: u32,
        append: bool,
        trigger: RecomputeTrigger,
    ) -> Result<FetchOutcome> {
        let (ticket, filters) = {
            let mut state = self.state.lock().await;
            let scope = scope_for(self.config.fetch_strategy, state.bucket);
            let ticket = if append {
                match state.fetch.begin_append(page, scope) {
                    Some(ticket) => ticket,
                    None => {
                        debug!("append fetch of page {} skipped, one already in flight", page);
                        return Ok(FetchOutcome::Skipped);
                    }
                }
            } else {
                state.fetch.begin_replace(page, scope)
            };
            (ticket, state.list_filters(scope))
        };
        self.execute_fetch(ticket, filters, trigger).await
    }

    /// Fetches the page after the current one. No-op while any fetch is in
    /// flight or when the cursor reports no further pages.
    pub async fn load_more(&self) -> Result<FetchOutcome> {
        let (ticket, filters) = {
            let mut state = self.state.lock().await;
            let Some(page) = state.fetch.next_page() else {
                return Ok(FetchOutcome::Skipped);
            };
            let scope = scope_for(self.config.fetch_strategy, state.bucket);
            let Some(ticket) = state.fetch.begin_append(page, scope) else {
                return Ok(FetchOutcome::Skipped);
            };
            (ticket, state.list_filters(scope))
        };
        self.execute_fetch(ticket, filters, RecomputeTrigger::DataChange)
            .await
    }

    /// Re-fetches the first page.
    pub async fn refresh(&self) -> Result<FetchOutcome> {
        self.fetch(1, false).await
    }

    async fn execute_fetch(
        &self,
        ticket: FetchTicket,
        filters: ListFilters,
        trigger: RecomputeTrigger,
    ) -> Result<FetchOutcome> {
        let response = self
            .api
            .list_page(&filters, ticket.page(), self.config.page_size)
            .await;

        let mut state = self.state.lock().await;
        let current = state.fetch.is_current(&ticket);
        state.fetch.finish(&ticket);

        if !current {
            debug!(
                "discarding superseded response for page {} of {}",
                ticket.page(),
                self.config.entity_plural
            );
            return Ok(FetchOutcome::Superseded);
        }

        let page = match response {
            Ok(page) => page,
            Err(err) => {
                error!(
                    "failed to fetch page {} of {}: {}",
                    ticket.page(),
                    self.config.entity_plural,
                    err
                );
                return Err(SyncError::FetchFailure(err.to_string()));
            }
        };

        let received = page.records.len();
        state.fetch.advance(
            ticket.page(),
            self.config.page_size,
            page.total_count,
            page.total_pages,
        );
        apply_page(&mut state, &ticket, page);

        let now = self.now();
        let recompute = state.recompute(trigger, &self.config, now);
        Ok(FetchOutcome::Applied {
            page: ticket.page(),
            received,
            recompute,
        })
    }
}

fn apply_page(state: &mut DashboardState, ticket: &FetchTicket, page: ListPage) {
    let ListPage {
        records,
        total_count,
        archived_count,
        ..
    } = page;
    let collection = &mut state.collection;

    match (ticket.scope(), ticket.is_append()) {
        (PartitionScope::Mixed, false) => collection.replace_mixed(records),
        (PartitionScope::Mixed, true) => {
            collection.append_mixed(records);
        }
        (PartitionScope::ActiveOnly, false) => {
            collection.replace_active(records);
            collection.clear(PartitionSide::Archived);
        }
        (PartitionScope::ActiveOnly, true) => {
            collection.append_active(records);
        }
        (PartitionScope::ArchivedOnly, false) => {
            collection.replace_archived(records);
            collection.clear(PartitionSide::Active);
        }
        (PartitionScope::ArchivedOnly, true) => {
            collection.append_archived(records);
        }
    }

    let resident_archived = state.collection.archived().len() as u64;
    state.archived_count = match (archived_count, ticket.scope()) {
        (Some(count), _) => count,
        (None, PartitionScope::ArchivedOnly) => total_count,
        (None, PartitionScope::Mixed) if !ticket.is_append() => resident_archived,
        (None, _) => state.archived_count.max(resident_archived),
    };
}
