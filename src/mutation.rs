// ============================================================================
// Mutation coordinator
// ============================================================================
//
// Confirm-then-patch: the remote authority acknowledges first, the local
// collection changes second. Nothing is applied optimistically, so a failed
// call leaves local state exactly as it was.
//
// Mutations on the same id queue behind a per-id async lock in arrival
// order; mutations on different ids run concurrently.
//
// ============================================================================

use crate::core::{RecordId, RecordPatch, Result, SyncError};
use crate::dashboard::{Dashboard, RecomputeOutcome, RecomputeTrigger};
use crate::partition::PartitionSide;
use crate::remote::{MutationAck, RemoteRecordApi};
use futures::future::join_all;
use log::{debug, error, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

// ============================================================================
// Per-id serialization
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct IdLocks {
    locks: StdMutex<HashMap<RecordId, Arc<Mutex<()>>>>,
}

impl IdLocks {
    /// Waits for earlier mutations of `id` to finish. tokio's mutex is fair,
    /// so waiters are served first in, first out.
    pub(crate) async fn acquire(&self, id: &str) -> IdLease<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        IdLease {
            locks: self,
            id: id.to_string(),
            guard: Some(guard),
        }
    }

    fn release(&self, id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive right to mutate one id. The lock entry is dropped with the last
/// lease.
pub(crate) struct IdLease<'a> {
    locks: &'a IdLocks,
    id: RecordId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.id);
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Synchronous yes/no decision taken before a destructive operation.
pub trait ConfirmationPrompt: Sync {
    fn confirm(&self, message: &str) -> bool;
}

impl<F> ConfirmationPrompt for F
where
    F: Fn(&str) -> bool + Sync,
{
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The local collection was patched. `None` when no stats pass was
    /// requested.
    Applied(Option<RecomputeOutcome>),
    /// The remote call succeeded but the id was not where it was expected
    /// locally; the inconsistency was logged and nothing was changed.
    NotResident,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteReport {
    pub success_count: usize,
    pub fail_count: usize,
    pub deleted: Vec<RecordId>,
    pub failed: Vec<RecordId>,
    /// Requested ids that were not in the archived partition. Never attempted.
    pub skipped: Vec<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchDeleteOutcome {
    Declined,
    Completed(BatchDeleteReport),
}

fn rejection(operation: &str, id: &str, ack: &MutationAck) -> SyncError {
    SyncError::MutationRejected(format!(
        "{} of '{}' rejected: {}",
        operation,
        id,
        ack.message.as_deref().unwrap_or("no reason given")
    ))
}

/// Turns a remote response into a confirmed acknowledgement. Transport
/// errors and refusals both become `MutationRejected`.
fn confirmed(operation: &str, id: &str, response: Result<MutationAck>) -> Result<MutationAck> {
    let err = match response {
        Ok(ack) if ack.success => return Ok(ack),
        Ok(ack) => rejection(operation, id, &ack),
        Err(err) => SyncError::MutationRejected(format!("{} of '{}' failed: {}", operation, id, err)),
    };
    error!("{}", err);
    Err(err)
}

// ============================================================================
// Operations
// ============================================================================

impl<A: RemoteRecordApi> Dashboard<A> {
    /// Archives `id` once the remote authority confirms.
    pub async fn archive(&self, id: &str) -> Result<MutationOutcome> {
        let _lease = self.id_locks.acquire(id).await;

        let ack = confirmed("archive", id, self.api.archive(id).await)?;

        let now = self.now();
        let archived_at = ack
            .data
            .and_then(|data| data.archived_at.flatten())
            .unwrap_or(now);

        let mut state = self.state.lock().await;
        if state.collection.locate(id) != Some(PartitionSide::Active) {
            warn!(
                "archived '{}' remotely but it is not in the active partition",
                id
            );
            return Ok(MutationOutcome::NotResident);
        }
        state
            .collection
            .patch(id, &RecordPatch::new().archived_at(Some(archived_at)));
        state.collection.move_to_archived(id);
        state.archived_count += 1;
        let recompute = state.recompute(RecomputeTrigger::DataChange, &self.config, now);
        Ok(MutationOutcome::Applied(Some(recompute)))
    }

    /// Restores `id` to the active partition once the remote authority
    /// confirms. The archive marker is cleared; nothing else changes.
    pub async fn restore(&self, id: &str) -> Result<MutationOutcome> {
        let _lease = self.id_locks.acquire(id).await;

        let ack = confirmed("restore", id, self.api.restore(id).await)?;

        let now = self.now();
        let mut state = self.state.lock().await;
        if state.collection.locate(id) != Some(PartitionSide::Archived) {
            warn!(
                "restored '{}' remotely but it is not in the archived partition",
                id
            );
            return Ok(MutationOutcome::NotResident);
        }
        state
            .collection
            .patch(id, &RecordPatch::new().archived_at(None));
        state.collection.move_to_active(id);
        state.archived_count = state.archived_count.saturating_sub(1);
        let recompute = state.recompute(RecomputeTrigger::DataChange, &self.config, now);
        Ok(MutationOutcome::Applied(Some(recompute)))
    }

    /// Updates `id`. The server's fields are layered over `patch` before it
    /// is merged locally. Stats are recomputed only when the record sits in
    /// the displayed partition and a stats-relevant field changed.
    pub async fn update(&self, id: &str, patch: RecordPatch) -> Result<MutationOutcome> {
        let _lease = self.id_locks.acquire(id).await;

        let ack = confirmed("update", id, self.api.update(id, &patch).await)?;

        let merged = match ack.data {
            Some(server) => server.merged_over(patch),
            None => patch,
        };

        let now = self.now();
        let mut state = self.state.lock().await;
        let Some(before) = state.collection.get(id).cloned() else {
            debug!("updated '{}' remotely, not resident locally", id);
            return Ok(MutationOutcome::NotResident);
        };
        let side_before = PartitionSide::of(&before);

        state.collection.patch(id, &merged);
        let Some(after) = state.collection.get(id).cloned() else {
            return Ok(MutationOutcome::NotResident);
        };
        let side_after = PartitionSide::of(&after);
        if side_after != side_before {
            match side_after {
                PartitionSide::Archived => state.archived_count += 1,
                PartitionSide::Active => {
                    state.archived_count = state.archived_count.saturating_sub(1)
                }
            }
            state.collection.place(after.clone());
        }

        let displayed = state.displayed_side();
        let touches_display = side_before == displayed || side_after == displayed;
        let relevant =
            side_after != side_before || before.differs_on(&after, &self.config.stats_fields);

        if touches_display && relevant {
            let recompute = state.recompute(RecomputeTrigger::DataChange, &self.config, now);
            Ok(MutationOutcome::Applied(Some(recompute)))
        } else {
            Ok(MutationOutcome::Applied(None))
        }
    }

    /// Permanently deletes the archived records among `ids`.
    ///
    /// Each remote delete runs concurrently and succeeds or fails on its own.
    /// Partial failure is reported, not returned as an error.
    pub async fn batch_delete(
        &self,
        ids: &[RecordId],
        prompt: &dyn ConfirmationPrompt,
    ) -> BatchDeleteOutcome {
        let mut seen = HashSet::new();
        let requested: Vec<RecordId> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        if requested.is_empty() {
            return BatchDeleteOutcome::Completed(BatchDeleteReport::default());
        }

        let (targets, skipped): (Vec<RecordId>, Vec<RecordId>) = {
            let state = self.state.lock().await;
            requested
                .into_iter()
                .partition(|id| state.collection.archived().contains(id))
        };
        if targets.is_empty() {
            debug!("batch delete has no archived ids, {} skipped", skipped.len());
            return BatchDeleteOutcome::Completed(BatchDeleteReport {
                skipped,
                ..BatchDeleteReport::default()
            });
        }

        let message = format!(
            "Permanently delete {} {}? This action cannot be undone.",
            targets.len(),
            self.config.entity_plural
        );
        if !prompt.confirm(&message) {
            debug!("batch delete of {} ids declined", targets.len());
            return BatchDeleteOutcome::Declined;
        }

        let results = join_all(targets.iter().map(|id| async move {
            let _lease = self.id_locks.acquire(id).await;
            (id.clone(), self.api.permanent_delete(id).await)
        }))
        .await;

        let mut report = BatchDeleteReport {
            skipped,
            ..BatchDeleteReport::default()
        };
        for (id, result) in results {
            match result {
                Ok(ack) if ack.success => report.deleted.push(id),
                Ok(ack) => {
                    warn!("{}", rejection("permanent delete", &id, &ack));
                    report.failed.push(id);
                }
                Err(err) => {
                    warn!("failed to permanently delete '{}': {}", id, err);
                    report.failed.push(id);
                }
            }
        }
        report.success_count = report.deleted.len();
        report.fail_count = report.failed.len();

        if report.fail_count > 0 {
            error!(
                "failed to delete {} of {} {}",
                report.fail_count,
                targets.len(),
                self.config.entity_plural
            );
        }

        if report.success_count > 0 {
            let now = self.now();
            let deleted: HashSet<RecordId> = report.deleted.iter().cloned().collect();
            let mut state = self.state.lock().await;
            state.collection.remove_from_archived(&deleted);
            for id in &report.deleted {
                state.collection.deselect(id);
            }
            state.archived_count = state
                .archived_count
                .saturating_sub(report.success_count as u64);
            if state.displayed_side() == PartitionSide::Archived {
                state.recompute(RecomputeTrigger::DataChange, &self.config, now);
            }
        }

        BatchDeleteOutcome::Completed(report)
    }

    /// Single-record form of [`batch_delete`](Self::batch_delete).
    pub async fn permanent_delete(
        &self,
        id: &str,
        prompt: &dyn ConfirmationPrompt,
    ) -> BatchDeleteOutcome {
        self.batch_delete(&[id.to_string()], prompt).await
    }
}
