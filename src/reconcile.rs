// ============================================================================
// Reconciliation
// ============================================================================
//
// A push notification only says that something changed. The canonical record
// is always re-fetched, compared with the cached copy over the stats-relevant
// fields and patched in. A record the authority no longer knows is dropped
// locally, whatever the notification claimed. Irrelevant changes defer the next natural stats pass
// through the skip counter instead of recomputing.
//
// ============================================================================

use crate::core::{RecordPatch, SyncError};
use crate::dashboard::{Dashboard, RecomputeTrigger};
use crate::notify::{NotificationAction, PushNotification};
use crate::partition::PartitionSide;
use crate::remote::RemoteRecordApi;
use tracing::{Instrument, Level, event, info_span};

/// Pending "skip the next natural recompute" credits.
///
/// Incremented by irrelevant reconciliations, consumed one at a time by
/// `DataChange` recompute requests only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounter(u64);

impl SkipCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn increment(&mut self) {
        self.0 += 1;
    }

    /// Takes one credit if there is one.
    pub fn consume(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Notification for another entity type.
    Ignored,
    /// The id is not cached and the action does not create it.
    NotResident,
    /// Patched without a stats pass; the skip counter was incremented.
    Deferred,
    /// Patched, moved or inserted, then stats were recomputed.
    Recomputed,
    /// The authority reported the id missing; it was removed locally and
    /// stats were recomputed.
    Removed,
    /// The canonical re-fetch failed; nothing was changed.
    Dropped,
}

impl<A: RemoteRecordApi> Dashboard<A> {
    /// Incorporates one push notification.
    pub async fn reconcile(&self, notification: &PushNotification) -> ReconcileOutcome {
        let span = info_span!(
            "dashboard.reconcile",
            entity_type = %notification.entity_type,
            entity_id = %notification.entity_id,
            action = ?notification.action
        );
        self.reconcile_inner(notification).instrument(span).await
    }

    async fn reconcile_inner(&self, notification: &PushNotification) -> ReconcileOutcome {
        if !notification
            .entity_type
            .eq_ignore_ascii_case(&self.config.entity_type)
        {
            event!(Level::TRACE, "notification for another entity type ignored");
            return ReconcileOutcome::Ignored;
        }

        let id = notification.entity_id.as_str();

        let fetched = match self.api.get_by_id(id).await {
            Ok(record) => record,
            Err(SyncError::NotFound(_)) => return self.remove_resident(id).await,
            Err(err) => {
                event!(Level::WARN, error = %err, "canonical re-fetch failed, notification dropped");
                return ReconcileOutcome::Dropped;
            }
        };
        if notification.action == NotificationAction::Deleted {
            event!(Level::DEBUG, "delete notified but the record still exists remotely");
        }

        let now = self.now();
        let mut state = self.state.lock().await;
        let Some(cached) = state.collection.get(id).cloned() else {
            if notification.action != NotificationAction::Created {
                event!(Level::DEBUG, "record not cached, nothing to patch");
                return ReconcileOutcome::NotResident;
            }
            if fetched.is_archived() {
                state.archived_count += 1;
            }
            state.collection.place(fetched);
            state.recompute(RecomputeTrigger::Forced, &self.config, now);
            event!(Level::DEBUG, "created record inserted");
            return ReconcileOutcome::Recomputed;
        };

        let from = PartitionSide::of(&cached);
        let to = PartitionSide::of(&fetched);
        if from != to {
            match to {
                PartitionSide::Archived => state.archived_count += 1,
                PartitionSide::Active => {
                    state.archived_count = state.archived_count.saturating_sub(1)
                }
            }
            state.collection.place(fetched);
            state.recompute(RecomputeTrigger::Forced, &self.config, now);
            event!(Level::DEBUG, from = ?from, to = ?to, "record moved between partitions");
            return ReconcileOutcome::Recomputed;
        }

        let relevant = cached.differs_on(&fetched, &self.config.stats_fields);
        if relevant {
            state.collection.patch(id, &RecordPatch::from(fetched));
            state.recompute(RecomputeTrigger::Forced, &self.config, now);
            event!(Level::DEBUG, "stats-relevant change, recomputed");
            ReconcileOutcome::Recomputed
        } else {
            state.skip.increment();
            state.collection.patch(id, &RecordPatch::from(fetched));
            event!(
                Level::DEBUG,
                skip_count = state.skip.value(),
                "irrelevant change, next recompute deferred"
            );
            ReconcileOutcome::Deferred
        }
    }

    /// The authority no longer knows `id`; drop the cached copy.
    async fn remove_resident(&self, id: &str) -> ReconcileOutcome {
        let now = self.now();
        let mut state = self.state.lock().await;
        let Some((side, _)) = state.collection.remove(id) else {
            event!(Level::DEBUG, "missing record was not cached");
            return ReconcileOutcome::NotResident;
        };
        if side == PartitionSide::Archived {
            state.archived_count = state.archived_count.saturating_sub(1);
        }
        state.recompute(RecomputeTrigger::Forced, &self.config, now);
        event!(Level::DEBUG, "record removed");
        ReconcileOutcome::Removed
    }
}
