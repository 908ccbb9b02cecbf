use crate::core::{RecordId, Result, SyncError};
use crate::dashboard::Dashboard;
use crate::remote::RemoteRecordApi;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationAction {
    Created,
    Updated,
    Archived,
    Restored,
    Deleted,
}

/// Out-of-band change event. A trigger only: its fields are never copied
/// into the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub entity_type: String,
    pub entity_id: RecordId,
    pub action: NotificationAction,
}

impl PushNotification {
    pub fn new(entity_type: &str, entity_id: &str, action: NotificationAction) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action,
        }
    }
}

/// Background task feeding a broadcast channel into `Dashboard::reconcile`.
pub struct NotificationListener {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl NotificationListener {
    /// Signals the listener to stop and waits for it to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| SyncError::Remote(format!("notification listener join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Lifecycle of a dashboard's one subscription.
#[derive(Default)]
pub(crate) enum Subscription {
    #[default]
    Idle,
    Listening(NotificationListener),
    Closed,
}

fn spawn_listener<A>(
    dashboard: Weak<Dashboard<A>>,
    mut receiver: broadcast::Receiver<PushNotification>,
) -> NotificationListener
where
    A: RemoteRecordApi + 'static,
{
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                received = receiver.recv() => {
                    let notification = match received {
                        Ok(notification) => notification,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("notification listener lagged, {} notification(s) missed", missed);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("notification channel closed");
                            break;
                        }
                    };
                    let Some(dashboard) = dashboard.upgrade() else {
                        break;
                    };
                    tokio::spawn(async move {
                        dashboard.reconcile(&notification).await;
                    });
                }
            }
        }
    });

    NotificationListener {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}

impl<A: RemoteRecordApi + 'static> Dashboard<A> {
    /// Starts reconciling notifications from `receiver`. Allowed once per
    /// dashboard; every notification is handled in its own task.
    pub async fn subscribe(
        self: &Arc<Self>,
        receiver: broadcast::Receiver<PushNotification>,
    ) -> Result<()> {
        let mut subscription = self.subscription.lock().await;
        if !matches!(*subscription, Subscription::Idle) {
            return Err(SyncError::AlreadySubscribed(
                self.config.entity_plural.clone(),
            ));
        }
        *subscription = Subscription::Listening(spawn_listener(Arc::downgrade(self), receiver));
        debug!("{} dashboard subscribed to notifications", self.config.entity_plural);
        Ok(())
    }

    /// Stops the listener. Returns `false` if it was not running.
    pub async fn unsubscribe(&self) -> Result<bool> {
        let previous = {
            let mut subscription = self.subscription.lock().await;
            match std::mem::take(&mut *subscription) {
                Subscription::Listening(listener) => {
                    *subscription = Subscription::Closed;
                    listener
                }
                other => {
                    *subscription = other;
                    return Ok(false);
                }
            }
        };
        previous.stop().await?;
        debug!("{} dashboard unsubscribed", self.config.entity_plural);
        Ok(true)
    }

    pub async fn is_subscribed(&self) -> bool {
        matches!(*self.subscription.lock().await, Subscription::Listening(_))
    }
}
