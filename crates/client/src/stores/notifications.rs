//! Notification store: the ordered feed and its unread count.
//!
//! Pushed events mutate the state incrementally; `load_snapshot` replaces it
//! with the server's list. The unread count is re-verified after every
//! mutation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use notifeed_shared::{ApiError, EventKind, Notification, NotificationId, PushEvent};
use tokio::sync::watch;

use crate::api_client::NotificationApi;
use crate::ws::EventDispatcher;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationState {
    /// Most recent first, ids unique.
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    /// Whether a snapshot has been applied since the store was created.
    pub is_loaded: bool,
}

impl NotificationState {
    pub fn count_unread(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.notifications.iter().find(|n| &n.id == id)
    }

    /// Replace everything with a fetched snapshot, keeping its order.
    pub fn replace(&mut self, snapshot: Vec<Notification>) {
        let mut notifications: Vec<Notification> = Vec::with_capacity(snapshot.len());
        for notification in snapshot {
            if notifications.iter().any(|n| n.id == notification.id) {
                tracing::warn!(id = %notification.id, "snapshot repeats a notification id, keeping the first");
                continue;
            }
            notifications.push(notification);
        }
        self.unread_count = notifications.iter().filter(|n| !n.is_read).count();
        self.notifications = notifications;
        self.is_loaded = true;
    }

    /// Apply a push event. Returns whether anything changed.
    pub fn apply(&mut self, event: &PushEvent) -> bool {
        let changed = match event {
            PushEvent::NotificationReceived(notification) => {
                if self.get(&notification.id).is_some() {
                    tracing::debug!(id = %notification.id, "ignoring duplicate pushed notification");
                    false
                } else {
                    if !notification.is_read {
                        self.unread_count += 1;
                    }
                    self.notifications.insert(0, notification.clone());
                    true
                }
            }
            PushEvent::NotificationRead(id) => {
                match self.notifications.iter_mut().find(|n| &n.id == id) {
                    Some(entry) if !entry.is_read => {
                        entry.is_read = true;
                        self.unread_count = self.unread_count.saturating_sub(1);
                        true
                    }
                    _ => false,
                }
            }
            PushEvent::AllNotificationsRead => {
                let changed = self.unread_count != 0 || self.notifications.iter().any(|n| !n.is_read);
                for entry in &mut self.notifications {
                    entry.is_read = true;
                }
                self.unread_count = 0;
                changed
            }
        };
        self.enforce_unread_invariant();
        changed
    }

    fn enforce_unread_invariant(&mut self) {
        let actual = self.count_unread();
        if actual != self.unread_count {
            tracing::warn!(tracked = self.unread_count, actual, "unread count drifted, repairing");
            self.unread_count = actual;
        }
    }
}

/// Holds the notification feed for one session.
pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    state: watch::Sender<NotificationState>,
    /// Ticket handed to each `load_snapshot` call when it starts.
    snapshot_ticket: AtomicU64,
    /// Ticket of the most recently applied snapshot.
    applied_ticket: AtomicU64,
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        let (state, _) = watch::channel(NotificationState::default());
        Self {
            api,
            state,
            snapshot_ticket: AtomicU64::new(0),
            applied_ticket: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> NotificationState {
        self.state.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state.borrow().unread_count
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.borrow().notifications.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationState> {
        self.state.subscribe()
    }

    /// Route the three push event kinds into this store.
    pub fn attach(self: &Arc<Self>, dispatcher: &EventDispatcher) {
        for kind in EventKind::ALL {
            let store: Weak<Self> = Arc::downgrade(self);
            dispatcher.on(kind, move |event| {
                if let Some(store) = store.upgrade() {
                    store.apply_event(event);
                }
                Ok(())
            });
        }
    }

    pub fn apply_event(&self, event: &PushEvent) -> bool {
        self.state.send_if_modified(|state| state.apply(event))
    }

    /// Fetch the full list and replace the local state with it.
    ///
    /// On failure the state is left untouched. A response that arrives after
    /// a newer snapshot was applied is dropped.
    pub async fn load_snapshot(&self) -> Result<(), ApiError> {
        let ticket = self.snapshot_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let notifications = match self.api.list_notifications().await {
            Ok(notifications) => notifications,
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch notifications");
                return Err(err);
            }
        };

        let count = notifications.len();
        let applied = self.state.send_if_modified(|state| {
            if self.applied_ticket.load(Ordering::SeqCst) > ticket {
                return false;
            }
            self.applied_ticket.store(ticket, Ordering::SeqCst);
            state.replace(notifications);
            true
        });

        if applied {
            tracing::debug!(count, unread = self.unread_count(), "notification snapshot applied");
        } else {
            tracing::debug!(ticket, "discarding stale notification snapshot");
        }
        Ok(())
    }

    /// Mark one notification read on the server, then resynchronize.
    pub async fn mark_read(&self, id: &NotificationId) -> Result<(), ApiError> {
        if let Err(err) = self.api.mark_notification_read(id).await {
            tracing::error!(%id, error = %err, "failed to mark notification as read");
            return Err(err);
        }
        self.load_snapshot().await
    }

    /// Mark everything read on the server, then resynchronize.
    pub async fn mark_all_read(&self) -> Result<(), ApiError> {
        if let Err(err) = self.api.mark_all_notifications_read().await {
            tracing::error!(error = %err, "failed to mark all notifications as read");
            return Err(err);
        }
        self.load_snapshot().await
    }

    /// Drop all state (logout).
    pub fn clear(&self) {
        self.state.send_replace(NotificationState::default());
    }
}
