//! Routes push events to the handlers registered for their kind.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use notifeed_shared::{EventKind, Notification, NotificationId, PushEvent};

type Handler = Arc<dyn Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handler registry shared between the connection manager and its owners.
///
/// Cloning is cheap and every clone sees the same registrations.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<HashMap<EventKind, Vec<Handler>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`. Handlers run in registration order.
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.entry(kind).or_default().push(Arc::new(handler));
    }

    pub fn on_notification(
        &self,
        handler: impl Fn(&Notification) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.on(EventKind::NotificationReceived, move |event| match event {
            PushEvent::NotificationReceived(notification) => handler(notification),
            _ => Ok(()),
        });
    }

    pub fn on_notification_read(
        &self,
        handler: impl Fn(&NotificationId) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.on(EventKind::NotificationRead, move |event| match event {
            PushEvent::NotificationRead(id) => handler(id),
            _ => Ok(()),
        });
    }

    pub fn on_all_notifications_read(
        &self,
        handler: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.on(EventKind::AllNotificationsRead, move |event| match event {
            PushEvent::AllNotificationsRead => handler(),
            _ => Ok(()),
        });
    }

    /// Drop every handler registered for `kind`.
    pub fn off(&self, kind: EventKind) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.remove(&kind);
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every handler for the event's kind.
    ///
    /// A handler that errors or panics is logged and skipped; the remaining
    /// handlers still run. Returns the number of handlers that succeeded.
    pub fn dispatch(&self, event: &PushEvent) -> usize {
        let kind = event.kind();
        // Snapshot the list so handlers may register more handlers.
        let handlers: Vec<Handler> = {
            let registry = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            registry.get(&kind).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            tracing::debug!(target_event = kind.target(), "no handler registered");
            return 0;
        }

        let mut succeeded = 0;
        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(err)) => {
                    tracing::error!(target_event = kind.target(), index, error = %err, "event handler failed");
                }
                Err(_) => {
                    tracing::error!(target_event = kind.target(), index, "event handler panicked");
                }
            }
        }
        succeeded
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let counts: HashMap<&'static str, usize> = registry
            .iter()
            .map(|(kind, handlers)| (kind.target(), handlers.len()))
            .collect();
        f.debug_struct("EventDispatcher")
            .field("handlers", &counts)
            .finish()
    }
}
