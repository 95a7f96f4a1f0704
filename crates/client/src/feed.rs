//! One authenticated notification session.
//!
//! ```text
//! CredentialSource ──token──▶ ConnectionManager ──PushEvent──▶ EventDispatcher
//!                                   │                               │
//!                             sessions (watch)                      ▼
//!                                   └──── resync ───────▶ NotificationStore
//! ```

use std::sync::{Arc, Weak};

use notifeed_shared::{ApiError, NotificationId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api_client::{ApiClient, NotificationApi};
use crate::config::ClientConfig;
use crate::credentials::CredentialSource;
use crate::error::FeedError;
use crate::stores::NotificationStore;
use crate::ws::{ConnectionManager, Connector, HubConnector, ReconnectConfig};

/// Binds a store to a push channel for the lifetime of a session.
///
/// Dropping the feed tears the channel down.
pub struct NotificationFeed {
    connection: Arc<ConnectionManager>,
    store: Arc<NotificationStore>,
    resync: JoinHandle<()>,
    /// Set once a snapshot load is rejected with 401.
    unauthorized: watch::Receiver<bool>,
}

impl NotificationFeed {
    /// Mount a session: requires a credential, then opens the channel.
    ///
    /// The store is empty until the first `Connected` transition triggers a
    /// snapshot load.
    pub async fn mount(
        credentials: Arc<dyn CredentialSource>,
        api: Arc<dyn NotificationApi>,
        connector: Arc<dyn Connector>,
        reconnect: ReconnectConfig,
    ) -> Result<Self, FeedError> {
        let token = credentials.token().ok_or(FeedError::MissingCredential)?;

        let store = Arc::new(NotificationStore::new(api));
        let connection = Arc::new(ConnectionManager::new(connector, credentials, reconnect));
        store.attach(connection.dispatcher());

        // Subscribe before starting so the first session is not missed.
        let (unauthorized_tx, unauthorized) = watch::channel(false);
        let resync = tokio::spawn(resync_on_connect(
            connection.subscribe_sessions(),
            Arc::downgrade(&store),
            unauthorized_tx,
        ));
        connection.start(token).await;

        tracing::info!("notification feed mounted");
        Ok(Self {
            connection,
            store,
            resync,
            unauthorized,
        })
    }

    /// Mount with the shipped HTTP client and hub connector.
    pub async fn from_config(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, FeedError> {
        let api = ApiClient::new(credentials.clone())
            .with_base_url(config.api_url.clone())
            .with_timeout(config.request_timeout)?;
        let connector = HubConnector::new(&config.hub_url)?.with_timeouts(
            config.handshake_timeout,
            config.keep_alive_interval,
            config.server_timeout,
        );
        Self::mount(
            credentials,
            Arc::new(api),
            Arc::new(connector),
            config.reconnect.clone(),
        )
        .await
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Changes to `true` when the server rejects the credential during a
    /// resync. Logging out is up to the caller.
    pub fn subscribe_unauthorized(&self) -> watch::Receiver<bool> {
        self.unauthorized.clone()
    }

    pub async fn mark_read(&self, id: &NotificationId) -> Result<(), ApiError> {
        self.store.mark_read(id).await
    }

    pub async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.store.mark_all_read().await
    }

    /// Stop the channel and forget the session's notifications.
    pub async fn unmount(self) {
        self.connection.stop().await;
        self.resync.abort();
        self.store.clear();
        tracing::info!("notification feed unmounted");
    }
}

impl Drop for NotificationFeed {
    fn drop(&mut self) {
        // The manager may be shared through `connection()`; stop it anyway.
        self.connection.shutdown_now();
        self.resync.abort();
    }
}

impl std::fmt::Debug for NotificationFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFeed")
            .field("state", &self.connection.state())
            .field("unread", &self.store.unread_count())
            .finish()
    }
}

async fn resync_on_connect(
    mut sessions: watch::Receiver<u64>,
    store: Weak<NotificationStore>,
    unauthorized: watch::Sender<bool>,
) {
    while sessions.changed().await.is_ok() {
        let session = *sessions.borrow_and_update();
        let Some(store) = store.upgrade() else {
            return;
        };
        tracing::debug!(session, "channel connected, loading snapshot");
        // Other errors are logged by the store; the next session retries.
        if let Err(err) = store.load_snapshot().await {
            if err.is_unauthorized() {
                tracing::warn!(reason = %err.user_message(), "credential rejected during resync");
                unauthorized.send_replace(true);
            }
        }
    }
}
