//! Lifecycle of a single push channel: connect, reconnect, teardown.

use std::sync::Arc;
use std::time::Duration;

use notifeed_shared::{EventKind, PushEvent};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use super::connection::{ConnectionState, Connector, Phase, ReconnectConfig};
use super::dispatcher::EventDispatcher;
use crate::credentials::CredentialSource;
use crate::error::FeedError;

/// How long `stop` waits for the channel task to close gracefully.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Owns at most one push channel and keeps it alive until stopped.
///
/// `start`/`stop` are serialized: a call waits for any in-flight one to
/// settle, so two channels never coexist. Dropping the manager stops the
/// channel as well.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    credentials: Arc<dyn CredentialSource>,
    lifecycle: Mutex<Option<ActiveChannel>>,
}

/// State the background task needs.
struct Shared {
    connector: Arc<dyn Connector>,
    reconnect: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    /// Bumped on every transition into `Connected`.
    sessions: watch::Sender<u64>,
    dispatcher: EventDispatcher,
}

struct ActiveChannel {
    token: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (sessions, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                connector,
                reconnect,
                state,
                sessions,
                dispatcher: EventDispatcher::new(),
            }),
            credentials,
            lifecycle: Mutex::new(None),
        }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Register a push event handler; see [`EventDispatcher::on`].
    pub fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.shared.dispatcher.on(kind, handler);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.borrow().phase()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.state.borrow().reconnect_attempt()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Receiver that changes every time the channel (re)connects.
    pub fn subscribe_sessions(&self) -> watch::Receiver<u64> {
        self.shared.sessions.subscribe()
    }

    /// Token the current channel is bound to, if any.
    pub async fn token(&self) -> Option<String> {
        self.lifecycle
            .lock()
            .await
            .as_ref()
            .map(|active| active.token.clone())
    }

    /// Open a channel authenticated with `token`, replacing any existing one.
    pub async fn start(&self, token: impl Into<String>) {
        let token = token.into();
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(active) = lifecycle.take() {
            tracing::debug!("restarting push channel");
            self.shutdown(active).await;
        }

        self.shared.set_state(ConnectionState::Connecting);
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(self.shared.clone(), token.clone(), shutdown_rx));
        *lifecycle = Some(ActiveChannel {
            token,
            shutdown,
            task,
        });
    }

    /// Like [`start`](Self::start) with the token from the credential source.
    pub async fn start_with_credentials(&self) -> Result<(), FeedError> {
        let token = self
            .credentials
            .token()
            .ok_or(FeedError::MissingCredential)?;
        self.start(token).await;
        Ok(())
    }

    /// Tear down the channel. Safe to call in any phase.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.take() {
            Some(active) => self.shutdown(active).await,
            None => self.shared.set_state(ConnectionState::Disconnected),
        }
    }

    /// Signal the channel task to close without waiting for it.
    ///
    /// For synchronous contexts such as `Drop`. The task closes the channel
    /// and exits on its own; no reconnect is attempted afterwards.
    pub fn shutdown_now(&self) {
        match self.lifecycle.try_lock() {
            Ok(mut lifecycle) => {
                if let Some(active) = lifecycle.take() {
                    let _ = active.shutdown.send(());
                    tracing::info!("push channel shutdown requested");
                }
                self.shared.set_state(ConnectionState::Disconnected);
            }
            Err(_) => {
                tracing::warn!("push channel start/stop in progress, shutdown skipped");
            }
        }
    }

    async fn shutdown(&self, active: ActiveChannel) {
        let ActiveChannel {
            shutdown, mut task, ..
        } = active;
        // The task may already be gone (Failed); that is fine.
        let _ = shutdown.send(());
        match tokio::time::timeout(STOP_GRACE, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "push channel task ended abnormally"),
            Err(_) => {
                tracing::warn!("push channel did not close in time, aborting");
                task.abort();
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::info!("push channel stopped");
    }
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next.clone());
        if prev != next {
            tracing::debug!(from = ?prev, to = ?next, "connection state changed");
        }
    }
}

/// Connection loop for one bound token. Returns when shut down or when the
/// reconnect budget is exhausted.
async fn run(shared: Arc<Shared>, token: String, mut shutdown: oneshot::Receiver<()>) {
    let mut failed: u32 = 0;
    let mut reconnecting = false;
    let mut last_error = String::new();

    loop {
        if reconnecting {
            if shared.reconnect.is_exhausted(failed) {
                tracing::error!(attempts = failed, error = %last_error, "max reconnect attempts exceeded");
                shared.set_state(ConnectionState::Failed {
                    attempts: failed,
                    reason: format!(
                        "Max reconnect attempts ({}) exceeded: {}",
                        shared.reconnect.max_attempts, last_error
                    ),
                });
                return;
            }

            shared.set_state(ConnectionState::Reconnecting { attempt: failed });
            let delay = shared.reconnect.delay_for_attempt(failed);
            tracing::info!(?delay, attempt = failed + 1, "reconnecting push channel");
            tokio::select! {
                biased;
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let connected = tokio::select! {
            biased;
            _ = &mut shutdown => return,
            result = shared.connector.connect(&token) => result,
        };

        let mut channel = match connected {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(error = %err, attempt = failed, "push channel connect failed");
                if reconnecting {
                    failed += 1;
                }
                reconnecting = true;
                last_error = err.to_string();
                continue;
            }
        };

        failed = 0;
        reconnecting = false;
        shared.set_state(ConnectionState::Connected);
        shared.sessions.send_modify(|n| *n += 1);
        tracing::info!("push channel connected");

        let reason = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    channel.close().await;
                    return;
                }
                next = channel.next_event() => match next {
                    Ok(Some(event)) => {
                        shared.dispatcher.dispatch(&event);
                    }
                    Ok(None) => break "closed by server".to_string(),
                    Err(err) => break err.to_string(),
                },
            }
        };

        tracing::warn!(%reason, "push channel lost");
        last_error = reason;
        reconnecting = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticToken;
    use crate::error::TransportError;
    use crate::ws::connection::PushChannel;
    use async_trait::async_trait;
    use notifeed_shared::{Notification, NotificationId};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    enum Script {
        Accept,
        Fail,
    }

    /// Server side of an accepted fake channel.
    struct Remote {
        events: mpsc::UnboundedSender<Option<PushEvent>>,
        closed_by_client: Arc<AtomicBool>,
    }

    impl Remote {
        fn push(&self, event: PushEvent) {
            self.events.send(Some(event)).unwrap();
        }

        fn drop_connection(&self) {
            self.events.send(None).unwrap();
        }
    }

    struct FakeChannel {
        events: mpsc::UnboundedReceiver<Option<PushEvent>>,
        closed_by_client: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PushChannel for FakeChannel {
        async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError> {
            Ok(self.events.recv().await.flatten())
        }

        async fn close(&mut self) {
            self.closed_by_client.store(true, Ordering::SeqCst);
        }
    }

    struct FakeConnector {
        script: std::sync::Mutex<VecDeque<Script>>,
        attempts: AtomicUsize,
        tokens: std::sync::Mutex<Vec<String>>,
        remotes: mpsc::UnboundedSender<Remote>,
    }

    impl FakeConnector {
        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, token: &str) -> Result<Box<dyn PushChannel>, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.tokens.lock().unwrap().push(token.to_string());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Script::Accept) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let closed = Arc::new(AtomicBool::new(false));
                    let _ = self.remotes.send(Remote {
                        events: tx,
                        closed_by_client: closed.clone(),
                    });
                    Ok(Box::new(FakeChannel {
                        events: rx,
                        closed_by_client: closed,
                    }))
                }
                Some(Script::Fail) | None => Err(TransportError::Other("connection refused".into())),
            }
        }
    }

    fn harness(
        script: Vec<Script>,
        reconnect: ReconnectConfig,
    ) -> (ConnectionManager, Arc<FakeConnector>, mpsc::UnboundedReceiver<Remote>) {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(FakeConnector {
            script: std::sync::Mutex::new(script.into()),
            attempts: AtomicUsize::new(0),
            tokens: std::sync::Mutex::new(Vec::new()),
            remotes: remotes_tx,
        });
        let manager = ConnectionManager::new(
            connector.clone(),
            Arc::new(StaticToken::new("secret")),
            reconnect,
        );
        (manager, connector, remotes_rx)
    }

    async fn wait_for(manager: &ConnectionManager, f: impl Fn(&ConnectionState) -> bool) {
        let mut rx = manager.subscribe();
        rx.wait_for(|state| f(state)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_second_reconnect_attempt() {
        let (manager, connector, mut remotes) = harness(
            vec![Script::Accept, Script::Fail, Script::Accept],
            ReconnectConfig::default(),
        );

        manager.start("t1").await;
        let first = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;
        let sessions = manager.subscribe_sessions();
        assert_eq!(*sessions.borrow(), 1);

        let lost_at = Instant::now();
        first.drop_connection();
        let _second = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;

        assert_eq!(connector.attempts(), 3);
        assert_eq!(manager.phase(), Phase::Connected);
        assert_eq!(manager.reconnect_attempt(), 0);
        assert_eq!(*sessions.borrow(), 2);
        // First retry is immediate, the second waits for the 1s slot.
        assert!(lost_at.elapsed() >= Duration::from_secs(1));
        assert!(!first.closed_by_client.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget_is_spent() {
        let config = ReconnectConfig::new(vec![Duration::ZERO, Duration::from_millis(100)], 3);
        let (manager, connector, mut remotes) = harness(
            vec![Script::Accept, Script::Fail, Script::Fail, Script::Fail, Script::Accept],
            config,
        );

        manager.start("t1").await;
        let remote = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;

        remote.drop_connection();
        wait_for(&manager, |s| s.phase() == Phase::Failed).await;
        assert_eq!(connector.attempts(), 4);
        assert_eq!(manager.reconnect_attempt(), 3);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(connector.attempts(), 4);
        assert!(!manager.is_connected());

        // Failed is terminal until an explicit start.
        manager.start("t1").await;
        let _again = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;
        assert_eq!(connector.attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_connect_failure_is_retried() {
        let (manager, connector, mut remotes) =
            harness(vec![Script::Fail, Script::Accept], ReconnectConfig::default());

        manager.start("t1").await;
        let _remote = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_connected_never_reconnects() {
        let (manager, connector, mut remotes) =
            harness(vec![Script::Accept, Script::Accept], ReconnectConfig::default());

        manager.start("t1").await;
        let remote = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;

        manager.stop().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(remote.closed_by_client.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(connector.attempts(), 1);
        assert_eq!(manager.phase(), Phase::Disconnected);

        // Idempotent.
        manager.stop().await;
        assert_eq!(manager.phase(), Phase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_reconnect_timer() {
        let config = ReconnectConfig::new(vec![Duration::ZERO, Duration::from_secs(10)], 5);
        let (manager, connector, mut remotes) =
            harness(vec![Script::Accept, Script::Fail, Script::Accept], config);

        manager.start("t1").await;
        let remote = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;

        remote.drop_connection();
        wait_for(&manager, |s| *s == ConnectionState::Reconnecting { attempt: 1 }).await;
        manager.stop().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(manager.phase(), Phase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn start_replaces_existing_channel() {
        let (manager, connector, mut remotes) =
            harness(vec![Script::Accept, Script::Accept], ReconnectConfig::default());

        manager.start("old-token").await;
        let first = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;

        manager.start("new-token").await;
        let _second = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;

        assert!(first.closed_by_client.load(Ordering::SeqCst));
        assert_eq!(*connector.tokens.lock().unwrap(), vec!["old-token", "new-token"]);
        assert_eq!(manager.token().await.as_deref(), Some("new-token"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_with_credentials_uses_injected_token() {
        let (manager, connector, mut remotes) =
            harness(vec![Script::Accept], ReconnectConfig::default());

        manager.start_with_credentials().await.unwrap();
        let _remote = remotes.recv().await.unwrap();
        assert_eq!(*connector.tokens.lock().unwrap(), vec!["secret"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_now_stops_without_awaiting() {
        let (manager, connector, mut remotes) =
            harness(vec![Script::Accept, Script::Accept], ReconnectConfig::default());

        manager.start("t1").await;
        let remote = remotes.recv().await.unwrap();
        wait_for(&manager, ConnectionState::is_connected).await;

        manager.shutdown_now();
        assert_eq!(manager.phase(), Phase::Disconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(remote.closed_by_client.load(Ordering::SeqCst));
        assert_eq!(connector.attempts(), 1);
        assert_eq!(manager.phase(), Phase::Disconnected);
        assert_eq!(manager.token().await, None);
    }

    #[tokio::test]
    async fn missing_credential_is_reported() {
        let (remotes_tx, _remotes_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(FakeConnector {
            script: std::sync::Mutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
            tokens: std::sync::Mutex::new(Vec::new()),
            remotes: remotes_tx,
        });
        let manager = ConnectionManager::new(
            connector.clone(),
            Arc::new(StaticToken::none()),
            ReconnectConfig::default(),
        );

        let err = manager.start_with_credentials().await.unwrap_err();
        assert!(matches!(err, FeedError::MissingCredential));
        assert_eq!(connector.attempts(), 0);
        assert_eq!(manager.phase(), Phase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_dispatched_in_order_and_survive_handler_errors() {
        let (manager, connector, mut remotes) =
            harness(vec![Script::Accept], ReconnectConfig::default());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        manager.on(EventKind::NotificationReceived, |_| anyhow::bail!("broken handler"));
        manager.dispatcher().on_notification(move |n| {
            seen_tx.send(n.id.clone()).unwrap();
            Ok(())
        });

        manager.start("t1").await;
        let remote = remotes.recv().await.unwrap();
        for id in [1, 2, 3] {
            remote.push(PushEvent::NotificationReceived(Notification::new(id, "n")));
        }

        for id in [1, 2, 3] {
            assert_eq!(seen_rx.recv().await.unwrap(), NotificationId::from(id));
        }
        assert!(manager.is_connected());
        assert_eq!(connector.attempts(), 1);
    }
}
