//! Notifeed - Main entry point
//!
//! Mounts a notification feed for the stored credential and logs every
//! change until interrupted.

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Local;
use notifeed_client::{
    ClientConfig, FeedError, FileStore, NotificationFeed, NotificationState, StoredToken,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("notifeed_client=debug,notifeed=info")),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let storage = FileStore::default_location().context("no config directory on this platform")?;
    let token = StoredToken::new(storage, config.token_key.clone());

    if let Ok(fresh) = std::env::var("NOTIFEED_TOKEN") {
        if !token.store(&fresh) {
            tracing::warn!("could not persist NOTIFEED_TOKEN");
        }
    }

    let feed = match NotificationFeed::from_config(&config, Arc::new(token.clone())).await {
        Ok(feed) => feed,
        Err(FeedError::MissingCredential) => {
            bail!("not logged in: set NOTIFEED_TOKEN to a bearer token")
        }
        Err(FeedError::Api(err)) => bail!("cannot reach the notification API: {}", err.user_message()),
        Err(err) => return Err(err.into()),
    };

    let mut notifications = feed.store().subscribe();
    let mut connection = feed.connection().subscribe();
    let mut unauthorized = feed.subscribe_unauthorized();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            changed = notifications.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = notifications.borrow_and_update().clone();
                render(&state);
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = connection.borrow_and_update().clone();
                if state.is_connecting() {
                    tracing::info!(attempt = state.reconnect_attempt(), "connecting to notification hub");
                } else {
                    tracing::info!(state = ?state, "connection");
                }
            }
            changed = unauthorized.changed() => {
                if changed.is_err() {
                    break;
                }
                if *unauthorized.borrow_and_update() {
                    tracing::error!("credential rejected by the server, logging out");
                    token.clear();
                    break;
                }
            }
        }
    }

    feed.unmount().await;
    Ok(())
}

fn render(state: &NotificationState) {
    tracing::info!(
        unread = state.unread_count,
        total = state.notifications.len(),
        "notifications"
    );
    for n in &state.notifications {
        let when = n
            .created_at
            .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let marker = if n.is_read { ' ' } else { '*' };
        tracing::info!("{marker} {} [{when}] {}", n.kind.icon(), n.message);
    }
}
