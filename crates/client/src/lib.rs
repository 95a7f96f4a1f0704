//! Notifeed Client - real-time notification feed
//!
//! This crate keeps a live notification list for an authenticated user:
//! a push channel with automatic reconnection, per-event handlers, and a
//! store that reconciles pushed events with fetched snapshots.

pub mod api_client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod feed;
pub mod storage;
pub mod stores;
pub mod ws;

pub use api_client::{ApiClient, NotificationApi};
pub use config::ClientConfig;
pub use credentials::{CredentialSource, StaticToken, StoredToken};
pub use error::{FeedError, TransportError};
pub use feed::NotificationFeed;
pub use storage::FileStore;
pub use stores::{NotificationState, NotificationStore};
pub use ws::{ConnectionManager, ConnectionState, EventDispatcher, Phase, ReconnectConfig};
