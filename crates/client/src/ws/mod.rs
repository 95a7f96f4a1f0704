//! Push channel for real-time notification delivery.
//!
//! This module provides:
//! - Connection management with auto-reconnect ([`ConnectionManager`])
//! - Routing of push events to handlers ([`EventDispatcher`])
//! - The WebSocket hub transport ([`HubConnector`])
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ConnectionManager              │
//! │  (connect, reconnect schedule, stop)         │
//! └──────────────────────────────────────────────┘
//!            │                       │
//!            ▼                       ▼
//!   ┌─────────────────┐     ┌─────────────────┐
//!   │    Connector    │     │ EventDispatcher │
//!   │ (HubConnector)  │     │ (per-kind       │
//!   └─────────────────┘     │  handlers)      │
//!            │              └─────────────────┘
//!            ▼                       │
//!   ┌─────────────────┐              ▼
//!   │   PushChannel   │ ───► ┌─────────────────┐
//!   │ (one socket)    │      │NotificationStore│
//!   └─────────────────┘      └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(connector, credentials, ReconnectConfig::default());
//! manager.dispatcher().on_notification(|n| {
//!     tracing::info!(id = %n.id, "new notification");
//!     Ok(())
//! });
//! manager.start_with_credentials().await?;
//! ```

mod connection;
mod dispatcher;
mod hub;
mod manager;

pub use connection::{ConnectionState, Connector, Phase, PushChannel, ReconnectConfig};
pub use dispatcher::EventDispatcher;
pub use hub::HubConnector;
pub use manager::ConnectionManager;
