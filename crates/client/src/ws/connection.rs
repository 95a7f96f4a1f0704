//! Connection state, reconnect schedule and the transport seam.
//!
//! The connection manager only talks to [`Connector`] and [`PushChannel`];
//! the WebSocket hub transport in `hub.rs` is one implementation, tests
//! provide scripted ones.

use std::time::Duration;

use async_trait::async_trait;
use notifeed_shared::PushEvent;

use crate::error::TransportError;

/// Discrete lifecycle phase of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Connection state for the push channel
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// `attempt` counts the reconnect attempts that already failed.
    Reconnecting { attempt: u32 },
    Failed { attempts: u32, reason: String },
}

impl ConnectionState {
    pub fn phase(&self) -> Phase {
        match self {
            ConnectionState::Disconnected => Phase::Disconnected,
            ConnectionState::Connecting => Phase::Connecting,
            ConnectionState::Connected => Phase::Connected,
            ConnectionState::Reconnecting { .. } => Phase::Reconnecting,
            ConnectionState::Failed { .. } => Phase::Failed,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn reconnect_attempt(&self) -> u32 {
        match self {
            ConnectionState::Reconnecting { attempt } => *attempt,
            ConnectionState::Failed { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before each reconnect attempt; the last entry repeats.
    pub delays: Vec<Duration>,
    /// Maximum number of reconnect attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delays: [0, 1_000, 5_000, 10_000, 30_000]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    pub fn new(delays: Vec<Duration>, max_attempts: u32) -> Self {
        Self {
            delays,
            max_attempts,
        }
    }

    /// Delay to wait before the attempt that follows `failed` failures.
    pub fn delay_for_attempt(&self, failed: u32) -> Duration {
        let idx = (failed as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(idx).copied().unwrap_or(Duration::ZERO)
    }

    pub fn is_exhausted(&self, failed: u32) -> bool {
        failed >= self.max_attempts
    }
}

/// Opens authenticated push channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete the handshake using `token`.
    async fn connect(&self, token: &str) -> Result<Box<dyn PushChannel>, TransportError>;
}

/// An open push channel.
#[async_trait]
pub trait PushChannel: Send {
    /// Wait for the next push event.
    ///
    /// `Ok(None)` means the server closed the channel. Must be cancel-safe:
    /// the manager drops this future when it is stopped.
    async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError>;

    /// Close the channel from our side.
    async fn close(&mut self);
}
