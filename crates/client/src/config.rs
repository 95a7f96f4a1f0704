//! Client configuration from environment variables.

use std::time::Duration;

use anyhow::{ensure, Context};

use crate::credentials::DEFAULT_TOKEN_KEY;
use crate::ws::ReconnectConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the notification REST API.
    pub api_url: String,
    /// WebSocket URL of the notification hub.
    pub hub_url: String,
    pub reconnect: ReconnectConfig,
    pub keep_alive_interval: Duration,
    pub server_timeout: Duration,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    /// Storage key the bearer token is kept under.
    pub token_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            hub_url: "ws://localhost:5000/hubs/notification".to_string(),
            reconnect: ReconnectConfig::default(),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            token_key: DEFAULT_TOKEN_KEY.to_string(),
        }
    }
}

impl ClientConfig {
    /// Read the configuration from the process environment.
    ///
    /// Environment variables:
    /// - `NOTIFEED_API_URL`, `NOTIFEED_HUB_URL`
    /// - `NOTIFEED_RECONNECT_DELAYS_MS`: comma separated, e.g. "0,1000,5000"
    /// - `NOTIFEED_MAX_RECONNECT_ATTEMPTS`
    /// - `NOTIFEED_KEEP_ALIVE_SECS`, `NOTIFEED_SERVER_TIMEOUT_SECS`
    /// - `NOTIFEED_HANDSHAKE_TIMEOUT_SECS`, `NOTIFEED_REQUEST_TIMEOUT_SECS`
    /// - `NOTIFEED_TOKEN_KEY`
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("NOTIFEED_API_URL") {
            config.api_url = url;
        }
        if let Some(url) = lookup("NOTIFEED_HUB_URL") {
            config.hub_url = url;
        }
        if let Some(raw) = lookup("NOTIFEED_RECONNECT_DELAYS_MS") {
            config.reconnect.delays =
                parse_delays(&raw).context("invalid NOTIFEED_RECONNECT_DELAYS_MS")?;
        }
        if let Some(raw) = lookup("NOTIFEED_MAX_RECONNECT_ATTEMPTS") {
            config.reconnect.max_attempts = raw
                .trim()
                .parse()
                .context("invalid NOTIFEED_MAX_RECONNECT_ATTEMPTS")?;
        }
        for (key, slot) in [
            ("NOTIFEED_KEEP_ALIVE_SECS", &mut config.keep_alive_interval),
            ("NOTIFEED_SERVER_TIMEOUT_SECS", &mut config.server_timeout),
            ("NOTIFEED_HANDSHAKE_TIMEOUT_SECS", &mut config.handshake_timeout),
            ("NOTIFEED_REQUEST_TIMEOUT_SECS", &mut config.request_timeout),
        ] {
            if let Some(raw) = lookup(key) {
                let secs: u64 = raw.trim().parse().with_context(|| format!("invalid {key}"))?;
                ensure!(secs > 0, "{key} must be positive");
                *slot = Duration::from_secs(secs);
            }
        }
        if let Some(key) = lookup("NOTIFEED_TOKEN_KEY") {
            config.token_key = key;
        }

        ensure!(
            config.server_timeout > config.keep_alive_interval,
            "server timeout ({:?}) must exceed the keep-alive interval ({:?})",
            config.server_timeout,
            config.keep_alive_interval
        );
        Ok(config)
    }
}

fn parse_delays(raw: &str) -> anyhow::Result<Vec<Duration>> {
    let delays = raw
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("`{part}` is not a number of milliseconds"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    ensure!(!delays.is_empty(), "at least one delay is required");
    ensure!(
        delays.windows(2).all(|pair| pair[0] <= pair[1]),
        "delays must be ascending"
    );
    Ok(delays)
}
