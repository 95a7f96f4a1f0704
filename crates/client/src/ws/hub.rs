//! Native push channel over WebSocket using tokio-tungstenite.
//!
//! Speaks the SignalR JSON hub protocol: the bearer token goes in the
//! `access_token` query parameter, a JSON handshake opens the session, and
//! the client pings the server periodically while watching for silence.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use notifeed_shared::{
    split_records, HandshakeRequest, HandshakeResponse, HubMessage, PushEvent, ACCESS_TOKEN_PARAM,
};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::connection::{Connector, PushChannel};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a SignalR-style notification hub.
#[derive(Debug, Clone)]
pub struct HubConnector {
    url: Url,
    handshake_timeout: Duration,
    keep_alive_interval: Duration,
    server_timeout: Duration,
}

impl HubConnector {
    pub fn new(hub_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            url: Url::parse(hub_url)?,
            handshake_timeout: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeouts(
        mut self,
        handshake_timeout: Duration,
        keep_alive_interval: Duration,
        server_timeout: Duration,
    ) -> Self {
        self.handshake_timeout = handshake_timeout;
        self.keep_alive_interval = keep_alive_interval;
        self.server_timeout = server_timeout;
        self
    }

    fn url_for(&self, token: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, token);
        url
    }

    async fn open(&self, token: &str) -> Result<HubChannel, TransportError> {
        let (mut ws, _response) = connect_async(self.url_for(token).as_str()).await?;
        ws.send(Message::text(HandshakeRequest::default().to_frame()?))
            .await?;
        let leftover = read_handshake(&mut ws).await?;

        let mut channel = HubChannel::new(ws, self.keep_alive_interval, self.server_timeout);
        if let Some(text) = leftover {
            channel.ingest(&text);
        }
        Ok(channel)
    }
}

#[async_trait]
impl Connector for HubConnector {
    async fn connect(&self, token: &str) -> Result<Box<dyn PushChannel>, TransportError> {
        tracing::debug!(hub = %self.url, "opening hub connection");
        let channel = tokio::time::timeout(self.handshake_timeout, self.open(token))
            .await
            .map_err(|_| TransportError::HandshakeTimeout(self.handshake_timeout))??;
        tracing::debug!(hub = %self.url, "hub handshake complete");
        Ok(Box::new(channel))
    }
}

/// Wait for the handshake response. Returns whatever followed it in the same
/// frame so early invocations are not lost.
async fn read_handshake(ws: &mut WsStream) -> Result<Option<String>, TransportError> {
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => {
                let text = text.as_str();
                let Some((record, rest)) = text.split_once(notifeed_shared::RECORD_SEPARATOR)
                else {
                    HandshakeResponse::check(text)?;
                    return Ok(None);
                };
                HandshakeResponse::check(record)?;
                return Ok((!rest.is_empty()).then(|| rest.to_string()));
            }
            Message::Close(_) => return Err(TransportError::ClosedDuringHandshake),
            _ => {}
        }
    }
    Err(TransportError::ClosedDuringHandshake)
}

struct HubChannel {
    ws: WsStream,
    pending: VecDeque<PushEvent>,
    keep_alive: Interval,
    server_timeout: Duration,
    last_seen: Instant,
    /// Set once the server sent a close message; holds its error, if any.
    closed: Option<Option<String>>,
}

impl HubChannel {
    fn new(ws: WsStream, keep_alive_interval: Duration, server_timeout: Duration) -> Self {
        let mut keep_alive =
            tokio::time::interval_at(Instant::now() + keep_alive_interval, keep_alive_interval);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ws,
            pending: VecDeque::new(),
            keep_alive,
            server_timeout,
            last_seen: Instant::now(),
            closed: None,
        }
    }

    /// Decode every record of a text frame into pending push events.
    fn ingest(&mut self, text: &str) {
        for record in split_records(text) {
            let message = match HubMessage::parse(record) {
                Ok(message) => message,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping malformed hub record");
                    continue;
                }
            };

            match message {
                HubMessage::Invocation { target, arguments } => {
                    match PushEvent::from_invocation(&target, arguments) {
                        Ok(Some(event)) => self.pending.push_back(event),
                        Ok(None) => tracing::debug!(%target, "ignoring unknown hub target"),
                        Err(err) => tracing::warn!(%target, error = %err, "skipping bad invocation"),
                    }
                }
                HubMessage::Close {
                    error,
                    allow_reconnect,
                } => {
                    tracing::info!(?error, allow_reconnect, "hub sent close");
                    self.closed = Some(error);
                }
                HubMessage::Ping | HubMessage::Other(_) => {}
            }
        }
    }
}

#[async_trait]
impl PushChannel for HubChannel {
    async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if let Some(reason) = &self.closed {
                return match reason {
                    Some(error) => Err(TransportError::ServerClosed(error.clone())),
                    None => Ok(None),
                };
            }

            let deadline = self.last_seen + self.server_timeout;
            tokio::select! {
                frame = self.ws.next() => {
                    let Some(frame) = frame else {
                        return Ok(None);
                    };
                    self.last_seen = Instant::now();
                    match frame? {
                        Message::Text(text) => self.ingest(text.as_str()),
                        Message::Close(frame) => {
                            tracing::info!(?frame, "hub websocket received close frame");
                            return Ok(None);
                        }
                        // Pong replies are queued by tungstenite itself.
                        _ => {}
                    }
                }
                _ = self.keep_alive.tick() => {
                    self.ws.send(Message::text(HubMessage::Ping.to_frame())).await?;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(TransportError::ServerTimeout(self.server_timeout));
                }
            }
        }
    }

    async fn close(&mut self) {
        let close = HubMessage::Close {
            error: None,
            allow_reconnect: false,
        };
        if let Err(err) = self.ws.send(Message::text(close.to_frame())).await {
            tracing::debug!(error = %err, "failed to send hub close message");
        }
        if let Err(err) = self.ws.close(None).await {
            tracing::debug!(error = %err, "failed to close websocket");
        }
    }
}
