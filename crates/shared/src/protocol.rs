//! Push channel protocol: SignalR JSON hub framing and the typed push events.
//!
//! Every record on the socket is a JSON document terminated by the ASCII
//! record separator (0x1E). A single WebSocket text frame may carry several
//! records. After the handshake, each record is a hub message tagged by a
//! numeric `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::models::{Notification, NotificationId};

pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Query parameter carrying the bearer token on the WebSocket URL.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

const TYPE_INVOCATION: u64 = 1;
const TYPE_PING: u64 = 6;
const TYPE_CLOSE: u64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: "json".to_string(),
            version: 1,
        }
    }
}

impl HandshakeRequest {
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        Ok(frame(serde_json::to_string(self)?))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HandshakeResponse {
    /// Parse the server's handshake record; an `error` member rejects the handshake.
    pub fn check(record: &str) -> Result<(), ProtocolError> {
        let response: HandshakeResponse = serde_json::from_str(record)?;
        match response.error {
            Some(err) => Err(ProtocolError::HandshakeRejected(err)),
            None => Ok(()),
        }
    }
}

/// Append the record separator to an encoded record.
pub fn frame(record: String) -> String {
    let mut framed = record;
    framed.push(RECORD_SEPARATOR);
    framed
}

/// Split a text frame into its non-empty records.
pub fn split_records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

/// Hub messages the client cares about. Everything else (stream items,
/// completions, acks) is surfaced as `Other` and skipped by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation { target: String, arguments: Vec<Value> },
    Ping,
    Close { error: Option<String>, allow_reconnect: bool },
    Other(u64),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHubMessage {
    #[serde(rename = "type")]
    kind: Option<u64>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: Option<bool>,
}

impl HubMessage {
    pub fn parse(record: &str) -> Result<Self, ProtocolError> {
        let raw: RawHubMessage = serde_json::from_str(record)?;
        Ok(match raw.kind.ok_or(ProtocolError::MissingType)? {
            TYPE_INVOCATION => HubMessage::Invocation {
                target: raw.target.unwrap_or_default(),
                arguments: raw.arguments,
            },
            TYPE_PING => HubMessage::Ping,
            TYPE_CLOSE => HubMessage::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect.unwrap_or(false),
            },
            other => HubMessage::Other(other),
        })
    }

    pub fn to_frame(&self) -> String {
        let value = match self {
            HubMessage::Invocation { target, arguments } => serde_json::json!({
                "type": TYPE_INVOCATION,
                "target": target,
                "arguments": arguments,
            }),
            HubMessage::Ping => serde_json::json!({ "type": TYPE_PING }),
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                let mut close = serde_json::json!({ "type": TYPE_CLOSE });
                if let Some(error) = error {
                    close["error"] = Value::String(error.clone());
                }
                if *allow_reconnect {
                    close["allowReconnect"] = Value::Bool(true);
                }
                close
            }
            HubMessage::Other(kind) => serde_json::json!({ "type": kind }),
        };
        frame(value.to_string())
    }
}

/// The push event kinds a notification feed subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NotificationReceived,
    NotificationRead,
    AllNotificationsRead,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::NotificationReceived,
        EventKind::NotificationRead,
        EventKind::AllNotificationsRead,
    ];

    /// Hub method name the server invokes for this kind.
    pub fn target(&self) -> &'static str {
        match self {
            EventKind::NotificationReceived => "ReceiveNotification",
            EventKind::NotificationRead => "NotificationRead",
            EventKind::AllNotificationsRead => "AllNotificationsRead",
        }
    }

    pub fn from_target(target: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.target().eq_ignore_ascii_case(target))
    }
}

/// A server-pushed event with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    NotificationReceived(Notification),
    NotificationRead(NotificationId),
    AllNotificationsRead,
}

impl PushEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::NotificationReceived(_) => EventKind::NotificationReceived,
            PushEvent::NotificationRead(_) => EventKind::NotificationRead,
            PushEvent::AllNotificationsRead => EventKind::AllNotificationsRead,
        }
    }

    /// Decode a hub invocation. Returns `Ok(None)` for targets we do not handle.
    pub fn from_invocation(
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<Option<Self>, ProtocolError> {
        let Some(kind) = EventKind::from_target(target) else {
            return Ok(None);
        };

        let event = match kind {
            EventKind::NotificationReceived => {
                PushEvent::NotificationReceived(serde_json::from_value(first_argument(kind, arguments)?)?)
            }
            EventKind::NotificationRead => {
                PushEvent::NotificationRead(serde_json::from_value(first_argument(kind, arguments)?)?)
            }
            EventKind::AllNotificationsRead => PushEvent::AllNotificationsRead,
        };
        Ok(Some(event))
    }

    /// Encode as the hub invocation a server would send.
    pub fn to_hub_message(&self) -> Result<HubMessage, ProtocolError> {
        let arguments = match self {
            PushEvent::NotificationReceived(notification) => vec![serde_json::to_value(notification)?],
            PushEvent::NotificationRead(id) => vec![serde_json::to_value(id)?],
            PushEvent::AllNotificationsRead => Vec::new(),
        };
        Ok(HubMessage::Invocation {
            target: self.kind().target().to_string(),
            arguments,
        })
    }
}

fn first_argument(kind: EventKind, arguments: Vec<Value>) -> Result<Value, ProtocolError> {
    let actual = arguments.len();
    arguments.into_iter().next().ok_or(ProtocolError::Arity {
        target: kind.target(),
        expected: 1,
        actual,
    })
}
