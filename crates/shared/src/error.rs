//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RFC7807 Problem Details (application/problem+json)
///
/// The notification API answers failures with this envelope; we only read it
/// to surface a meaningful message instead of a raw body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type", default)]
    pub type_url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// Error returned by the notification HTTP API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// A 401 means the credential is no longer valid and the session must end.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Http { status: 401, .. })
    }

    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { status, body } => {
                try_problem_detail(body).unwrap_or_else(|| match status {
                    401 => "Your session has expired".to_string(),
                    403 => "You do not have access to this resource".to_string(),
                    404 => "Resource not found".to_string(),
                    500..=599 => "Server error".to_string(),
                    _ => "Something went wrong".to_string(),
                })
            }
            other => other.to_string(),
        }
    }
}

/// Error decoding a frame of the push channel protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed hub message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("hub message is missing a numeric `type`")]
    MissingType,
    #[error("`{target}` expects {expected} argument(s), got {actual}")]
    Arity {
        target: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}
