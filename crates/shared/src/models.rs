//! Notification data model shared by the REST snapshot and the push channel.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque notification identifier.
///
/// The server may emit ids as JSON numbers or strings; both decode to the same
/// textual id so a snapshot entry and a pushed entry compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i32> for NotificationId {
    fn from(id: i32) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for NotificationId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(i64),
            Text(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Self(n.to_string()),
            Repr::Text(s) => Self(s),
        })
    }
}

/// Presentation category of a notification, decoded from the numeric `type`.
///
/// Unknown codes are preserved in `General` so they round-trip unchanged and
/// render with the default icon. A `type` that is not an integer code at all
/// (null, text, out of range) decodes as the default kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i32")]
pub enum NotificationKind {
    Warning,
    Critical,
    Pinned,
    General(i32),
}

impl NotificationKind {
    pub fn icon(&self) -> &'static str {
        match self {
            NotificationKind::Warning => "⚠️",
            NotificationKind::Critical => "🔴",
            NotificationKind::Pinned => "📌",
            NotificationKind::General(_) => "🔵",
        }
    }
}

impl Default for NotificationKind {
    fn default() -> Self {
        NotificationKind::General(0)
    }
}

impl From<i32> for NotificationKind {
    fn from(code: i32) -> Self {
        match code {
            3 => NotificationKind::Warning,
            4 => NotificationKind::Critical,
            10 => NotificationKind::Pinned,
            other => NotificationKind::General(other),
        }
    }
}

impl<'de> Deserialize<'de> for NotificationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
        let code = match &raw {
            Some(serde_json::Value::Number(n)) => n.as_i64(),
            Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        Ok(code
            .and_then(|code| i32::try_from(code).ok())
            .map(NotificationKind::from)
            .unwrap_or_default())
    }
}

impl From<NotificationKind> for i32 {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Warning => 3,
            NotificationKind::Critical => 4,
            NotificationKind::Pinned => 10,
            NotificationKind::General(code) => code,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub message: String,
    /// Display-only; `None` when the server sent nothing parseable.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_read: bool,
}

impl Notification {
    pub fn new(id: impl Into<NotificationId>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NotificationKind::default(),
            message: message.into(),
            created_at: Some(Utc::now()),
            is_read: false,
        }
    }

    pub fn read(mut self) -> Self {
        self.is_read = true;
        self
    }
}

/// Accepts RFC 3339 timestamps and offset-less ISO-8601 ones (taken as UTC).
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(|v| v.as_str()).and_then(parse_timestamp))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_string_ids_compare_equal() {
        let a: NotificationId = serde_json::from_value(json!(42)).unwrap();
        let b: NotificationId = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "42");
    }

    #[test]
    fn unknown_type_falls_back_to_general() {
        let n: Notification = serde_json::from_value(json!({
            "id": 1,
            "type": 99,
            "message": "hello",
            "createdAt": "2024-05-01T10:00:00Z",
            "isRead": false
        }))
        .unwrap();
        assert_eq!(n.kind, NotificationKind::General(99));
        assert_eq!(n.kind.icon(), "🔵");
        assert_eq!(i32::from(n.kind), 99);
    }

    #[test]
    fn malformed_types_do_not_fail_a_snapshot() {
        let snapshot: Vec<Notification> = serde_json::from_value(json!([
            { "id": 1, "type": null, "message": "null type" },
            { "id": 2, "type": "Warning", "message": "named type" },
            { "id": 3, "type": 5_000_000_000i64, "message": "too large" },
            { "id": 4, "type": 2.5, "message": "fractional" },
            { "id": 5, "type": "4", "message": "numeric text" },
            { "id": 6, "type": 10, "message": "pinned" }
        ]))
        .unwrap();

        let kinds: Vec<NotificationKind> = snapshot.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::default(),
                NotificationKind::default(),
                NotificationKind::default(),
                NotificationKind::default(),
                NotificationKind::Critical,
                NotificationKind::Pinned,
            ]
        );
    }

    #[test]
    fn known_types_map_to_icons() {
        assert_eq!(NotificationKind::from(3).icon(), "⚠️");
        assert_eq!(NotificationKind::from(4).icon(), "🔴");
        assert_eq!(NotificationKind::from(10).icon(), "📌");
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let n: Notification = serde_json::from_value(json!({ "id": "abc" })).unwrap();
        assert_eq!(n.kind, NotificationKind::General(0));
        assert!(!n.is_read);
        assert!(n.created_at.is_none());
        assert!(n.message.is_empty());
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let n: Notification = serde_json::from_value(json!({
            "id": 7,
            "createdAt": "2024-05-01T10:00:00.1234567"
        }))
        .unwrap();
        let ts = n.created_at.expect("timestamp should parse");
        assert_eq!(ts.timestamp(), 1_714_557_600);
        assert_eq!(ts.timestamp_subsec_nanos(), 123_456_700);
    }

    #[test]
    fn garbage_timestamp_does_not_fail_decoding() {
        let n: Notification = serde_json::from_value(json!({
            "id": 7,
            "createdAt": "yesterday"
        }))
        .unwrap();
        assert!(n.created_at.is_none());
    }
}
