//! The event record and its wire codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// An immutable notification of a domain occurrence (e.g. "order.created").
///
/// Serialized in the backend's wire shape:
///
/// ```text
/// { "event_id": "...", "event_type": "order.created", "source_service": "orders",
///   "timestamp": "2024-05-01T10:00:00Z", "data": { ... }, "correlation_id": "..." }
/// ```
///
/// Notes:
/// - `id` is the dedup key across every delivery path.
/// - `timestamp` is origin time; buffering order is arrival order, not this field.
/// - `payload` is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "event_id")]
    id: String,

    event_type: String,

    #[serde(rename = "source_service", default)]
    source: String,

    #[serde(with = "wire_timestamp")]
    timestamp: DateTime<Utc>,

    #[serde(rename = "data", default, deserialize_with = "wire_payload")]
    payload: Map<String, JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: Map<String, JsonValue>,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp,
            payload,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Dot-delimited topic (e.g. `order.created`).
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Map<String, JsonValue> {
        &self.payload
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Decode one inbound message body.
    pub fn from_json(raw: &str) -> Result<Self, DecodeError> {
        let event: Event = serde_json::from_str(raw)?;
        event.validated()
    }

    /// Decode one already-parsed JSON value (e.g. an item of a poll batch).
    pub fn from_value(value: JsonValue) -> Result<Self, DecodeError> {
        let event: Event = serde_json::from_value(value)?;
        event.validated()
    }

    fn validated(self) -> Result<Self, DecodeError> {
        if self.id.trim().is_empty() {
            return Err(DecodeError::invalid("event_id", "must not be empty"));
        }
        if self.event_type.trim().is_empty() {
            return Err(DecodeError::invalid("event_type", "must not be empty"));
        }
        Ok(self)
    }
}

/// A single inbound message is not a valid event.
///
/// Always recovered locally: the message is logged and dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed event json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid event field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl DecodeError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// RFC 3339 on the way out; RFC 3339 or naive ISO-8601 (taken as UTC) on the way in.
mod wire_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

fn wire_payload<'de, D>(d: D) -> Result<Map<String, JsonValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(d)? {
        None | Some(JsonValue::Null) => Ok(Map::new()),
        Some(JsonValue::Object(map)) => Ok(map),
        Some(other) => Err(serde::de::Error::custom(format!(
            "event data must be an object, got {other}"
        ))),
    }
}
