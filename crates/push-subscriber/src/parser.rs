//! Payload decoding: SSE frame → heartbeat or [`NotificationEvent`].
//!
//! Frames with blank data or an empty JSON batch (`[]`) carry nothing to show,
//! so they count for liveness only and are treated as heartbeats.

use serde_json::{Map, Value};

use crate::sse::SseFrame;
use crate::types::NotificationEvent;

pub const DEFAULT_TITLE: &str = "ArkaFile";
pub const DEFAULT_BODY: &str = "اعلان جدید";
pub const DEFAULT_KIND: &str = "general";
const FALLBACK_BODY_CHARS: usize = 100;

/// A decoded SSE frame as seen by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Liveness only; never shown to the user.
    Heartbeat { id: Option<String> },
    Notification(NotificationEvent),
}

impl Frame {
    /// Route a raw SSE frame by its `event:` type.
    ///
    /// `ping` and `heartbeat` are keep-alives. Everything else, including
    /// `notification`, `update`, unknown types and frames with no type, is a
    /// notification. A notification frame whose `data:` is blank or an empty
    /// JSON array is downgraded to a heartbeat.
    pub fn from_sse(frame: SseFrame) -> Self {
        let SseFrame { id, event, data } = frame;
        if is_heartbeat(event.as_deref()) || data.trim().is_empty() || is_empty_batch(&data) {
            return Frame::Heartbeat { id };
        }
        Frame::Notification(parse_with_id(&data, id.as_deref()))
    }
}

fn is_heartbeat(event: Option<&str>) -> bool {
    matches!(event, Some("ping" | "heartbeat"))
}

fn is_empty_batch(data: &str) -> bool {
    matches!(serde_json::from_str::<Value>(data), Ok(Value::Array(items)) if items.is_empty())
}

/// Decode a `data:` payload. Never fails: unparseable input becomes a
/// fallback notification carrying the (truncated) raw text.
pub fn parse(raw: &str) -> NotificationEvent {
    parse_with_id(raw, None)
}

/// Like [`parse`], using `frame_id` (the SSE `id:` field) when the payload
/// has no `id` of its own.
pub fn parse_with_id(raw: &str, frame_id: Option<&str>) -> NotificationEvent {
    match serde_json::from_str::<Value>(raw) {
        // Servers batch catch-up notifications; only the newest is shown.
        Ok(Value::Array(items)) => match items.into_iter().last() {
            Some(Value::Object(map)) => from_object(&map, frame_id),
            _ => fallback(raw, frame_id),
        },
        Ok(Value::Object(map)) => from_object(&map, frame_id),
        Ok(Value::String(text)) => fallback(&text, frame_id),
        Ok(_) | Err(_) => fallback(raw, frame_id),
    }
}

fn from_object(map: &Map<String, Value>, frame_id: Option<&str>) -> NotificationEvent {
    NotificationEvent {
        title: field(map, "title").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        body: field(map, "body").unwrap_or_else(|| DEFAULT_BODY.to_string()),
        kind: field(map, "type").unwrap_or_else(|| DEFAULT_KIND.to_string()),
        details: field(map, "details").unwrap_or_default(),
        id: field(map, "id")
            .or_else(|| frame_id.map(str::to_string))
            .unwrap_or_default(),
    }
}

/// Strings are taken as-is, other scalars are stringified, null is absent.
fn field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn fallback(text: &str, frame_id: Option<&str>) -> NotificationEvent {
    tracing::debug!(len = text.len(), "payload is not a notification object, using raw text");
    NotificationEvent {
        title: DEFAULT_TITLE.to_string(),
        body: text.chars().take(FALLBACK_BODY_CHARS).collect(),
        kind: DEFAULT_KIND.to_string(),
        details: String::new(),
        id: frame_id.map_or_else(
            || format!("raw-{}", uuid::Uuid::new_v4().simple()),
            str::to_string,
        ),
    }
}
