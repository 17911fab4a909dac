//! Public types for the push-subscriber crate.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tokens this short are treated as absent.
const MIN_TOKEN_LEN: usize = 11;
/// Characters of a token kept when it is printed.
const TOKEN_LOG_PREFIX: usize = 6;

/// An opaque bearer credential for the `Authorization` header.
///
/// `Debug` and `Display` only show a short prefix so tokens can be passed to
/// `tracing` fields without leaking them into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// Wrap a raw token, returning `None` when it is blank or too short
    /// (10 characters or fewer after trimming) to be a real credential.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.chars().count() < MIN_TOKEN_LEN {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(TOKEN_LOG_PREFIX).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BearerToken").field(&self.redacted()).finish()
    }
}

impl fmt::Display for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// A push notification decoded from an SSE `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub title: String,
    pub body: String,
    /// Notification category, e.g. `"general"`, `"file-42"`, `"customer-7"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub details: String,
    pub id: String,
}

impl NotificationEvent {
    /// The in-app route this notification should open, if its type maps to one.
    pub fn deep_link(&self) -> Option<DeepLink> {
        let kind = self.kind.as_str();
        if let Some(id) = kind.strip_prefix("file-") {
            return (!id.is_empty()).then(|| DeepLink::File { id: id.to_string() });
        }
        if let Some(id) = kind.strip_prefix("customer-") {
            return Some(DeepLink::Customer {
                id: (!id.is_empty()).then(|| id.to_string()),
            });
        }
        match kind {
            // Legacy payloads carry the file id in `details`.
            "file" if !self.details.is_empty() => Some(DeepLink::File {
                id: self.details.clone(),
            }),
            "customer" => Some(DeepLink::Customer { id: None }),
            _ => None,
        }
    }
}

/// Navigation target attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "lowercase")]
pub enum DeepLink {
    File { id: String },
    Customer { id: Option<String> },
}

impl DeepLink {
    /// Dashboard path for this link.
    pub fn path(&self) -> String {
        match self {
            DeepLink::File { id } => format!("/dashboard/files-mobile/{id}"),
            DeepLink::Customer { .. } => "/dashboard/customers".to_string(),
        }
    }
}

/// Logical state of the supervisor's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Stopped,
}

/// Point-in-time view of the supervisor, returned by
/// [`Supervisor::status`](crate::Supervisor::status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    pub running: bool,
    pub has_live_connection: bool,
    pub attempt_count: u32,
}

/// Connectivity change reported by the host's network monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    Available,
    Lost,
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SSE endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("SSE endpoint returned content type {0:?}, expected text/event-stream")]
    ContentType(String),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("supervisor task is no longer running")]
    SupervisorGone,
}

pub type Result<T> = std::result::Result<T, Error>;
