//! Persistent Server-Sent Events push subscriber.
//!
//! Keeps a single authenticated `text/event-stream` connection alive for as
//! long as the host wants notifications, and turns the frames it receives
//! into [`NotificationEvent`]s.
//!
//! # Features
//! - Tolerant payload decoding: JSON object, JSON array (newest element wins)
//!   or raw text
//! - Backoff reconnects (2s, 5s, 10s, 20s, then 60s) reset on every
//!   successful open
//! - Frame watchdog for connections that stay open but go silent
//! - Token changes and explicit restarts swap the connection without ever
//!   running two at once
//! - Debounced network-recovery signals that skip pending backoff
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), push_subscriber::Error> {
//! use push_subscriber::{
//!     ChannelSink, HostBindings, MemoryTokenSource, Supervisor, SupervisorConfig,
//! };
//!
//! let config = SupervisorConfig::new("https://push.example.com/sse")?;
//! let tokens = MemoryTokenSource::new(Some("my-secret-bearer-token".to_string()));
//! let (sink, mut notifications) = ChannelSink::new(config.timing.sink_channel_capacity);
//!
//! let supervisor = Supervisor::spawn(config, HostBindings::new(tokens, sink))?;
//! supervisor.start().await?;
//!
//! while let Some(event) = notifications.recv().await {
//!     println!("{}: {}", event.title, event.body);
//! }
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
mod config;
mod host;
mod parser;
mod sse;
mod supervisor;
mod types;
mod watchdog;

pub use backoff::BackoffPolicy;
pub use client::{
    ClientEvent, ConnectionHandle, EventSender, EventStreamClient, HandleId, Transport,
};
pub use config::{DEFAULT_USER_AGENT, SupervisorConfig, TimingConfig};
pub use host::{
    ChannelSink, KeepAlive, MemoryTokenSource, NoopKeepAlive, NotificationSink, TokenSource,
};
pub use parser::{DEFAULT_BODY, DEFAULT_KIND, DEFAULT_TITLE, Frame, parse, parse_with_id};
pub use sse::{SseDecoder, SseFrame};
pub use supervisor::{HostBindings, Supervisor};
pub use types::{
    BearerToken, ConnectionState, DeepLink, Error, NetworkEvent, NotificationEvent, Result,
    StatusSnapshot,
};
