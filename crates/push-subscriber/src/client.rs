//! One physical SSE connection: open, stream frames, report close/failure.

use std::fmt;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::SupervisorConfig;
use crate::parser::Frame;
use crate::sse::SseDecoder;
use crate::supervisor::Signal;
use crate::types::{BearerToken, Error, Result};

/// Identifies one physical connection. Never reused within a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transitions reported by a connection to its supervisor.
///
/// Per handle: `Opened` at most once, then any number of `Frame`s, then at
/// most one of `Closed`/`Failed`. Nothing follows `Closed`/`Failed`.
#[derive(Debug)]
pub enum ClientEvent {
    Opened,
    Frame(Frame),
    Closed,
    Failed(Error),
}

/// Channel back to the supervisor, bound to a single handle.
#[derive(Debug, Clone)]
pub struct EventSender {
    handle: HandleId,
    tx: mpsc::UnboundedSender<Signal>,
}

impl EventSender {
    pub(crate) fn new(handle: HandleId, tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { handle, tx }
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Returns `false` once the supervisor has shut down.
    pub fn send(&self, event: ClientEvent) -> bool {
        self.tx
            .send(Signal::Client {
                handle: self.handle,
                event,
            })
            .is_ok()
    }
}

/// Owning reference to a live connection. Cancelling (or dropping) it stops
/// the connection immediately; cancelling twice is harmless.
#[derive(Debug)]
pub struct ConnectionHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn new(cancel: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self { cancel, task }
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Opens physical connections on behalf of the supervisor.
///
/// `open` must not block: the connection runs in the background and reports
/// through `events`. An `Err` means no connection was started at all.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, token: Option<BearerToken>, events: EventSender) -> Result<ConnectionHandle>;
}

/// HTTP implementation of [`Transport`].
#[derive(Debug, Clone)]
pub struct EventStreamClient {
    http: reqwest::Client,
    url: Url,
}

impl EventStreamClient {
    pub fn new(config: &SupervisorConfig) -> Result<Self> {
        // No overall timeout: the response body is an endless stream.
        let http = reqwest::Client::builder()
            .connect_timeout(config.timing.connect_timeout)
            .tcp_keepalive(config.timing.tcp_keepalive)
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }

    fn request(&self, token: Option<&BearerToken>) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive");
        if let Some(token) = token {
            req = req.bearer_auth(token.as_str());
        }
        req
    }
}

impl Transport for EventStreamClient {
    fn open(&self, token: Option<BearerToken>, events: EventSender) -> Result<ConnectionHandle> {
        let request = self.request(token.as_ref()).build()?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_connection(
            self.http.clone(),
            request,
            events,
            cancel.clone(),
        ));
        Ok(ConnectionHandle::new(cancel, Some(task)))
    }
}

async fn run_connection(
    http: reqwest::Client,
    request: reqwest::Request,
    events: EventSender,
    cancel: CancellationToken,
) {
    let handle = events.handle();
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(handle = %handle, "connection cancelled");
            return;
        }
        result = stream_frames(&http, request, &events) => result,
    };
    let event = match outcome {
        Ok(()) => ClientEvent::Closed,
        Err(e) => ClientEvent::Failed(e),
    };
    events.send(event);
}

async fn stream_frames(
    http: &reqwest::Client,
    request: reqwest::Request,
    events: &EventSender,
) -> Result<()> {
    let resp = http.execute(request).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Status {
            status: status.as_u16(),
        });
    }
    if let Some(value) = resp.headers().get(CONTENT_TYPE) {
        let content_type = value.to_str().unwrap_or_default().to_ascii_lowercase();
        if !content_type.starts_with("text/event-stream") {
            return Err(Error::ContentType(content_type));
        }
    }

    tracing::debug!(handle = %events.handle(), %status, "SSE response received");
    if !events.send(ClientEvent::Opened) {
        return Ok(());
    }

    let mut decoder = SseDecoder::default();
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for frame in decoder.push(&chunk) {
            if !events.send(ClientEvent::Frame(Frame::from_sse(frame))) {
                return Ok(());
            }
        }
    }
    Ok(())
}
