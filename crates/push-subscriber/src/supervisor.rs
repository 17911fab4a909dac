//! Connection supervisor.
//!
//! A single background task owns every piece of connection state: the live
//! handle, the attempt counter and all timers. Host calls and connection
//! events arrive on one inbox and are handled strictly in order, so at most
//! one connection is ever live and no two triggers can race each other into
//! opening a second one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::client::{
    ClientEvent, ConnectionHandle, EventSender, EventStreamClient, HandleId, Transport,
};
use crate::config::SupervisorConfig;
use crate::host::{KeepAlive, NoopKeepAlive, NotificationSink, TokenSource};
use crate::parser::Frame;
use crate::types::{BearerToken, ConnectionState, Error, NetworkEvent, Result, StatusSnapshot};
use crate::watchdog::{Verdict, Watchdog, needs_recovery};

/// Everything that can reach the supervisor task.
#[derive(Debug)]
pub(crate) enum Signal {
    Command(Command),
    Client { handle: HandleId, event: ClientEvent },
}

#[derive(Debug)]
pub(crate) enum Command {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    Restart(oneshot::Sender<()>),
    /// `None` clears the token.
    SetToken(Option<String>, oneshot::Sender<()>),
    Network(NetworkEvent, oneshot::Sender<()>),
    Status(oneshot::Sender<StatusSnapshot>),
}

/// Host collaborators the supervisor calls into.
#[derive(Clone)]
pub struct HostBindings {
    pub tokens: Arc<dyn TokenSource>,
    pub sink: Arc<dyn NotificationSink>,
    pub keep_alive: Arc<dyn KeepAlive>,
}

impl HostBindings {
    pub fn new(
        tokens: impl TokenSource + 'static,
        sink: impl NotificationSink + 'static,
    ) -> Self {
        Self {
            tokens: Arc::new(tokens),
            sink: Arc::new(sink),
            keep_alive: Arc::new(NoopKeepAlive),
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: impl KeepAlive + 'static) -> Self {
        self.keep_alive = Arc::new(keep_alive);
        self
    }
}

/// Handle to a running supervisor task.
///
/// Cheap to clone. Every method waits until the task has applied the request.
/// When the last clone is dropped the task stops: the connection is closed
/// and the keep-alive released.
#[derive(Debug, Clone)]
pub struct Supervisor {
    tx: mpsc::UnboundedSender<Signal>,
    _alive: Arc<DropGuard>,
}

impl Supervisor {
    /// Spawn a supervisor that connects with [`EventStreamClient`].
    ///
    /// Must be called from within a Tokio runtime. The supervisor starts
    /// idle; call [`start`](Self::start) to connect.
    pub fn spawn(config: SupervisorConfig, host: HostBindings) -> Result<Self> {
        config.validate()?;
        let client = EventStreamClient::new(&config)?;
        Self::spawn_with_transport(config, host, Arc::new(client))
    }

    /// Spawn a supervisor over any [`Transport`].
    pub fn spawn_with_transport(
        config: SupervisorConfig,
        host: HostBindings,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let actor = Actor::new(config, host, transport, tx.clone());
        tokio::spawn(actor.run(rx, shutdown.clone()));
        Ok(Self {
            tx,
            _alive: Arc::new(shutdown.drop_guard()),
        })
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Signal::Command(make(ack)))
            .map_err(|_| Error::SupervisorGone)?;
        rx.await.map_err(|_| Error::SupervisorGone)
    }

    /// Begin supervising. No-op when already running.
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await
    }

    /// Close the connection, cancel every timer and stay idle until the next
    /// `start`. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// Close the current connection and open a fresh one after the cleanup
    /// delay. Starts the supervisor when it is not running.
    pub async fn restart(&self) -> Result<()> {
        self.request(Command::Restart).await
    }

    /// Store a new bearer token in the token source. When running, the
    /// connection is restarted with it; otherwise it is used on the next
    /// `start`.
    pub async fn set_token(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        self.request(|ack| Command::SetToken(Some(token), ack)).await
    }

    /// Clear the token in the token source and reconnect anonymously. A token
    /// stored in the source later is picked up by the next connection.
    pub async fn clear_token(&self) -> Result<()> {
        self.request(|ack| Command::SetToken(None, ack)).await
    }

    pub async fn network_event(&self, event: NetworkEvent) -> Result<()> {
        self.request(|ack| Command::Network(event, ack)).await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.request(Command::Status).await
    }
}

#[derive(Debug, Clone, Copy)]
enum ReconnectReason {
    Backoff,
    Watchdog,
}

impl ReconnectReason {
    fn as_str(self) -> &'static str {
        match self {
            ReconnectReason::Backoff => "backoff",
            ReconnectReason::Watchdog => "watchdog",
        }
    }
}

#[derive(Debug)]
struct PendingReconnect {
    due: Instant,
    reason: ReconnectReason,
}

#[derive(Debug)]
struct TokenWait {
    remaining: u32,
    due: Instant,
}

struct Live {
    id: HandleId,
    handle: ConnectionHandle,
}

struct Actor {
    config: SupervisorConfig,
    host: HostBindings,
    transport: Arc<dyn Transport>,
    tx: mpsc::UnboundedSender<Signal>,
    running: bool,
    state: ConnectionState,
    live: Option<Live>,
    next_handle: u64,
    attempts: u32,
    reconnect: Option<PendingReconnect>,
    /// Set while a token change or restart waits out the cleanup delay.
    restart_at: Option<Instant>,
    token_wait: Option<TokenWait>,
    last_network_recovery: Option<Instant>,
    keep_alive_held: bool,
    watchdog: Watchdog,
}

impl Actor {
    fn new(
        config: SupervisorConfig,
        host: HostBindings,
        transport: Arc<dyn Transport>,
        tx: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        let watchdog = Watchdog::new(
            config.timing.frame_check_interval,
            config.timing.missed_checks_threshold,
            config.timing.health_check_interval,
        );
        Self {
            config,
            host,
            transport,
            tx,
            running: false,
            state: ConnectionState::Idle,
            live: None,
            next_handle: 0,
            attempts: 0,
            reconnect: None,
            restart_at: None,
            token_wait: None,
            last_network_recovery: None,
            keep_alive_held: false,
            watchdog,
        }
    }

    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Signal>,
        shutdown: CancellationToken,
    ) {
        tracing::debug!(url = %self.config.url, "supervisor task started");
        loop {
            let restart_at = self.restart_at;
            let reconnect_at = self.reconnect.as_ref().map(|r| r.due);
            let token_poll_at = self.token_wait.as_ref().map(|w| w.due);
            let frame_check_at = self.watchdog.frame_check_due();
            let health_check_at = self.watchdog.health_check_due();

            tokio::select! {
                biased;
                signal = inbox.recv() => match signal {
                    Some(Signal::Command(cmd)) => self.on_command(cmd),
                    Some(Signal::Client { handle, event }) => self.on_client_event(handle, event),
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    tracing::debug!("all supervisor handles dropped");
                    break;
                }
                _ = sleep_until(restart_at) => self.on_restart_due(),
                _ = sleep_until(reconnect_at) => self.on_reconnect_due(),
                _ = sleep_until(token_poll_at) => self.on_token_poll(),
                _ = sleep_until(frame_check_at) => self.on_frame_check(),
                _ = sleep_until(health_check_at) => self.on_health_check(),
            }
        }
        self.stop();
        tracing::debug!("supervisor task exited");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(ack) => {
                self.start();
                let _ = ack.send(());
            }
            Command::Stop(ack) => {
                self.stop();
                let _ = ack.send(());
            }
            Command::Restart(ack) => {
                self.restart();
                let _ = ack.send(());
            }
            Command::SetToken(token, ack) => {
                self.set_token(token);
                let _ = ack.send(());
            }
            Command::Network(event, ack) => {
                self.on_network(event);
                let _ = ack.send(());
            }
            Command::Status(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            running: self.running,
            has_live_connection: self.live.is_some(),
            attempt_count: self.attempts,
        }
    }

    // --- lifecycle ---

    fn start(&mut self) {
        if self.running {
            tracing::debug!("start ignored, already running");
            return;
        }
        tracing::info!(url = %self.config.url, "supervisor starting");
        self.mark_running();

        let wait = self.config.timing.token_wait_attempts;
        if wait > 0 && self.current_token().is_none() {
            tracing::info!(attempts = wait, "no token yet, waiting before connecting");
            self.token_wait = Some(TokenWait {
                remaining: wait,
                due: Instant::now() + self.config.timing.token_wait_interval,
            });
            return;
        }
        self.ensure_connected("start");
    }

    fn mark_running(&mut self) {
        self.running = true;
        if self.state == ConnectionState::Stopped {
            self.state = ConnectionState::Idle;
        }
        if !self.keep_alive_held {
            self.host.keep_alive.acquire();
            self.keep_alive_held = true;
        }
        self.watchdog.start_health(Instant::now());
    }

    fn stop(&mut self) {
        let was_running = self.running;
        self.running = false;
        self.drop_connection();
        self.reconnect = None;
        self.restart_at = None;
        self.token_wait = None;
        self.watchdog.stop_health();
        self.attempts = 0;
        self.state = ConnectionState::Stopped;
        if self.keep_alive_held {
            self.host.keep_alive.release();
            self.keep_alive_held = false;
        }
        if was_running {
            tracing::info!("supervisor stopped");
        }
    }

    fn restart(&mut self) {
        if !self.running {
            tracing::info!("restart requested while stopped, starting");
            self.mark_running();
        }
        self.begin_restart("restart");
    }

    /// The token source stays the only owner of the token; every connection
    /// reads it afresh.
    fn set_token(&mut self, token: Option<String>) {
        match token {
            Some(raw) => {
                match BearerToken::new(raw.as_str()) {
                    Some(token) => tracing::info!(%token, "token updated"),
                    None => tracing::warn!("token too short, connecting anonymously"),
                }
                self.host.tokens.set(raw);
            }
            None => {
                tracing::info!("token cleared");
                self.host.tokens.clear();
            }
        }
        if self.running {
            self.begin_restart("token_changed");
        }
    }

    /// Close whatever is live and reconnect after the cleanup delay. While a
    /// restart is pending further requests fold into it; the token is read
    /// when the new connection opens, so the latest one wins.
    fn begin_restart(&mut self, trigger: &'static str) {
        if self.restart_at.is_some() {
            tracing::debug!(trigger, "restart already pending");
            return;
        }
        self.drop_connection();
        self.reconnect = None;
        self.token_wait = None;
        self.attempts = 0;
        self.state = ConnectionState::Reconnecting;
        let delay = self.config.timing.cleanup_delay;
        tracing::info!(trigger, delay_ms = delay.as_millis() as u64, "restarting connection");
        self.restart_at = Some(Instant::now() + delay);
    }

    // --- connecting ---

    fn current_token(&self) -> Option<BearerToken> {
        let raw = self.host.tokens.get()?;
        let token = BearerToken::new(raw);
        if token.is_none() {
            tracing::debug!("token from source too short, ignoring");
        }
        token
    }

    /// Open a connection unless one exists or another path is about to
    /// create one.
    fn ensure_connected(&mut self, trigger: &'static str) {
        if !self.running {
            tracing::debug!(trigger, "not running, not connecting");
            return;
        }
        if self.live.is_some() {
            tracing::debug!(trigger, "connection already live");
            return;
        }
        if self.restart_at.is_some() || self.token_wait.is_some() {
            tracing::debug!(trigger, "connect already in progress");
            return;
        }
        self.open_connection(trigger);
    }

    fn open_connection(&mut self, trigger: &'static str) {
        self.reconnect = None;
        let token = self.current_token();
        self.next_handle += 1;
        let id = HandleId(self.next_handle);
        self.state = ConnectionState::Connecting;
        tracing::info!(
            handle = %id,
            trigger,
            attempt = self.attempts,
            authenticated = token.is_some(),
            "opening SSE connection"
        );
        let events = EventSender::new(id, self.tx.clone());
        match self.transport.open(token, events) {
            Ok(handle) => {
                self.live = Some(Live { id, handle });
                self.watchdog.arm(Instant::now());
            }
            Err(e) => {
                tracing::warn!(handle = %id, error = %e, "failed to open connection");
                self.schedule_backoff();
            }
        }
    }

    fn drop_connection(&mut self) {
        if let Some(mut live) = self.live.take() {
            tracing::debug!(handle = %live.id, "closing connection");
            live.handle.cancel();
        }
        self.watchdog.disarm();
    }

    fn schedule_backoff(&mut self) {
        if !self.running {
            return;
        }
        if self.reconnect.is_some() {
            tracing::debug!("reconnect already scheduled");
            return;
        }
        self.attempts = self.attempts.saturating_add(1);
        let delay = self.config.backoff.delay(self.attempts);
        self.schedule_reconnect(delay, ReconnectReason::Backoff);
    }

    fn schedule_reconnect(&mut self, delay: Duration, reason: ReconnectReason) {
        self.state = ConnectionState::Reconnecting;
        tracing::info!(
            reason = reason.as_str(),
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.reconnect = Some(PendingReconnect {
            due: Instant::now() + delay,
            reason,
        });
    }

    // --- connection events ---

    fn on_client_event(&mut self, id: HandleId, event: ClientEvent) {
        if self.live.as_ref().map(|live| live.id) != Some(id) {
            tracing::debug!(handle = %id, "ignoring event from stale connection");
            return;
        }
        match event {
            ClientEvent::Opened => {
                tracing::info!(handle = %id, "SSE connection open");
                self.attempts = 0;
                self.reconnect = None;
                self.state = ConnectionState::Open;
            }
            ClientEvent::Frame(frame) => self.on_frame(frame),
            ClientEvent::Closed => {
                tracing::info!(handle = %id, "SSE stream closed by server");
                self.drop_connection();
                self.schedule_backoff();
            }
            ClientEvent::Failed(e) => {
                tracing::warn!(handle = %id, error = %e, "SSE connection failed");
                self.drop_connection();
                self.schedule_backoff();
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        self.watchdog.record_frame();
        match frame {
            Frame::Heartbeat { id } => tracing::trace!(?id, "heartbeat"),
            Frame::Notification(event) => {
                if !self.running {
                    return;
                }
                tracing::debug!(id = %event.id, kind = %event.kind, "notification received");
                self.host.sink.show(event);
            }
        }
    }

    fn on_network(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Lost => tracing::info!("network lost"),
            NetworkEvent::Available => {
                let now = Instant::now();
                let debounced = self.last_network_recovery.is_some_and(|last| {
                    now.duration_since(last) < self.config.timing.network_debounce
                });
                if debounced {
                    tracing::debug!("network recovery debounced");
                    return;
                }
                self.last_network_recovery = Some(now);
                if !self.running || self.live.is_some() {
                    return;
                }
                tracing::info!("network available, reconnecting now");
                self.attempts = 0;
                self.ensure_connected("network");
            }
        }
    }

    // --- timers ---

    fn on_restart_due(&mut self) {
        self.restart_at = None;
        self.ensure_connected("restart");
    }

    fn on_reconnect_due(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            self.ensure_connected(pending.reason.as_str());
        }
    }

    fn on_token_poll(&mut self) {
        let Some(mut wait) = self.token_wait.take() else {
            return;
        };
        if self.current_token().is_some() {
            tracing::info!("token available");
            self.ensure_connected("token_ready");
            return;
        }
        wait.remaining = wait.remaining.saturating_sub(1);
        if wait.remaining == 0 {
            tracing::warn!("no token after waiting, connecting anonymously");
            self.ensure_connected("token_wait_exhausted");
            return;
        }
        wait.due = Instant::now() + self.config.timing.token_wait_interval;
        self.token_wait = Some(wait);
    }

    fn on_frame_check(&mut self) {
        let Some(id) = self.live.as_ref().map(|live| live.id) else {
            self.watchdog.disarm();
            return;
        };
        if self.watchdog.on_frame_check(Instant::now()) == Verdict::Stalled {
            tracing::warn!(handle = %id, "no frames received, connection considered dead");
            self.drop_connection();
            self.schedule_reconnect(
                self.config.timing.watchdog_reconnect_delay,
                ReconnectReason::Watchdog,
            );
        }
    }

    fn on_health_check(&mut self) {
        self.watchdog.on_health_check(Instant::now());
        let connecting = self.restart_at.is_some() || self.token_wait.is_some();
        if needs_recovery(
            self.running,
            self.live.is_some(),
            connecting,
            self.reconnect.is_some(),
        ) {
            tracing::warn!("health check found no connection, reconnecting");
            self.ensure_connected("health_check");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
