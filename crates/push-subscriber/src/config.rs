//! Supervisor configuration.

use std::time::Duration;

use url::Url;

use crate::backoff::BackoffPolicy;
use crate::types::{Error, Result};

pub const DEFAULT_USER_AGENT: &str = "push-subscriber-rs/0.1";

/// Timers and limits used by the supervisor, the watchdog and the HTTP
/// client. `Default` gives the production values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Upper bound on establishing the TCP/TLS connection. Reads are unbounded.
    pub connect_timeout: Duration,
    pub tcp_keepalive: Duration,
    /// Pause between closing the old connection and opening the new one on a
    /// token change or explicit restart.
    pub cleanup_delay: Duration,
    /// How often the watchdog checks for incoming frames.
    pub frame_check_interval: Duration,
    /// Consecutive frame-less checks before the connection is declared stuck.
    pub missed_checks_threshold: u32,
    /// Fixed delay before reconnecting after a watchdog trip (no backoff).
    pub watchdog_reconnect_delay: Duration,
    /// How often the coarse health check looks for a missing connection.
    pub health_check_interval: Duration,
    /// Network-available signals closer together than this are ignored.
    pub network_debounce: Duration,
    /// Token polls on `start()` before connecting anonymously (0 disables).
    pub token_wait_attempts: u32,
    pub token_wait_interval: Duration,
    /// Capacity of [`ChannelSink`](crate::ChannelSink) queues.
    pub sink_channel_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            tcp_keepalive: Duration::from_secs(30),
            cleanup_delay: Duration::from_secs(1),
            frame_check_interval: Duration::from_secs(25),
            missed_checks_threshold: 3,
            watchdog_reconnect_delay: Duration::from_secs(5),
            health_check_interval: Duration::from_secs(300),
            network_debounce: Duration::from_secs(10),
            token_wait_attempts: 0,
            token_wait_interval: Duration::from_secs(1),
            sink_channel_capacity: 64,
        }
    }
}

/// Configuration for [`Supervisor::spawn`](crate::Supervisor::spawn).
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// SSE endpoint.
    pub url: Url,
    pub user_agent: String,
    pub timing: TimingConfig,
    pub backoff: BackoffPolicy,
}

impl SupervisorConfig {
    /// Configuration with default timing for the given `http(s)` endpoint.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "unsupported URL scheme {:?}",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timing: TimingConfig::default(),
            backoff: BackoffPolicy::default(),
        })
    }

    /// Reject settings that would stall or spin the supervisor loop.
    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        let nonzero = [
            ("frame_check_interval", t.frame_check_interval),
            ("health_check_interval", t.health_check_interval),
            ("connect_timeout", t.connect_timeout),
        ];
        for (name, value) in nonzero {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        if t.missed_checks_threshold == 0 {
            return Err(Error::InvalidConfig(
                "missed_checks_threshold must be at least 1".into(),
            ));
        }
        if t.token_wait_attempts > 0 && t.token_wait_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "token_wait_interval must be non-zero when token_wait_attempts is set".into(),
            ));
        }
        if t.sink_channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "sink_channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
