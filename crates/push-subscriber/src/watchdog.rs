//! Liveness checks, independent of the transport.
//!
//! Two tiers:
//! - the frame check runs while a connection handle exists and trips after
//!   `threshold` consecutive checks that saw no frame at all;
//! - the health check runs while the supervisor is running and catches the
//!   case where no connection exists and nothing is going to create one.
//!
//! The watchdog only keeps deadlines and counters; the supervisor loop sleeps
//! on the deadlines and acts on the verdicts.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Healthy,
    Stalled,
}

#[derive(Debug)]
pub(crate) struct Watchdog {
    frame_interval: Duration,
    threshold: u32,
    missed: u32,
    frames_since_check: u64,
    next_frame_check: Option<Instant>,
    health_interval: Duration,
    next_health_check: Option<Instant>,
}

impl Watchdog {
    pub(crate) fn new(frame_interval: Duration, threshold: u32, health_interval: Duration) -> Self {
        Self {
            frame_interval,
            threshold: threshold.max(1),
            missed: 0,
            frames_since_check: 0,
            next_frame_check: None,
            health_interval,
            next_health_check: None,
        }
    }

    /// Start frame checks for a freshly opened handle.
    pub(crate) fn arm(&mut self, now: Instant) {
        self.missed = 0;
        self.frames_since_check = 0;
        self.next_frame_check = Some(now + self.frame_interval);
    }

    /// Stop frame checks (no handle).
    pub(crate) fn disarm(&mut self) {
        self.missed = 0;
        self.frames_since_check = 0;
        self.next_frame_check = None;
    }

    /// Any frame, heartbeat or notification, proves the stream is alive.
    pub(crate) fn record_frame(&mut self) {
        self.frames_since_check = self.frames_since_check.saturating_add(1);
        self.missed = 0;
    }

    pub(crate) fn frame_check_due(&self) -> Option<Instant> {
        self.next_frame_check
    }

    /// Run one frame check and schedule the next. A `Stalled` verdict resets
    /// the counter so a fresh handle starts from zero.
    pub(crate) fn on_frame_check(&mut self, now: Instant) -> Verdict {
        self.next_frame_check = Some(now + self.frame_interval);
        if self.frames_since_check > 0 {
            self.frames_since_check = 0;
            self.missed = 0;
            return Verdict::Healthy;
        }
        self.missed += 1;
        tracing::debug!(
            missed = self.missed,
            threshold = self.threshold,
            "no frames since last check"
        );
        if self.missed >= self.threshold {
            self.disarm();
            return Verdict::Stalled;
        }
        Verdict::Healthy
    }

    #[cfg(test)]
    fn missed_checks(&self) -> u32 {
        self.missed
    }

    pub(crate) fn start_health(&mut self, now: Instant) {
        self.next_health_check = Some(now + self.health_interval);
    }

    pub(crate) fn stop_health(&mut self) {
        self.next_health_check = None;
    }

    pub(crate) fn health_check_due(&self) -> Option<Instant> {
        self.next_health_check
    }

    pub(crate) fn on_health_check(&mut self, now: Instant) {
        self.next_health_check = Some(now + self.health_interval);
    }
}

/// Coarse-tier decision: reconnect when running with no handle, no restart
/// or token wait in progress, and no reconnect already scheduled.
pub(crate) fn needs_recovery(
    running: bool,
    has_handle: bool,
    connecting: bool,
    reconnect_pending: bool,
) -> bool {
    running && !has_handle && !connecting && !reconnect_pending
}
