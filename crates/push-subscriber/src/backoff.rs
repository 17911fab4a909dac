//! Reconnect delay table.

use std::time::Duration;

use crate::types::{Error, Result};

const DEFAULT_STEPS_SECS: [u64; 5] = [2, 5, 10, 20, 60];

/// Maps a 1-based reconnect attempt to the delay before that attempt.
///
/// Attempts past the end of the table reuse the last (largest) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    steps: Vec<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }
}

impl BackoffPolicy {
    /// Build a policy from an ascending, non-empty list of delays.
    pub fn new(steps: Vec<Duration>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::InvalidConfig("backoff table is empty".into()));
        }
        if steps.windows(2).any(|w| matches!(w, [a, b] if b < a)) {
            return Err(Error::InvalidConfig(
                "backoff table must be non-decreasing".into(),
            ));
        }
        Ok(Self { steps })
    }

    /// Delay before reconnect attempt `attempt` (attempt 0 is treated as 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.steps
            .get(index)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or_default()
    }

    pub fn max_delay(&self) -> Duration {
        self.steps.last().copied().unwrap_or_default()
    }
}
