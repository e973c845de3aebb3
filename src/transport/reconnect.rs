//! Reconnection backoff.
//!
//! Delays are taken from a fixed schedule indexed by the number of retries
//! started since the link was last Connected. The last entry is a plateau:
//! attempts continue forever at that interval.

use std::time::Duration;

use crate::core::constants::DEFAULT_BACKOFF;

/// Ordered retry delays with a plateau at the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            delays: DEFAULT_BACKOFF.to_vec(),
        }
    }
}

impl BackoffSchedule {
    /// Create a schedule. Returns `None` when `delays` is empty.
    pub fn new(delays: Vec<Duration>) -> Option<Self> {
        if delays.is_empty() {
            None
        } else {
            Some(Self { delays })
        }
    }

    /// Delay to wait after `attempt` retries have been started.
    pub fn delay(&self, attempt: u32) -> Duration {
        let last = self.delays.len() - 1;
        let index = usize::try_from(attempt).map_or(last, |i| i.min(last));
        self.delays[index]
    }

    /// The configured delays.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

/// Bookkeeping for the reconnection in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectContext {
    /// Retries started since the link was last Connected.
    pub attempt_count: u32,
    /// Wait before the next attempt.
    pub next_delay: Duration,
    /// Whether an attempt is outstanding.
    pub in_flight: bool,
}

/// Computes retry delays and owns the in-flight flag.
///
/// The policy is always driven through the connection state machine so the
/// flag and the link state change under the same lock.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    schedule: BackoffSchedule,
    context: ReconnectContext,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(BackoffSchedule::default())
    }
}

impl ReconnectPolicy {
    /// Create a policy from a schedule.
    pub fn new(schedule: BackoffSchedule) -> Self {
        let next_delay = schedule.delay(0);
        Self {
            schedule,
            context: ReconnectContext {
                attempt_count: 0,
                next_delay,
                in_flight: false,
            },
        }
    }

    /// Current bookkeeping.
    pub fn context(&self) -> ReconnectContext {
        self.context
    }

    /// Wait before the next attempt.
    pub fn next_delay(&self) -> Duration {
        self.context.next_delay
    }

    /// Whether an attempt is outstanding.
    pub fn in_flight(&self) -> bool {
        self.context.in_flight
    }

    /// Claim the single attempt slot for an explicit connect request.
    ///
    /// Explicit requests do not advance the schedule.
    pub fn try_claim(&mut self) -> bool {
        if self.context.in_flight {
            return false;
        }
        self.context.in_flight = true;
        true
    }

    /// Claim the single attempt slot for a retry.
    ///
    /// Returns the 1-based retry number, or `None` if an attempt is already
    /// outstanding.
    pub fn try_begin_retry(&mut self) -> Option<u32> {
        if !self.try_claim() {
            return None;
        }
        self.context.attempt_count = self.context.attempt_count.saturating_add(1);
        self.context.next_delay = self.schedule.delay(self.context.attempt_count);
        Some(self.context.attempt_count)
    }

    /// Release the attempt slot after a failed attempt.
    pub fn on_failure(&mut self) {
        self.context.in_flight = false;
    }

    /// Release the attempt slot and restart the schedule.
    pub fn on_success(&mut self) {
        self.reset();
    }

    /// Restart the schedule from the first delay.
    pub fn reset(&mut self) {
        self.context = ReconnectContext {
            attempt_count: 0,
            next_delay: self.schedule.delay(0),
            in_flight: false,
        };
    }
}
