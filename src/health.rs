//! Poll loop health: reconnect backoff and a circuit breaker.
//!
//! [`PollHealth`] is owned by a single poll loop and fed the outcome of every
//! poll. After a failure the loop waits an exponentially growing delay. Enough
//! consecutive failures, or one failure that retrying cannot fix, open the
//! breaker. The loop then stays quiet until the open period ends and a single
//! trial poll decides whether the breaker closes again.

use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::poller::SourceError;

/// Backoff and breaker parameters for one poll loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Consecutive failures after which the loop gives up; 0 never gives up.
    pub max_attempts: u32,
    pub breaker_threshold: u32,
    pub breaker_open_for: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 0,
            breaker_threshold: 5,
            breaker_open_for: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    /// Polling is suspended until `until`.
    Open { until: Instant },
    /// The next poll is a trial; one failure reopens the breaker.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct PollHealth {
    policy: ReconnectPolicy,
    state: BreakerState,
    consecutive_failures: u32,
    total_successes: u64,
    total_failures: u64,
}

impl PollHealth {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.total_successes += 1;
        if self.state != BreakerState::Closed {
            info!("Circuit breaker closed after successful poll");
            self.state = BreakerState::Closed;
        }
    }

    pub fn record_failure(&mut self, error: &SourceError, now: Instant) {
        self.consecutive_failures += 1;
        self.total_failures += 1;

        let trip = match self.state {
            BreakerState::Closed => {
                !error.is_retryable() || self.consecutive_failures >= self.policy.breaker_threshold
            }
            BreakerState::HalfOpen => true,
            BreakerState::Open { .. } => false,
        };
        if trip {
            warn!(
                consecutive_failures = self.consecutive_failures,
                category = error.category(),
                open_for_secs = self.policy.breaker_open_for.as_secs(),
                "Circuit breaker opened"
            );
            counter!("poll_breaker_opened_total", "category" => error.category()).increment(1);
            self.state = BreakerState::Open {
                until: now + self.policy.breaker_open_for,
            };
        }
    }

    /// Whether a poll may run now. An open breaker whose period has elapsed
    /// moves to half-open and allows one trial.
    pub fn can_attempt(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open { until } if now >= until => {
                info!("Circuit breaker half-open; allowing a trial poll");
                self.state = BreakerState::HalfOpen;
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    /// `initial * multiplier^(failures - 1)`, capped at the policy maximum.
    pub fn backoff(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(self.consecutive_failures - 1).unwrap_or(i32::MAX);
        let secs = self.policy.initial_backoff.as_secs_f64() * self.policy.multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.policy.max_backoff.as_secs_f64()))
    }

    /// Delay before the next poll. Never shorter than the regular interval.
    pub fn next_delay(&self, interval: Duration, now: Instant) -> Duration {
        match self.state {
            BreakerState::Open { until } => until.saturating_duration_since(now).max(interval),
            _ => interval.max(self.backoff()),
        }
    }

    pub fn is_max_retries_reached(&self) -> bool {
        self.policy.max_attempts != 0 && self.consecutive_failures >= self.policy.max_attempts
    }

    /// Successful polls as a percentage of all polls; 0 before the first poll.
    pub fn uptime_percentage(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            return 0.0;
        }
        self.total_successes as f64 / total as f64 * 100.0
    }
}
