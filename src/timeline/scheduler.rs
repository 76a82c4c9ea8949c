//! Background refresh scheduling
//!
//! [`RefreshTracker`] decides whether a cycle may run and when failures
//! become visible. [`spawn`] drives the ticks until its token is cancelled.

use std::fmt;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a background cycle did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A background fetch is still running
    InFlight,
    /// A load or manual refresh is running
    ForegroundBusy,
    /// The previous attempt was too recent
    Throttled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InFlight => write!(f, "background fetch in flight"),
            Self::ForegroundBusy => write!(f, "foreground load in flight"),
            Self::Throttled => write!(f, "throttled"),
        }
    }
}

/// Throttle and failure bookkeeping for background fetches
#[derive(Debug, Clone)]
pub struct RefreshTracker {
    minimum_interval: Duration,
    max_failures: u32,
    last_attempt: Option<Instant>,
    consecutive_failures: u32,
}

impl RefreshTracker {
    pub const fn new(minimum_interval: Duration, max_failures: u32) -> Self {
        Self {
            minimum_interval,
            max_failures,
            last_attempt: None,
            consecutive_failures: 0,
        }
    }

    /// Check whether a cycle may start now
    pub fn admit(&self, now: Instant, in_flight: bool, foreground_busy: bool) -> Result<(), SkipReason> {
        if in_flight {
            return Err(SkipReason::InFlight);
        }
        if foreground_busy {
            return Err(SkipReason::ForegroundBusy);
        }
        match self.last_attempt {
            Some(last) if now.saturating_duration_since(last) < self.minimum_interval => {
                Err(SkipReason::Throttled)
            }
            _ => Ok(()),
        }
    }

    pub const fn record_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    pub const fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Count a failure. Returns true once the failure should be shown.
    pub const fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures >= self.max_failures
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub const fn reset(&mut self) {
        self.last_attempt = None;
        self.consecutive_failures = 0;
    }
}

/// Call `on_tick` now and then every `interval` until `cancel` fires or
/// `on_tick` returns false
pub fn spawn<F>(interval: Duration, cancel: CancellationToken, mut on_tick: F) -> JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!("Background refresh started (interval={interval:?})");
        loop {
            if cancel.is_cancelled() || !on_tick() {
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("Background refresh stopped");
    })
}
