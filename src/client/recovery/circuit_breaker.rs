//! Sliding-window circuit breaker for rejection/resync storms.
//!
//! Unlike a peer breaker there is no half-open state: once tripped the
//! breaker stays open for the rest of the session.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::shared::config::SyncConfig;
use crate::shared::event::RejectionReason;

/// One rejection, kept only for window accounting
#[derive(Debug, Clone, PartialEq)]
pub struct RejectionRecord {
    pub timestamp: Instant,
    pub reason: RejectionReason,
}

/// Why the breaker tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripCause {
    TooManyRejections { count: usize, window: Duration },
    TooManyResyncs { count: usize, window: Duration },
}

impl std::fmt::Display for TripCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripCause::TooManyRejections { count, window } => {
                write!(f, "{} rejections within {}s", count, window.as_secs())
            }
            TripCause::TooManyResyncs { count, window } => {
                write!(f, "{} resyncs within {}s", count, window.as_secs())
            }
        }
    }
}

/// Result of checking the thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerCheck {
    Closed,
    /// Tripped by this check
    Tripped(TripCause),
    /// Tripped earlier
    AlreadyOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    rejections: VecDeque<RejectionRecord>,
    resyncs: VecDeque<Instant>,
    rejection_window: Duration,
    max_rejections: usize,
    resync_window: Duration,
    max_resyncs: usize,
    tripped: Option<TripCause>,
}

impl CircuitBreaker {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            rejections: VecDeque::new(),
            resyncs: VecDeque::new(),
            rejection_window: config.rejection_window,
            max_rejections: config.max_rejections_per_window,
            resync_window: config.resync_window,
            max_resyncs: config.max_resyncs_per_window,
            tripped: None,
        }
    }

    pub fn record_rejection(&mut self, reason: RejectionReason) {
        let now = Instant::now();
        self.rejections.push_back(RejectionRecord { timestamp: now, reason });
        self.prune(now);
    }

    pub fn record_resync(&mut self) {
        let now = Instant::now();
        self.resyncs.push_back(now);
        self.prune(now);
    }

    /// Compare the windowed counts against the thresholds
    pub fn check(&mut self) -> BreakerCheck {
        if self.tripped.is_some() {
            return BreakerCheck::AlreadyOpen;
        }
        self.prune(Instant::now());

        let cause = if self.rejections.len() > self.max_rejections {
            Some(TripCause::TooManyRejections {
                count: self.rejections.len(),
                window: self.rejection_window,
            })
        } else if self.resyncs.len() > self.max_resyncs {
            Some(TripCause::TooManyResyncs {
                count: self.resyncs.len(),
                window: self.resync_window,
            })
        } else {
            None
        };

        match cause {
            Some(cause) => {
                self.tripped = Some(cause);
                BreakerCheck::Tripped(cause)
            }
            None => BreakerCheck::Closed,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.is_some()
    }

    pub fn recent_rejections(&self) -> usize {
        self.rejections.len()
    }

    pub fn recent_resyncs(&self) -> usize {
        self.resyncs.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.rejections.front() {
            if now.duration_since(oldest.timestamp) < self.rejection_window {
                break;
            }
            self.rejections.pop_front();
        }
        while let Some(oldest) = self.resyncs.front() {
            if now.duration_since(*oldest) < self.resync_window {
                break;
            }
            self.resyncs.pop_front();
        }
    }
}
