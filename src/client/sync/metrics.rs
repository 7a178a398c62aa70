//! # Sync Metrics
//!
//! Counters for diagnosing how often the engine has to recover.
//!
//! ## Features
//!
//! - **Resync tracking**: attempts, outcomes and duration
//! - **Rejection tracking**: rejections handled, rollbacks, forced resyncs
//! - **Breaker tracking**: whether and how often the circuit breaker tripped

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::shared::lock;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncMetrics {
    pub resync_attempts: u64,
    pub successful_resyncs: u64,
    pub failed_resyncs: u64,
    pub average_resync_duration: Duration,
    pub last_resync_duration: Option<Duration>,
    pub rejections_handled: u64,
    pub rollbacks: u64,
    pub failed_rollbacks: u64,
    pub forced_resyncs: u64,
    pub breaker_trips: u64,
    pub remote_operations_applied: u64,
    pub remote_operations_buffered: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_resync_attempt(&mut self) {
        self.resync_attempts += 1;
    }

    pub fn record_resync_success(&mut self, started: Instant) {
        let duration = started.elapsed();
        self.last_resync_duration = Some(duration);
        self.successful_resyncs += 1;

        // Update rolling average
        let total = self.average_resync_duration * (self.successful_resyncs - 1) as u32 + duration;
        self.average_resync_duration = total / self.successful_resyncs as u32;
    }

    pub fn record_resync_failure(&mut self) {
        self.failed_resyncs += 1;
    }

    pub fn resync_success_rate(&self) -> f64 {
        let finished = self.successful_resyncs + self.failed_resyncs;
        if finished == 0 {
            0.0
        } else {
            self.successful_resyncs as f64 / finished as f64
        }
    }
}

/// Cloneable handle shared by the components that record metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsHandle {
    inner: Arc<Mutex<SyncMetrics>>,
}

impl MetricsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, update: impl FnOnce(&mut SyncMetrics)) {
        update(&mut lock(&self.inner));
    }

    pub fn snapshot(&self) -> SyncMetrics {
        lock(&self.inner).clone()
    }
}
