//! # Rejection Notifications
//!
//! Users see rejections as batched notices rather than one toast per
//! rejected operation. Every rejection restarts a quiet-period timer; when it
//! fires, everything collected becomes a single notice.
//!
//! ## Severity Table
//!
//! | reason              | severity | title               |
//! |---------------------|----------|---------------------|
//! | `conflict_detected` | warning  | Operation Conflict  |
//! | `validation_failed` | error    | Invalid Operation   |
//! | `permission_denied` | error    | Permission Denied   |
//! | `no_state_change`   | info     | No Changes          |
//! | anything else       | warning  | Operation Rejected  |
//!
//! The first rejection in a batch decides severity and title. The notice
//! offers a resync action if any rejection in the batch asked for one.

use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::timer::Debouncer;
use crate::shared::event::{RejectionEvent, RejectionReason, Topic};
use crate::shared::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl RejectionReason {
    /// Severity and title used when this reason leads a batch
    pub fn presentation(&self) -> (Severity, &'static str) {
        match self {
            RejectionReason::ConflictDetected => (Severity::Warning, "Operation Conflict"),
            RejectionReason::ValidationFailed => (Severity::Error, "Invalid Operation"),
            RejectionReason::PermissionDenied => (Severity::Error, "Permission Denied"),
            RejectionReason::NoStateChange => (Severity::Info, "No Changes"),
            RejectionReason::Other(_) => (Severity::Warning, "Operation Rejected"),
        }
    }
}

/// One batched notice for a burst of rejections
#[derive(Debug, Clone, PartialEq)]
pub struct RejectionNotice {
    pub severity: Severity,
    pub title: &'static str,
    pub message: String,
    pub count: usize,
    pub operation_ids: Vec<String>,
    pub offer_resync: bool,
}

impl RejectionNotice {
    /// Summarize a non-empty batch
    fn from_batch(batch: &[RejectionEvent]) -> Option<Self> {
        let first = batch.first()?;
        let (severity, title) = first.reason.presentation();
        let count = batch.len();
        let message = if count == 1 && !first.message.is_empty() {
            first.message.clone()
        } else if count == 1 {
            format!("Your change was rejected by the server ({})", first.reason)
        } else {
            format!("{} of your changes were rejected by the server", count)
        };
        Some(Self {
            severity,
            title,
            message,
            count,
            operation_ids: batch.iter().map(|e| e.operation_id.clone()).collect(),
            offer_resync: batch.iter().any(|e| e.requires_resync),
        })
    }
}

/// Anything the rejection handler wants the user to see
#[derive(Debug, Clone, PartialEq)]
pub enum UserNotice {
    Rejections(RejectionNotice),
    /// The circuit breaker ended collaboration; the user must rejoin
    CollaborationEnded { cause: String },
}

/// Debounced collector of rejection events
pub struct NotificationBatcher {
    pending: Arc<Mutex<Vec<RejectionEvent>>>,
    debouncer: Debouncer,
    window: Duration,
    notices: Arc<Topic<UserNotice>>,
}

impl NotificationBatcher {
    pub fn new(window: Duration, notices: Arc<Topic<UserNotice>>) -> Self {
        Self {
            pending: Arc::new(Mutex::new(Vec::new())),
            debouncer: Debouncer::new(),
            window,
            notices,
        }
    }

    /// Add a rejection to the current batch and restart the timer
    pub fn enqueue(&self, event: RejectionEvent) {
        lock(&self.pending).push(event);

        let pending = Arc::clone(&self.pending);
        let notices = Arc::clone(&self.notices);
        self.debouncer.schedule(self.window, move || {
            let batch = mem::take(&mut *lock(&pending));
            if let Some(notice) = RejectionNotice::from_batch(&batch) {
                tracing::info!(
                    count = notice.count,
                    title = notice.title,
                    offer_resync = notice.offer_resync,
                    "[Rejection] Showing batched rejection notice"
                );
                notices.publish(UserNotice::Rejections(notice));
            }
        });
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Drop the current batch without notifying
    pub fn cancel(&self) {
        self.debouncer.cancel();
        lock(&self.pending).clear();
    }
}

impl std::fmt::Debug for NotificationBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBatcher")
            .field("window", &self.window)
            .field("pending", &self.pending_count())
            .finish()
    }
}
