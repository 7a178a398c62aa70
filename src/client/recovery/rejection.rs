//! # Operation Rejection Handler
//!
//! Reacts to the server refusing one of our operations.
//!
//! ## Flow
//!
//! For every new rejection:
//!
//! 1. Record it in the sliding rejection window.
//! 2. Check the circuit breaker before attempting any recovery. A trip is
//!    terminal: the session is left and nothing else happens.
//! 3. Queue it for the batched user notice.
//! 4. Block local edits and enter rollback mode; remote operations arriving
//!    now are buffered instead of applied.
//! 5. Roll back. If the history entry is missing or the undo fails, force a
//!    resync instead. On success the buffer is discarded and edits are
//!    unblocked; a non-empty discard is followed by a forced resync so that
//!    authoritative state always replaces what was dropped.
//!
//! Steps 1 to 4 run synchronously in [`RejectionHandler::admit`], so a caller
//! that hands the returned [`PendingRecovery`] to a background task keeps
//! routing inbound messages while the undo is still running.
//!
//! A forced resync clears local history, counts toward the resync window
//! (which can also trip the breaker), asks the resync service for a refetch
//! and releases the rollback gate without waiting for it to finish. The store
//! keeps edits blocked while that resync is outstanding.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::client::operation_state::{OperationStateManager, SuppressionKind};
use crate::client::recovery::circuit_breaker::{BreakerCheck, CircuitBreaker, TripCause};
use crate::client::recovery::notifications::{NotificationBatcher, UserNotice};
use crate::client::recovery::queue::OperationQueue;
use crate::client::sync::metrics::MetricsHandle;
use crate::client::sync::sync_state::{ResyncCoordinator, SyncStateStore};
use crate::client::transport::{CollaborationControl, EditHistory};
use crate::shared::config::SyncConfig;
use crate::shared::event::{RejectionEvent, RemoteOperation, Subscription, Topic};
use crate::shared::lock;

/// Rejected operation ids remembered for deduplication
const HANDLED_ID_CAPACITY: usize = 256;

/// Dependencies of the rejection handler
pub struct RejectionDeps {
    pub store: Arc<SyncStateStore>,
    pub history: Arc<dyn EditHistory>,
    pub resync: Arc<dyn ResyncCoordinator>,
    pub control: Arc<dyn CollaborationControl>,
    pub operation_state: Arc<OperationStateManager>,
    pub metrics: MetricsHandle,
}

/// What to do with an incoming remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Apply,
    /// Held in the rollback buffer; will be discarded
    Buffered,
    /// Collaboration has ended
    Dropped,
}

/// Why a resync was forced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForcedResyncCause {
    HistoryEntryMissing,
    RollbackFailed,
    BufferDiscarded,
}

impl ForcedResyncCause {
    fn as_str(self) -> &'static str {
        match self {
            ForcedResyncCause::HistoryEntryMissing => "history_entry_missing",
            ForcedResyncCause::RollbackFailed => "rollback_failed",
            ForcedResyncCause::BufferDiscarded => "buffer_discarded",
        }
    }
}

/// Asynchronous half of an admitted rejection
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a pending recovery leaves edits blocked until it is run"]
pub enum PendingRecovery {
    Trip(TripCause),
    Rollback { operation_id: String },
}

/// Result of the synchronous half of rejection handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Nothing left to do
    Settled(RejectionOutcome),
    Pending(PendingRecovery),
}

/// How a rejection was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionOutcome {
    /// Same operation id was already handled
    Duplicate,
    /// Handler disposed or collaboration already ended
    Ignored,
    /// This rejection or the resync it forced tripped the breaker
    BreakerTripped(TripCause),
    RolledBack {
        undo_count: usize,
        discarded: usize,
    },
    ResyncForced(ForcedResyncCause),
}

#[derive(Debug)]
struct HandlerState {
    breaker: CircuitBreaker,
    handled: HashSet<String>,
    handled_order: VecDeque<String>,
    /// Rollbacks started and not yet finished
    rollbacks: usize,
}

impl HandlerState {
    /// Returns `false` if the id was seen before
    fn remember(&mut self, operation_id: &str) -> bool {
        if !self.handled.insert(operation_id.to_string()) {
            return false;
        }
        self.handled_order.push_back(operation_id.to_string());
        if self.handled_order.len() > HANDLED_ID_CAPACITY {
            if let Some(oldest) = self.handled_order.pop_front() {
                self.handled.remove(&oldest);
            }
        }
        true
    }
}

/// Operation rejection handler
pub struct RejectionHandler {
    state: Mutex<HandlerState>,
    buffer: OperationQueue,
    batcher: NotificationBatcher,
    notices: Arc<Topic<UserNotice>>,
    store: Arc<SyncStateStore>,
    history: Arc<dyn EditHistory>,
    resync: Arc<dyn ResyncCoordinator>,
    control: Arc<dyn CollaborationControl>,
    operation_state: Arc<OperationStateManager>,
    metrics: MetricsHandle,
    disposed: AtomicBool,
}

impl RejectionHandler {
    pub fn new(deps: RejectionDeps, config: &SyncConfig) -> Self {
        let notices = Arc::new(Topic::new());
        Self {
            state: Mutex::new(HandlerState {
                breaker: CircuitBreaker::new(config),
                handled: HashSet::new(),
                handled_order: VecDeque::new(),
                rollbacks: 0,
            }),
            buffer: OperationQueue::new(),
            batcher: NotificationBatcher::new(config.notification_batch_window, Arc::clone(&notices)),
            notices,
            store: deps.store,
            history: deps.history,
            resync: deps.resync,
            control: deps.control,
            operation_state: deps.operation_state,
            metrics: deps.metrics,
            disposed: AtomicBool::new(false),
        }
    }

    pub async fn handle_rejection(&self, event: RejectionEvent) -> RejectionOutcome {
        match self.admit(event) {
            Admission::Settled(outcome) => outcome,
            Admission::Pending(pending) => self.recover(pending).await,
        }
    }

    /// Account for a rejection and enter rollback mode.
    ///
    /// Remote operations routed after this returns are buffered until the
    /// matching [`recover`](Self::recover) finishes.
    pub fn admit(&self, event: RejectionEvent) -> Admission {
        if self.disposed.load(Ordering::SeqCst) {
            return Admission::Settled(RejectionOutcome::Ignored);
        }

        let check = {
            let mut state = lock(&self.state);
            if !state.remember(&event.operation_id) {
                tracing::debug!(operation_id = %event.operation_id, "[Rejection] Duplicate rejection ignored");
                return Admission::Settled(RejectionOutcome::Duplicate);
            }
            state.breaker.record_rejection(event.reason.clone());
            state.breaker.check()
        };

        tracing::warn!(
            operation_id = %event.operation_id,
            reason = %event.reason,
            requires_resync = event.requires_resync,
            message = %event.message,
            "[Rejection] Operation rejected by server"
        );
        self.metrics.record(|m| m.rejections_handled += 1);

        match check {
            BreakerCheck::Closed => {}
            BreakerCheck::Tripped(cause) => {
                self.close_gates();
                return Admission::Pending(PendingRecovery::Trip(cause));
            }
            BreakerCheck::AlreadyOpen => return Admission::Settled(RejectionOutcome::Ignored),
        }

        let operation_id = event.operation_id.clone();
        self.batcher.enqueue(event);

        self.store.set_block_operations(true);
        lock(&self.state).rollbacks += 1;

        Admission::Pending(PendingRecovery::Rollback { operation_id })
    }

    /// Run the asynchronous half of an admitted rejection
    pub async fn recover(&self, pending: PendingRecovery) -> RejectionOutcome {
        match pending {
            PendingRecovery::Trip(cause) => {
                self.trip(cause).await;
                RejectionOutcome::BreakerTripped(cause)
            }
            PendingRecovery::Rollback { operation_id } => {
                let outcome = self.rollback(&operation_id).await;
                if !matches!(outcome, RejectionOutcome::BreakerTripped(_)) {
                    self.finish_rollback();
                }
                outcome
            }
        }
    }

    /// Leave rollback mode once the last concurrent rollback is done
    fn finish_rollback(&self) {
        let idle = {
            let mut state = lock(&self.state);
            state.rollbacks = state.rollbacks.saturating_sub(1);
            state.rollbacks == 0 && !state.breaker.is_tripped()
        };
        if idle {
            let discarded = self.buffer.discard_all().len();
            if discarded > 0 {
                tracing::debug!(discarded, "[Rejection] Discarded late buffered operations");
                self.resync.trigger_resync(ForcedResyncCause::BufferDiscarded.as_str());
            }
            self.store.set_block_operations(false);
        }
    }

    async fn rollback(&self, operation_id: &str) -> RejectionOutcome {
        if !self.history.contains_operation(operation_id) {
            tracing::warn!(operation_id, "[Rejection] No history entry for rejected operation");
            return self.force_resync(ForcedResyncCause::HistoryEntryMissing).await;
        }

        let result = {
            let _guard = self.operation_state.suppress(SuppressionKind::UndoRedo);
            self.history.undo_through(operation_id).await
        };

        match result {
            Ok(outcome) if outcome.success => {
                let discarded = self.buffer.discard_all().len();
                self.metrics.record(|m| m.rollbacks += 1);
                tracing::info!(
                    operation_id,
                    undo_count = outcome.undo_count,
                    discarded,
                    "[Rejection] Rolled back rejected operation"
                );

                if discarded > 0 {
                    if let RejectionOutcome::BreakerTripped(cause) =
                        self.force_resync(ForcedResyncCause::BufferDiscarded).await
                    {
                        return RejectionOutcome::BreakerTripped(cause);
                    }
                }
                RejectionOutcome::RolledBack {
                    undo_count: outcome.undo_count,
                    discarded,
                }
            }
            Ok(_) => {
                tracing::warn!(operation_id, "[Rejection] Undo reported failure");
                self.metrics.record(|m| m.failed_rollbacks += 1);
                self.force_resync(ForcedResyncCause::RollbackFailed).await
            }
            Err(error) => {
                tracing::warn!(operation_id, error = %error, "[Rejection] Undo failed");
                self.metrics.record(|m| m.failed_rollbacks += 1);
                self.force_resync(ForcedResyncCause::RollbackFailed).await
            }
        }
    }

    async fn force_resync(&self, cause: ForcedResyncCause) -> RejectionOutcome {
        self.history.clear();

        let check = {
            let mut state = lock(&self.state);
            state.breaker.record_resync();
            state.breaker.check()
        };
        match check {
            BreakerCheck::Closed => {}
            BreakerCheck::Tripped(trip) => {
                self.close_gates();
                self.trip(trip).await;
                return RejectionOutcome::BreakerTripped(trip);
            }
            BreakerCheck::AlreadyOpen => return RejectionOutcome::Ignored,
        }

        tracing::warn!(cause = cause.as_str(), "[Rejection] Forcing resync");
        self.metrics.record(|m| m.forced_resyncs += 1);
        self.resync.trigger_resync(cause.as_str());

        let discarded = self.buffer.discard_all().len();
        if discarded > 0 {
            tracing::debug!(discarded, "[Rejection] Discarded buffered operations");
        }

        RejectionOutcome::ResyncForced(cause)
    }

    /// Block edits for good and drop anything buffered
    fn close_gates(&self) {
        self.store.set_block_operations(true);
        self.buffer.discard_all();
        lock(&self.state).rollbacks = 0;
    }

    async fn trip(&self, cause: TripCause) {
        tracing::error!(cause = %cause, "[Rejection] Circuit breaker tripped, leaving collaboration");
        self.metrics.record(|m| m.breaker_trips += 1);

        self.notices.publish(UserNotice::CollaborationEnded {
            cause: cause.to_string(),
        });

        if let Err(error) = self.control.end_collaboration().await {
            tracing::error!(error = %error, "[Rejection] Failed to end collaboration session");
        }
    }

    /// Decide whether an incoming remote operation may be applied now
    pub fn route_remote_operation(&self, operation: &RemoteOperation) -> RouteDecision {
        let (tripped, rolling_back) = {
            let state = lock(&self.state);
            (state.breaker.is_tripped(), state.rollbacks > 0)
        };
        if tripped {
            return RouteDecision::Dropped;
        }
        if !rolling_back {
            return RouteDecision::Apply;
        }
        if self.buffer.push(operation.clone()) {
            self.metrics.record(|m| m.remote_operations_buffered += 1);
            tracing::debug!(
                operation_id = %operation.operation_id,
                "[Rejection] Buffered remote operation during rollback"
            );
        }
        RouteDecision::Buffered
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&UserNotice) + Send + Sync + 'static,
    {
        self.notices.subscribe(handler)
    }

    pub fn notices(&self) -> &Topic<UserNotice> {
        &self.notices
    }

    pub fn is_tripped(&self) -> bool {
        lock(&self.state).breaker.is_tripped()
    }

    pub fn is_rolling_back(&self) -> bool {
        lock(&self.state).rollbacks > 0
    }

    pub fn buffered_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn recent_rejections(&self) -> usize {
        lock(&self.state).breaker.recent_rejections()
    }

    pub fn recent_resyncs(&self) -> usize {
        lock(&self.state).breaker.recent_resyncs()
    }

    /// Cancel the notice timer and drop buffered operations. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.batcher.cancel();
        self.buffer.discard_all();
        lock(&self.state).rollbacks = 0;
        tracing::debug!("[Rejection] Disposed");
    }
}

impl fmt::Debug for RejectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectionHandler")
            .field("tripped", &self.is_tripped())
            .field("rolling_back", &self.is_rolling_back())
            .field("buffered", &self.buffered_count())
            .finish()
    }
}
