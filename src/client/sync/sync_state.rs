//! # Sync State Store
//!
//! Single source of truth for synchronization status: whether the local
//! diagram is in sync with the server, how many remote operations are in
//! flight, whether a resync is outstanding and whether local edits are
//! currently blocked.
//!
//! ## Guarantees
//!
//! - Every transition is applied under one lock and published afterwards, so
//!   subscribers never observe a half-applied update.
//! - `pending_operations` never goes below zero.
//! - Local edits stay blocked for as long as a resync is outstanding,
//!   regardless of the explicit gate set by rollback.
//! - Correction data is never applied directly; an out-of-date signal only
//!   marks the store unsynced and asks the attached coordinator for a resync.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};

use crate::shared::diagram::{DiagramPatch, UpdateVector};
use crate::shared::event::{DomainEvent, RemoteOperation, Subscription, Topic};
use crate::shared::lock;

/// Applied remote operations remembered for deduplication
const MAX_PENDING_REMOTE: usize = 100;

/// Synchronization status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub is_synced: bool,
    pub pending_operations: usize,
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    pub is_resyncing: bool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            is_synced: true,
            pending_operations: 0,
            last_sync_timestamp: None,
            is_resyncing: false,
        }
    }
}

/// A remote operation that has been received and recorded
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRemoteOperation {
    pub operation_id: String,
    pub user_id: String,
    pub operation: DiagramPatch,
    pub received_at: DateTime<Utc>,
}

impl From<&RemoteOperation> for PendingRemoteOperation {
    fn from(op: &RemoteOperation) -> Self {
        Self {
            operation_id: op.operation_id.clone(),
            user_id: op.user.user_id.clone(),
            operation: op.operation.clone(),
            received_at: op.received_at,
        }
    }
}

/// Published after every transition
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub state: SyncState,
    pub conflict_count: u32,
    pub operations_blocked: bool,
    pub local_update_vector: UpdateVector,
    pub pending_remote: usize,
}

/// Receives resync requests raised by the store
pub trait ResyncCoordinator: Send + Sync {
    fn trigger_resync(&self, reason: &str);
}

#[derive(Debug, Default)]
struct StoreInner {
    state: SyncState,
    pending: VecDeque<PendingRemoteOperation>,
    last_operation_id: Option<String>,
    conflict_count: u32,
    /// Explicit gate, independent of resync
    edits_blocked: bool,
    local_update_vector: UpdateVector,
    /// Highest vector the server has announced
    server_update_vector: UpdateVector,
}

impl StoreInner {
    fn operations_blocked(&self) -> bool {
        self.edits_blocked || self.state.is_resyncing
    }

    fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            state: self.state.clone(),
            conflict_count: self.conflict_count,
            operations_blocked: self.operations_blocked(),
            local_update_vector: self.local_update_vector,
            pending_remote: self.pending.len(),
        }
    }
}

/// Sync state store
#[derive(Default)]
pub struct SyncStateStore {
    inner: Mutex<StoreInner>,
    coordinator: Mutex<Option<Weak<dyn ResyncCoordinator>>>,
    transitions: Topic<SyncSnapshot>,
}

impl SyncStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the component that performs resyncs. Called once at startup.
    pub fn attach_coordinator<C>(&self, coordinator: &Arc<C>)
    where
        C: ResyncCoordinator + 'static,
    {
        let weak: Weak<dyn ResyncCoordinator> = Arc::downgrade(coordinator) as Weak<dyn ResyncCoordinator>;
        *lock(&self.coordinator) = Some(weak);
    }

    /// Subscribe to state transitions
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SyncSnapshot) + Send + Sync + 'static,
    {
        self.transitions.subscribe(handler)
    }

    pub fn transitions(&self) -> &Topic<SyncSnapshot> {
        &self.transitions
    }

    /// Update counters for a domain event; out-of-date signals request a resync
    pub fn process_domain_event(&self, event: &DomainEvent) {
        match event {
            DomainEvent::RemoteOperation(op) => {
                self.mutate(|inner| {
                    inner.state.pending_operations += 1;
                });
                tracing::debug!(operation_id = %op.operation_id, "[Sync] Remote operation received");
            }
            DomainEvent::StateCorrection { update_vector } => {
                self.handle_server_vector(*update_vector, "state_correction");
            }
            DomainEvent::DiagramState(snapshot) => {
                self.handle_server_vector(snapshot.update_vector, "diagram_state");
            }
            DomainEvent::OperationRejected(_) | DomainEvent::ParticipantsChanged(_) => {}
        }
    }

    fn handle_server_vector(&self, server_vector: UpdateVector, source: &str) {
        let outcome = {
            let mut inner = lock(&self.inner);
            inner.server_update_vector = inner.server_update_vector.max(server_vector);
            let local = inner.local_update_vector;
            if !server_vector.is_ahead_of(local) {
                None
            } else {
                inner.state.is_synced = false;
                inner.conflict_count += 1;
                Some((local, inner.state.is_resyncing, inner.snapshot()))
            }
        };

        let Some((local, already_resyncing, snapshot)) = outcome else {
            tracing::debug!(
                source,
                server_vector = %server_vector,
                "[Sync] Server vector not ahead of local state, nothing to do"
            );
            return;
        };

        tracing::warn!(
            source,
            server_vector = %server_vector,
            local_vector = %local,
            conflict_count = snapshot.conflict_count,
            "[Sync] Local state is behind the server"
        );
        self.transitions.publish(snapshot);

        if already_resyncing {
            tracing::debug!("[Sync] Resync already in progress, not triggering another");
            return;
        }
        self.request_resync(source);
    }

    fn request_resync(&self, reason: &str) {
        let coordinator = lock(&self.coordinator).as_ref().and_then(Weak::upgrade);
        match coordinator {
            Some(coordinator) => coordinator.trigger_resync(reason),
            None => tracing::warn!(reason, "[Sync] Resync needed but no coordinator attached"),
        }
    }

    /// Record a remote operation as applied.
    ///
    /// Returns `false` if the operation was already recorded.
    pub fn record_applied_operation(&self, operation: &RemoteOperation) -> bool {
        let recorded = {
            let mut inner = lock(&self.inner);
            let duplicate = inner.last_operation_id.as_deref() == Some(operation.operation_id.as_str())
                || inner
                    .pending
                    .iter()
                    .any(|p| p.operation_id == operation.operation_id);
            if duplicate {
                None
            } else {
                inner.last_operation_id = Some(operation.operation_id.clone());
                inner.pending.push_back(PendingRemoteOperation::from(operation));
                while inner.pending.len() > MAX_PENDING_REMOTE {
                    inner.pending.pop_front();
                }
                inner.state.pending_operations = inner.state.pending_operations.saturating_sub(1);
                inner.state.last_sync_timestamp = Some(Utc::now());
                Some(inner.snapshot())
            }
        };

        match recorded {
            Some(snapshot) => {
                self.transitions.publish(snapshot);
                true
            }
            None => {
                tracing::debug!(operation_id = %operation.operation_id, "[Sync] Duplicate operation ignored");
                false
            }
        }
    }

    /// A received remote operation will never be applied
    pub fn discard_operation(&self, operation_id: &str) {
        self.mutate(|inner| {
            inner.state.pending_operations = inner.state.pending_operations.saturating_sub(1);
        });
        tracing::debug!(operation_id, "[Sync] Remote operation discarded");
    }

    /// Whether the operation was already recorded as applied
    pub fn is_recorded(&self, operation_id: &str) -> bool {
        let inner = lock(&self.inner);
        inner.last_operation_id.as_deref() == Some(operation_id)
            || inner.pending.iter().any(|p| p.operation_id == operation_id)
    }

    /// Forget recorded remote operations
    pub fn clear_pending_operations(&self) {
        self.mutate(|inner| {
            inner.pending.clear();
            inner.state.pending_operations = 0;
        });
    }

    /// A resync round-trip has been issued; edits stay blocked until it ends
    pub fn begin_resync(&self) {
        self.mutate(|inner| {
            inner.state.is_resyncing = true;
        });
    }

    /// Authoritative state was applied; everything is consistent again
    pub fn resync_complete(&self, server_vector: Option<UpdateVector>) {
        self.mutate(|inner| {
            inner.state.is_synced = true;
            inner.state.is_resyncing = false;
            inner.state.pending_operations = 0;
            inner.state.last_sync_timestamp = Some(Utc::now());
            inner.pending.clear();
            inner.conflict_count = 0;
            if let Some(vector) = server_vector {
                inner.local_update_vector = vector;
                inner.server_update_vector = inner.server_update_vector.max(vector);
            }
        });
        tracing::info!("[Sync] Resync complete");
    }

    /// The resync gave up; state stays unsynced
    pub fn resync_failed(&self) {
        self.mutate(|inner| {
            inner.state.is_resyncing = false;
        });
    }

    /// Record a server vector the local diagram now reflects
    pub fn set_local_update_vector(&self, vector: UpdateVector) {
        self.mutate(|inner| {
            if vector.is_ahead_of(inner.local_update_vector) {
                inner.local_update_vector = vector;
            }
        });
    }

    /// Explicit edit gate. Clearing it does not unblock an outstanding resync.
    pub fn set_block_operations(&self, blocked: bool) {
        let changed = {
            let mut inner = lock(&self.inner);
            if inner.edits_blocked == blocked {
                None
            } else {
                inner.edits_blocked = blocked;
                Some(inner.snapshot())
            }
        };
        if let Some(snapshot) = changed {
            tracing::debug!(blocked, "[Sync] Operation gate changed");
            self.transitions.publish(snapshot);
        }
    }

    /// Gate consulted before accepting new local edits
    pub fn are_operations_blocked(&self) -> bool {
        lock(&self.inner).operations_blocked()
    }

    pub fn state(&self) -> SyncState {
        lock(&self.inner).state.clone()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        lock(&self.inner).snapshot()
    }

    pub fn conflict_count(&self) -> u32 {
        lock(&self.inner).conflict_count
    }

    pub fn local_update_vector(&self) -> UpdateVector {
        lock(&self.inner).local_update_vector
    }

    /// Highest vector seen from the server, never behind the local one
    pub fn latest_server_vector(&self) -> UpdateVector {
        let inner = lock(&self.inner);
        inner.server_update_vector.max(inner.local_update_vector)
    }

    pub fn pending_remote_operations(&self) -> Vec<PendingRemoteOperation> {
        lock(&self.inner).pending.iter().cloned().collect()
    }

    fn mutate(&self, apply: impl FnOnce(&mut StoreInner)) {
        let snapshot = {
            let mut inner = lock(&self.inner);
            apply(&mut inner);
            inner.snapshot()
        };
        self.transitions.publish(snapshot);
    }
}

impl std::fmt::Debug for SyncStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStateStore")
            .field("state", &self.snapshot())
            .finish()
    }
}
