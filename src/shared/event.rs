/**
 * Domain Event System
 *
 * This module defines the typed topics components use to observe each other,
 * and the normalized domain events the message adapter publishes.
 *
 * # Topics
 *
 * A `Topic<T>` dispatches every published value synchronously, in
 * subscription order, to its handlers. Subscribing returns a `Subscription`
 * token; dropping it (or calling `unsubscribe`) removes the handler. Async
 * observers can additionally take a `tokio::sync::broadcast` receiver.
 *
 * # Event Types
 *
 * - Remote diagram operations
 * - Operation rejections
 * - State corrections and full snapshots
 * - Participant roster changes and session notices
 */
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::shared::diagram::{DiagramPatch, DiagramSnapshot, Participant, UpdateVector, User};
use crate::shared::lock;

/// Buffered values kept for slow async observers
const BROADCAST_CAPACITY: usize = 256;

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Handlers<T> {
    entries: Mutex<Vec<(u64, Handler<T>)>>,
    next_id: AtomicU64,
}

/// Typed publish/subscribe channel
pub struct Topic<T: Clone + Send + 'static> {
    handlers: Arc<Handlers<T>>,
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Create a topic with no subscribers
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: Arc::new(Handlers {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            sender,
        }
    }

    /// Register a handler, called synchronously on every publish
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.handlers.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers.entries).push((id, Arc::new(handler)));

        let weak: Weak<Handlers<T>> = Arc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(handlers) = weak.upgrade() {
                lock(&handlers.entries).retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Receiver for async observers. Lagging receivers lose the oldest values.
    pub fn receiver(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Publish a value to every handler and async receiver.
    ///
    /// Returns the number of synchronous handlers that saw the value.
    pub fn publish(&self, value: T) -> usize {
        // Snapshot so handlers may subscribe/unsubscribe while being called.
        let snapshot: Vec<Handler<T>> = lock(&self.handlers.entries)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in &snapshot {
            handler(&value);
        }

        // No async receivers is fine
        let _ = self.sender.send(value);
        snapshot.len()
    }

    /// Number of synchronous handlers
    pub fn subscriber_count(&self) -> usize {
        lock(&self.handlers.entries).len()
    }
}

impl<T: Clone + Send + 'static> Default for Topic<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Cancellation token for a topic subscription
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the handler. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Why the server rejected an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectionReason {
    ConflictDetected,
    ValidationFailed,
    PermissionDenied,
    NoStateChange,
    /// Server-defined reason this client has no special handling for
    Other(String),
}

impl RejectionReason {
    /// Map the wire value to a reason
    pub fn from_wire(value: &str) -> Self {
        match value {
            "conflict_detected" => RejectionReason::ConflictDetected,
            "validation_failed" => RejectionReason::ValidationFailed,
            "permission_denied" => RejectionReason::PermissionDenied,
            "no_state_change" => RejectionReason::NoStateChange,
            other => RejectionReason::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RejectionReason::ConflictDetected => "conflict_detected",
            RejectionReason::ValidationFailed => "validation_failed",
            RejectionReason::PermissionDenied => "permission_denied",
            RejectionReason::NoStateChange => "no_state_change",
            RejectionReason::Other(reason) => reason,
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated remote diagram operation
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteOperation {
    pub operation_id: String,
    pub user: User,
    pub operation: DiagramPatch,
    pub received_at: chrono::DateTime<chrono::Utc>,
}

/// A validated server rejection of one of our operations
#[derive(Debug, Clone, PartialEq)]
pub struct RejectionEvent {
    pub operation_id: String,
    pub update_vector: Option<UpdateVector>,
    pub sequence_number: Option<u64>,
    pub reason: RejectionReason,
    pub message: String,
    pub details: Option<String>,
    pub affected_cells: Vec<String>,
    pub requires_resync: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl RejectionEvent {
    /// Minimal rejection, mostly for tests and replays
    pub fn new(operation_id: impl Into<String>, reason: RejectionReason) -> Self {
        Self {
            operation_id: operation_id.into(),
            update_vector: None,
            sequence_number: None,
            reason,
            message: String::new(),
            details: None,
            affected_cells: Vec::new(),
            requires_resync: false,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn requiring_resync(mut self) -> Self {
        self.requires_resync = true;
        self
    }
}

/// Roster delta computed from two consecutive participant snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct RosterChange {
    pub participants: Vec<Participant>,
    pub host: Option<User>,
    pub current_presenter: Option<User>,
    pub joined: Vec<User>,
    pub left: Vec<User>,
    /// Who removed the departed users, when a human did
    pub removed_by: Option<User>,
}

/// Normalized domain event published by the message adapter
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    RemoteOperation(RemoteOperation),
    OperationRejected(RejectionEvent),
    StateCorrection { update_vector: UpdateVector },
    DiagramState(DiagramSnapshot),
    ParticipantsChanged(RosterChange),
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::RemoteOperation(_) => "remote_operation",
            DomainEvent::OperationRejected(_) => "operation_rejected",
            DomainEvent::StateCorrection { .. } => "state_correction",
            DomainEvent::DiagramState(_) => "diagram_state",
            DomainEvent::ParticipantsChanged(_) => "participants_changed",
        }
    }
}

/// User-facing session membership notice
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Joined(User),
    Left(User),
    Removed { user: User, removed_by: User },
}

impl SessionNotice {
    /// Human-readable text for the notice
    pub fn text(&self) -> String {
        match self {
            SessionNotice::Joined(user) => format!("{} joined the session", user.label()),
            SessionNotice::Left(user) => format!("{} left the session", user.label()),
            SessionNotice::Removed { user, removed_by } => format!(
                "{} was removed from the session by {}",
                user.label(),
                removed_by.label()
            ),
        }
    }
}
