//! # External Collaborator Seams
//!
//! The sync engine talks to the outside world only through the traits in this
//! module: the realtime transport, the REST API, the edit history and the
//! rendering surface. Production code plugs in `RestDiagramApi` and the
//! application's own surface/history; tests plug in in-memory fakes.

use async_trait::async_trait;
use thiserror::Error;

use crate::shared::diagram::{Cell, DiagramSnapshot};
use crate::shared::event::RemoteOperation;
use crate::shared::message::OutboundMessage;

/// Transport-level failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("not authenticated")]
    Unauthorized,
    #[error("permission denied")]
    Forbidden,
    #[error("server responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("connection closed")]
    Closed,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    /// Authentication and permission failures are never retried or rerouted
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TransportError::Unauthorized | TransportError::Forbidden)
    }

    /// Map an HTTP status to an error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 => TransportError::Unauthorized,
            403 => TransportError::Forbidden,
            _ => TransportError::Status {
                status,
                message: message.into(),
            },
        }
    }
}

/// Failure reported by the edit history while undoing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("no history entry for operation {0}")]
    EntryNotFound(String),
    #[error("undo failed: {0}")]
    UndoFailed(String),
}

/// Result of undoing history back through an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoOutcome {
    pub success: bool,
    /// Number of history entries undone
    pub undo_count: usize,
}

/// Realtime (WebSocket) channel to the collaboration server
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<(), TransportError>;
}

/// REST source of full authoritative diagram state
#[async_trait]
pub trait DiagramStateSource: Send + Sync {
    async fn fetch_diagram_state(&self) -> Result<DiagramSnapshot, TransportError>;
}

/// REST save path used when the realtime transport fails
#[async_trait]
pub trait DiagramPersistence: Send + Sync {
    /// Replace the stored diagram content with the full cell list
    async fn save_cells(&self, cells: &[Cell]) -> Result<(), TransportError>;
}

/// Leaves the collaboration session on the server
#[async_trait]
pub trait CollaborationControl: Send + Sync {
    async fn end_collaboration(&self) -> Result<(), TransportError>;
}

/// Local edit history (undo/redo stack) owned by the editing surface
#[async_trait]
pub trait EditHistory: Send + Sync {
    /// Whether an entry for the operation is still in history
    fn contains_operation(&self, operation_id: &str) -> bool;

    /// Undo entries back through and including the given operation
    async fn undo_through(&self, operation_id: &str) -> Result<UndoOutcome, HistoryError>;

    /// Forget all history
    fn clear(&self);
}

/// Rendering surface holding the live diagram
pub trait DiagramSurface: Send + Sync {
    /// Apply an operation that came from another participant
    fn apply_remote_operation(&self, operation: &RemoteOperation) -> Result<(), String>;

    /// Replace all content with an authoritative snapshot
    fn replace_cells(&self, cells: Vec<Cell>);

    /// Current content, used by the REST save fallback
    fn current_cells(&self) -> Vec<Cell>;
}
