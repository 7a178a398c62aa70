//! Shared Module
//!
//! Types shared by the transport boundary and the client engine: wire
//! messages, diagram data, domain events, errors and configuration.
//!
//! # Overview
//!
//! Everything here is free of engine state. The `client` module builds the
//! synchronization engine on top of these types.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Diagram content types
pub mod diagram;

/// Transport message types
pub mod message;

/// Domain events and typed topics
pub mod event;

/// Shared error types
pub mod error;

/// Sync engine configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{ConfigError, SyncConfig, SyncConfigBuilder};
pub use diagram::{Cell, CellOperation, CellOperationKind, DiagramPatch, DiagramSnapshot, Participant, UpdateVector, User};
pub use error::SharedError;
pub use event::{DomainEvent, RejectionEvent, RejectionReason, SessionNotice, Subscription, Topic};
pub use message::{OutboundMessage, ResyncMethod, TransportMessage};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Engine state stays consistent across a panicking subscriber because every
/// transition is applied before handlers run.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
