//! # Rejection Recovery
//!
//! Everything that happens after the server refuses one of our operations:
//! rollback, forced resync, the circuit breaker and user notices.
//!
//! ## Components
//!
//! - **Rejection Handler**: the recovery state machine
//! - **Circuit Breaker**: sliding-window rejection/resync accounting
//! - **Notifications**: debounced, batched user notices
//! - **Queue**: rollback buffer for remote operations

pub mod circuit_breaker;
pub mod notifications;
pub mod queue;
pub mod rejection;

pub use circuit_breaker::{BreakerCheck, CircuitBreaker, RejectionRecord, TripCause};
pub use notifications::{NotificationBatcher, RejectionNotice, Severity, UserNotice};
pub use queue::{BufferedOperation, OperationQueue};
pub use rejection::{
    Admission, ForcedResyncCause, PendingRecovery, RejectionDeps, RejectionHandler, RejectionOutcome, RouteDecision,
};
