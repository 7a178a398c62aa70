//! # Synchronization State and Resync
//!
//! Keeps track of whether the local diagram agrees with the server and brings
//! it back in line when it does not.
//!
//! ## Architecture
//!
//! - **Sync State**: the single mutable source of truth for sync status
//! - **Resync**: debounced full-state refetch with retry/backoff
//! - **Retry**: backoff policy for the refetch
//! - **Metrics**: recovery counters for diagnostics
//!
//! The store does not own the resync service. It holds a weak reference
//! registered once at startup:
//!
//! ```rust,ignore
//! let store = Arc::new(SyncStateStore::new());
//! let resync = ResyncService::new(deps, &config);
//! store.attach_coordinator(&resync);
//! ```

pub mod metrics;
pub mod resync;
pub mod retry;
pub mod sync_state;

pub use metrics::{MetricsHandle, SyncMetrics};
pub use resync::{ResyncDeps, ResyncError, ResyncResult, ResyncService};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use sync_state::{PendingRemoteOperation, ResyncCoordinator, SyncSnapshot, SyncState, SyncStateStore};
