//! Client Sync Engine Module
//!
//! Everything a diagram editor needs to stay consistent with the
//! collaboration server while several users edit the same diagram.
//!
//! # Architecture
//!
//! - **`adapter`** - Validates transport messages into domain events
//! - **`sync`** - Sync state store, resynchronization service, retry policy and metrics
//! - **`recovery`** - Rejection handling, rollback, notification batching and circuit breaker
//! - **`operation_state`** - Suppression flags and drag lifecycle
//! - **`collab`** - Collaboration session aggregate and conflict detection
//! - **`save`** - Realtime save with REST fallback
//! - **`rest_client`** - HTTP access to the diagram resource
//! - **`transport`** - Collaborator traits the engine is wired to
//! - **`engine`** - Facade that owns and wires the components
//!
//! # Module Structure
//!
//! ```text
//! client/
//! ├── mod.rs             - Module exports and documentation
//! ├── engine.rs          - CollaborationEngine facade
//! ├── adapter.rs         - MessageAdapter
//! ├── operation_state.rs - OperationStateManager
//! ├── save.rs            - SaveCoordinator
//! ├── rest_client.rs     - RestDiagramApi
//! ├── config.rs          - ClientConfig
//! ├── transport.rs       - Collaborator traits
//! ├── timer.rs           - Debouncer
//! ├── sync/              - SyncStateStore, ResyncService
//! ├── recovery/          - RejectionHandler, CircuitBreaker
//! └── collab/            - CollaborationSessions
//! ```

pub mod adapter;
pub mod collab;
pub mod config;
pub mod engine;
pub mod operation_state;
pub mod recovery;
pub mod rest_client;
pub mod save;
pub mod sync;
pub mod timer;
pub mod transport;

pub use adapter::{AdapterError, MessageAdapter};
pub use config::ClientConfig;
pub use engine::{CollaborationEngine, EngineDeps, EngineError};
pub use operation_state::{DragCompletion, DragType, OperationKind, OperationStateManager, SuppressionKind};
pub use rest_client::RestDiagramApi;
pub use save::{SaveCoordinator, SaveOutcome};
pub use timer::Debouncer;
pub use transport::{
    CollaborationControl, DiagramPersistence, DiagramStateSource, DiagramSurface, EditHistory, HistoryError,
    RealtimeTransport, TransportError, UndoOutcome,
};
