//! XFCollab - Collaborative Diagram Sync Engine
//!
//! XFCollab is the client-side synchronization engine of a collaborative
//! diagram editor. Several users edit the same diagram through a realtime
//! transport; the engine keeps each client's view consistent with the server.
//!
//! # Overview
//!
//! This library provides:
//! - Validation of inbound transport messages into typed domain events
//! - Sync state tracking against the server's update vector
//! - Rollback of server-rejected local edits
//! - Debounced resynchronization from authoritative state with retry
//! - A circuit breaker that ends collaboration when recovery keeps failing
//! - Suppression of echo broadcasts and drag coalescing
//! - A collaboration session aggregate with presence and conflict detection
//!
//! # Module Structure
//!
//! - **`shared`** - Types that cross the transport boundary
//!   - Wire messages, diagram data, domain events
//!   - Error types and sync configuration
//!
//! - **`client`** - The sync engine
//!   - `CollaborationEngine` facade and its components
//!   - REST client and collaborator traits
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xfcollab::client::{ClientConfig, CollaborationEngine, EngineDeps, RestDiagramApi};
//! use xfcollab::shared::SyncConfig;
//! # use xfcollab::client::{RealtimeTransport, EditHistory, DiagramSurface};
//! # fn deps(realtime: Arc<dyn RealtimeTransport>, history: Arc<dyn EditHistory>, surface: Arc<dyn DiagramSurface>) {
//! let api = Arc::new(RestDiagramApi::new(ClientConfig::new("tm-1", "diagram-1")));
//! let engine = CollaborationEngine::new(
//!     EngineDeps::with_rest_api(api, realtime, history, surface),
//!     SyncConfig::default(),
//! );
//! assert!(engine.can_edit());
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Components are shared as `Arc` and guard their state with `Mutex` or
//! atomics. Timers run on the ambient tokio runtime.
//!
//! # Error Handling
//!
//! - `SharedError` for wire validation failures
//! - `TransportError` for transport and REST failures
//! - `CollaborationError` for session aggregate operations
//! - `EngineError` for rejected local edits

/// Shared types and data structures
pub mod shared;

/// Client sync engine
pub mod client;
