//! # Collaboration Engine
//!
//! Owns and wires every component of the client sync engine and drives
//! inbound messages through them:
//!
//! ```text
//! transport -> MessageAdapter -> SyncStateStore -> RejectionHandler / ResyncService
//!                                               -> DiagramSurface (remote operations)
//!                                               -> CollaborationSessions (roster)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = CollaborationEngine::new(deps, SyncConfig::load_default()?);
//! let inbound = engine.spawn_inbound(receiver);
//!
//! if engine.can_edit() {
//!     engine.submit_local_operation(patch).await?;
//! }
//!
//! engine.dispose();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::adapter::MessageAdapter;
use crate::client::collab::CollaborationSessions;
use crate::client::operation_state::OperationStateManager;
use crate::client::recovery::{Admission, PendingRecovery, RejectionDeps, RejectionHandler, RouteDecision};
use crate::client::rest_client::RestDiagramApi;
use crate::client::save::{SaveCoordinator, SaveOutcome};
use crate::client::sync::{MetricsHandle, ResyncDeps, ResyncService, SyncMetrics, SyncState, SyncStateStore};
use crate::client::transport::{
    CollaborationControl, DiagramPersistence, DiagramStateSource, DiagramSurface, EditHistory, RealtimeTransport,
    TransportError,
};
use crate::shared::config::SyncConfig;
use crate::shared::diagram::DiagramPatch;
use crate::shared::event::{DomainEvent, RemoteOperation};
use crate::shared::lock;
use crate::shared::message::TransportMessage;

/// Errors returned to callers submitting local edits
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("local edits are blocked while the diagram is being reconciled")]
    EditsBlocked,
    #[error("a remote or undo/redo operation is being applied")]
    Suppressed,
    #[error("engine has been disposed")]
    Disposed,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// External collaborators the engine talks to
pub struct EngineDeps {
    pub realtime: Arc<dyn RealtimeTransport>,
    pub state_source: Arc<dyn DiagramStateSource>,
    pub persistence: Arc<dyn DiagramPersistence>,
    pub control: Arc<dyn CollaborationControl>,
    pub history: Arc<dyn EditHistory>,
    pub surface: Arc<dyn DiagramSurface>,
}

impl EngineDeps {
    /// Use one REST client for state fetches, saves and leaving collaboration
    pub fn with_rest_api(
        api: Arc<RestDiagramApi>,
        realtime: Arc<dyn RealtimeTransport>,
        history: Arc<dyn EditHistory>,
        surface: Arc<dyn DiagramSurface>,
    ) -> Self {
        Self {
            realtime,
            state_source: api.clone(),
            persistence: api.clone(),
            control: api,
            history,
            surface,
        }
    }
}

/// Collaboration engine facade
pub struct CollaborationEngine {
    adapter: MessageAdapter,
    store: Arc<SyncStateStore>,
    resync: Arc<ResyncService>,
    rejections: RejectionHandler,
    operation_state: Arc<OperationStateManager>,
    sessions: CollaborationSessions,
    save: SaveCoordinator,
    surface: Arc<dyn DiagramSurface>,
    control: Arc<dyn CollaborationControl>,
    metrics: MetricsHandle,
    inbound: Mutex<Option<JoinHandle<()>>>,
    recoveries: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl CollaborationEngine {
    pub fn new(deps: EngineDeps, config: SyncConfig) -> Arc<Self> {
        let metrics = MetricsHandle::new();
        let store = Arc::new(SyncStateStore::new());
        let operation_state = OperationStateManager::new(config.drag_debounce);

        let resync = ResyncService::new(
            ResyncDeps {
                store: Arc::clone(&store),
                source: deps.state_source,
                realtime: Arc::clone(&deps.realtime),
                surface: Arc::clone(&deps.surface),
                operation_state: Arc::clone(&operation_state),
                metrics: metrics.clone(),
            },
            &config,
        );
        store.attach_coordinator(&resync);

        let rejections = RejectionHandler::new(
            RejectionDeps {
                store: Arc::clone(&store),
                history: deps.history,
                resync: resync.clone(),
                control: Arc::clone(&deps.control),
                operation_state: Arc::clone(&operation_state),
                metrics: metrics.clone(),
            },
            &config,
        );

        let save = SaveCoordinator::new(
            deps.realtime,
            deps.persistence,
            Arc::clone(&deps.surface),
            config.save_timeout,
        );

        tracing::info!("[Sync] Collaboration engine initialized");
        Arc::new(Self {
            adapter: MessageAdapter::new(),
            store,
            resync,
            rejections,
            operation_state,
            sessions: CollaborationSessions::new(config.conflict_window),
            save,
            surface: deps.surface,
            control: deps.control,
            metrics,
            inbound: Mutex::new(None),
            recoveries: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        })
    }

    /// Drive one inbound message through the engine, including any rollback
    /// it starts
    pub async fn handle_message(&self, message: TransportMessage) {
        if let Some(pending) = self.dispatch(message) {
            self.recover(pending).await;
        }
    }

    /// Route a message synchronously. A rejection's rollback is handed back
    /// so the caller decides whether to await it or run it in the background.
    fn dispatch(&self, message: TransportMessage) -> Option<PendingRecovery> {
        if self.is_disposed() {
            return None;
        }
        let event = self.adapter.handle_message(message)?;
        self.store.process_domain_event(&event);

        match event {
            DomainEvent::RemoteOperation(operation) => self.apply_remote(operation),
            DomainEvent::OperationRejected(rejection) => match self.rejections.admit(rejection) {
                Admission::Settled(outcome) => tracing::debug!(?outcome, "[Sync] Rejection handled"),
                Admission::Pending(pending) => return Some(pending),
            },
            DomainEvent::ParticipantsChanged(change) => {
                if self.sessions.active_session_id().is_some() {
                    if let Err(error) = self.sessions.sync_participants(&change.participants) {
                        tracing::warn!(error = %error, "[Session] Failed to mirror roster");
                    }
                }
            }
            DomainEvent::DiagramState(snapshot) => {
                if self.resync.offer_snapshot(&snapshot) {
                    tracing::debug!(update_vector = %snapshot.update_vector, "[Sync] Snapshot answered resync request");
                }
            }
            DomainEvent::StateCorrection { .. } => {}
        }
        None
    }

    async fn recover(&self, pending: PendingRecovery) {
        let outcome = self.rejections.recover(pending).await;
        tracing::debug!(?outcome, "[Sync] Rejection handled");
    }

    /// Parse a raw JSON frame and handle it
    pub async fn handle_json(&self, raw: &str) {
        match TransportMessage::from_json(raw) {
            Ok(message) => self.handle_message(message).await,
            Err(error) => tracing::warn!(error = %error, "[Adapter] Dropping unparseable message"),
        }
    }

    fn apply_remote(&self, operation: RemoteOperation) {
        if self.store.is_recorded(&operation.operation_id) {
            self.store.discard_operation(&operation.operation_id);
            return;
        }

        match self.rejections.route_remote_operation(&operation) {
            RouteDecision::Apply => {}
            RouteDecision::Buffered | RouteDecision::Dropped => {
                self.store.discard_operation(&operation.operation_id);
                return;
            }
        }

        let applied = self
            .operation_state
            .with_remote_operation(|| self.surface.apply_remote_operation(&operation));
        match applied {
            Ok(()) => {
                self.store.record_applied_operation(&operation);
                self.metrics.record(|m| m.remote_operations_applied += 1);
            }
            Err(error) => {
                tracing::warn!(
                    operation_id = %operation.operation_id,
                    error = %error,
                    "[Sync] Failed to apply remote operation, requesting resync"
                );
                self.store.discard_operation(&operation.operation_id);
                self.resync.trigger_resync("apply_failed");
            }
        }
    }

    /// Consume messages from the transport until the channel closes
    pub fn spawn_inbound(self: &Arc<Self>, mut receiver: mpsc::Receiver<TransportMessage>) -> bool {
        if self.is_disposed() {
            return false;
        }
        let engine: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                // Later messages keep flowing while the undo runs
                if let Some(pending) = engine.dispatch(message) {
                    engine.spawn_recovery(pending);
                }
            }
            tracing::debug!("[Sync] Inbound channel closed");
        });

        if let Some(previous) = lock(&self.inbound).replace(handle) {
            previous.abort();
        }
        true
    }

    fn spawn_recovery(self: &Arc<Self>, pending: PendingRecovery) {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            engine.recover(pending).await;
        });
        let mut recoveries = lock(&self.recoveries);
        recoveries.retain(|task| !task.is_finished());
        recoveries.push(handle);
    }

    /// Whether the editing surface may accept new local edits
    pub fn can_edit(&self) -> bool {
        !self.is_disposed() && !self.store.are_operations_blocked() && !self.rejections.is_tripped()
    }

    /// Send a local edit, falling back to a REST save if the transport fails
    pub async fn submit_local_operation(&self, operation: DiagramPatch) -> Result<SaveOutcome, EngineError> {
        if self.is_disposed() {
            return Err(EngineError::Disposed);
        }
        if !self.operation_state.should_broadcast() {
            return Err(EngineError::Suppressed);
        }
        if !self.can_edit() {
            return Err(EngineError::EditsBlocked);
        }
        Ok(self.save.save(operation).await?)
    }

    /// Leave collaboration on the server and tear down
    pub async fn leave(&self) -> Result<(), TransportError> {
        let result = self.control.end_collaboration().await;
        self.dispose();
        result
    }

    pub fn adapter(&self) -> &MessageAdapter {
        &self.adapter
    }

    pub fn store(&self) -> &Arc<SyncStateStore> {
        &self.store
    }

    pub fn resync(&self) -> &Arc<ResyncService> {
        &self.resync
    }

    pub fn rejections(&self) -> &RejectionHandler {
        &self.rejections
    }

    pub fn operation_state(&self) -> &Arc<OperationStateManager> {
        &self.operation_state
    }

    pub fn sessions(&self) -> &CollaborationSessions {
        &self.sessions
    }

    pub fn sync_state(&self) -> SyncState {
        self.store.state()
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.metrics.snapshot()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Cancel every timer and background task. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.resync.dispose();
        self.rejections.dispose();
        self.operation_state.dispose();
        self.adapter.reset_roster();
        self.sessions.clear();
        if let Some(handle) = lock(&self.inbound).take() {
            handle.abort();
        }
        for task in lock(&self.recoveries).drain(..) {
            task.abort();
        }
        tracing::info!("[Sync] Collaboration engine disposed");
    }
}

impl Drop for CollaborationEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for CollaborationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationEngine")
            .field("state", &self.store.snapshot())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
