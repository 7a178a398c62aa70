//! # Operation State Manager
//!
//! Tracks local interaction state that the edit history and the change
//! broadcaster need to agree on.
//!
//! ## Features
//!
//! - **Suppression**: while a remote or undo/redo operation is being applied,
//!   local changes must not be broadcast back to the server. Suppression is
//!   scoped by a guard and nests; only the outermost guard clears it, and it
//!   is cleared even if the applying code panics.
//! - **Drag tracking**: a continuous move/resize/vertex edit produces one
//!   completion event carrying the initial and final state, whether the drag
//!   goes quiet or is finalized explicitly. Cells are tracked independently.
//! - **Classification**: which operation kinds belong in edit history.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let manager = OperationStateManager::new(Duration::from_millis(150));
//! manager.with_remote_operation(|| surface.apply_remote_operation(&op));
//!
//! manager.start_drag("cell-1", DragType::Move, json!({"x": 0, "y": 0}));
//! manager.update_drag("cell-1", json!({"x": 40, "y": 10}));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::client::timer::Debouncer;
use crate::shared::event::{Subscription, Topic};
use crate::shared::lock;

/// What is being applied without local broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionKind {
    Remote,
    UndoRedo,
}

/// Kind of continuous interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragType {
    Move,
    Resize,
    Vertices,
}

/// Emitted exactly once per finished drag
#[derive(Debug, Clone, PartialEq)]
pub struct DragCompletion {
    pub cell_id: String,
    pub drag_type: DragType,
    pub initial_state: Value,
    pub final_state: Value,
    pub duration: Duration,
}

/// Categories of diagram change, as seen by the edit history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Hover highlights and other transient styling
    VisualEffect,
    PortVisibility,
    Selection,
    /// Intermediate frame of a drag that has not finished
    DragFrame,
    CellCreate,
    CellDelete,
    CellUpdate,
    DragComplete,
    /// Single user action touching several cells
    CompoundEdit,
}

impl OperationKind {
    /// Whether this kind of change gets a history entry
    pub fn is_recordable(self) -> bool {
        match self {
            OperationKind::VisualEffect
            | OperationKind::PortVisibility
            | OperationKind::Selection
            | OperationKind::DragFrame => false,
            OperationKind::CellCreate
            | OperationKind::CellDelete
            | OperationKind::CellUpdate
            | OperationKind::DragComplete
            | OperationKind::CompoundEdit => true,
        }
    }
}

struct DragSession {
    drag_type: DragType,
    initial_state: Value,
    latest_state: Value,
    started_at: Instant,
    timer: Debouncer,
}

/// Operation state manager
pub struct OperationStateManager {
    remote_depth: AtomicUsize,
    undo_redo_depth: AtomicUsize,
    drags: Mutex<HashMap<String, DragSession>>,
    completions: Topic<DragCompletion>,
    drag_debounce: Duration,
    this: Weak<OperationStateManager>,
}

impl OperationStateManager {
    pub fn new(drag_debounce: Duration) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            remote_depth: AtomicUsize::new(0),
            undo_redo_depth: AtomicUsize::new(0),
            drags: Mutex::new(HashMap::new()),
            completions: Topic::new(),
            drag_debounce,
            this: this.clone(),
        })
    }

    // ------------------------------------------------------------------
    // Suppression
    // ------------------------------------------------------------------

    /// Enter a suppression scope; it ends when the guard is dropped
    pub fn suppress(&self, kind: SuppressionKind) -> SuppressionGuard<'_> {
        let depth = self.depth(kind).fetch_add(1, Ordering::SeqCst);
        if depth == 0 {
            tracing::trace!(?kind, "suppression started");
        }
        SuppressionGuard { manager: self, kind }
    }

    /// Run `apply` with remote suppression active
    pub fn with_remote_operation<R>(&self, apply: impl FnOnce() -> R) -> R {
        let _guard = self.suppress(SuppressionKind::Remote);
        apply()
    }

    /// Run `apply` with undo/redo suppression active
    pub fn with_undo_redo<R>(&self, apply: impl FnOnce() -> R) -> R {
        let _guard = self.suppress(SuppressionKind::UndoRedo);
        apply()
    }

    pub fn is_applying_remote(&self) -> bool {
        self.remote_depth.load(Ordering::SeqCst) > 0
    }

    pub fn is_applying_undo_redo(&self) -> bool {
        self.undo_redo_depth.load(Ordering::SeqCst) > 0
    }

    /// Whether a local change should be sent to the server right now
    pub fn should_broadcast(&self) -> bool {
        !self.is_applying_remote() && !self.is_applying_undo_redo()
    }

    /// Whether a change of this kind should be written to edit history
    pub fn should_record(&self, kind: OperationKind) -> bool {
        kind.is_recordable() && self.should_broadcast()
    }

    fn depth(&self, kind: SuppressionKind) -> &AtomicUsize {
        match kind {
            SuppressionKind::Remote => &self.remote_depth,
            SuppressionKind::UndoRedo => &self.undo_redo_depth,
        }
    }

    // ------------------------------------------------------------------
    // Drag tracking
    // ------------------------------------------------------------------

    pub fn subscribe_completions<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DragCompletion) + Send + Sync + 'static,
    {
        self.completions.subscribe(handler)
    }

    pub fn completions(&self) -> &Topic<DragCompletion> {
        &self.completions
    }

    /// Begin tracking a drag. Restarting a drag on the same cell discards
    /// the earlier one without emitting.
    pub fn start_drag(&self, cell_id: impl Into<String>, drag_type: DragType, initial_state: Value) {
        let cell_id = cell_id.into();
        let session = DragSession {
            drag_type,
            latest_state: initial_state.clone(),
            initial_state,
            started_at: Instant::now(),
            timer: Debouncer::new(),
        };
        if let Some(previous) = lock(&self.drags).insert(cell_id.clone(), session) {
            previous.timer.cancel();
            tracing::debug!(cell_id = %cell_id, "[Drag] Restarted drag");
        }
    }

    /// Record an intermediate state and extend the quiet-period timer.
    ///
    /// Returns `false` when no drag is tracked for the cell.
    pub fn update_drag(&self, cell_id: &str, state: Value) -> bool {
        let mut drags = lock(&self.drags);
        let Some(session) = drags.get_mut(cell_id) else {
            tracing::debug!(cell_id, "[Drag] Update for untracked cell ignored");
            return false;
        };
        session.latest_state = state;

        let this = self.this.clone();
        let id = cell_id.to_string();
        session.timer.schedule(self.drag_debounce, move || {
            if let Some(manager) = this.upgrade() {
                manager.finalize_drag(&id);
            }
        });
        true
    }

    /// Finish a drag now, emitting its completion
    pub fn finalize_drag(&self, cell_id: &str) -> Option<DragCompletion> {
        let session = lock(&self.drags).remove(cell_id)?;
        session.timer.cancel();

        let completion = DragCompletion {
            cell_id: cell_id.to_string(),
            drag_type: session.drag_type,
            initial_state: session.initial_state,
            final_state: session.latest_state,
            duration: session.started_at.elapsed(),
        };
        tracing::debug!(
            cell_id,
            duration_ms = completion.duration.as_millis() as u64,
            "[Drag] Drag completed"
        );
        self.completions.publish(completion.clone());
        Some(completion)
    }

    /// Stop tracking without emitting
    pub fn cancel_drag(&self, cell_id: &str) -> bool {
        match lock(&self.drags).remove(cell_id) {
            Some(session) => {
                session.timer.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_dragging(&self, cell_id: &str) -> bool {
        lock(&self.drags).contains_key(cell_id)
    }

    pub fn active_drag_count(&self) -> usize {
        lock(&self.drags).len()
    }

    /// Cancel every drag timer
    pub fn dispose(&self) {
        let drained: Vec<DragSession> = lock(&self.drags).drain().map(|(_, s)| s).collect();
        for session in drained {
            session.timer.cancel();
        }
    }
}

impl fmt::Debug for OperationStateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationStateManager")
            .field("applying_remote", &self.is_applying_remote())
            .field("applying_undo_redo", &self.is_applying_undo_redo())
            .field("active_drags", &self.active_drag_count())
            .finish()
    }
}

/// Ends a suppression scope on drop
#[must_use = "suppression ends as soon as the guard is dropped"]
pub struct SuppressionGuard<'a> {
    manager: &'a OperationStateManager,
    kind: SuppressionKind,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        self.manager.depth(self.kind).fetch_sub(1, Ordering::SeqCst);
    }
}
