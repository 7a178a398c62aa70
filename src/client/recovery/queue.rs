//! # Rollback Buffer
//!
//! Holds remote operations that arrive while a rollback is in progress.
//! Buffered operations are never applied: once the rollback finishes the
//! buffer is drained and the operations are dropped, because authoritative
//! state will be re-delivered by the server.
//!
//! ## Features
//!
//! - **Ordered**: operations keep arrival order for logging
//! - **Deduplicated**: a re-delivered operation id is buffered once
//! - **Drain on completion**: the buffer is empty right after `discard_all`

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::shared::event::RemoteOperation;
use crate::shared::lock;

/// Remote operation held back during rollback
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedOperation {
    pub operation: RemoteOperation,
    pub buffered_at: DateTime<Utc>,
}

/// Operation queue used as the rollback buffer
#[derive(Debug, Default)]
pub struct OperationQueue {
    operations: Mutex<VecDeque<BufferedOperation>>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer an operation. Returns `false` for an id already buffered.
    pub fn push(&self, operation: RemoteOperation) -> bool {
        let mut operations = lock(&self.operations);
        if operations
            .iter()
            .any(|b| b.operation.operation_id == operation.operation_id)
        {
            return false;
        }
        operations.push_back(BufferedOperation {
            operation,
            buffered_at: Utc::now(),
        });
        true
    }

    /// Remove and return everything buffered
    pub fn discard_all(&self) -> Vec<BufferedOperation> {
        lock(&self.operations).drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.operations).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.operations).is_empty()
    }

    /// Ids of buffered operations in arrival order
    pub fn operation_ids(&self) -> Vec<String> {
        lock(&self.operations)
            .iter()
            .map(|b| b.operation.operation_id.clone())
            .collect()
    }
}
