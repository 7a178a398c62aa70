//! # Save Coordinator
//!
//! Sends local diagram operations over the realtime transport and falls back
//! to a REST save of the full cell list when the transport times out or
//! fails. Authentication and permission failures are returned as-is: a REST
//! save would fail the same way.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::client::transport::{DiagramPersistence, DiagramSurface, RealtimeTransport, TransportError};
use crate::shared::diagram::DiagramPatch;
use crate::shared::message::OutboundMessage;

/// Which path persisted the change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Realtime { operation_id: String },
    RestFallback { cell_count: usize, cause: TransportError },
}

pub struct SaveCoordinator {
    realtime: Arc<dyn RealtimeTransport>,
    persistence: Arc<dyn DiagramPersistence>,
    surface: Arc<dyn DiagramSurface>,
    timeout: Duration,
}

impl SaveCoordinator {
    pub fn new(
        realtime: Arc<dyn RealtimeTransport>,
        persistence: Arc<dyn DiagramPersistence>,
        surface: Arc<dyn DiagramSurface>,
        timeout: Duration,
    ) -> Self {
        Self {
            realtime,
            persistence,
            surface,
            timeout,
        }
    }

    pub async fn save(&self, operation: DiagramPatch) -> Result<SaveOutcome, TransportError> {
        let operation_id = Uuid::new_v4().to_string();
        let message = OutboundMessage::operation(operation_id.clone(), operation);

        let cause = match tokio::time::timeout(self.timeout, self.realtime.send(message)).await {
            Ok(Ok(())) => {
                tracing::debug!(operation_id = %operation_id, "[Save] Sent over realtime transport");
                return Ok(SaveOutcome::Realtime { operation_id });
            }
            Ok(Err(error)) if error.is_auth_failure() => {
                tracing::warn!(operation_id = %operation_id, error = %error, "[Save] Not authorized to save");
                return Err(error);
            }
            Ok(Err(error)) => error,
            Err(_) => TransportError::Timeout,
        };

        tracing::warn!(
            operation_id = %operation_id,
            cause = %cause,
            "[Save] Realtime save failed, falling back to REST"
        );
        let cells = self.surface.current_cells();
        self.persistence.save_cells(&cells).await?;
        tracing::info!(cell_count = cells.len(), "[Save] Saved diagram over REST");

        Ok(SaveOutcome::RestFallback {
            cell_count: cells.len(),
            cause,
        })
    }
}

impl std::fmt::Debug for SaveCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveCoordinator")
            .field("timeout", &self.timeout)
            .finish()
    }
}
