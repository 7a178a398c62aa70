//! # Message Adapter
//!
//! Translation boundary between the transport and the engine. Each inbound
//! message is validated and republished as a normalized [`DomainEvent`];
//! malformed messages are logged and dropped, never propagated.
//!
//! The server sends full participant rosters, so joins and departures are
//! inferred by diffing consecutive snapshots. A departure with a non-null
//! `initiating_user` other than the departed user is a removal by that user.
//! The first roster is a baseline and produces no notices.

use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;

use crate::shared::diagram::{Participant, User};
use crate::shared::error::SharedError;
use crate::shared::event::{
    DomainEvent, RejectionEvent, RejectionReason, RemoteOperation, RosterChange, SessionNotice, Subscription, Topic,
};
use crate::shared::lock;
use crate::shared::message::{
    DiagramOperationMessage, DiagramStateMessage, OperationRejectedMessage, ParticipantsUpdateMessage,
    StateCorrectionMessage, TransportMessage,
};
use crate::shared::DiagramSnapshot;

/// Why a message could not be translated
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("malformed {message_type} message: {source}")]
    Malformed {
        message_type: &'static str,
        #[source]
        source: SharedError,
    },
    #[error("unknown message type")]
    Unknown,
}

/// Message adapter
#[derive(Default)]
pub struct MessageAdapter {
    events: Topic<DomainEvent>,
    notices: Topic<SessionNotice>,
    roster: Mutex<Option<Vec<Participant>>>,
}

impl MessageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    pub fn subscribe_notices<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionNotice) + Send + Sync + 'static,
    {
        self.notices.subscribe(handler)
    }

    pub fn events(&self) -> &Topic<DomainEvent> {
        &self.events
    }

    pub fn notices(&self) -> &Topic<SessionNotice> {
        &self.notices
    }

    /// Parse and handle a raw JSON frame
    pub fn handle_json(&self, raw: &str) -> Option<DomainEvent> {
        match TransportMessage::from_json(raw) {
            Ok(message) => self.handle_message(message),
            Err(error) => {
                tracing::warn!(error = %error, "[Adapter] Dropping unparseable message");
                None
            }
        }
    }

    /// Translate and publish one message. Returns the published event.
    pub fn handle_message(&self, message: TransportMessage) -> Option<DomainEvent> {
        let message_type = message.message_type();
        match self.translate(message) {
            Ok(event) => {
                tracing::debug!(message_type, kind = event.kind(), "[Adapter] Publishing domain event");
                self.events.publish(event.clone());
                Some(event)
            }
            Err(AdapterError::Unknown) => {
                tracing::debug!("[Adapter] Ignoring unknown message type");
                None
            }
            Err(error) => {
                tracing::warn!(message_type, error = %error, "[Adapter] Dropping malformed message");
                None
            }
        }
    }

    /// Validate a message and convert it to a domain event
    pub fn translate(&self, message: TransportMessage) -> Result<DomainEvent, AdapterError> {
        let message_type = message.message_type();
        let malformed = |source: SharedError| AdapterError::Malformed { message_type, source };

        match message {
            TransportMessage::DiagramOperation(m) => remote_operation(m).map_err(malformed),
            TransportMessage::OperationRejected(m) => rejection(m).map_err(malformed),
            TransportMessage::StateCorrection(m) => state_correction(m).map_err(malformed),
            TransportMessage::DiagramStateSync(m) => diagram_state(m).map_err(malformed),
            TransportMessage::ParticipantsUpdate(m) => self.participants(m).map_err(malformed),
            TransportMessage::Unknown => Err(AdapterError::Unknown),
        }
    }

    fn participants(&self, message: ParticipantsUpdateMessage) -> Result<DomainEvent, SharedError> {
        if message.participants.iter().any(|p| p.user.user_id.is_empty()) {
            return Err(SharedError::missing("participants.user.user_id"));
        }

        let previous = lock(&self.roster).replace(message.participants.clone());
        let (joined, left) = match previous {
            Some(previous) => diff_roster(&previous, &message.participants),
            None => (Vec::new(), Vec::new()),
        };

        let removed_by = message
            .initiating_user
            .clone()
            .filter(|initiator| !left.is_empty() && left.iter().all(|u| u.user_id != initiator.user_id));

        for user in &joined {
            self.notices.publish(SessionNotice::Joined(user.clone()));
        }
        for user in &left {
            let notice = match &removed_by {
                Some(remover) => SessionNotice::Removed {
                    user: user.clone(),
                    removed_by: remover.clone(),
                },
                None => SessionNotice::Left(user.clone()),
            };
            tracing::info!(notice = %notice.text(), "[Adapter] Roster change");
            self.notices.publish(notice);
        }

        Ok(DomainEvent::ParticipantsChanged(RosterChange {
            participants: message.participants,
            host: message.host,
            current_presenter: message.current_presenter,
            joined,
            left,
            removed_by,
        }))
    }

    /// Forget the previous roster, e.g. after leaving a session
    pub fn reset_roster(&self) {
        *lock(&self.roster) = None;
    }
}

impl std::fmt::Debug for MessageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageAdapter")
            .field("event_subscribers", &self.events.subscriber_count())
            .finish()
    }
}

fn non_empty(value: Option<String>, field: &str) -> Result<String, SharedError> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| SharedError::missing(field))
}

fn remote_operation(message: DiagramOperationMessage) -> Result<DomainEvent, SharedError> {
    let operation_id = non_empty(message.operation_id, "operation_id")?;
    let user = message
        .initiating_user
        .filter(|u| !u.user_id.is_empty())
        .ok_or_else(|| SharedError::missing("initiating_user"))?;
    let operation = message.operation.ok_or_else(|| SharedError::missing("operation"))?;

    Ok(DomainEvent::RemoteOperation(RemoteOperation {
        operation_id,
        user,
        operation,
        received_at: Utc::now(),
    }))
}

fn rejection(message: OperationRejectedMessage) -> Result<DomainEvent, SharedError> {
    let operation_id = non_empty(message.operation_id, "operation_id")?;
    let reason = message
        .reason
        .as_deref()
        .map(RejectionReason::from_wire)
        .unwrap_or_else(|| RejectionReason::Other("unknown".to_string()));

    Ok(DomainEvent::OperationRejected(RejectionEvent {
        operation_id,
        update_vector: message.update_vector,
        sequence_number: message.sequence_number,
        reason,
        message: message.message.unwrap_or_default(),
        details: message.details,
        affected_cells: message.affected_cells.unwrap_or_default(),
        requires_resync: message.requires_resync,
        timestamp: message.timestamp.unwrap_or_else(Utc::now),
    }))
}

fn state_correction(message: StateCorrectionMessage) -> Result<DomainEvent, SharedError> {
    let update_vector = message
        .update_vector
        .ok_or_else(|| SharedError::missing("update_vector"))?;
    Ok(DomainEvent::StateCorrection { update_vector })
}

fn diagram_state(message: DiagramStateMessage) -> Result<DomainEvent, SharedError> {
    let diagram_id = non_empty(message.diagram_id, "diagram_id")?;
    let update_vector = message
        .update_vector
        .ok_or_else(|| SharedError::missing("update_vector"))?;
    Ok(DomainEvent::DiagramState(DiagramSnapshot {
        diagram_id,
        update_vector,
        cells: message.cells,
    }))
}

/// Users present only in `current`, and users present only in `previous`
fn diff_roster(previous: &[Participant], current: &[Participant]) -> (Vec<User>, Vec<User>) {
    let contains = |list: &[Participant], user: &User| list.iter().any(|p| p.user.user_id == user.user_id);

    let joined = current
        .iter()
        .filter(|p| !contains(previous, &p.user))
        .map(|p| p.user.clone())
        .collect();
    let left = previous
        .iter()
        .filter(|p| !contains(current, &p.user))
        .map(|p| p.user.clone())
        .collect();
    (joined, left)
}
