/**
 * Transport Message Types
 *
 * Typed records exchanged with the collaboration server. Inbound messages are
 * tagged by `message_type` and keep their payload fields optional so that the
 * message adapter, not serde, decides what counts as malformed and can log it
 * with context instead of failing the whole frame.
 *
 * Outbound messages carry local diagram operations and resync requests.
 */
use serde::{Deserialize, Serialize};

use crate::shared::diagram::{Cell, DiagramPatch, Participant, UpdateVector, User};
use crate::shared::error::SharedError;

/// Inbound message as delivered by the transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum TransportMessage {
    /// Another participant changed the diagram
    #[serde(alias = "diagram_operation_event")]
    DiagramOperation(DiagramOperationMessage),
    /// The server refused one of our operations
    OperationRejected(OperationRejectedMessage),
    /// The server's authoritative counter
    #[serde(alias = "sync_status_response")]
    StateCorrection(StateCorrectionMessage),
    /// Full diagram snapshot
    #[serde(alias = "diagram_state")]
    DiagramStateSync(DiagramStateMessage),
    /// Full participant roster
    ParticipantsUpdate(ParticipantsUpdateMessage),
    /// Any message type this client does not handle
    #[serde(other)]
    Unknown,
}

impl TransportMessage {
    /// Parse a raw JSON frame
    pub fn from_json(raw: &str) -> Result<Self, SharedError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Wire name of the message, for logging
    pub fn message_type(&self) -> &'static str {
        match self {
            TransportMessage::DiagramOperation(_) => "diagram_operation",
            TransportMessage::OperationRejected(_) => "operation_rejected",
            TransportMessage::StateCorrection(_) => "state_correction",
            TransportMessage::DiagramStateSync(_) => "diagram_state_sync",
            TransportMessage::ParticipantsUpdate(_) => "participants_update",
            TransportMessage::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiagramOperationMessage {
    pub operation_id: Option<String>,
    pub initiating_user: Option<User>,
    pub operation: Option<DiagramPatch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperationRejectedMessage {
    pub operation_id: Option<String>,
    pub sequence_number: Option<u64>,
    pub update_vector: Option<UpdateVector>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
    pub affected_cells: Option<Vec<String>>,
    #[serde(default)]
    pub requires_resync: bool,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StateCorrectionMessage {
    pub update_vector: Option<UpdateVector>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiagramStateMessage {
    pub diagram_id: Option<String>,
    pub update_vector: Option<UpdateVector>,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParticipantsUpdateMessage {
    #[serde(default)]
    pub participants: Vec<Participant>,
    pub host: Option<User>,
    pub current_presenter: Option<User>,
    /// Set when a human removed someone; `None` for joins and system departures
    pub initiating_user: Option<User>,
}

/// How a resync fetches authoritative state
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResyncMethod {
    Websocket,
    #[default]
    RestApi,
}

impl ResyncMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ResyncMethod::Websocket => "websocket",
            ResyncMethod::RestApi => "rest_api",
        }
    }
}

/// Outbound message sent to the collaboration server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A local diagram operation
    DiagramOperation {
        operation_id: String,
        operation: DiagramPatch,
    },
    /// Ask the server for the full current state
    ResyncRequest { method: ResyncMethod },
}

impl OutboundMessage {
    pub fn operation(operation_id: impl Into<String>, operation: DiagramPatch) -> Self {
        OutboundMessage::DiagramOperation {
            operation_id: operation_id.into(),
            operation,
        }
    }

    pub fn resync_request(method: ResyncMethod) -> Self {
        OutboundMessage::ResyncRequest { method }
    }
}
