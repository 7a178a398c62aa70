//! Transport message builders

use xfcollab::shared::diagram::{Cell, CellOperation, DiagramPatch, Participant, UpdateVector, User};
use xfcollab::shared::message::{
    DiagramOperationMessage, DiagramStateMessage, OperationRejectedMessage, ParticipantsUpdateMessage,
    StateCorrectionMessage, TransportMessage,
};

pub fn remote_operation(operation_id: &str, user_id: &str, cell_id: &str) -> TransportMessage {
    TransportMessage::DiagramOperation(DiagramOperationMessage {
        operation_id: Some(operation_id.to_string()),
        initiating_user: Some(User::new(user_id)),
        operation: Some(DiagramPatch::new(vec![CellOperation::remove(cell_id)])),
    })
}

pub fn rejection(operation_id: &str, reason: &str) -> TransportMessage {
    TransportMessage::OperationRejected(OperationRejectedMessage {
        operation_id: Some(operation_id.to_string()),
        reason: Some(reason.to_string()),
        message: Some(format!("{} rejected", operation_id)),
        ..Default::default()
    })
}

pub fn rejection_requiring_resync(operation_id: &str, reason: &str) -> TransportMessage {
    TransportMessage::OperationRejected(OperationRejectedMessage {
        operation_id: Some(operation_id.to_string()),
        reason: Some(reason.to_string()),
        requires_resync: true,
        ..Default::default()
    })
}

pub fn state_correction(update_vector: u64) -> TransportMessage {
    TransportMessage::StateCorrection(StateCorrectionMessage {
        update_vector: Some(UpdateVector(update_vector)),
    })
}

pub fn diagram_state(update_vector: u64, cell_ids: &[&str]) -> TransportMessage {
    TransportMessage::DiagramStateSync(DiagramStateMessage {
        diagram_id: Some("D1".to_string()),
        update_vector: Some(UpdateVector(update_vector)),
        cells: cell_ids.iter().map(|id| Cell::new(*id, "process")).collect(),
    })
}

pub fn roster(user_ids: &[&str], initiating_user: Option<&str>) -> TransportMessage {
    TransportMessage::ParticipantsUpdate(ParticipantsUpdateMessage {
        participants: user_ids.iter().map(|id| Participant::new(User::new(*id))).collect(),
        host: user_ids.first().map(|id| User::new(*id)),
        current_presenter: None,
        initiating_user: initiating_user.map(|id| User::new(id)),
    })
}

pub fn local_patch(cell_id: &str) -> DiagramPatch {
    DiagramPatch::new(vec![CellOperation::remove(cell_id)])
}
