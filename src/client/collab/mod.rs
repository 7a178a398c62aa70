//! Collaboration session aggregate: membership, presence and command conflicts.

pub mod conflict;
pub mod session;

pub use conflict::{CommandConflict, ConflictDetector, ConflictResolution, ConflictStatus, SessionCommand};
pub use session::{
    Activity, CollaborationError, CollaborationSession, CollaborationSessions, CursorState, LeaveOutcome,
    ParticipantPresence, Point, PresenceStatus, SessionEvent, SessionState,
};
