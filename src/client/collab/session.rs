/**
 * Collaboration Session Management
 *
 * This module tracks collaboration sessions on the client: who is in each
 * session, what they are doing, and which of their commands conflict.
 *
 * A session is created by its first participant and removed when the last
 * participant leaves or it is explicitly ended. Operations that act on "the"
 * session use the active session and fail with `NoActiveSession` when there
 * is none; operations naming a session fail with `SessionNotFound`.
 */

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::client::collab::conflict::{
    CommandConflict, ConflictDetector, ConflictResolution, ConflictStatus, SessionCommand,
};
use crate::shared::diagram::{Participant, User};
use crate::shared::event::{Subscription, Topic};
use crate::shared::lock;

/// Session API errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaborationError {
    #[error("No active session")]
    NoActiveSession,
    #[error("Session {0} not found")]
    SessionNotFound(String),
    #[error("Session {0} already exists")]
    SessionAlreadyExists(String),
    #[error("Participant {user_id} not found in session {session_id}")]
    ParticipantNotFound { session_id: String, user_id: String },
    #[error("Conflict {0} not found")]
    ConflictNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Viewing,
    Editing,
    Selecting,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CursorState {
    pub position: Option<Point>,
    pub selected_node_ids: Vec<String>,
    pub selected_edge_ids: Vec<String>,
    pub is_visible: bool,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            position: None,
            selected_node_ids: Vec::new(),
            selected_edge_ids: Vec::new(),
            is_visible: true,
        }
    }
}

/// A participant's presence within a session
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantPresence {
    pub user: User,
    pub status: PresenceStatus,
    pub activity: Activity,
    pub cursor: CursorState,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ParticipantPresence {
    fn new(user: User) -> Self {
        let now = Utc::now();
        Self {
            user,
            status: PresenceStatus::Online,
            activity: Activity::Viewing,
            cursor: CursorState::default(),
            joined_at: now,
            last_seen: now,
        }
    }
}

/// One collaboration instance on a diagram
#[derive(Debug, Clone, PartialEq)]
pub struct CollaborationSession {
    pub id: String,
    pub diagram_id: String,
    pub participants: HashMap<String, ParticipantPresence>,
    pub unresolved_conflicts: HashMap<String, CommandConflict>,
    pub state: SessionState,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl CollaborationSession {
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

/// Published on every session change
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Created { session_id: String },
    ParticipantJoined { session_id: String, user: User },
    ParticipantLeft { session_id: String, user_id: String },
    PresenceChanged { session_id: String, user_id: String },
    ConflictDetected { session_id: String, conflict_id: String },
    ConflictResolved { session_id: String, conflict_id: String, resolution: ConflictResolution },
    Ended { session_id: String },
}

/// Result of removing a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub remaining: usize,
    /// The last participant left and the session was discarded
    pub session_ended: bool,
}

struct SessionEntry {
    session: CollaborationSession,
    detector: ConflictDetector,
}

#[derive(Default)]
struct SessionsInner {
    sessions: HashMap<String, SessionEntry>,
    active: Option<String>,
}

impl SessionsInner {
    fn entry_mut(&mut self, session_id: &str) -> Result<&mut SessionEntry, CollaborationError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| CollaborationError::SessionNotFound(session_id.to_string()))
    }

    fn active_mut(&mut self) -> Result<&mut SessionEntry, CollaborationError> {
        let id = self.active.clone().ok_or(CollaborationError::NoActiveSession)?;
        self.entry_mut(&id)
    }

    fn remove(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        if self.active.as_deref() == Some(session_id) {
            self.active = None;
        }
    }
}

/// Collaboration session aggregate
pub struct CollaborationSessions {
    inner: Mutex<SessionsInner>,
    conflict_window: Duration,
    events: Topic<SessionEvent>,
}

impl CollaborationSessions {
    pub fn new(conflict_window: Duration) -> Self {
        Self {
            inner: Mutex::new(SessionsInner::default()),
            conflict_window,
            events: Topic::new(),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    /// Create a session with its first participant; it becomes the active session
    pub fn create_session(
        &self,
        session_id: impl Into<String>,
        diagram_id: impl Into<String>,
        creator: User,
    ) -> Result<(), CollaborationError> {
        let session_id = session_id.into();
        {
            let mut inner = lock(&self.inner);
            if inner.sessions.contains_key(&session_id) {
                return Err(CollaborationError::SessionAlreadyExists(session_id));
            }

            let mut participants = HashMap::new();
            let created_by = creator.user_id.clone();
            participants.insert(created_by.clone(), ParticipantPresence::new(creator));

            let session = CollaborationSession {
                id: session_id.clone(),
                diagram_id: diagram_id.into(),
                participants,
                unresolved_conflicts: HashMap::new(),
                state: SessionState::Active,
                created_by,
                created_at: Utc::now(),
            };
            inner.sessions.insert(
                session_id.clone(),
                SessionEntry {
                    session,
                    detector: ConflictDetector::new(self.conflict_window),
                },
            );
            inner.active = Some(session_id.clone());
        }

        tracing::info!(session_id = %session_id, "[Session] Session created");
        self.events.publish(SessionEvent::Created { session_id });
        Ok(())
    }

    /// Add a participant. Joining again refreshes presence.
    pub fn join_session(&self, session_id: &str, user: User) -> Result<usize, CollaborationError> {
        let count = {
            let mut inner = lock(&self.inner);
            let entry = inner.entry_mut(session_id)?;
            match entry.session.participants.get_mut(&user.user_id) {
                Some(presence) => {
                    presence.status = PresenceStatus::Online;
                    presence.last_seen = Utc::now();
                }
                None => {
                    entry
                        .session
                        .participants
                        .insert(user.user_id.clone(), ParticipantPresence::new(user.clone()));
                }
            }
            let count = entry.session.participant_count();
            if inner.active.is_none() {
                inner.active = Some(session_id.to_string());
            }
            count
        };

        tracing::info!(session_id, user_id = %user.user_id, participants = count, "[Session] Participant joined");
        self.events.publish(SessionEvent::ParticipantJoined {
            session_id: session_id.to_string(),
            user,
        });
        Ok(count)
    }

    /// Remove a participant; the last one leaving ends the session
    pub fn leave_session(&self, session_id: &str, user_id: &str) -> Result<LeaveOutcome, CollaborationError> {
        let outcome = {
            let mut inner = lock(&self.inner);
            let entry = inner.entry_mut(session_id)?;
            if entry.session.participants.remove(user_id).is_none() {
                return Err(CollaborationError::ParticipantNotFound {
                    session_id: session_id.to_string(),
                    user_id: user_id.to_string(),
                });
            }
            let remaining = entry.session.participant_count();
            if remaining == 0 {
                inner.remove(session_id);
            }
            LeaveOutcome {
                remaining,
                session_ended: remaining == 0,
            }
        };

        tracing::info!(session_id, user_id, remaining = outcome.remaining, "[Session] Participant left");
        self.events.publish(SessionEvent::ParticipantLeft {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
        });
        if outcome.session_ended {
            tracing::info!(session_id, "[Session] Last participant left, session ended");
            self.events.publish(SessionEvent::Ended {
                session_id: session_id.to_string(),
            });
        }
        Ok(outcome)
    }

    /// Discard a session regardless of who is still in it
    pub fn end_session(&self, session_id: &str) -> Result<(), CollaborationError> {
        {
            let mut inner = lock(&self.inner);
            let entry = inner.entry_mut(session_id)?;
            entry.session.state = SessionState::Ended;
            inner.remove(session_id);
        }
        tracing::info!(session_id, "[Session] Session ended");
        self.events.publish(SessionEvent::Ended {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Make the active session match a server roster
    pub fn sync_participants(&self, participants: &[Participant]) -> Result<(), CollaborationError> {
        let (session_id, joined, left) = {
            let mut inner = lock(&self.inner);
            let entry = inner.active_mut()?;
            let session = &mut entry.session;

            let left: Vec<String> = session
                .participants
                .keys()
                .filter(|id| !participants.iter().any(|p| &p.user.user_id == *id))
                .cloned()
                .collect();
            for user_id in &left {
                session.participants.remove(user_id);
            }

            let mut joined = Vec::new();
            for participant in participants {
                if !session.participants.contains_key(&participant.user.user_id) {
                    session.participants.insert(
                        participant.user.user_id.clone(),
                        ParticipantPresence::new(participant.user.clone()),
                    );
                    joined.push(participant.user.clone());
                }
            }
            (session.id.clone(), joined, left)
        };

        for user in joined {
            self.events.publish(SessionEvent::ParticipantJoined {
                session_id: session_id.clone(),
                user,
            });
        }
        for user_id in left {
            self.events.publish(SessionEvent::ParticipantLeft {
                session_id: session_id.clone(),
                user_id,
            });
        }
        Ok(())
    }

    pub fn update_presence(
        &self,
        user_id: &str,
        status: PresenceStatus,
        activity: Activity,
    ) -> Result<(), CollaborationError> {
        self.with_participant(user_id, |presence| {
            presence.status = status;
            presence.activity = activity;
        })
    }

    pub fn update_cursor(&self, user_id: &str, cursor: CursorState) -> Result<(), CollaborationError> {
        self.with_participant(user_id, |presence| {
            presence.cursor = cursor;
        })
    }

    fn with_participant(
        &self,
        user_id: &str,
        update: impl FnOnce(&mut ParticipantPresence),
    ) -> Result<(), CollaborationError> {
        let session_id = {
            let mut inner = lock(&self.inner);
            let entry = inner.active_mut()?;
            let session_id = entry.session.id.clone();
            let presence = entry.session.participants.get_mut(user_id).ok_or_else(|| {
                CollaborationError::ParticipantNotFound {
                    session_id: session_id.clone(),
                    user_id: user_id.to_string(),
                }
            })?;
            update(presence);
            presence.last_seen = Utc::now();
            session_id
        };
        self.events.publish(SessionEvent::PresenceChanged {
            session_id,
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    /// Record a command in the active session, returning any new conflicts
    pub fn record_command(&self, command: SessionCommand) -> Result<Vec<CommandConflict>, CollaborationError> {
        let (session_id, conflicts) = {
            let mut inner = lock(&self.inner);
            let entry = inner.active_mut()?;
            let conflicts = entry.detector.detect(command);
            for conflict in &conflicts {
                entry
                    .session
                    .unresolved_conflicts
                    .insert(conflict.id.clone(), conflict.clone());
            }
            (entry.session.id.clone(), conflicts)
        };

        for conflict in &conflicts {
            tracing::warn!(
                session_id = %session_id,
                conflict_id = %conflict.id,
                elements = ?conflict.element_ids,
                "[Session] Conflicting commands detected"
            );
            self.events.publish(SessionEvent::ConflictDetected {
                session_id: session_id.clone(),
                conflict_id: conflict.id.clone(),
            });
        }
        Ok(conflicts)
    }

    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: ConflictResolution,
    ) -> Result<CommandConflict, CollaborationError> {
        let (session_id, conflict) = {
            let mut inner = lock(&self.inner);
            let entry = inner.active_mut()?;
            let mut conflict = entry
                .session
                .unresolved_conflicts
                .remove(conflict_id)
                .ok_or_else(|| CollaborationError::ConflictNotFound(conflict_id.to_string()))?;
            conflict.status = ConflictStatus::Resolved(resolution);
            (entry.session.id.clone(), conflict)
        };

        tracing::info!(session_id = %session_id, conflict_id, ?resolution, "[Session] Conflict resolved");
        self.events.publish(SessionEvent::ConflictResolved {
            session_id,
            conflict_id: conflict_id.to_string(),
            resolution,
        });
        Ok(conflict)
    }

    pub fn unresolved_conflicts(&self) -> Result<Vec<CommandConflict>, CollaborationError> {
        let mut inner = lock(&self.inner);
        let entry = inner.active_mut()?;
        Ok(entry.session.unresolved_conflicts.values().cloned().collect())
    }

    pub fn participant_count(&self, session_id: &str) -> Result<usize, CollaborationError> {
        lock(&self.inner)
            .sessions
            .get(session_id)
            .map(|entry| entry.session.participant_count())
            .ok_or_else(|| CollaborationError::SessionNotFound(session_id.to_string()))
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        lock(&self.inner).sessions.contains_key(session_id)
    }

    pub fn get_session(&self, session_id: &str) -> Option<CollaborationSession> {
        lock(&self.inner)
            .sessions
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    pub fn active_session_id(&self) -> Option<String> {
        lock(&self.inner).active.clone()
    }

    pub fn active_session(&self) -> Result<CollaborationSession, CollaborationError> {
        let mut inner = lock(&self.inner);
        Ok(inner.active_mut()?.session.clone())
    }

    /// Drop every session
    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.sessions.clear();
        inner.active = None;
    }
}

impl std::fmt::Debug for CollaborationSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("CollaborationSessions")
            .field("sessions", &inner.sessions.len())
            .field("active", &inner.active)
            .finish()
    }
}
