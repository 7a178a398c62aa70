//! # Command Conflict Detection
//!
//! Flags near-simultaneous commands from different participants that touch
//! the same diagram element.
//!
//! ## Features
//!
//! - **Windowed detection**: only commands within the conflict window of each
//!   other are compared
//! - **Manual resolution**: conflicts stay unresolved until someone picks
//!   accept-incoming, keep-local or merge

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// A user command as seen by the session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCommand {
    pub command_id: String,
    pub user_id: String,
    /// Nodes and edges touched by the command
    pub element_ids: Vec<String>,
    pub issued_at: Instant,
}

impl SessionCommand {
    pub fn new(command_id: impl Into<String>, user_id: impl Into<String>, element_ids: Vec<String>) -> Self {
        Self {
            command_id: command_id.into(),
            user_id: user_id.into(),
            element_ids,
            issued_at: Instant::now(),
        }
    }

    fn overlap(&self, other: &SessionCommand) -> Vec<String> {
        self.element_ids
            .iter()
            .filter(|id| other.element_ids.contains(id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    AcceptIncoming,
    KeepLocal,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStatus {
    Unresolved,
    Resolved(ConflictResolution),
}

/// Two commands that touched the same elements too close together
#[derive(Debug, Clone, PartialEq)]
pub struct CommandConflict {
    pub id: String,
    /// The earlier command
    pub local: SessionCommand,
    /// The later command
    pub incoming: SessionCommand,
    pub element_ids: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub status: ConflictStatus,
}

#[derive(Debug)]
pub struct ConflictDetector {
    window: Duration,
    recent: VecDeque<SessionCommand>,
}

impl ConflictDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: VecDeque::new(),
        }
    }

    /// Compare a new command against recent ones, then remember it
    pub fn detect(&mut self, command: SessionCommand) -> Vec<CommandConflict> {
        let now = command.issued_at;
        while let Some(oldest) = self.recent.front() {
            if now.duration_since(oldest.issued_at) <= self.window {
                break;
            }
            self.recent.pop_front();
        }

        let conflicts = self
            .recent
            .iter()
            .filter(|earlier| earlier.user_id != command.user_id)
            .filter_map(|earlier| {
                let element_ids = earlier.overlap(&command);
                if element_ids.is_empty() {
                    return None;
                }
                Some(CommandConflict {
                    id: format!("conflict_{}_{}", earlier.command_id, command.command_id),
                    local: earlier.clone(),
                    incoming: command.clone(),
                    element_ids,
                    detected_at: Utc::now(),
                    status: ConflictStatus::Unresolved,
                })
            })
            .collect();

        self.recent.push_back(command);
        conflicts
    }
}
