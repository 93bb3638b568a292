//! Events published by a running session.

use super::phase::{Phase, PhaseResult};
use super::progress::Progress;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Push notifications for session observers.
///
/// Delivery is at-least-once per phase transition; slow subscribers may miss
/// events and should fall back to the session snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    Started {
        session_id: Uuid,
        subject: String,
        progress: Progress,
    },
    PhaseCompleted {
        session_id: Uuid,
        result: PhaseResult,
        progress: Progress,
    },
    PersistenceWarning {
        session_id: Uuid,
        phase: Phase,
        message: String,
    },
    Error {
        session_id: Uuid,
        message: String,
        progress: Progress,
    },
    Cancelled {
        session_id: Uuid,
        progress: Progress,
    },
}

impl ResearchEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            ResearchEvent::Started { session_id, .. }
            | ResearchEvent::PhaseCompleted { session_id, .. }
            | ResearchEvent::PersistenceWarning { session_id, .. }
            | ResearchEvent::Error { session_id, .. }
            | ResearchEvent::Cancelled { session_id, .. } => *session_id,
        }
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        match self {
            ResearchEvent::PhaseCompleted { result, .. } => result.phase() == Phase::Complete,
            ResearchEvent::Error { .. } | ResearchEvent::Cancelled { .. } => true,
            _ => false,
        }
    }
}
