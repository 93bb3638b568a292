//! Phase sequencer: decides which task runs next for a session snapshot.
//!
//! The phase graph is linear (initial research, planning) followed by one
//! bounded loop over the planned chapters (research, then write, per chapter)
//! and the terminal phase.

use super::phase::Phase;
use super::session::{ChapterStatus, ResearchSession};
use crate::error::StateError;

/// A unit of work for one phase, addressed to a chapter where relevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseTask {
    InitialResearch,
    Planning,
    ChapterResearch { title: String },
    ChapterWriting { title: String },
}

impl PhaseTask {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseTask::InitialResearch => Phase::InitialResearch,
            PhaseTask::Planning => Phase::Planning,
            PhaseTask::ChapterResearch { .. } => Phase::ChapterResearch,
            PhaseTask::ChapterWriting { .. } => Phase::ChapterWriting,
        }
    }

    pub fn chapter_title(&self) -> Option<&str> {
        match self {
            PhaseTask::ChapterResearch { title } | PhaseTask::ChapterWriting { title } => {
                Some(title)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for PhaseTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.chapter_title() {
            Some(title) => write!(f, "{} '{}'", self.phase(), title),
            None => write!(f, "{}", self.phase()),
        }
    }
}

/// What the runner should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Run(PhaseTask),
    Terminal,
}

/// Pick the next step for a session snapshot.
pub fn next(session: &ResearchSession) -> Result<NextStep, StateError> {
    if session.initial_findings.is_none() {
        return Ok(NextStep::Run(PhaseTask::InitialResearch));
    }
    if session.chapter_order.is_empty() {
        return Ok(NextStep::Run(PhaseTask::Planning));
    }
    if session.completed_count >= session.total_count {
        return Ok(NextStep::Terminal);
    }

    let title = match &session.active_chapter_title {
        Some(title) => title.as_str(),
        None => session.first_pending_title().ok_or_else(|| {
            StateError::violation(format!(
                "{}/{} chapters written but none pending",
                session.completed_count, session.total_count
            ))
        })?,
    };
    let chapter = session
        .chapter(title)
        .ok_or_else(|| StateError::UnknownChapter {
            title: title.to_string(),
        })?;

    match chapter.status {
        ChapterStatus::Pending => Ok(NextStep::Run(PhaseTask::ChapterResearch {
            title: title.to_string(),
        })),
        ChapterStatus::Researching | ChapterStatus::Writing => {
            Ok(NextStep::Run(PhaseTask::ChapterWriting {
                title: title.to_string(),
            }))
        }
        ChapterStatus::Completed => Err(StateError::violation(format!(
            "active chapter '{}' is already completed",
            title
        ))),
    }
}
