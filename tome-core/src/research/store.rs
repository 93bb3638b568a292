//! Session state store.
//!
//! [`apply`] is a pure merge of one `PhaseResult` into a session snapshot;
//! it either returns a complete new snapshot or an error, never a partial
//! patch. [`SessionStore`] owns the canonical snapshot for one session.

use super::phase::{Phase, PhaseResult};
use super::session::{Chapter, ChapterStatus, ResearchSession};
use crate::error::StateError;
use chrono::Utc;
use std::collections::{HashMap, HashSet};

/// Merge a phase result into a session, returning the new session.
pub fn apply(session: &ResearchSession, result: &PhaseResult) -> Result<ResearchSession, StateError> {
    if session.is_complete() {
        return match result {
            PhaseResult::Complete => Ok(session.clone()),
            other => Err(StateError::SessionTerminal {
                phase: other.phase(),
            }),
        };
    }

    let mut next = session.clone();
    match result {
        PhaseResult::InitialResearch { findings } => {
            if session.initial_findings.is_some() {
                return Err(StateError::violation("initial findings already recorded"));
            }
            next.initial_findings = Some(findings.clone());
        }

        PhaseResult::Planning { chapters } => {
            if session.initial_findings.is_none() {
                return Err(StateError::violation(
                    "planning result arrived before initial research",
                ));
            }
            if session.is_planned() {
                return Err(StateError::violation("chapters are already planned"));
            }
            if chapters.is_empty() {
                return Err(StateError::violation("planning produced no chapters"));
            }
            let mut seen = HashSet::new();
            for plan in chapters {
                if !seen.insert(plan.title.as_str()) {
                    return Err(StateError::violation(format!(
                        "duplicate chapter title '{}'",
                        plan.title
                    )));
                }
            }
            next.chapter_order = chapters.iter().map(|c| c.title.clone()).collect();
            next.chapters = chapters
                .iter()
                .map(|c| (c.title.clone(), Chapter::planned(c)))
                .collect();
            next.total_count = chapters.len();
            next.completed_count = 0;
            next.active_chapter_title = None;
        }

        PhaseResult::ChapterResearch { title, research } => {
            let chapter = lookup(session, title)?;
            if chapter.status != ChapterStatus::Pending {
                return Err(StateError::violation(format!(
                    "chapter '{}' is already {}",
                    title, chapter.status
                )));
            }
            if let Some(active) = &session.active_chapter_title
                && active != title
            {
                return Err(StateError::violation(format!(
                    "chapter '{}' researched while '{}' is active",
                    title, active
                )));
            }
            next.chapters = replace(session, chapter.with_research(research.clone()));
            next.active_chapter_title = Some(title.clone());
        }

        PhaseResult::ChapterWriting { title, content } => {
            let chapter = lookup(session, title)?;
            if !chapter.status.is_in_flight() {
                return Err(StateError::violation(format!(
                    "chapter '{}' cannot be written while {}",
                    title, chapter.status
                )));
            }
            next.chapters = replace(session, chapter.with_content(content.clone()));
            next.completed_count = session.completed_count + 1;
            next.active_chapter_title = if next.completed_count >= next.total_count {
                None
            } else {
                next.first_pending_title().map(str::to_string)
            };
        }

        PhaseResult::Complete => {
            if !session.is_planned() || session.completed_count < session.total_count {
                return Err(StateError::violation(format!(
                    "completion requested with {}/{} chapters written",
                    session.completed_count, session.total_count
                )));
            }
        }
    }

    next.current_phase = result.phase();
    next.updated_at = Utc::now();
    check_transition(session, &next)?;
    Ok(next)
}

fn lookup<'a>(session: &'a ResearchSession, title: &str) -> Result<&'a Chapter, StateError> {
    session
        .chapters
        .get(title)
        .ok_or_else(|| StateError::UnknownChapter {
            title: title.to_string(),
        })
}

/// A fresh chapter map with one chapter substituted.
fn replace(session: &ResearchSession, chapter: Chapter) -> HashMap<String, Chapter> {
    let mut chapters = session.chapters.clone();
    chapters.insert(chapter.title.clone(), chapter);
    chapters
}

/// Invariants every applied result must preserve.
pub fn check_transition(before: &ResearchSession, after: &ResearchSession) -> Result<(), StateError> {
    if after.completed_count < before.completed_count {
        return Err(StateError::violation(format!(
            "completed count decreased from {} to {}",
            before.completed_count, after.completed_count
        )));
    }
    check_consistency(after)
}

/// Structural invariants of a single snapshot.
pub fn check_consistency(session: &ResearchSession) -> Result<(), StateError> {
    if session.completed_count > session.total_count {
        return Err(StateError::violation(format!(
            "completed count {} exceeds total {}",
            session.completed_count, session.total_count
        )));
    }

    if !session.is_planned() {
        if !session.chapters.is_empty() || session.total_count != 0 {
            return Err(StateError::violation("chapters exist without a chapter order"));
        }
        return Ok(());
    }

    if session.chapter_order.len() != session.total_count
        || session.chapters.len() != session.total_count
    {
        return Err(StateError::violation(format!(
            "chapter order has {} titles, chapter map {}, total count {}",
            session.chapter_order.len(),
            session.chapters.len(),
            session.total_count
        )));
    }
    let mut seen = HashSet::new();
    for title in &session.chapter_order {
        if !seen.insert(title.as_str()) {
            return Err(StateError::violation(format!(
                "chapter '{}' appears twice in the chapter order",
                title
            )));
        }
        if !session.chapters.contains_key(title) {
            return Err(StateError::violation(format!(
                "chapter '{}' is ordered but missing",
                title
            )));
        }
    }

    let mut in_flight = 0;
    let mut completed = 0;
    for chapter in session.chapters.values() {
        if chapter.status.is_in_flight() {
            in_flight += 1;
        }
        if chapter.status == ChapterStatus::Completed {
            completed += 1;
            if chapter.content.is_none() {
                return Err(StateError::violation(format!(
                    "chapter '{}' is completed without content",
                    chapter.title
                )));
            }
        } else if chapter.content.is_some() {
            return Err(StateError::violation(format!(
                "chapter '{}' has content while {}",
                chapter.title, chapter.status
            )));
        }
    }
    if in_flight > 1 {
        return Err(StateError::violation(format!(
            "{} chapters in flight at once",
            in_flight
        )));
    }
    if completed != session.completed_count {
        return Err(StateError::violation(format!(
            "completed count {} but {} chapters are completed",
            session.completed_count, completed
        )));
    }
    if session.current_phase == Phase::Complete && completed != session.total_count {
        return Err(StateError::violation("session complete with unwritten chapters"));
    }
    Ok(())
}

/// Owner of the canonical snapshot for one session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    session: ResearchSession,
}

impl SessionStore {
    pub fn new(session: ResearchSession) -> Self {
        Self { session }
    }

    pub fn current(&self) -> &ResearchSession {
        &self.session
    }

    /// Apply a result. On error the stored snapshot is left untouched.
    pub fn apply(&mut self, result: &PhaseResult) -> Result<&ResearchSession, StateError> {
        self.session = apply(&self.session, result)?;
        Ok(&self.session)
    }

    pub fn into_inner(self) -> ResearchSession {
        self.session
    }
}
