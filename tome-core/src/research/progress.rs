//! Progress projection: percent and label derived from a session snapshot.

use super::phase::Phase;
use super::session::ResearchSession;
use serde::{Deserialize, Serialize};

/// Progress as shown to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: Phase,
    pub percent: u8,
    pub label: String,
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:>3}%] {}", self.percent, self.label)
    }
}

/// Project a session snapshot onto progress.
///
/// 10% during initial research, 20% at planning, 20-90% across the chapter
/// loop in proportion to written chapters, 100% once complete.
pub fn progress(session: &ResearchSession) -> Progress {
    let phase = session.current_phase;
    let (percent, label) = match phase {
        Phase::InitialResearch => (10, "Researching topic".to_string()),
        Phase::Planning => (20, "Planning chapters".to_string()),
        Phase::ChapterResearch | Phase::ChapterWriting => {
            (chapter_percent(session), chapter_label(session))
        }
        Phase::Complete => (100, "Research complete".to_string()),
    };
    Progress {
        phase,
        percent,
        label,
    }
}

fn chapter_percent(session: &ResearchSession) -> u8 {
    if session.total_count == 0 {
        return 20;
    }
    let done = session.completed_count.min(session.total_count);
    (20 + 70 * done / session.total_count) as u8
}

fn chapter_label(session: &ResearchSession) -> String {
    let active = session
        .active_chapter_title
        .as_deref()
        .and_then(|title| session.chapter(title));
    match active {
        Some(chapter) if chapter.status.is_in_flight() => {
            format!("Writing chapter: {}", chapter.title)
        }
        Some(chapter) => format!("Researching chapter: {}", chapter.title),
        None if session.completed_count >= session.total_count => "Chapters written".to_string(),
        None => "Writing chapters".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::session::{Chapter, ChapterStatus, PlannedChapter};

    fn in_loop(titles: &[&str], completed: usize, active: Option<(&str, ChapterStatus)>) -> ResearchSession {
        let mut session = ResearchSession::new("s", titles.len());
        session.current_phase = Phase::ChapterWriting;
        session.chapter_order = titles.iter().map(|t| t.to_string()).collect();
        for t in titles {
            session.chapters.insert(
                t.to_string(),
                Chapter::planned(&PlannedChapter {
                    title: t.to_string(),
                    description: String::new(),
                    subtopics: vec![],
                }),
            );
        }
        session.total_count = titles.len();
        session.completed_count = completed;
        if let Some((title, status)) = active {
            session.active_chapter_title = Some(title.to_string());
            if let Some(c) = session.chapters.get_mut(title) {
                c.status = status;
            }
        }
        session
    }

    #[test]
    fn test_fixed_phases() {
        let mut session = ResearchSession::new("s", 3);
        assert_eq!(progress(&session).percent, 10);
        assert_eq!(progress(&session).label, "Researching topic");
        session.current_phase = Phase::Planning;
        assert_eq!(progress(&session).percent, 20);
        assert_eq!(progress(&session).label, "Planning chapters");
        session.current_phase = Phase::Complete;
        let p = progress(&session);
        assert_eq!((p.percent, p.label.as_str()), (100, "Research complete"));
    }

    #[test]
    fn test_chapter_percent() {
        assert_eq!(progress(&in_loop(&["A", "B"], 0, None)).percent, 20);
        assert_eq!(progress(&in_loop(&["A", "B"], 1, None)).percent, 55);
        assert_eq!(progress(&in_loop(&["A", "B"], 2, None)).percent, 90);
        assert_eq!(progress(&in_loop(&["A", "B", "C"], 1, None)).percent, 43);
    }

    #[test]
    fn test_chapter_percent_zero_total() {
        let mut session = ResearchSession::new("s", 1);
        session.current_phase = Phase::ChapterResearch;
        assert_eq!(progress(&session).percent, 20);
    }

    #[test]
    fn test_chapter_labels_name_active_chapter() {
        let writing = in_loop(&["Intro", "Next"], 0, Some(("Intro", ChapterStatus::Researching)));
        assert_eq!(progress(&writing).label, "Writing chapter: Intro");

        let researching = in_loop(&["Intro", "Next"], 1, Some(("Next", ChapterStatus::Pending)));
        assert_eq!(progress(&researching).label, "Researching chapter: Next");

        let done = in_loop(&["Intro"], 1, None);
        assert_eq!(progress(&done).label, "Chapters written");
    }

    #[test]
    fn test_display() {
        let session = ResearchSession::new("s", 1);
        assert_eq!(progress(&session).to_string(), "[ 10%] Researching topic");
    }
}
