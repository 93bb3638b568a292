//! Phases of a research session and the results their tasks produce.

use super::session::{ChapterContent, InitialFindings, PlannedChapter, ResearchFindings};
use serde::{Deserialize, Serialize};

/// One of the five ordered stages of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    InitialResearch,
    Planning,
    ChapterResearch,
    ChapterWriting,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::InitialResearch => "initial research",
            Phase::Planning => "planning",
            Phase::ChapterResearch => "chapter research",
            Phase::ChapterWriting => "chapter writing",
            Phase::Complete => "complete",
        }
    }

    /// Whether this phase belongs to the per-chapter loop.
    pub fn is_chapter_loop(&self) -> bool {
        matches!(self, Phase::ChapterResearch | Phase::ChapterWriting)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a completed phase task, carrying exactly what that phase produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PhaseResult {
    InitialResearch {
        findings: InitialFindings,
    },
    Planning {
        chapters: Vec<PlannedChapter>,
    },
    ChapterResearch {
        title: String,
        research: ResearchFindings,
    },
    ChapterWriting {
        title: String,
        content: ChapterContent,
    },
    Complete,
}

impl PhaseResult {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseResult::InitialResearch { .. } => Phase::InitialResearch,
            PhaseResult::Planning { .. } => Phase::Planning,
            PhaseResult::ChapterResearch { .. } => Phase::ChapterResearch,
            PhaseResult::ChapterWriting { .. } => Phase::ChapterWriting,
            PhaseResult::Complete => Phase::Complete,
        }
    }

    /// Chapter the result belongs to, for chapter-loop phases.
    pub fn chapter_title(&self) -> Option<&str> {
        match self {
            PhaseResult::ChapterResearch { title, .. } | PhaseResult::ChapterWriting { title, .. } => {
                Some(title)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::InitialResearch.to_string(), "initial research");
        assert_eq!(Phase::ChapterWriting.to_string(), "chapter writing");
    }

    #[test]
    fn test_phase_order() {
        assert!(Phase::InitialResearch < Phase::Planning);
        assert!(Phase::ChapterResearch < Phase::ChapterWriting);
        assert!(Phase::ChapterWriting < Phase::Complete);
        assert!(Phase::ChapterResearch.is_chapter_loop());
        assert!(!Phase::Planning.is_chapter_loop());
    }

    #[test]
    fn test_phase_result_wire_format() {
        let result = PhaseResult::Complete;
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({"phase": "complete"})
        );

        let json = serde_json::json!({
            "phase": "chapter_research",
            "title": "Intro",
            "research": {"queries": [], "results": []}
        });
        let parsed: PhaseResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.phase(), Phase::ChapterResearch);
        assert_eq!(parsed.chapter_title(), Some("Intro"));
    }
}
