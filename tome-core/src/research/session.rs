//! Research session data model.
//!
//! A `ResearchSession` is mutated only by applying `PhaseResult`s through the
//! session store. Chapters are values: an update builds a new `Chapter` and a
//! new chapter map rather than editing one in place.

use super::phase::Phase;
use crate::config::ResearchConfig;
use crate::error::RequestError;
use crate::search::{SearchQuery, SearchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Results of the exploratory search run before planning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialFindings {
    pub queries: Vec<String>,
    pub results: Vec<SearchResult>,
}

/// Queries and validated results gathered for one chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchFindings {
    pub queries: Vec<SearchQuery>,
    pub results: Vec<SearchResult>,
}

/// A chapter as returned by the planning task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChapter {
    pub title: String,
    pub description: String,
    pub subtopics: Vec<String>,
}

/// A cited source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
}

/// Written content for one subtopic of a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsectionContent {
    pub title: String,
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// The written body of a chapter: an overview plus one section per subtopic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub overview: String,
    pub sections: Vec<SubsectionContent>,
}

/// Lifecycle of a single chapter. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Pending,
    Researching,
    Writing,
    Completed,
}

impl ChapterStatus {
    /// Research has started but the chapter is not yet written.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ChapterStatus::Researching | ChapterStatus::Writing)
    }
}

impl std::fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChapterStatus::Pending => write!(f, "pending"),
            ChapterStatus::Researching => write!(f, "researching"),
            ChapterStatus::Writing => write!(f, "writing"),
            ChapterStatus::Completed => write!(f, "completed"),
        }
    }
}

/// One outline entry and its accumulated work product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub description: String,
    pub subtopics: Vec<String>,
    pub status: ChapterStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<ResearchFindings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChapterContent>,
}

impl Chapter {
    pub fn planned(plan: &PlannedChapter) -> Self {
        Self {
            title: plan.title.clone(),
            description: plan.description.clone(),
            subtopics: plan.subtopics.clone(),
            status: ChapterStatus::Pending,
            research: None,
            content: None,
        }
    }

    /// This chapter with research attached and status moved to researching.
    pub fn with_research(&self, research: ResearchFindings) -> Self {
        Self {
            status: ChapterStatus::Researching,
            research: Some(research),
            ..self.clone()
        }
    }

    /// This chapter with content attached and status moved to completed.
    pub fn with_content(&self, content: ChapterContent) -> Self {
        Self {
            status: ChapterStatus::Completed,
            content: Some(content),
            ..self.clone()
        }
    }
}

/// One research request's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchSession {
    pub id: Uuid,
    pub subject: String,
    pub total_chapter_target: usize,
    pub current_phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_findings: Option<InitialFindings>,
    #[serde(default)]
    pub chapter_order: Vec<String>,
    #[serde(default)]
    pub chapters: HashMap<String, Chapter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_chapter_title: Option<String>,
    pub completed_count: usize,
    pub total_count: usize,
}

impl ResearchSession {
    pub fn new(subject: impl Into<String>, total_chapter_target: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            total_chapter_target,
            current_phase: Phase::InitialResearch,
            created_at: now,
            updated_at: now,
            initial_findings: None,
            chapter_order: Vec::new(),
            chapters: HashMap::new(),
            active_chapter_title: None,
            completed_count: 0,
            total_count: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_phase == Phase::Complete
    }

    pub fn is_planned(&self) -> bool {
        !self.chapter_order.is_empty()
    }

    pub fn chapter(&self, title: &str) -> Option<&Chapter> {
        self.chapters.get(title)
    }

    /// Chapters in planned order.
    pub fn ordered_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapter_order.iter().filter_map(|t| self.chapters.get(t))
    }

    /// First chapter in planned order that has not been started.
    pub fn first_pending_title(&self) -> Option<&str> {
        self.ordered_chapters()
            .find(|c| c.status == ChapterStatus::Pending)
            .map(|c| c.title.as_str())
    }
}

/// Input accepted when starting a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_count: Option<usize>,
}

impl StartRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            chapter_count: None,
        }
    }

    pub fn with_chapters(mut self, count: usize) -> Self {
        self.chapter_count = Some(count);
        self
    }

    /// Validate the request and create the session it describes.
    pub fn into_session(self, config: &ResearchConfig) -> Result<ResearchSession, RequestError> {
        let subject = self.subject.trim();
        if subject.is_empty() {
            return Err(RequestError::EmptySubject);
        }
        let count = config.resolve_chapter_count(self.chapter_count)?;
        Ok(ResearchSession::new(subject, count))
    }
}
