//! Phase tasks.
//!
//! Each task reads a session snapshot, calls the model and/or search
//! provider, validates what came back, and returns a `PhaseResult`. Tasks
//! never touch the store.

use super::phase::{Phase, PhaseResult};
use super::prompts;
use super::sequencer::PhaseTask;
use super::session::{
    Chapter, ChapterContent, InitialFindings, PlannedChapter, ResearchFindings, ResearchSession,
};
use crate::brain::Brain;
use crate::config::ResearchConfig;
use crate::error::{StateError, TaskError};
use crate::search::{self, SearchProvider, SearchQuery, SearchResult};
use crate::types::TokenUsage;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Executes phase tasks on behalf of the session runner.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &PhaseTask,
        session: &ResearchSession,
    ) -> Result<PhaseResult, TaskError>;

    /// Model token usage accumulated so far.
    fn usage(&self) -> TokenUsage {
        TokenUsage::default()
    }
}

/// The production executor: model calls through a [`Brain`], searches through a
/// [`SearchProvider`].
pub struct ResearchTasks {
    brain: Arc<Brain>,
    search: Arc<dyn SearchProvider>,
    config: ResearchConfig,
    planner_model: Option<String>,
}

impl ResearchTasks {
    pub fn new(brain: Arc<Brain>, search: Arc<dyn SearchProvider>, config: ResearchConfig) -> Self {
        Self {
            brain,
            search,
            config,
            planner_model: None,
        }
    }

    /// Use a different model for the planning phase.
    pub fn with_planner_model(mut self, model: impl Into<String>) -> Self {
        self.planner_model = Some(model.into());
        self
    }

    async fn initial_research(&self, session: &ResearchSession) -> Result<PhaseResult, TaskError> {
        let (system, user) = prompts::initial_queries(
            &session.subject,
            &self.config.report_structure,
            self.config.initial_query_count,
        );
        let reply: QueryList = self.brain.complete_json(None, &system, &user).await?;

        let queries: Vec<String> = reply
            .queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(self.config.initial_query_count)
            .collect();
        if queries.is_empty() {
            return Err(TaskError::schema("model returned no search queries"));
        }

        let planned: Vec<SearchQuery> = queries
            .iter()
            .map(|q| SearchQuery::new(q.clone(), "initial research"))
            .collect();
        let results = self.search(Phase::InitialResearch, &planned).await?;

        Ok(PhaseResult::InitialResearch {
            findings: InitialFindings { queries, results },
        })
    }

    async fn planning(&self, session: &ResearchSession) -> Result<PhaseResult, TaskError> {
        let findings = session
            .initial_findings
            .as_ref()
            .ok_or_else(|| StateError::violation("planning without initial findings"))?;
        let context = search::format_sources(&findings.results, self.config.max_source_chars);
        let (system, user) = prompts::planning(
            &session.subject,
            &self.config.report_structure,
            session.total_chapter_target,
            self.config.subtopics_per_chapter,
            &context,
        );
        let reply: Plan = self
            .brain
            .complete_json(self.planner_model.as_deref(), &system, &user)
            .await?;

        let chapters = validate_plan(
            reply.chapters,
            session.total_chapter_target,
            self.config.subtopics_per_chapter,
        )?;
        debug!(outline = %prompts::outline(&chapters), "Chapters planned");
        Ok(PhaseResult::Planning { chapters })
    }

    async fn chapter_research(
        &self,
        session: &ResearchSession,
        title: &str,
    ) -> Result<PhaseResult, TaskError> {
        let chapter = chapter(session, title)?;
        let (system, user) =
            prompts::chapter_queries(&session.subject, chapter, self.config.queries_per_chapter);
        let reply: ChapterQueries = self.brain.complete_json(None, &system, &user).await?;

        let queries: Vec<SearchQuery> = reply
            .queries
            .into_iter()
            .filter(|q| !q.query.trim().is_empty())
            .map(|q| SearchQuery {
                query: q.query.trim().to_string(),
                purpose: q.purpose,
                target_subtopic: q
                    .target_subtopic
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            })
            .take(self.config.queries_per_chapter)
            .collect();
        if queries.is_empty() {
            return Err(TaskError::schema(format!(
                "model returned no search queries for chapter '{}'",
                title
            )));
        }

        let results = self.search(Phase::ChapterResearch, &queries).await?;
        Ok(PhaseResult::ChapterResearch {
            title: title.to_string(),
            research: ResearchFindings { queries, results },
        })
    }

    async fn chapter_writing(
        &self,
        session: &ResearchSession,
        title: &str,
    ) -> Result<PhaseResult, TaskError> {
        let chapter = chapter(session, title)?;
        let research = chapter.research.as_ref().ok_or_else(|| {
            StateError::violation(format!("chapter '{}' has no research to write from", title))
        })?;
        let sources = search::format_sources(&research.results, self.config.max_source_chars);
        let (system, user) = prompts::chapter_writing(&session.subject, chapter, &sources);
        let content: ChapterContent = self.brain.complete_json(None, &system, &user).await?;

        validate_content(chapter, &content)?;
        Ok(PhaseResult::ChapterWriting {
            title: title.to_string(),
            content,
        })
    }

    /// Fan the queries out and keep what survives validation.
    async fn search(
        &self,
        phase: Phase,
        queries: &[SearchQuery],
    ) -> Result<Vec<SearchResult>, TaskError> {
        let fan_out = search::search_all(self.search.as_ref(), queries).await;
        if fan_out.all_failed(queries.len()) {
            let message = fan_out
                .failures
                .iter()
                .map(|(q, e)| format!("'{}': {}", q, e))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(TaskError::Search { message });
        }
        if fan_out.results.is_empty() {
            return Err(TaskError::NoResults { phase });
        }
        info!(
            phase = %phase,
            queries = queries.len(),
            results = fan_out.results.len(),
            "Search completed"
        );
        Ok(fan_out.results)
    }
}

#[async_trait]
impl PhaseExecutor for ResearchTasks {
    async fn execute(
        &self,
        task: &PhaseTask,
        session: &ResearchSession,
    ) -> Result<PhaseResult, TaskError> {
        match task {
            PhaseTask::InitialResearch => self.initial_research(session).await,
            PhaseTask::Planning => self.planning(session).await,
            PhaseTask::ChapterResearch { title } => self.chapter_research(session, title).await,
            PhaseTask::ChapterWriting { title } => self.chapter_writing(session, title).await,
        }
    }

    fn usage(&self) -> TokenUsage {
        self.brain.total_usage()
    }
}

fn chapter<'a>(session: &'a ResearchSession, title: &str) -> Result<&'a Chapter, StateError> {
    session
        .chapter(title)
        .ok_or_else(|| StateError::UnknownChapter {
            title: title.to_string(),
        })
}

#[derive(Debug, Deserialize)]
struct QueryList {
    queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Plan {
    chapters: Vec<PlannedChapter>,
}

#[derive(Debug, Deserialize)]
struct ChapterQueries {
    queries: Vec<SearchQuery>,
}

/// Check a planned outline against the requested shape.
pub fn validate_plan(
    chapters: Vec<PlannedChapter>,
    chapter_count: usize,
    subtopic_count: usize,
) -> Result<Vec<PlannedChapter>, TaskError> {
    if chapters.len() != chapter_count {
        return Err(TaskError::schema(format!(
            "expected {} chapters, model planned {}",
            chapter_count,
            chapters.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut validated = Vec::with_capacity(chapters.len());
    for plan in chapters {
        let title = plan.title.trim().to_string();
        if title.is_empty() {
            return Err(TaskError::schema("planned chapter has an empty title"));
        }
        if !seen.insert(title.clone()) {
            return Err(TaskError::schema(format!("duplicate chapter title '{}'", title)));
        }
        if plan.subtopics.len() != subtopic_count {
            return Err(TaskError::schema(format!(
                "chapter '{}' has {} subtopics, expected {}",
                title,
                plan.subtopics.len(),
                subtopic_count
            )));
        }
        let subtopics: Vec<String> = plan.subtopics.iter().map(|s| s.trim().to_string()).collect();
        if subtopics.iter().any(String::is_empty) {
            return Err(TaskError::schema(format!(
                "chapter '{}' has an empty subtopic",
                title
            )));
        }
        validated.push(PlannedChapter {
            title,
            description: plan.description.trim().to_string(),
            subtopics,
        });
    }
    Ok(validated)
}

/// Check written content covers every subtopic with non-empty text.
pub fn validate_content(chapter: &Chapter, content: &ChapterContent) -> Result<(), TaskError> {
    if content.overview.trim().is_empty() {
        return Err(TaskError::schema(format!(
            "chapter '{}' was written without an overview",
            chapter.title
        )));
    }
    if content.sections.len() != chapter.subtopics.len() {
        return Err(TaskError::schema(format!(
            "chapter '{}' has {} sections, expected {}",
            chapter.title,
            content.sections.len(),
            chapter.subtopics.len()
        )));
    }
    if let Some(empty) = content
        .sections
        .iter()
        .position(|s| s.title.trim().is_empty() || s.content.trim().is_empty())
    {
        return Err(TaskError::schema(format!(
            "section {} of chapter '{}' is empty",
            empty + 1,
            chapter.title
        )));
    }
    Ok(())
}
