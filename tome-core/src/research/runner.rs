//! Session runner: the single driver of one session's phase loop.
//!
//! The runner is the only caller of phase tasks and the only writer to the
//! session store. It asks the sequencer for the next task, runs it, applies
//! the result, persists, and publishes, until the sequencer reports the
//! terminal phase, a task fails, or cancellation is observed between phases.

use super::events::ResearchEvent;
use super::phase::{Phase, PhaseResult};
use super::progress::{Progress, progress};
use super::sequencer::{self, NextStep, PhaseTask};
use super::session::ResearchSession;
use super::store::SessionStore;
use super::tasks::PhaseExecutor;
use crate::persistence::SessionPersistence;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run status of a session, as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed { message: String },
    Cancelled,
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed { message } => write!(f, "failed: {}", message),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What pollers see: the latest applied snapshot, its progress, and run status.
///
/// `progress` follows the last applied phase; `task` names the phase task
/// currently executing, if any.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: Arc<ResearchSession>,
    pub progress: Progress,
    pub status: RunStatus,
    pub task: Option<PhaseTask>,
}

impl SessionSnapshot {
    pub fn new(session: ResearchSession, status: RunStatus) -> Self {
        let progress = progress(&session);
        Self {
            session: Arc::new(session),
            progress,
            status,
            task: None,
        }
    }

    pub fn with_task(mut self, task: PhaseTask) -> Self {
        self.task = Some(task);
        self
    }
}

pub struct SessionRunner {
    store: SessionStore,
    executor: Arc<dyn PhaseExecutor>,
    persistence: Arc<dyn SessionPersistence>,
    events: broadcast::Sender<ResearchEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    cancel: CancellationToken,
}

impl SessionRunner {
    pub fn new(
        session: ResearchSession,
        executor: Arc<dyn PhaseExecutor>,
        persistence: Arc<dyn SessionPersistence>,
        events: broadcast::Sender<ResearchEvent>,
        snapshot: watch::Sender<SessionSnapshot>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store: SessionStore::new(session),
            executor,
            persistence,
            events,
            snapshot,
            cancel,
        }
    }

    /// Drive the session until it completes, fails, or is cancelled.
    pub async fn run(mut self) -> RunStatus {
        let session_id = self.store.current().id;
        info!(
            session_id = %session_id,
            subject = %self.store.current().subject,
            phase = %self.store.current().current_phase,
            "Research session started"
        );
        let usage_at_start = self.executor.usage();
        self.publish(ResearchEvent::Started {
            session_id,
            subject: self.store.current().subject.clone(),
            progress: progress(self.store.current()),
        });
        self.save_snapshot().await;

        let status = loop {
            if self.cancel.is_cancelled() {
                info!(session_id = %session_id, "Cancellation observed between phases");
                self.publish(ResearchEvent::Cancelled {
                    session_id,
                    progress: progress(self.store.current()),
                });
                break RunStatus::Cancelled;
            }

            let task = match sequencer::next(self.store.current()) {
                Ok(NextStep::Run(task)) => task,
                Ok(NextStep::Terminal) => {
                    if !self.store.current().is_complete() {
                        if let Err(status) = self.commit(PhaseResult::Complete).await {
                            break status;
                        }
                    } else {
                        // Resumed an already-complete session; re-announce completion.
                        self.publish(ResearchEvent::PhaseCompleted {
                            session_id,
                            result: PhaseResult::Complete,
                            progress: progress(self.store.current()),
                        });
                    }
                    break RunStatus::Completed;
                }
                Err(e) => {
                    break self.invariant_failure(&e.to_string());
                }
            };

            info!(session_id = %session_id, task = %task, "Running phase task");
            let snapshot = self.store.current().clone();
            self.snapshot.send_replace(
                SessionSnapshot::new(snapshot.clone(), RunStatus::Running).with_task(task.clone()),
            );
            match self.executor.execute(&task, &snapshot).await {
                Ok(result) => {
                    if let Err(status) = self.commit(result).await {
                        break status;
                    }
                }
                Err(e) => {
                    let message = format!("{} failed: {}", task, e);
                    error!(session_id = %session_id, task = %task, error = %e, "Phase task failed");
                    self.publish(ResearchEvent::Error {
                        session_id,
                        message: message.clone(),
                        progress: progress(self.store.current()),
                    });
                    break RunStatus::Failed { message };
                }
            }
        };

        self.save_snapshot().await;
        self.set_status(status.clone());
        let usage = self.executor.usage();
        info!(
            session_id = %session_id,
            status = %status,
            input_tokens = usage.input_tokens.saturating_sub(usage_at_start.input_tokens),
            output_tokens = usage.output_tokens.saturating_sub(usage_at_start.output_tokens),
            "Research session finished"
        );
        status
    }

    /// Apply a result, then persist and publish it.
    async fn commit(&mut self, result: PhaseResult) -> Result<(), RunStatus> {
        let session_id = self.store.current().id;
        let applied = self.store.apply(&result).map(|_| ());
        if let Err(e) = applied {
            return Err(self.invariant_failure(&format!(
                "{} result rejected: {}",
                result.phase(),
                e
            )));
        }

        self.save_snapshot().await;
        if let Err(e) = self
            .persistence
            .append_phase_event(session_id, &result)
            .await
        {
            self.persistence_warning(result.phase(), &e.to_string());
        }

        let current = self.store.current();
        let progress = progress(current);
        info!(
            session_id = %session_id,
            phase = %result.phase(),
            chapter = result.chapter_title().unwrap_or(""),
            percent = progress.percent,
            "Phase completed"
        );
        self.snapshot
            .send_replace(SessionSnapshot::new(current.clone(), RunStatus::Running));
        self.publish(ResearchEvent::PhaseCompleted {
            session_id,
            result,
            progress,
        });
        Ok(())
    }

    fn invariant_failure(&self, message: &str) -> RunStatus {
        let current = self.store.current();
        error!(
            session_id = %current.id,
            error = %message,
            state = ?current,
            "Session state invariant violated"
        );
        self.publish(ResearchEvent::Error {
            session_id: current.id,
            message: message.to_string(),
            progress: progress(current),
        });
        RunStatus::Failed {
            message: message.to_string(),
        }
    }

    async fn save_snapshot(&self) {
        let current = self.store.current();
        if let Err(e) = self.persistence.save_session(current).await {
            self.persistence_warning(current.current_phase, &e.to_string());
        }
    }

    fn persistence_warning(&self, phase: Phase, message: &str) {
        let session_id = self.store.current().id;
        warn!(session_id = %session_id, phase = %phase, error = %message, "Persistence failed; continuing");
        self.publish(ResearchEvent::PersistenceWarning {
            session_id,
            phase,
            message: message.to_string(),
        });
    }

    fn set_status(&self, status: RunStatus) {
        self.snapshot.send_replace(SessionSnapshot::new(
            self.store.current().clone(),
            status,
        ));
    }

    fn publish(&self, event: ResearchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::persistence::MemorySessionStore;
    use crate::research::sequencer::PhaseTask;
    use crate::research::session::{
        ChapterContent, InitialFindings, PlannedChapter, ResearchFindings,
    };
    use async_trait::async_trait;

    /// Produces well-formed results without any model or search calls.
    struct Scripted {
        fail_on: Option<Phase>,
    }

    #[async_trait]
    impl PhaseExecutor for Scripted {
        async fn execute(
            &self,
            task: &PhaseTask,
            session: &ResearchSession,
        ) -> Result<PhaseResult, TaskError> {
            if self.fail_on == Some(task.phase()) {
                return Err(TaskError::NoResults {
                    phase: task.phase(),
                });
            }
            Ok(match task {
                PhaseTask::InitialResearch => PhaseResult::InitialResearch {
                    findings: InitialFindings::default(),
                },
                PhaseTask::Planning => PhaseResult::Planning {
                    chapters: (0..session.total_chapter_target)
                        .map(|i| PlannedChapter {
                            title: format!("Chapter {i}"),
                            description: String::new(),
                            subtopics: vec![],
                        })
                        .collect(),
                },
                PhaseTask::ChapterResearch { title } => PhaseResult::ChapterResearch {
                    title: title.clone(),
                    research: ResearchFindings::default(),
                },
                PhaseTask::ChapterWriting { title } => PhaseResult::ChapterWriting {
                    title: title.clone(),
                    content: ChapterContent {
                        overview: "o".into(),
                        sections: vec![],
                    },
                },
            })
        }
    }

    fn runner(
        session: ResearchSession,
        executor: Scripted,
        persistence: Arc<MemorySessionStore>,
    ) -> (
        SessionRunner,
        broadcast::Receiver<ResearchEvent>,
        watch::Receiver<SessionSnapshot>,
    ) {
        let (events, rx) = broadcast::channel(64);
        let (snapshot, snapshot_rx) =
            watch::channel(SessionSnapshot::new(session.clone(), RunStatus::Running));
        let runner = SessionRunner::new(
            session,
            Arc::new(executor),
            persistence,
            events,
            snapshot,
            CancellationToken::new(),
        );
        (runner, rx, snapshot_rx)
    }

    fn drain(rx: &mut broadcast::Receiver<ResearchEvent>) -> Vec<ResearchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let persistence = Arc::new(MemorySessionStore::new());
        let session = ResearchSession::new("s", 2);
        let id = session.id;
        let (runner, mut rx, snapshot_rx) =
            runner(session, Scripted { fail_on: None }, persistence.clone());

        assert_eq!(runner.run().await, RunStatus::Completed);

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(ResearchEvent::Started { .. })));
        // initial, planning, 2 x (research, writing), complete
        let completed = events
            .iter()
            .filter(|e| matches!(e, ResearchEvent::PhaseCompleted { .. }))
            .count();
        assert_eq!(completed, 7);
        assert!(events.last().is_some_and(ResearchEvent::is_terminal));

        let snapshot = snapshot_rx.borrow().clone();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.progress.percent, 100);

        let saved = persistence.load_session(id).await.unwrap();
        assert!(saved.is_complete());
        assert_eq!(persistence.load_events(id).await.unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_task_failure_keeps_progress() {
        let persistence = Arc::new(MemorySessionStore::new());
        let (runner, mut rx, _snapshot) = runner(
            ResearchSession::new("s", 1),
            Scripted {
                fail_on: Some(Phase::ChapterResearch),
            },
            persistence,
        );

        let status = runner.run().await;
        assert!(matches!(status, RunStatus::Failed { .. }));

        match drain(&mut rx).last() {
            Some(ResearchEvent::Error { progress, message, .. }) => {
                assert_eq!(progress.percent, 20);
                assert_eq!(progress.label, "Planning chapters");
                assert!(message.contains("chapter research"));
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_is_warning_only() {
        let persistence = Arc::new(MemorySessionStore::new());
        persistence.set_fail_writes(true);
        let (runner, mut rx, _snapshot) = runner(
            ResearchSession::new("s", 1),
            Scripted { fail_on: None },
            persistence,
        );

        assert_eq!(runner.run().await, RunStatus::Completed);
        let warnings = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ResearchEvent::PersistenceWarning { .. }))
            .count();
        assert!(warnings > 0);
    }

    #[tokio::test]
    async fn test_resuming_complete_session_does_not_reapply() {
        let persistence = Arc::new(MemorySessionStore::new());
        let (runner, _rx, snapshot_rx) = runner(
            ResearchSession::new("s", 1),
            Scripted { fail_on: None },
            persistence.clone(),
        );
        runner.run().await;
        let done = snapshot_rx.borrow().session.as_ref().clone();

        let (again, mut rx, _) = runner_from(done.clone(), persistence);
        assert_eq!(again.run().await, RunStatus::Completed);
        let events = drain(&mut rx);
        assert!(events.iter().any(ResearchEvent::is_terminal));
    }

    fn runner_from(
        session: ResearchSession,
        persistence: Arc<MemorySessionStore>,
    ) -> (
        SessionRunner,
        broadcast::Receiver<ResearchEvent>,
        watch::Receiver<SessionSnapshot>,
    ) {
        runner(session, Scripted { fail_on: None }, persistence)
    }

    /// Records what observers see while each task is executing.
    struct Observed {
        inner: Scripted,
        snapshot: watch::Receiver<SessionSnapshot>,
        seen: std::sync::Mutex<Vec<(Option<PhaseTask>, String)>>,
    }

    #[async_trait]
    impl PhaseExecutor for Observed {
        async fn execute(
            &self,
            task: &PhaseTask,
            session: &ResearchSession,
        ) -> Result<PhaseResult, TaskError> {
            let current = self.snapshot.borrow().clone();
            self.seen
                .lock()
                .unwrap()
                .push((current.task.clone(), current.progress.label.clone()));
            self.inner.execute(task, session).await
        }
    }

    #[tokio::test]
    async fn test_snapshot_names_in_flight_task() {
        let session = ResearchSession::new("s", 1);
        let (events, _rx) = broadcast::channel(64);
        let (snapshot, snapshot_rx) =
            watch::channel(SessionSnapshot::new(session.clone(), RunStatus::Running));
        let executor = Arc::new(Observed {
            inner: Scripted { fail_on: None },
            snapshot: snapshot_rx.clone(),
            seen: std::sync::Mutex::new(Vec::new()),
        });
        let runner = SessionRunner::new(
            session,
            executor.clone(),
            Arc::new(MemorySessionStore::new()),
            events,
            snapshot,
            CancellationToken::new(),
        );
        assert_eq!(runner.run().await, RunStatus::Completed);

        let seen = executor.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        // Progress trails the work; the task field names it.
        assert_eq!(
            seen[1],
            (Some(PhaseTask::Planning), "Researching topic".to_string())
        );
        assert_eq!(
            seen[2].0,
            Some(PhaseTask::ChapterResearch {
                title: "Chapter 0".into()
            })
        );
        assert!(snapshot_rx.borrow().task.is_none());
    }

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::Running.to_string(), "running");
        assert_eq!(
            RunStatus::Failed {
                message: "x".into()
            }
            .to_string(),
            "failed: x"
        );
        assert!(!RunStatus::Cancelled.is_running());
    }
}
