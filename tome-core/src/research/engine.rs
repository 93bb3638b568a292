//! Research engine: starts, resumes, and tracks research sessions.

use super::events::ResearchEvent;
use super::registry::{SessionHandle, SessionRegistry};
use super::runner::{RunStatus, SessionRunner, SessionSnapshot};
use super::session::{ResearchSession, StartRequest};
use super::tasks::{PhaseExecutor, ResearchTasks};
use crate::brain::Brain;
use crate::config::{ResearchConfig, TomeConfig};
use crate::error::{Result, TomeError};
use crate::persistence::{FileSessionStore, SessionPersistence};
use crate::providers::create_provider;
use crate::search::create_search_provider;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Owns the collaborators shared by every session and the session registry.
pub struct ResearchEngine {
    config: ResearchConfig,
    executor: Arc<dyn PhaseExecutor>,
    persistence: Arc<dyn SessionPersistence>,
    registry: SessionRegistry,
    /// Held across check, load, and spawn so one id never gets two runners.
    resuming: Mutex<()>,
}

impl ResearchEngine {
    pub fn new(
        config: ResearchConfig,
        executor: Arc<dyn PhaseExecutor>,
        persistence: Arc<dyn SessionPersistence>,
    ) -> Self {
        Self {
            config,
            executor,
            persistence,
            registry: SessionRegistry::new(),
            resuming: Mutex::new(()),
        }
    }

    /// Build an engine with the configured model, search provider, and file storage.
    pub fn from_config(config: &TomeConfig) -> Result<Self> {
        config.research.validate()?;

        let provider = create_provider(&config.llm)?;
        let brain = Brain::new(provider)
            .with_temperature(config.llm.temperature)
            .with_max_tokens(config.llm.max_tokens);
        let search = create_search_provider(&config.search)?;

        let mut tasks = ResearchTasks::new(Arc::new(brain), search, config.research.clone());
        if let Some(planner) = &config.llm.planner_model {
            tasks = tasks.with_planner_model(planner.clone());
        }

        let persistence = FileSessionStore::new(config.storage.sessions_dir());
        info!(
            provider = %config.llm.provider,
            model = %config.llm.model,
            planner_model = %config.llm.planner_model(),
            search = %config.search.provider,
            sessions_dir = %persistence.dir().display(),
            "Research engine configured"
        );
        Ok(Self::new(
            config.research.clone(),
            Arc::new(tasks),
            Arc::new(persistence),
        ))
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn persistence(&self) -> &Arc<dyn SessionPersistence> {
        &self.persistence
    }

    /// Validate a request, create its session, and start running it.
    pub fn start_session(&self, request: StartRequest) -> Result<SessionHandle> {
        let session = request.into_session(&self.config)?;
        Ok(self.spawn(session))
    }

    /// Continue a persisted session from its last applied phase.
    ///
    /// Returns the live handle if the session is already running here.
    pub async fn resume_session(&self, id: Uuid) -> Result<SessionHandle> {
        let _guard = self.resuming.lock().await;
        if let Some(handle) = self.registry.get(id)
            && handle.status().is_running()
        {
            debug!(session_id = %id, "Session already running; returning live handle");
            return Ok(handle);
        }
        let session = self.persistence.load_session(id).await?;
        super::store::check_consistency(&session).map_err(TomeError::from)?;
        info!(session_id = %id, phase = %session.current_phase, "Resuming session");
        Ok(self.spawn(session))
    }

    pub fn session(&self, id: Uuid) -> Option<SessionHandle> {
        self.registry.get(id)
    }

    /// Drop a finished session's handle.
    pub fn evict(&self, id: Uuid) -> bool {
        self.registry.evict(id)
    }

    fn spawn(&self, session: ResearchSession) -> SessionHandle {
        let id = session.id;
        let (events, _) = broadcast::channel::<ResearchEvent>(EVENT_CAPACITY);
        let (snapshot_tx, snapshot_rx) =
            watch::channel(SessionSnapshot::new(session.clone(), RunStatus::Running));
        let cancel = CancellationToken::new();

        let handle = SessionHandle::new(id, snapshot_rx, events.clone(), cancel.clone());
        self.registry.insert(handle.clone());

        let runner = SessionRunner::new(
            session,
            self.executor.clone(),
            self.persistence.clone(),
            events,
            snapshot_tx,
            cancel,
        );
        tokio::spawn(runner.run());
        handle
    }
}
