//! Registry of live sessions, keyed by session id.

use super::events::ResearchEvent;
use super::progress::Progress;
use super::runner::{RunStatus, SessionSnapshot};
use super::sequencer::PhaseTask;
use super::session::ResearchSession;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Observer-side handle to a running (or finished) session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<ResearchEvent>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        id: Uuid,
        snapshot: watch::Receiver<SessionSnapshot>,
        events: broadcast::Sender<ResearchEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            snapshot,
            events,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest applied session state.
    pub fn session(&self) -> Arc<ResearchSession> {
        self.snapshot.borrow().session.clone()
    }

    pub fn status(&self) -> RunStatus {
        self.snapshot.borrow().status.clone()
    }

    pub fn progress(&self) -> Progress {
        self.snapshot.borrow().progress.clone()
    }

    /// The phase task executing right now, if any.
    pub fn current_task(&self) -> Option<PhaseTask> {
        self.snapshot.borrow().task.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver for events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ResearchEvent> {
        self.events.subscribe()
    }

    /// Ask the runner to stop before its next phase.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the session to leave the running state.
    pub async fn wait(&self) -> RunStatus {
        let mut rx = self.snapshot.clone();
        let status = match rx.wait_for(|s| !s.status.is_running()).await {
            Ok(snapshot) => snapshot.status.clone(),
            Err(_) => RunStatus::Failed {
                message: "session runner stopped without reporting a status".to_string(),
            },
        };
        status
    }
}

/// Maps session ids to handles. One store per session lives in its runner.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: SessionHandle) {
        debug!(session_id = %handle.id(), "Registering session");
        self.write().insert(handle.id(), handle);
    }

    pub fn get(&self, id: Uuid) -> Option<SessionHandle> {
        self.read().get(&id).cloned()
    }

    /// Ids and run status of every registered session.
    pub fn list(&self) -> Vec<(Uuid, RunStatus)> {
        self.read()
            .values()
            .map(|h| (h.id(), h.status()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove a finished session. Running sessions are left in place.
    pub fn evict(&self, id: Uuid) -> bool {
        let mut sessions = self.write();
        match sessions.get(&id) {
            Some(handle) if handle.status().is_running() => {
                warn!(session_id = %id, "Refusing to evict a running session");
                false
            }
            Some(_) => {
                sessions.remove(&id);
                debug!(session_id = %id, "Evicted session");
                true
            }
            None => false,
        }
    }

    /// Remove every finished session, returning how many were dropped.
    pub fn evict_finished(&self) -> usize {
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, h| h.status().is_running());
        before - sessions.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, SessionHandle>> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(status: RunStatus) -> (SessionHandle, watch::Sender<SessionSnapshot>) {
        let session = ResearchSession::new("s", 1);
        let id = session.id;
        let (tx, rx) = watch::channel(SessionSnapshot::new(session, status));
        let (events, _) = broadcast::channel(8);
        (
            SessionHandle::new(id, rx, events, CancellationToken::new()),
            tx,
        )
    }

    #[test]
    fn test_evict_only_finished() {
        let registry = SessionRegistry::new();
        let (running, _tx1) = handle(RunStatus::Running);
        let (done, _tx2) = handle(RunStatus::Completed);
        registry.insert(running.clone());
        registry.insert(done.clone());
        assert_eq!(registry.len(), 2);

        assert!(!registry.evict(running.id()));
        assert!(registry.evict(done.id()));
        assert!(!registry.evict(done.id()));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(running.id()).is_some());
    }

    #[test]
    fn test_evict_finished() {
        let registry = SessionRegistry::new();
        let (a, _ta) = handle(RunStatus::Cancelled);
        let (b, _tb) = handle(RunStatus::Running);
        registry.insert(a);
        registry.insert(b);
        assert_eq!(registry.evict_finished(), 1);
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn test_wait_returns_final_status() {
        let (h, tx) = handle(RunStatus::Running);
        let waiter = {
            let h = h.clone();
            tokio::spawn(async move { h.wait().await })
        };
        let session = h.session().as_ref().clone();
        tx.send_replace(SessionSnapshot::new(session, RunStatus::Cancelled));
        assert_eq!(waiter.await.unwrap(), RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_wait_when_runner_dropped() {
        let (h, tx) = handle(RunStatus::Running);
        drop(tx);
        assert!(matches!(h.wait().await, RunStatus::Failed { .. }));
    }

    #[test]
    fn test_cancel_flag() {
        let (h, _tx) = handle(RunStatus::Running);
        assert!(!h.is_cancelled());
        h.cancel();
        assert!(h.is_cancelled());
    }
}
