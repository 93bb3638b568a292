//! Session persistence: atomic JSON snapshots and append-only phase logs.
//!
//! `FileSessionStore` keeps one `<id>.json` snapshot per session, written to
//! a `.tmp` sibling and renamed into place, plus an `<id>.events.jsonl` log
//! with one line per applied phase result.

use crate::error::PersistenceError;
use crate::research::{PhaseResult, ResearchSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// One line of a session's phase log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEventRecord {
    pub at: DateTime<Utc>,
    pub result: PhaseResult,
}

/// Storage for session snapshots and their phase history.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn load_session(&self, id: Uuid) -> Result<ResearchSession, PersistenceError>;

    async fn save_session(&self, session: &ResearchSession) -> Result<(), PersistenceError>;

    async fn append_phase_event(
        &self,
        id: Uuid,
        result: &PhaseResult,
    ) -> Result<(), PersistenceError>;

    async fn load_events(&self, id: Uuid) -> Result<Vec<PhaseEventRecord>, PersistenceError>;

    /// Every stored session, most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<ResearchSession>, PersistenceError>;
}

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes to a `.tmp` sibling file,
/// then renames to the target path. Creates parent directories if needed.
pub async fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec_pretty(data)?;
    let write_err = |source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

/// Load and deserialize JSON from a file. Returns `Ok(None)` if it doesn't exist.
pub async fn load_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, PersistenceError> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistenceError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(Some(serde_json::from_str(&data)?))
}

/// File-backed session persistence.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn events_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.events.jsonl"))
    }
}

#[async_trait]
impl SessionPersistence for FileSessionStore {
    async fn load_session(&self, id: Uuid) -> Result<ResearchSession, PersistenceError> {
        load_json(&self.session_path(id))
            .await?
            .ok_or(PersistenceError::NotFound { id })
    }

    async fn save_session(&self, session: &ResearchSession) -> Result<(), PersistenceError> {
        atomic_write_json(&self.session_path(session.id), session).await
    }

    async fn append_phase_event(
        &self,
        id: Uuid,
        result: &PhaseResult,
    ) -> Result<(), PersistenceError> {
        let path = self.events_path(id);
        let write_err = |source| PersistenceError::Write {
            path: path.clone(),
            source,
        };
        let mut line = serde_json::to_vec(&PhaseEventRecord {
            at: Utc::now(),
            result: result.clone(),
        })?;
        line.push(b'\n');

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(write_err)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(write_err)?;
        file.write_all(&line).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
        Ok(())
    }

    async fn load_events(&self, id: Uuid) -> Result<Vec<PhaseEventRecord>, PersistenceError> {
        let path = self.events_path(id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(PersistenceError::Read { path, source }),
        };
        data.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(PersistenceError::from))
            .collect()
    }

    async fn list_sessions(&self) -> Result<Vec<ResearchSession>, PersistenceError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut sessions = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|source| PersistenceError::Read {
                    path: self.dir.clone(),
                    source,
                })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            let is_snapshot = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".json") && !n.ends_with(".events.json"));
            if !is_snapshot {
                continue;
            }
            match load_json::<ResearchSession>(&path).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable session file");
                }
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

/// In-memory persistence for tests and embedding.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, ResearchSession>>,
    events: Mutex<HashMap<Uuid, Vec<PhaseEventRecord>>>,
    fail_writes: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, to exercise warning paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Write {
                path: PathBuf::from("memory"),
                source: std::io::Error::other("writes disabled"),
            });
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SessionPersistence for MemorySessionStore {
    async fn load_session(&self, id: Uuid) -> Result<ResearchSession, PersistenceError> {
        lock(&self.sessions)
            .get(&id)
            .cloned()
            .ok_or(PersistenceError::NotFound { id })
    }

    async fn save_session(&self, session: &ResearchSession) -> Result<(), PersistenceError> {
        self.check_writable()?;
        lock(&self.sessions).insert(session.id, session.clone());
        Ok(())
    }

    async fn append_phase_event(
        &self,
        id: Uuid,
        result: &PhaseResult,
    ) -> Result<(), PersistenceError> {
        self.check_writable()?;
        lock(&self.events).entry(id).or_default().push(PhaseEventRecord {
            at: Utc::now(),
            result: result.clone(),
        });
        Ok(())
    }

    async fn load_events(&self, id: Uuid) -> Result<Vec<PhaseEventRecord>, PersistenceError> {
        Ok(lock(&self.events).get(&id).cloned().unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<ResearchSession>, PersistenceError> {
        let mut sessions: Vec<_> = lock(&self.sessions).values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}
