// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Repository session registry and deferred-task queue.
//!
//! [`SessionTracker`] is the authoritative record of which repositories are
//! busy. Every session mutation rewrites a snapshot file so that unrelated
//! processes can observe the current state; that file is never read back by
//! the tracker itself.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::types::{ActiveSession, QueuedTask, RepoTask, SessionSnapshot};
use crate::error::SnapshotError;

/// Callback fired after any mutation.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct TrackerState {
    sessions: HashMap<String, ActiveSession>,
    queue: VecDeque<QueuedTask>,
}

/// Single-writer-per-repository registry with a FIFO of deferred tasks.
pub struct SessionTracker {
    state: Mutex<TrackerState>,
    listeners: Mutex<Vec<ChangeListener>>,
    snapshot_path: Option<PathBuf>,
}

impl SessionTracker {
    /// Tracker that mirrors its sessions to `snapshot_path`.
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            listeners: Mutex::new(Vec::new()),
            snapshot_path: Some(snapshot_path.into()),
        }
    }

    /// Tracker with no snapshot file.
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            listeners: Mutex::new(Vec::new()),
            snapshot_path: None,
        }
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    pub fn is_repo_active(&self, repo_path: &str) -> bool {
        self.lock_state().sessions.contains_key(repo_path)
    }

    /// Record a session, superseding any existing one for the same repository.
    pub fn register_session(&self, session: ActiveSession) {
        {
            let mut state = self.lock_state();
            if let Some(prev) = state.sessions.insert(session.repo_path.clone(), session) {
                debug!(repo = %prev.repo_path, task = %prev.task_id, "Superseded active session");
            }
            self.persist(&state);
        }
        self.notify();
    }

    /// Remove the session for `repo_path`. No-op if there is none.
    pub fn deregister_session(&self, repo_path: &str) {
        let removed = {
            let mut state = self.lock_state();
            let removed = state.sessions.remove(repo_path).is_some();
            self.persist(&state);
            removed
        };
        if removed {
            self.notify();
        }
    }

    /// Append a task unless the same (repository, task) pair is already queued.
    ///
    /// Returns whether the task was inserted.
    pub fn enqueue(&self, task: RepoTask) -> bool {
        let inserted = {
            let mut state = self.lock_state();
            let key = task.repo_key();
            if state.queue.iter().any(|q| q.same_work(&key, &task.task_id)) {
                false
            } else {
                debug!(repo = %key, task = %task.task_id, "Queued task behind active session");
                state.queue.push_back(QueuedTask::new(task));
                true
            }
        };
        if inserted {
            self.notify();
        }
        inserted
    }

    /// Remove and return the oldest queued entry for `repo_path`.
    pub fn dequeue(&self, repo_path: &str) -> Option<QueuedTask> {
        let taken = {
            let mut state = self.lock_state();
            let index = state
                .queue
                .iter()
                .position(|q| q.task.repo_key() == repo_path)?;
            state.queue.remove(index)
        };
        if taken.is_some() {
            self.notify();
        }
        taken
    }

    /// Dequeue at most one task for `repo_path` and hand it to `run`.
    ///
    /// Returns whether a task was promoted.
    pub fn drain_queue<F>(&self, repo_path: &str, run: F) -> bool
    where
        F: FnOnce(QueuedTask),
    {
        match self.dequeue(repo_path) {
            Some(next) => {
                run(next);
                true
            }
            None => false,
        }
    }

    /// Drop every session. Used at startup, when persisted state cannot tell a
    /// live session from one that crashed.
    pub fn clear_stale_sessions(&self) {
        {
            let mut state = self.lock_state();
            state.sessions.clear();
            self.persist(&state);
        }
        self.notify();
    }

    pub fn clear_queue(&self) {
        self.lock_state().queue.clear();
        self.notify();
    }

    /// Register a listener fired after every mutation.
    pub fn on_change(&self, listener: ChangeListener) {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        let mut sessions: Vec<_> = self.lock_state().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    pub fn session(&self, repo_path: &str) -> Option<ActiveSession> {
        self.lock_state().sessions.get(repo_path).cloned()
    }

    pub fn queued_tasks(&self) -> Vec<QueuedTask> {
        self.lock_state().queue.iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.lock_state().queue.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Best-effort snapshot write; the lock is held so writes land in order.
    fn persist(&self, state: &TrackerState) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let mut sessions: Vec<_> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        let snapshot = SessionSnapshot {
            updated_at: Utc::now(),
            sessions,
        };
        if let Err(e) = write_snapshot(path, &snapshot) {
            debug!(error = %e, "Session snapshot not written");
        }
    }

    fn notify(&self) {
        let listeners: Vec<ChangeListener> = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            listener();
        }
    }
}

impl std::fmt::Debug for SessionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("SessionTracker")
            .field("sessions", &state.sessions.len())
            .field("queued", &state.queue.len())
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

/// Write `snapshot` to `path` via a sibling temp file and an atomic rename.
pub fn write_snapshot(path: &Path, snapshot: &SessionSnapshot) -> Result<(), SnapshotError> {
    let content = serde_json::to_string_pretty(snapshot)?;
    let write_err = |source| SnapshotError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, content).map_err(write_err)?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        write_err(e)
    })
}

/// Read the shared snapshot as an external observer would.
///
/// Missing, empty, or torn files all read as "no data".
pub fn read_snapshot(path: &Path) -> Option<SessionSnapshot> {
    let content = fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&content).ok()
}
