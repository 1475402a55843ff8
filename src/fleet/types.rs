// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Data model for fleet orchestration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::retry::may_retry;
use crate::types::TokenUsage;

/// Task priority as supplied by the task source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// One unit of eligible work, keyed by repository path and task id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoTask {
    pub repo_path: PathBuf,
    pub repo_name: String,
    pub task_id: String,
    pub task_title: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub context: String,
}

impl RepoTask {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        repo_name: impl Into<String>,
        task_id: impl Into<String>,
        task_title: impl Into<String>,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            repo_name: repo_name.into(),
            task_id: task_id.into(),
            task_title: task_title.into(),
            priority: Priority::default(),
            phase: String::new(),
            context: String::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Registry key for this task's repository.
    pub fn repo_key(&self) -> String {
        self.repo_path.to_string_lossy().into_owned()
    }
}

/// Execution strategy for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
    /// External CLI agent process.
    ProcessBackend,
    /// Hosted API tool loop.
    ApiBackend,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessBackend => write!(f, "process"),
            Self::ApiBackend => write!(f, "api"),
        }
    }
}

/// Lifecycle state of an [`AgentRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Mutable execution record for one task, across its retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRun {
    pub task: RepoTask,
    pub status: RunStatus,
    pub backend: BackendKind,
    pub output: String,
    pub committed: bool,
    pub usage: TokenUsage,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl AgentRun {
    pub fn new(task: RepoTask, backend: BackendKind, max_retries: u32) -> Self {
        Self {
            task,
            status: RunStatus::Queued,
            backend,
            output: String::new(),
            committed: false,
            usage: TokenUsage::default(),
            started_at: None,
            finished_at: None,
            retry_count: 0,
            max_retries,
        }
    }

    /// Whether another attempt fits in the retry budget.
    pub fn can_retry(&self) -> bool {
        may_retry(self.retry_count, self.max_retries)
    }

    /// Wall-clock duration once the run has finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// Persisted record that a repository is busy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub repo_path: String,
    pub repo_name: String,
    pub task_id: String,
    pub task_title: String,
    pub backend: BackendKind,
    pub started_at: DateTime<Utc>,
}

impl ActiveSession {
    pub fn for_task(task: &RepoTask, backend: BackendKind) -> Self {
        Self {
            repo_path: task.repo_key(),
            repo_name: task.repo_name.clone(),
            task_id: task.task_id.clone(),
            task_title: task.task_title.clone(),
            backend,
            started_at: Utc::now(),
        }
    }
}

/// A task deferred because its repository was busy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTask {
    #[serde(flatten)]
    pub task: RepoTask,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedTask {
    pub fn new(task: RepoTask) -> Self {
        Self {
            task,
            enqueued_at: Utc::now(),
        }
    }

    /// Whether this entry targets the same (repository, task) pair.
    pub fn same_work(&self, repo_key: &str, task_id: &str) -> bool {
        self.task.repo_key() == repo_key && self.task.task_id == task_id
    }
}

/// Shape of the shared snapshot file read by external processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub updated_at: DateTime<Utc>,
    pub sessions: Vec<ActiveSession>,
}
