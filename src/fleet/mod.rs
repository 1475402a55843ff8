// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fleet orchestration: running coding agents across many repositories.
//!
//! - [`types`] - Tasks, runs, sessions and the snapshot format
//! - [`session`] - One-session-per-repository registry with a deferred queue
//! - [`retry`] - Backoff policy
//! - [`commit`] - Deciding whether a session committed anything
//! - [`backend`] - Process and API runners behind one trait
//! - [`usage`] - Per-backend token counters
//! - [`source`] - Where batches come from
//! - [`orchestrator`] - Admission, the bounded pool, retries and promotion
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agent_fleet::config::ResolvedConfig;
//! use agent_fleet::fleet::{Orchestrator, OrchestratorCallbacks, SessionTracker, TaskFile, TaskSource};
//!
//! let config = ResolvedConfig::default();
//! let tracker = Arc::new(SessionTracker::new(&config.snapshot_path));
//! tracker.clear_stale_sessions();
//!
//! let orchestrator = Orchestrator::from_config(&config, tracker, None, OrchestratorCallbacks::default())?;
//! let report = orchestrator.run_batch(TaskFile::new("tasks.json").load()?).await;
//! ```

pub mod backend;
pub mod commit;
pub mod orchestrator;
pub mod retry;
pub mod session;
pub mod source;
pub mod types;
pub mod usage;

pub use backend::{
    build_prompt, select_backend, ApiBackend, BackendRunner, ExitCondition, OutputObserver,
    ProcessBackend, RunOutcome,
};
pub use commit::{CommitDetector, CommitEvidence, GitCli, VersionControl};
pub use orchestrator::{
    BatchReport, Orchestrator, OrchestratorBuilder, OrchestratorCallbacks, OrchestratorSettings,
};
pub use retry::{may_retry, retry_delay, retry_delay_ms, MAX_RETRY_DELAY_MS};
pub use session::{read_snapshot, write_snapshot, ChangeListener, SessionTracker};
pub use source::{TaskFile, TaskSource};
pub use types::{
    ActiveSession, AgentRun, BackendKind, Priority, QueuedTask, RepoTask, RunStatus, SessionSnapshot,
};
pub use usage::{TokenAccumulator, UsageTotals};
