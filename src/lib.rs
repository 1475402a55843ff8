// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent Fleet - run autonomous coding agents across many repositories.
//!
//! Each repository with work gets at most one agent session at a time. Runs
//! go through a bounded pool, success is settled from version-control state,
//! failures are retried with backoff and tasks for busy repositories wait in
//! a FIFO until the repository frees up.
//!
//! # Architecture
//!
//! - [`fleet`] - The orchestration core (sessions, backends, retries, commit detection)
//! - [`types`] - Conversation types and the [`Provider`] trait used by the API backend
//! - [`providers`] - Hosted model clients
//! - [`tools`] - Sandboxed tools exposed to the API backend
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types and result aliases
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_fleet::config::{load_config, CliOptions};
//! use agent_fleet::fleet::{RepoTask, SessionTracker};
//!
//! let config = load_config(Path::new("."), CliOptions::default())?;
//! let tracker = SessionTracker::new(&config.snapshot_path);
//! ```

pub mod config;
pub mod error;
pub mod fleet;
pub mod providers;
pub mod telemetry;
pub mod tools;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{BackendError, ConfigError, OrchestratorError, ProviderError, Result, ToolError};
pub use fleet::{
    AgentRun, BackendKind, BatchReport, Orchestrator, OrchestratorCallbacks, Priority, RepoTask,
    RunStatus, SessionTracker,
};
pub use types::{Message, Provider, ProviderResponse, SharedProvider, StreamEvent, TokenUsage};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
