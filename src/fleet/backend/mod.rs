// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Backends that execute one agent session against one repository.
//!
//! Two implementations sit behind [`BackendRunner`]:
//!
//! - [`ProcessBackend`] drives an external agent CLI over stdin/stdout.
//! - [`ApiBackend`] drives a hosted model through a sandboxed tool loop.
//!
//! Both stream output to an [`OutputObserver`] as it arrives and stop early
//! when their cancellation channel flips to `true` or their own wall-clock
//! timeout expires.

mod api;
mod process;
mod prompt;

pub use api::ApiBackend;
pub use process::{parse_process_output, ProcessBackend};
pub use prompt::{build_prompt, SYSTEM_PROMPT};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use super::types::{BackendKind, Priority, RepoTask};
use crate::config::BackendMode;
use crate::error::BackendError;
use crate::types::TokenUsage;

/// Receives output chunks as the agent produces them.
pub type OutputObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Observer that drops everything.
pub fn discard_output() -> OutputObserver {
    Arc::new(|_| {})
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCondition {
    Success,
    Failed { code: Option<i32>, reason: String },
    TimedOut,
    Cancelled,
}

impl ExitCondition {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            code: None,
            reason: reason.into(),
        }
    }
}

/// Everything a finished session reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub output: String,
    pub usage: TokenUsage,
    pub exit: ExitCondition,
}

impl RunOutcome {
    pub fn new(output: impl Into<String>, usage: TokenUsage, exit: ExitCondition) -> Self {
        Self {
            output: output.into(),
            usage,
            exit,
        }
    }
}

/// One way of running an agent session.
#[async_trait]
pub trait BackendRunner: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Run `task` to completion, timeout or cancellation.
    ///
    /// Environmental failures that happen after the session has started are
    /// reported through [`RunOutcome::exit`]; `Err` is for failures to start.
    async fn run(
        &self,
        task: &RepoTask,
        observer: OutputObserver,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunOutcome, BackendError>;
}

/// Pick the backend for a task.
///
/// In auto mode high priority work goes to the full CLI agent and the rest to
/// the API when a key is available.
pub fn select_backend(priority: Priority, mode: BackendMode, api_available: bool) -> BackendKind {
    match mode {
        BackendMode::ProcessOnly => BackendKind::ProcessBackend,
        BackendMode::ApiOnly => BackendKind::ApiBackend,
        BackendMode::Auto => match priority {
            Priority::High => BackendKind::ProcessBackend,
            Priority::Medium | Priority::Low if api_available => BackendKind::ApiBackend,
            Priority::Medium | Priority::Low => BackendKind::ProcessBackend,
        },
    }
}

/// Resolve once the cancellation flag is set. Never resolves if the sender
/// is gone without having cancelled.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
