// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Commit detection.
//!
//! Decides whether a session produced durable progress, independent of what
//! the agent claims. Signals in decreasing order of trust:
//!
//! 1. The repository HEAD moved between the start and end of the session.
//! 2. Version-control history shows a commit within the recent window.
//! 3. The session output contains a success phrase. This is weak evidence
//!    only and is consulted last.
//!
//! Every version-control failure is swallowed and falls through to the next
//! signal.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::VcsError;

/// Window for the recent-history check.
pub const RECENT_COMMIT_WINDOW: Duration = Duration::from_secs(5 * 60);

static SUCCESS_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)\b(committed|created commit|commit created|changes have been committed)\b|^\[[\w./-]+ [0-9a-f]{7,40}\]")
        .expect("success phrase pattern is valid")
});

static NEGATED_PHRASES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(nothing to commit|not committed|no changes (were )?committed|could not commit|failed to commit)\b")
        .expect("negation pattern is valid")
});

/// Version-control queries needed for commit detection.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Current head reference of the repository.
    async fn head(&self, repo: &Path) -> Result<String, VcsError>;

    /// Whether any commit landed within `window`.
    async fn has_recent_commit(&self, repo: &Path, window: Duration) -> Result<bool, VcsError>;
}

/// [`VersionControl`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn git(&self, repo: &Path, args: &[&str]) -> Result<String, VcsError> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(VcsError::Exit {
                command: args.join(" "),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn head(&self, repo: &Path) -> Result<String, VcsError> {
        self.git(repo, &["rev-parse", "HEAD"]).await
    }

    async fn has_recent_commit(&self, repo: &Path, window: Duration) -> Result<bool, VcsError> {
        let since = format!("--since={} seconds ago", window.as_secs());
        let log = self.git(repo, &["log", "--oneline", "-1", &since]).await?;
        Ok(!log.is_empty())
    }
}

/// Which signal settled the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitEvidence {
    HeadMoved,
    RecentCommit,
    OutputClaim,
    NotCommitted,
}

impl CommitEvidence {
    pub fn committed(&self) -> bool {
        !matches!(self, Self::NotCommitted)
    }
}

/// Runs the detection chain against one repository.
#[derive(Clone)]
pub struct CommitDetector {
    vcs: Arc<dyn VersionControl>,
    window: Duration,
}

impl CommitDetector {
    pub fn new(vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            vcs,
            window: RECENT_COMMIT_WINDOW,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Head before the session starts. `None` when it cannot be read.
    pub async fn capture_head(&self, repo: &Path) -> Option<String> {
        match self.vcs.head(repo).await {
            Ok(head) => Some(head),
            Err(e) => {
                debug!(repo = %repo.display(), error = %e, "Could not read head before session");
                None
            }
        }
    }

    /// Settle whether the session that started at `before` committed.
    pub async fn detect(&self, repo: &Path, before: Option<&str>, output: &str) -> CommitEvidence {
        if let Some(before) = before {
            match self.vcs.head(repo).await {
                Ok(after) if after != before => return CommitEvidence::HeadMoved,
                Ok(_) => {}
                Err(e) => debug!(repo = %repo.display(), error = %e, "Could not read head after session"),
            }
        }

        match self.vcs.has_recent_commit(repo, self.window).await {
            Ok(true) => return CommitEvidence::RecentCommit,
            Ok(false) => {}
            Err(e) => debug!(repo = %repo.display(), error = %e, "Recent commit query failed"),
        }

        if output_claims_commit(output) {
            debug!(repo = %repo.display(), "Accepting success phrase in output as weak commit evidence");
            CommitEvidence::OutputClaim
        } else {
            CommitEvidence::NotCommitted
        }
    }
}

impl std::fmt::Debug for CommitDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitDetector")
            .field("window", &self.window)
            .finish()
    }
}

/// Last-resort scan of agent output for a success phrase.
pub fn output_claims_commit(output: &str) -> bool {
    !NEGATED_PHRASES.is_match(output) && SUCCESS_PHRASES.is_match(output)
}
