// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! API backend: a tool-use loop against a hosted model.
//!
//! Each turn sends the running conversation with the sandboxed tool catalog,
//! streams text to the observer, executes any tool calls inside the task's
//! repository and feeds the results back as the next user turn. The loop
//! ends when a turn has no tool calls, a turn errors, the turn limit is hit,
//! the wall clock runs out or the run is cancelled.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    build_prompt, cancelled, BackendRunner, ExitCondition, OutputObserver, RunOutcome, SYSTEM_PROMPT,
};
use crate::config::ResolvedConfig;
use crate::error::BackendError;
use crate::fleet::types::{BackendKind, RepoTask};
use crate::tools::{RepoSandbox, ToolRegistry, DEFAULT_ALLOWED_COMMANDS};
use crate::types::{
    ContentBlock, Message, Role, SharedProvider, StreamCallback, StreamEvent, TokenUsage,
};

/// Runs sessions through a [`crate::types::Provider`] tool loop.
pub struct ApiBackend {
    provider: SharedProvider,
    max_turns: u32,
    timeout: Duration,
    allowed_commands: Vec<String>,
}

impl ApiBackend {
    pub fn new(provider: SharedProvider) -> Self {
        Self {
            provider,
            max_turns: 30,
            timeout: Duration::from_secs(600),
            allowed_commands: DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_config(provider: SharedProvider, config: &ResolvedConfig) -> Self {
        Self::new(provider)
            .with_max_turns(config.api_max_turns)
            .with_timeout(Duration::from_millis(config.api_timeout_ms))
            .with_allowed_commands(config.allowed_commands.clone())
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_allowed_commands(mut self, allowed: Vec<String>) -> Self {
        self.allowed_commands = allowed;
        self
    }
}

impl std::fmt::Debug for ApiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiBackend")
            .field("provider", &self.provider.name())
            .field("model", &self.provider.model())
            .field("max_turns", &self.max_turns)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl BackendRunner for ApiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ApiBackend
    }

    async fn run(
        &self,
        task: &RepoTask,
        observer: OutputObserver,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunOutcome, BackendError> {
        let sandbox = RepoSandbox::with_allowed_commands(&task.repo_path, &self.allowed_commands)?;
        let registry = ToolRegistry::sandboxed(Arc::new(sandbox));
        let tools = registry.definitions();

        let mut messages = vec![Message::user(build_prompt(task))];
        let mut usage = TokenUsage::default();
        let mut transcript = String::new();

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        info!(
            repo = %task.repo_name,
            task = %task.task_id,
            model = %self.provider.model(),
            "API session started"
        );

        let mut turn = 0;
        let exit = 'turns: loop {
            if turn >= self.max_turns {
                break ExitCondition::failed(format!("reached turn limit ({})", self.max_turns));
            }
            turn += 1;

            let text_observer = observer.clone();
            let on_event: StreamCallback = Box::new(move |event| {
                if let StreamEvent::TextDelta(text) = event {
                    text_observer(&text);
                }
            });

            let response = tokio::select! {
                res = self.provider.stream_chat(
                    &messages,
                    Some(tools.as_slice()),
                    Some(SYSTEM_PROMPT),
                    on_event,
                ) => res,
                _ = &mut deadline => break ExitCondition::TimedOut,
                _ = cancelled(&mut cancel) => break ExitCondition::Cancelled,
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(repo = %task.repo_name, turn, error = %e, "API turn failed");
                    break ExitCondition::failed(e.to_string());
                }
            };

            usage.add(response.usage);
            if !response.content.is_empty() {
                if !transcript.is_empty() {
                    transcript.push('\n');
                }
                transcript.push_str(&response.content);
            }
            messages.push(response.to_assistant_message());

            if !response.has_tool_calls() {
                break ExitCondition::Success;
            }

            let mut results = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let dispatched = tokio::select! {
                    d = registry.dispatch(&call.name, call.input.clone()) => d,
                    _ = &mut deadline => break 'turns ExitCondition::TimedOut,
                    _ = cancelled(&mut cancel) => break 'turns ExitCondition::Cancelled,
                };
                debug!(
                    repo = %task.repo_name,
                    tool = %call.name,
                    is_error = dispatched.is_error,
                    mutating = dispatched.mutating,
                    "Tool call finished"
                );
                observer(&format!(
                    "[{}{}]",
                    call.name,
                    if dispatched.is_error { " failed" } else { "" }
                ));
                results.push(ContentBlock::tool_result(
                    &call.id,
                    dispatched.output.content,
                    dispatched.is_error,
                ));
            }
            messages.push(Message::with_blocks(Role::User, results));
        };

        match &exit {
            ExitCondition::TimedOut => warn!(
                repo = %task.repo_name,
                timeout_ms = self.timeout.as_millis() as u64,
                "API session timed out"
            ),
            ExitCondition::Cancelled => info!(repo = %task.repo_name, "API session cancelled"),
            _ => debug!(repo = %task.repo_name, turns = turn, "API session ended"),
        }

        if let ExitCondition::Failed { reason, .. } = &exit {
            if !transcript.is_empty() {
                transcript.push('\n');
            }
            transcript.push_str(reason);
        }

        Ok(RunOutcome::new(transcript, usage, exit))
    }
}
