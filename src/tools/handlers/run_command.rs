// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `run_command`: run an allow-listed program in the repository root.
//!
//! The command line is tokenised and executed directly, without a shell.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument, warn};

use crate::error::ToolError;
use crate::tools::registry::{ToolHandler, ToolOutput};
use crate::tools::sandbox::RepoSandbox;
use crate::tools::{parse_arguments, truncate_output, truncate_text, COMMAND_TIMEOUT_MS, MAX_OUTPUT_BYTES};
use crate::types::{InputSchema, ToolDefinition};

const MAX_OUTPUT_LINES: usize = 500;

pub struct RunCommandHandler {
    sandbox: Arc<RepoSandbox>,
    timeout: Duration,
}

impl RunCommandHandler {
    pub fn new(sandbox: Arc<RepoSandbox>) -> Self {
        Self {
            sandbox,
            timeout: Duration::from_millis(COMMAND_TIMEOUT_MS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
}

#[async_trait]
impl ToolHandler for RunCommandHandler {
    fn definition(&self) -> ToolDefinition {
        let allowed: Vec<&str> = self.sandbox.allowed_commands().collect();
        ToolDefinition::new(
            "run_command",
            format!(
                "Run a command in the repository root. No shell is involved. Allowed programs: {}",
                allowed.join(", ")
            ),
        )
        .with_schema(
            InputSchema::new()
                .with_string("command", "Program and arguments, e.g. `git status`")
                .with_required(&["command"]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    #[cfg_attr(feature = "telemetry", instrument(skip(self, input), fields(command, exit_code)))]
    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: RunCommandArgs = parse_arguments(&input)?;

        #[cfg(feature = "telemetry")]
        tracing::Span::current().record("command", truncate_text(&args.command, 100).as_str());

        let argv = self.sandbox.check_command(&args.command)?;
        let result = run_program(&argv, self.sandbox.root(), self.timeout).await?;

        #[cfg(feature = "telemetry")]
        {
            tracing::Span::current().record("exit_code", result.exit_code);
            if result.timed_out {
                warn!(command = %args.command, "Command timed out");
            } else {
                debug!(
                    exit_code = result.exit_code,
                    duration_ms = result.duration.as_millis() as u64,
                    "Command executed"
                );
            }
        }

        let content = truncate_text(&format_output(&result), MAX_OUTPUT_BYTES);
        if result.exit_code == 0 && !result.timed_out {
            Ok(ToolOutput::success(content))
        } else {
            Ok(ToolOutput::error(content))
        }
    }
}

struct CommandResult {
    stdout: String,
    stderr: String,
    exit_code: i32,
    duration: Duration,
    timed_out: bool,
}

async fn run_program(argv: &[String], cwd: &Path, limit: Duration) -> Result<CommandResult, ToolError> {
    let start = Instant::now();
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| ToolError::InvalidInput("command must not be empty".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(rest)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
            timed_out: false,
        }),
        Ok(Err(e)) => Err(ToolError::ExecutionFailed(format!("Failed to run {program}: {e}"))),
        Err(_) => Ok(CommandResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            duration: start.elapsed(),
            timed_out: true,
        }),
    }
}

fn format_output(result: &CommandResult) -> String {
    let mut parts = Vec::new();

    if result.timed_out {
        parts.push(format!(
            "Command timed out after {:.1}s",
            result.duration.as_secs_f64()
        ));
    }
    if !result.stdout.is_empty() {
        parts.push(truncate_output(&result.stdout, MAX_OUTPUT_LINES));
    }
    if !result.stderr.is_empty() {
        let stderr = truncate_output(&result.stderr, MAX_OUTPUT_LINES / 4);
        parts.push(format!("[stderr]\n{stderr}"));
    }
    if result.exit_code != 0 && !result.timed_out {
        parts.push(format!("[exit code: {}]", result.exit_code));
    }

    if parts.is_empty() {
        "[No output]".to_string()
    } else {
        parts.join("\n")
    }
}
