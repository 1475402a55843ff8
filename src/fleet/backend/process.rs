// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process backend: runs the agent CLI as a child process.
//!
//! The prompt goes in on stdin. Stdout is streamed to the observer line by
//! line and kept for the final report. The agent runs in its own process
//! group. On timeout or cancellation the group first gets SIGTERM and, if
//! the agent is still alive after the grace period, a hard kill.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{build_prompt, cancelled, BackendRunner, ExitCondition, OutputObserver, RunOutcome};
use crate::config::ResolvedConfig;
use crate::error::BackendError;
use crate::fleet::types::{BackendKind, RepoTask};
use crate::types::TokenUsage;

/// Runs sessions through an external agent CLI.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    executable: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    kill_grace: Duration,
}

impl ProcessBackend {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            timeout: Duration::from_secs(600),
            kill_grace: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(&config.cli_executable, config.cli_args.clone())
            .with_timeout(Duration::from_millis(config.process_timeout_ms))
            .with_kill_grace(Duration::from_millis(config.kill_grace_ms))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    fn spawn(&self, task: &RepoTask) -> Result<Child, BackendError> {
        let mut command = Command::new(&self.executable);
        command
            .args(&self.args)
            .current_dir(&task.repo_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so wrapper scripts take their descendants down
        // with them on termination.
        #[cfg(unix)]
        command.process_group(0);

        command.spawn().map_err(|source| BackendError::Spawn {
            program: self.executable.display().to_string(),
            source,
        })
    }

    /// SIGTERM to the whole process group, then a hard kill once the grace
    /// period runs out. `pgid` is the child's pid captured at spawn.
    async fn terminate(&self, child: &mut Child, pgid: Option<u32>) {
        #[cfg(unix)]
        {
            if let Some(pgid) = pgid {
                if signal_group(pgid, libc::SIGTERM) {
                    if let Ok(Ok(status)) = tokio::time::timeout(self.kill_grace, child.wait()).await {
                        debug!(pgid, %status, "Agent process exited after SIGTERM");
                        // Stragglers that ignored SIGTERM.
                        signal_group(pgid, libc::SIGKILL);
                        return;
                    }
                    warn!(pgid, grace_ms = self.kill_grace.as_millis() as u64, "Agent process ignored SIGTERM, killing");
                }
                signal_group(pgid, libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;

        if let Err(e) = child.kill().await {
            debug!(error = %e, "Kill failed, process already gone");
        }
    }

    /// Wait for a pipe reader to reach end of file, up to the grace period,
    /// and return everything it captured. A pipe still held open by a stray
    /// descendant keeps what was read so far.
    async fn collect(&self, mut capture: Capture) -> String {
        match tokio::time::timeout(self.kill_grace, &mut capture.reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Output reader task failed"),
            Err(_) => {
                debug!("Agent output still open after grace period");
                capture.reader.abort();
            }
        }
        std::mem::take(&mut *lock_text(&capture.text))
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> bool {
    // SAFETY: kill(2) has no memory-safety preconditions. A negative pid
    // addresses the process group we created at spawn.
    unsafe { libc::kill(-(pgid as libc::pid_t), signal) == 0 }
}

/// Text read from one pipe, shared with the task reading it.
struct Capture {
    text: Arc<Mutex<String>>,
    reader: JoinHandle<()>,
}

fn lock_text(text: &Mutex<String>) -> MutexGuard<'_, String> {
    text.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Forward each line to the observer and keep the full text. Bytes that
/// are not UTF-8 are replaced rather than ending the read.
fn pump<R>(reader: R, observer: Option<OutputObserver>) -> Capture
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let text = Arc::new(Mutex::new(String::new()));
    let sink = text.clone();
    let reader = tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    if let Some(observer) = &observer {
                        observer(line);
                    }
                    let mut text = lock_text(&sink);
                    text.push_str(line);
                    text.push('\n');
                }
                Err(e) => {
                    debug!(error = %e, "Stopped reading agent output");
                    break;
                }
            }
        }
    });
    Capture { text, reader }
}

#[async_trait]
impl BackendRunner for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ProcessBackend
    }

    async fn run(
        &self,
        task: &RepoTask,
        observer: OutputObserver,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunOutcome, BackendError> {
        let mut child = self.spawn(task)?;
        let pgid = child.id();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);
        info!(
            repo = %task.repo_name,
            task = %task.task_id,
            pid = pgid,
            "Agent process started"
        );

        let stdout = child.stdout.take().map(|out| pump(out, Some(observer)));
        let stderr = child.stderr.take().map(|err| pump(err, None));

        // The prompt is written in the background so an agent that never
        // reads stdin cannot stall the deadline or cancellation.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = build_prompt(task);
            tokio::spawn(async move {
                // A child that exits before reading its input is reported
                // through its exit status.
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "Could not write prompt to agent stdin");
                }
            })
        });

        let exit = tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    ExitCondition::Success
                } else {
                    ExitCondition::Failed {
                        code: status.code(),
                        reason: format!("agent exited with {status}"),
                    }
                }
            }
            _ = &mut deadline => {
                warn!(
                    repo = %task.repo_name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Agent process timed out"
                );
                self.terminate(&mut child, pgid).await;
                ExitCondition::TimedOut
            }
            _ = cancelled(&mut cancel) => {
                info!(repo = %task.repo_name, "Agent process cancelled");
                self.terminate(&mut child, pgid).await;
                ExitCondition::Cancelled
            }
        };
        if let Some(writer) = writer {
            writer.abort();
        }

        let stdout = match stdout {
            Some(capture) => self.collect(capture).await,
            None => String::new(),
        };
        let stderr = match stderr {
            Some(capture) => self.collect(capture).await,
            None => String::new(),
        };

        let (mut output, usage) = parse_process_output(&stdout);
        if !exit.is_success() && !stderr.trim().is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(stderr.trim_end());
        }

        Ok(RunOutcome::new(output, usage, exit))
    }
}

/// Split captured stdout into the final text and its token usage.
///
/// The last line that parses as a JSON object is the result record. Its
/// `result` string becomes the output and its `usage` block the token counts.
/// Without such a record the raw text is returned with zero usage.
pub fn parse_process_output(stdout: &str) -> (String, TokenUsage) {
    let record = stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| {
            serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .filter(serde_json::Value::is_object)
        });

    let Some(record) = record else {
        return (stdout.trim_end().to_string(), TokenUsage::default());
    };

    let usage = record
        .get("usage")
        .map(|u| {
            let field = |snake: &str, camel: &str| {
                u.get(snake)
                    .or_else(|| u.get(camel))
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(0)
            };
            TokenUsage::new(
                field("input_tokens", "inputTokens"),
                field("output_tokens", "outputTokens"),
            )
        })
        .unwrap_or_default();

    let output = record
        .get("result")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| stdout.trim_end().to_string());

    (output, usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_parse_uses_last_json_record() {
        let stdout = concat!(
            "{\"type\":\"system\",\"usage\":{\"input_tokens\":1,\"output_tokens\":1}}\n",
            "plain progress line\n",
            "{\"type\":\"result\",\"result\":\"Committed abc123\",\"usage\":{\"input_tokens\":120,\"output_tokens\":45}}\n",
        );
        let (output, usage) = parse_process_output(stdout);
        assert_eq!(output, "Committed abc123");
        assert_eq!(usage, TokenUsage::new(120, 45));
    }

    #[test]
    fn test_parse_skips_torn_trailing_line() {
        let stdout = "{\"result\":\"ok\",\"usage\":{\"inputTokens\":3,\"outputTokens\":4}}\n{\"result\": \"cut";
        let (output, usage) = parse_process_output(stdout);
        assert_eq!(output, "ok");
        assert_eq!(usage.total(), 7);
    }

    #[test]
    fn test_parse_without_json_returns_raw_text() {
        let (output, usage) = parse_process_output("did some work\nall done\n");
        assert_eq!(output, "did some work\nall done");
        assert_eq!(usage, TokenUsage::default());
    }

    #[test]
    fn test_from_config() {
        let mut config = ResolvedConfig::default();
        config.cli_executable = "agent".to_string();
        config.process_timeout_ms = 1_000;
        config.kill_grace_ms = 10;
        let backend = ProcessBackend::from_config(&config);
        assert_eq!(backend.executable, PathBuf::from("agent"));
        assert_eq!(backend.timeout, Duration::from_secs(1));
        assert_eq!(backend.kill_grace, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let temp = tempfile::tempdir().unwrap();
        let task = RepoTask::new(temp.path(), "repo", "T-1", "title");
        let backend = ProcessBackend::new("definitely-not-an-agent-binary", vec![]);
        let (_tx, rx) = watch::channel(false);
        let err = backend.run(&task, super::super::discard_output(), rx).await.unwrap_err();
        assert!(matches!(err, BackendError::Spawn { .. }));
    }

    #[cfg(unix)]
    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("agent.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_output_and_reads_usage() {
        let temp = tempfile::tempdir().unwrap();
        let exe = script(
            temp.path(),
            r#"read -r first
echo "got: $first"
echo '{"result":"finished","usage":{"input_tokens":10,"output_tokens":5}}'"#,
        );
        let task = RepoTask::new(temp.path(), "repo", "T-1", "title");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: OutputObserver = Arc::new(move |line| sink.lock().unwrap().push(line.to_string()));

        let (_tx, rx) = watch::channel(false);
        let outcome = ProcessBackend::new(&exe, vec![]).run(&task, observer, rx).await.unwrap();

        assert_eq!(outcome.exit, ExitCondition::Success);
        assert_eq!(outcome.output, "finished");
        assert_eq!(outcome.usage, TokenUsage::new(10, 5));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], "got: # Task T-1: title");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_reports_stderr() {
        let temp = tempfile::tempdir().unwrap();
        let exe = script(temp.path(), "echo 'bad things' >&2\nexit 3");
        let task = RepoTask::new(temp.path(), "repo", "T-1", "title");
        let (_tx, rx) = watch::channel(false);
        let outcome = ProcessBackend::new(&exe, vec![])
            .run(&task, super::super::discard_output(), rx)
            .await
            .unwrap();

        assert!(matches!(outcome.exit, ExitCondition::Failed { code: Some(3), .. }));
        assert!(outcome.output.contains("bad things"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let temp = tempfile::tempdir().unwrap();
        let exe = script(temp.path(), "exec sleep 30");
        let task = RepoTask::new(temp.path(), "repo", "T-1", "title");
        let (_tx, rx) = watch::channel(false);
        let backend = ProcessBackend::new(&exe, vec![])
            .with_timeout(Duration::from_millis(100))
            .with_kill_grace(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let outcome = backend.run(&task, super::super::discard_output(), rx).await.unwrap();
        assert_eq!(outcome.exit, ExitCondition::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_escalates_to_kill() {
        let temp = tempfile::tempdir().unwrap();
        let exe = script(temp.path(), "trap '' TERM\nwhile true; do sleep 0.05; done");
        let task = RepoTask::new(temp.path(), "repo", "T-1", "title");
        let (tx, rx) = watch::channel(false);
        let backend = ProcessBackend::new(&exe, vec![]).with_kill_grace(Duration::from_millis(100));

        let handle = tokio::spawn(async move {
            backend.run(&task, super::super::discard_output(), rx).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run finished")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.exit, ExitCondition::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_reading() {
        let temp = tempfile::tempdir().unwrap();
        let exe = script(
            temp.path(),
            r#"printf '\377\n'
i=0
while [ $i -lt 2000 ]; do
  echo "progress line $i ................................................................"
  i=$((i+1))
done
echo '{"result":"committed","usage":{"input_tokens":7,"output_tokens":3}}'
exit 0"#,
        );
        let task = RepoTask::new(temp.path(), "repo", "T-1", "title");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: OutputObserver = Arc::new(move |line| sink.lock().unwrap().push(line.to_string()));

        let (_tx, rx) = watch::channel(false);
        let outcome = ProcessBackend::new(&exe, vec![]).run(&task, observer, rx).await.unwrap();

        assert_eq!(outcome.exit, ExitCondition::Success);
        assert_eq!(outcome.output, "committed");
        assert_eq!(outcome.usage, TokenUsage::new(7, 3));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], "\u{FFFD}");
        assert_eq!(seen.len(), 2002);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unread_prompt_does_not_stall_timeout() {
        let temp = tempfile::tempdir().unwrap();
        let exe = script(temp.path(), "exec sleep 5");
        // Larger than any pipe buffer, and the agent never reads it.
        let task = RepoTask::new(temp.path(), "repo", "T-1", "title").with_context("x".repeat(300_000));
        let (_tx, rx) = watch::channel(false);
        let backend = ProcessBackend::new(&exe, vec![])
            .with_timeout(Duration::from_millis(300))
            .with_kill_grace(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let outcome = backend.run(&task, super::super::discard_output(), rx).await.unwrap();
        assert_eq!(outcome.exit, ExitCondition::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unread_prompt_does_not_stall_cancel() {
        let temp = tempfile::tempdir().unwrap();
        let exe = script(temp.path(), "exec sleep 5");
        let task = RepoTask::new(temp.path(), "repo", "T-1", "title").with_context("x".repeat(300_000));
        let (tx, rx) = watch::channel(false);
        let backend = ProcessBackend::new(&exe, vec![]).with_kill_grace(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let handle = tokio::spawn(async move {
            backend.run(&task, super::super::discard_output(), rx).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.exit, ExitCondition::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_descendants_and_keeps_output() {
        let temp = tempfile::tempdir().unwrap();
        let marker = temp.path().join("marker");
        let exe = script(
            temp.path(),
            &format!("echo started\n(sleep 1; touch '{}') &\nsleep 30", marker.display()),
        );
        let task = RepoTask::new(temp.path(), "repo", "T-1", "title");
        let (_tx, rx) = watch::channel(false);
        let backend = ProcessBackend::new(&exe, vec![])
            .with_timeout(Duration::from_millis(300))
            .with_kill_grace(Duration::from_millis(200));

        let outcome = backend.run(&task, super::super::discard_output(), rx).await.unwrap();
        assert_eq!(outcome.exit, ExitCondition::TimedOut);
        assert!(outcome.output.contains("started"), "output: {:?}", outcome.output);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child outlived the agent");
    }
}
