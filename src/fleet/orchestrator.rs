// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Batch orchestration.
//!
//! [`Orchestrator::run_batch`] partitions a batch into runs and deferred
//! tasks, drives the runs through a bounded pool, retries failures with
//! backoff and promotes deferred tasks as repositories free up.
//!
//! ```text
//! tasks ──► partition ──► busy repo ──► SessionTracker queue
//!               │                               │
//!               ▼                               │ drain on completion
//!           AgentRun ──► pool permit ──► BackendRunner ──► CommitDetector
//!               ▲                                               │
//!               └──────────── retry after backoff ◄── failed ◄──┘
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use super::backend::{
    cancelled, discard_output, select_backend, ApiBackend, BackendRunner, ExitCondition,
    OutputObserver, ProcessBackend,
};
use super::commit::{CommitDetector, CommitEvidence, GitCli};
use super::retry::retry_delay;
use super::session::SessionTracker;
use super::types::{ActiveSession, AgentRun, BackendKind, RepoTask, RunStatus};
use super::usage::{TokenAccumulator, UsageTotals};
use crate::config::{BackendMode, ResolvedConfig};
use crate::error::OrchestratorError;
use crate::types::{SharedProvider, TokenUsage};

/// Hooks for the result sink.
///
/// Uses `Arc` so callbacks can be cloned into run tasks.
#[derive(Clone, Default)]
pub struct OrchestratorCallbacks {
    /// Every run state change, and once more with the final list.
    pub on_update: Option<Arc<dyn Fn(&[AgentRun]) + Send + Sync>>,
    /// Once per run that finished `done`.
    pub on_task_done: Option<Arc<dyn Fn(&AgentRun) + Send + Sync>>,
    /// Streamed output chunks.
    pub on_output: Option<Arc<dyn Fn(&RepoTask, &str) + Send + Sync>>,
}

impl std::fmt::Debug for OrchestratorCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorCallbacks")
            .field("on_update", &self.on_update.is_some())
            .field("on_task_done", &self.on_task_done.is_some())
            .field("on_output", &self.on_output.is_some())
            .finish()
    }
}

/// Scheduling knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub backend_mode: BackendMode,
    /// 0 means unbounded.
    pub max_concurrent: u32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&ResolvedConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            backend_mode: config.backend_mode,
            max_concurrent: config.max_concurrent,
            max_retries: config.max_retries,
            retry_base_delay_ms: config.retry_base_delay_ms,
        }
    }

    fn pool_size(&self) -> usize {
        match self.max_concurrent {
            0 => Semaphore::MAX_PERMITS,
            n => n as usize,
        }
    }
}

/// What a batch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub runs: Vec<AgentRun>,
    pub usage: UsageTotals,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.runs.iter().filter(|r| r.status == RunStatus::Done).count()
    }

    pub fn failed(&self) -> usize {
        self.runs.iter().filter(|r| r.status == RunStatus::Failed).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

struct Shared {
    tracker: Arc<SessionTracker>,
    process: Option<Arc<dyn BackendRunner>>,
    api: Option<Arc<dyn BackendRunner>>,
    detector: Arc<CommitDetector>,
    usage: TokenAccumulator,
    callbacks: OrchestratorCallbacks,
    settings: OrchestratorSettings,
    cancels: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl Shared {
    fn select(&self, task: &RepoTask) -> BackendKind {
        select_backend(task.priority, self.settings.backend_mode, self.api.is_some())
    }

    fn runner(&self, kind: BackendKind) -> Option<Arc<dyn BackendRunner>> {
        match kind {
            BackendKind::ProcessBackend => self.process.clone(),
            BackendKind::ApiBackend => self.api.clone(),
        }
    }

    fn cancels(&self) -> MutexGuard<'_, HashMap<String, watch::Sender<bool>>> {
        self.cancels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn observer(&self, task: &RepoTask) -> OutputObserver {
        match &self.callbacks.on_output {
            Some(on_output) => {
                let on_output = on_output.clone();
                let task = task.clone();
                Arc::new(move |chunk: &str| on_output(&task, chunk))
            }
            None => discard_output(),
        }
    }
}

/// Runs agent sessions across repositories.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.shared.settings)
            .field("process", &self.shared.process.is_some())
            .field("api", &self.shared.api.is_some())
            .field("tracker", &self.shared.tracker)
            .finish()
    }
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    tracker: Arc<SessionTracker>,
    process: Option<Arc<dyn BackendRunner>>,
    api: Option<Arc<dyn BackendRunner>>,
    detector: Option<Arc<CommitDetector>>,
    callbacks: OrchestratorCallbacks,
    settings: OrchestratorSettings,
}

impl OrchestratorBuilder {
    pub fn process_backend(mut self, runner: Arc<dyn BackendRunner>) -> Self {
        self.process = Some(runner);
        self
    }

    pub fn api_backend(mut self, runner: Arc<dyn BackendRunner>) -> Self {
        self.api = Some(runner);
        self
    }

    pub fn commit_detector(mut self, detector: CommitDetector) -> Self {
        self.detector = Some(Arc::new(detector));
        self
    }

    pub fn callbacks(mut self, callbacks: OrchestratorCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Check that every backend the mode can select is present.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        match self.settings.backend_mode {
            BackendMode::ApiOnly if self.api.is_none() => {
                return Err(OrchestratorError::BackendUnavailable(
                    "apiOnly mode needs an API key (ANTHROPIC_API_KEY or FLEET_API_KEY)".to_string(),
                ));
            }
            BackendMode::ProcessOnly | BackendMode::Auto if self.process.is_none() => {
                return Err(OrchestratorError::BackendUnavailable(format!(
                    "{} mode needs the process backend",
                    self.settings.backend_mode
                )));
            }
            _ => {}
        }

        let detector = self
            .detector
            .unwrap_or_else(|| Arc::new(CommitDetector::new(Arc::new(GitCli::new()))));

        Ok(Orchestrator {
            shared: Arc::new(Shared {
                tracker: self.tracker,
                process: self.process,
                api: self.api,
                detector,
                usage: TokenAccumulator::new(),
                callbacks: self.callbacks,
                settings: self.settings,
                cancels: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl Orchestrator {
    pub fn builder(tracker: Arc<SessionTracker>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            tracker,
            process: None,
            api: None,
            detector: None,
            callbacks: OrchestratorCallbacks::default(),
            settings: OrchestratorSettings::default(),
        }
    }

    /// Wire up the real backends from configuration.
    ///
    /// The API backend exists only when `provider` is given.
    pub fn from_config(
        config: &ResolvedConfig,
        tracker: Arc<SessionTracker>,
        provider: Option<SharedProvider>,
        callbacks: OrchestratorCallbacks,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let mut builder = Self::builder(tracker)
            .settings(OrchestratorSettings::from_config(config))
            .callbacks(callbacks)
            .process_backend(Arc::new(ProcessBackend::from_config(config)));
        if let Some(provider) = provider {
            builder = builder.api_backend(Arc::new(ApiBackend::from_config(provider, config)));
        }
        builder.build()
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.shared.tracker
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.shared.settings
    }

    /// Token usage accumulated since the last batch started.
    pub fn usage(&self) -> UsageTotals {
        self.shared.usage.snapshot()
    }

    /// Cancel the run holding `repo_path`. Returns whether one was found.
    pub fn cancel(&self, repo_path: &str) -> bool {
        match self.shared.cancels().get(repo_path) {
            Some(tx) => {
                info!(repo = %repo_path, "Cancelling run");
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Cancel every live run. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let cancels = self.shared.cancels();
        for tx in cancels.values() {
            tx.send_replace(true);
        }
        if !cancels.is_empty() {
            info!(count = cancels.len(), "Cancelling all runs");
        }
        cancels.len()
    }

    /// Run a batch to completion and report every run, including tasks
    /// promoted from the queue along the way.
    pub async fn run_batch(&self, tasks: Vec<RepoTask>) -> BatchReport {
        let shared = &self.shared;
        shared.usage.reset();

        let board = RunBoard::new(shared.callbacks.on_update.clone());
        let pool = Arc::new(Semaphore::new(shared.settings.pool_size()));

        // Admission is decided for the whole batch before any run starts.
        let mut admitted = Vec::new();
        let mut claimed = HashSet::new();
        let mut deferred = 0usize;
        for task in tasks {
            let key = task.repo_key();
            if shared.tracker.is_repo_active(&key) || !claimed.insert(key) {
                if shared.tracker.enqueue(task) {
                    deferred += 1;
                }
                continue;
            }
            let backend = shared.select(&task);
            admitted.push(board.push(AgentRun::new(task, backend, shared.settings.max_retries)));
        }

        info!(
            runs = admitted.len(),
            deferred,
            max_concurrent = shared.settings.max_concurrent,
            mode = %shared.settings.backend_mode,
            "Batch started"
        );
        board.publish();

        let mut set = JoinSet::new();
        let mut spawned = HashMap::new();
        for index in admitted {
            let id = spawn_run(&mut set, shared.clone(), board.clone(), pool.clone(), index);
            spawned.insert(id, index);
        }

        while let Some(joined) = set.join_next_with_id().await {
            let index = match joined {
                Ok((_, index)) => index,
                // A panicked run is terminal too and releases its repository.
                Err(e) => {
                    let Some(&index) = spawned.get(&e.id()) else {
                        error!(error = %e, "Unknown run task aborted");
                        continue;
                    };
                    error!(error = %e, "Run task aborted");
                    board.fail(index, format!("run aborted: {e}"));
                    shared.cancels().remove(&board.repo_key(index));
                    index
                }
            };

            let key = board.repo_key(index);
            shared.tracker.deregister_session(&key);
            shared.tracker.drain_queue(&key, |queued| {
                let task = queued.task;
                info!(repo = %task.repo_name, task = %task.task_id, "Promoting queued task");
                let backend = shared.select(&task);
                let index = board.push(AgentRun::new(task, backend, shared.settings.max_retries));
                board.publish();
                let id = spawn_run(&mut set, shared.clone(), board.clone(), pool.clone(), index);
                spawned.insert(id, index);
            });
        }

        let runs = board.snapshot();
        board.publish();

        let report = BatchReport {
            runs,
            usage: shared.usage.snapshot(),
        };
        info!(
            total = report.runs.len(),
            done = report.succeeded(),
            failed = report.failed(),
            tokens = report.usage.combined().total(),
            "Batch finished"
        );
        report
    }
}

fn spawn_run(
    set: &mut JoinSet<usize>,
    shared: Arc<Shared>,
    board: RunBoard,
    pool: Arc<Semaphore>,
    index: usize,
) -> tokio::task::Id {
    let task = board.task(index);
    let span = info_span!("run", repo = %task.repo_name, task = %task.task_id);
    set.spawn(drive_run(shared, board, pool, index).instrument(span)).id()
}

/// Drive one run through its attempts. Returns the board index once the run
/// is terminal; the session is left for the caller to release.
async fn drive_run(shared: Arc<Shared>, board: RunBoard, pool: Arc<Semaphore>, index: usize) -> usize {
    let task = board.task(index);
    let key = task.repo_key();
    let backend = board.backend(index);

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    shared.cancels().insert(key.clone(), cancel_tx);

    let Some(runner) = shared.runner(backend) else {
        board.fail(index, format!("{backend} backend is not available"));
        shared.cancels().remove(&key);
        return index;
    };

    loop {
        let permit = tokio::select! {
            permit = pool.clone().acquire_owned() => permit.ok(),
            _ = cancelled(&mut cancel_rx) => None,
        };
        let Some(permit) = permit else {
            board.fail(index, "cancelled before start");
            break;
        };

        board.start(index);
        shared.tracker.register_session(ActiveSession::for_task(&task, backend));
        info!(backend = %backend, attempt = board.retry_count(index), "Run started");

        let head_before = shared.detector.capture_head(&task.repo_path).await;
        let result = runner
            .run(&task, shared.observer(&task), cancel_rx.clone())
            .await;

        let (output, usage, exit) = match result {
            Ok(outcome) => (outcome.output, outcome.usage, outcome.exit),
            Err(e) => {
                warn!(error = %e, "Backend failed to run");
                (e.to_string(), TokenUsage::default(), ExitCondition::failed(e.to_string()))
            }
        };
        shared.usage.record(backend, usage);

        let evidence = match exit {
            ExitCondition::TimedOut | ExitCondition::Cancelled => CommitEvidence::NotCommitted,
            _ => {
                shared
                    .detector
                    .detect(&task.repo_path, head_before.as_deref(), &output)
                    .await
            }
        };
        let committed = evidence.committed();
        let status = if committed { RunStatus::Done } else { RunStatus::Failed };

        let output = match &exit {
            ExitCondition::TimedOut => format!("{output}\n(timed out)"),
            ExitCondition::Cancelled => format!("{output}\n(cancelled)"),
            _ => output,
        };
        let run = board.finish_attempt(index, status, &output, usage, committed);
        drop(permit);

        if committed {
            info!(evidence = ?evidence, "Run done");
            if let Some(on_task_done) = &shared.callbacks.on_task_done {
                on_task_done(&run);
            }
            break;
        }

        warn!(exit = ?exit, retry_count = run.retry_count, "Run failed");
        if exit == ExitCondition::Cancelled || !run.can_retry() {
            break;
        }

        let delay = retry_delay(run.retry_count, shared.settings.retry_base_delay_ms);
        board.requeue(index);
        info!(delay_ms = delay.as_millis() as u64, "Retry scheduled");

        let interrupted = tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = cancelled(&mut cancel_rx) => true,
        };
        if interrupted {
            board.fail(index, "cancelled during retry backoff");
            break;
        }
    }

    shared.cancels().remove(&key);
    index
}

/// Shared list of runs for one batch, published to `on_update` on change.
#[derive(Clone)]
struct RunBoard {
    runs: Arc<Mutex<Vec<AgentRun>>>,
    on_update: Option<Arc<dyn Fn(&[AgentRun]) + Send + Sync>>,
}

impl RunBoard {
    fn new(on_update: Option<Arc<dyn Fn(&[AgentRun]) + Send + Sync>>) -> Self {
        Self {
            runs: Arc::new(Mutex::new(Vec::new())),
            on_update,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AgentRun>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, run: AgentRun) -> usize {
        let mut runs = self.lock();
        runs.push(run);
        runs.len() - 1
    }

    fn snapshot(&self) -> Vec<AgentRun> {
        self.lock().clone()
    }

    /// Hand the current list to the observer, outside the lock.
    fn publish(&self) {
        if let Some(on_update) = &self.on_update {
            let runs = self.snapshot();
            on_update(&runs);
        }
    }

    fn update<R>(&self, index: usize, f: impl FnOnce(&mut AgentRun) -> R) -> R {
        let result = {
            let mut runs = self.lock();
            f(&mut runs[index])
        };
        self.publish();
        result
    }

    fn task(&self, index: usize) -> RepoTask {
        self.lock()[index].task.clone()
    }

    fn repo_key(&self, index: usize) -> String {
        self.lock()[index].task.repo_key()
    }

    fn backend(&self, index: usize) -> BackendKind {
        self.lock()[index].backend
    }

    fn retry_count(&self, index: usize) -> u32 {
        self.lock()[index].retry_count
    }

    fn start(&self, index: usize) {
        self.update(index, |run| {
            run.status = RunStatus::Running;
            run.started_at.get_or_insert_with(Utc::now);
            run.finished_at = None;
        });
    }

    fn finish_attempt(
        &self,
        index: usize,
        status: RunStatus,
        output: &str,
        usage: TokenUsage,
        committed: bool,
    ) -> AgentRun {
        self.update(index, |run| {
            if run.retry_count > 0 {
                run.output.push_str(&format!("\n--- retry {} ---\n", run.retry_count));
            }
            run.output.push_str(output);
            run.usage.add(usage);
            run.committed = committed;
            run.status = status;
            run.finished_at = Some(Utc::now());
            run.clone()
        })
    }

    /// Failed run going around again.
    fn requeue(&self, index: usize) {
        self.update(index, |run| {
            run.retry_count += 1;
            run.status = RunStatus::Queued;
        });
    }

    fn fail(&self, index: usize, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(index, |run| {
            if !run.output.is_empty() {
                run.output.push('\n');
            }
            run.output.push_str(&reason);
            run.status = RunStatus::Failed;
            run.finished_at = Some(Utc::now());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, VcsError};
    use crate::fleet::backend::RunOutcome;
    use crate::fleet::commit::VersionControl;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;

    /// Backend whose result is decided by the task title.
    struct TitleBackend {
        kind: BackendKind,
    }

    #[async_trait]
    impl BackendRunner for TitleBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn run(
            &self,
            task: &RepoTask,
            observer: OutputObserver,
            mut cancel: watch::Receiver<bool>,
        ) -> Result<RunOutcome, BackendError> {
            observer("working");
            if task.task_title == "hang" {
                cancelled(&mut cancel).await;
                return Ok(RunOutcome::new("", TokenUsage::default(), ExitCondition::Cancelled));
            }
            let output = if task.task_title == "ok" { "committed the change" } else { "gave up" };
            Ok(RunOutcome::new(output, TokenUsage::new(4, 1), ExitCondition::Success))
        }
    }

    /// No VCS available, so detection falls back to the output text.
    struct NoVcs;

    #[async_trait]
    impl VersionControl for NoVcs {
        async fn head(&self, _repo: &Path) -> Result<String, VcsError> {
            Err(VcsError::Exit { command: "git".into(), code: None, stderr: "absent".into() })
        }

        async fn has_recent_commit(&self, _repo: &Path, _window: Duration) -> Result<bool, VcsError> {
            Err(VcsError::Exit { command: "git".into(), code: None, stderr: "absent".into() })
        }
    }

    fn orchestrator(settings: OrchestratorSettings, callbacks: OrchestratorCallbacks) -> Orchestrator {
        Orchestrator::builder(Arc::new(SessionTracker::in_memory()))
            .settings(settings)
            .callbacks(callbacks)
            .process_backend(Arc::new(TitleBackend { kind: BackendKind::ProcessBackend }))
            .api_backend(Arc::new(TitleBackend { kind: BackendKind::ApiBackend }))
            .commit_detector(CommitDetector::new(Arc::new(NoVcs)))
            .build()
            .unwrap()
    }

    fn settings(max_retries: u32) -> OrchestratorSettings {
        OrchestratorSettings {
            backend_mode: BackendMode::Auto,
            max_concurrent: 2,
            max_retries,
            retry_base_delay_ms: 10,
        }
    }

    #[test]
    fn test_build_requires_backends() {
        let tracker = Arc::new(SessionTracker::in_memory());
        let err = Orchestrator::builder(tracker.clone())
            .settings(OrchestratorSettings { backend_mode: BackendMode::ApiOnly, ..settings(0) })
            .process_backend(Arc::new(TitleBackend { kind: BackendKind::ProcessBackend }))
            .build()
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::BackendUnavailable(_)));

        assert!(Orchestrator::builder(tracker).settings(settings(0)).build().is_err());
    }

    #[test]
    fn test_from_config_api_only_without_key() {
        let mut config = ResolvedConfig::default();
        config.backend_mode = BackendMode::ApiOnly;
        let err = Orchestrator::from_config(
            &config,
            Arc::new(SessionTracker::in_memory()),
            None,
            OrchestratorCallbacks::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("API key"));
    }

    #[tokio::test]
    async fn test_success_and_failure_accounting() {
        let done = Arc::new(Mutex::new(Vec::new()));
        let sink = done.clone();
        let callbacks = OrchestratorCallbacks {
            on_task_done: Some(Arc::new(move |run: &AgentRun| {
                sink.lock().unwrap().push(run.task.task_id.clone())
            })),
            ..Default::default()
        };
        let orch = orchestrator(settings(0), callbacks);

        let report = orch
            .run_batch(vec![
                RepoTask::new("/r/a", "a", "A", "ok"),
                RepoTask::new("/r/b", "b", "B", "nope"),
            ])
            .await;

        assert_eq!(report.runs.len(), 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_succeeded());
        assert_eq!(*done.lock().unwrap(), vec!["A".to_string()]);
        // Medium priority with an API backend present goes to the API.
        assert_eq!(report.usage.api, TokenUsage::new(8, 2));
        assert!(orch.tracker().active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_retry_counts_and_output() {
        let orch = orchestrator(settings(2), OrchestratorCallbacks::default());
        let report = orch.run_batch(vec![RepoTask::new("/r/a", "a", "A", "nope")]).await;

        let run = &report.runs[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.retry_count, 2);
        assert!(run.output.contains("--- retry 2 ---"));
        assert_eq!(run.usage, TokenUsage::new(12, 3));
    }

    #[tokio::test]
    async fn test_cancel_is_not_retried() {
        let orch = orchestrator(settings(3), OrchestratorCallbacks::default());
        let runner = orch.clone();
        let handle = tokio::spawn(async move {
            runner.run_batch(vec![RepoTask::new("/r/h", "h", "H", "hang")]).await
        });

        let mut attempts = 0;
        while !orch.cancel("/r/h") {
            attempts += 1;
            assert!(attempts < 200, "run never registered");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let report = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        let run = &report.runs[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.retry_count, 0);
        assert!(run.output.contains("cancelled"));
        assert!(!orch.cancel("/r/h"));
    }

    #[tokio::test]
    async fn test_usage_reset_per_batch() {
        let orch = orchestrator(settings(0), OrchestratorCallbacks::default());
        orch.run_batch(vec![RepoTask::new("/r/a", "a", "A", "ok")]).await;
        let report = orch.run_batch(vec![RepoTask::new("/r/b", "b", "B", "ok")]).await;
        assert_eq!(report.usage.combined(), TokenUsage::new(4, 1));
        assert_eq!(orch.usage(), report.usage);
    }

    #[tokio::test]
    async fn test_on_update_sees_final_list() {
        let updates = Arc::new(Mutex::new(Vec::<Vec<RunStatus>>::new()));
        let sink = updates.clone();
        let callbacks = OrchestratorCallbacks {
            on_update: Some(Arc::new(move |runs: &[AgentRun]| {
                sink.lock().unwrap().push(runs.iter().map(|r| r.status).collect())
            })),
            ..Default::default()
        };
        let orch = orchestrator(settings(0), callbacks);
        orch.run_batch(vec![RepoTask::new("/r/a", "a", "A", "ok")]).await;

        let updates = updates.lock().unwrap();
        assert_eq!(updates.first().unwrap(), &vec![RunStatus::Queued]);
        assert!(updates.iter().any(|u| u == &vec![RunStatus::Running]));
        assert_eq!(updates.last().unwrap(), &vec![RunStatus::Done]);
    }
}
