// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task sources feeding the orchestrator.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::types::RepoTask;
use crate::error::Result;

/// Produces the tasks for one orchestration batch.
pub trait TaskSource {
    fn load(&self) -> Result<Vec<RepoTask>>;
}

impl TaskSource for Vec<RepoTask> {
    fn load(&self) -> Result<Vec<RepoTask>> {
        Ok(self.clone())
    }
}

/// A JSON or YAML file listing tasks.
///
/// The document is either a bare list of tasks or an object with a `tasks`
/// list. Relative repository paths are resolved against the file's directory.
#[derive(Debug, Clone)]
pub struct TaskFile {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TaskDocument {
    List(Vec<RepoTask>),
    Wrapped { tasks: Vec<RepoTask> },
}

impl TaskDocument {
    fn into_tasks(self) -> Vec<RepoTask> {
        match self {
            Self::List(tasks) | Self::Wrapped { tasks } => tasks,
        }
    }
}

impl TaskFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(&self, content: &str) -> Result<Vec<RepoTask>> {
        let is_yaml = matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let document: TaskDocument = if is_yaml {
            serde_yaml::from_str(content)
                .with_context(|| format!("invalid task file {}", self.path.display()))?
        } else {
            serde_json::from_str(content)
                .with_context(|| format!("invalid task file {}", self.path.display()))?
        };
        Ok(document.into_tasks())
    }
}

impl TaskSource for TaskFile {
    fn load(&self) -> Result<Vec<RepoTask>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read task file {}", self.path.display()))?;
        let base = self.path.parent().unwrap_or_else(|| Path::new("."));

        let tasks = self
            .parse(&content)?
            .into_iter()
            .filter_map(|mut task| {
                if task.repo_path.is_relative() {
                    task.repo_path = base.join(&task.repo_path);
                }
                if !task.repo_path.is_dir() {
                    warn!(
                        repo = %task.repo_path.display(),
                        task = %task.task_id,
                        "Skipping task for missing repository"
                    );
                    return None;
                }
                if task.repo_name.trim().is_empty() {
                    task.repo_name = task
                        .repo_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| task.repo_key());
                }
                Some(task)
            })
            .collect::<Vec<_>>();

        debug!(file = %self.path.display(), count = tasks.len(), "Loaded tasks");
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::types::Priority;
    use tempfile::TempDir;

    #[test]
    fn test_load_json_list() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("alpha")).unwrap();
        let file = temp.path().join("tasks.json");
        std::fs::write(
            &file,
            r#"[
                {"repoPath": "alpha", "repoName": "alpha", "taskId": "A-1", "taskTitle": "First", "priority": "high"},
                {"repoPath": "missing", "repoName": "missing", "taskId": "M-1", "taskTitle": "Gone"}
            ]"#,
        )
        .unwrap();

        let tasks = TaskFile::new(&file).load().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "A-1");
        assert_eq!(tasks[0].priority, Priority::High);
        assert_eq!(tasks[0].repo_path, temp.path().join("alpha"));
    }

    #[test]
    fn test_load_yaml_wrapped() {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("beta");
        std::fs::create_dir(&repo).unwrap();
        let file = temp.path().join("tasks.yaml");
        std::fs::write(
            &file,
            format!(
                "tasks:\n  - repoPath: {}\n    repoName: ''\n    taskId: B-2\n    taskTitle: Second\n    phase: Phase 1\n",
                repo.display()
            ),
        )
        .unwrap();

        let tasks = TaskFile::new(&file).load().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].repo_name, "beta");
        assert_eq!(tasks[0].phase, "Phase 1");
        assert_eq!(tasks[0].priority, Priority::Medium);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("tasks.json");
        std::fs::write(&file, "{\"nope\": 1}").unwrap();
        let err = TaskFile::new(&file).load().unwrap_err();
        assert!(err.to_string().contains("invalid task file"));

        assert!(TaskFile::new(temp.path().join("absent.json")).load().is_err());
    }

    #[test]
    fn test_vec_source() {
        let tasks = vec![RepoTask::new("/tmp", "tmp", "T-1", "x")];
        assert_eq!(tasks.load().unwrap(), tasks);
    }
}
