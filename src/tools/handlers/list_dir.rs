// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `list_dir`: list a directory inside the repository.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use crate::error::ToolError;
use crate::tools::parse_arguments;
use crate::tools::registry::{ToolHandler, ToolOutput};
use crate::tools::sandbox::RepoSandbox;
use crate::types::{InputSchema, ToolDefinition};

const DEFAULT_LIMIT: usize = 200;

pub struct ListDirHandler {
    sandbox: Arc<RepoSandbox>,
}

impl ListDirHandler {
    pub fn new(sandbox: Arc<RepoSandbox>) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct ListDirArgs {
    /// Defaults to the repository root.
    #[serde(default = "default_path")]
    path: String,

    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_path() -> String {
    ".".to_string()
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[async_trait]
impl ToolHandler for ListDirHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("list_dir", "List the entries of a directory in the repository")
            .with_schema(
                InputSchema::new()
                    .with_string("path", "Directory relative to the repository root (default: .)")
                    .with_property("limit", serde_json::json!({
                        "type": "integer",
                        "description": "Maximum number of entries (default: 200)"
                    })),
            )
    }

    #[cfg_attr(feature = "telemetry", instrument(skip(self, input), fields(path, entries)))]
    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: ListDirArgs = parse_arguments(&input)?;

        #[cfg(feature = "telemetry")]
        tracing::Span::current().record("path", args.path.as_str());

        let path = self.sandbox.resolve(&args.path)?;

        let metadata = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::FileNotFound(args.path.clone())
            } else {
                ToolError::IoError(format!("Failed to access path: {e}"))
            }
        })?;
        if !metadata.is_dir() {
            return Err(ToolError::InvalidInput(format!(
                "Path is not a directory: {}",
                args.path
            )));
        }

        let (entries, total) = list_directory(&path, args.limit).await?;

        #[cfg(feature = "telemetry")]
        {
            tracing::Span::current().record("entries", total);
            debug!(path = %args.path, entries = total, "Directory listed");
        }

        if entries.is_empty() {
            return Ok(ToolOutput::success("[Empty directory]"));
        }
        let mut out = entries.join("\n");
        if total > entries.len() {
            out.push_str(&format!("\n... [{} more entries]", total - entries.len()));
        }
        Ok(ToolOutput::success(out))
    }
}

/// Directories first, then files, each alphabetically. `.git` is skipped.
async fn list_directory(path: &Path, limit: usize) -> Result<(Vec<String>, usize), ToolError> {
    let mut dir = fs::read_dir(path)
        .await
        .map_err(|e| ToolError::IoError(format!("Failed to read directory: {e}")))?;

    let mut found: Vec<(bool, String, u64)> = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ToolError::IoError(format!("Failed to read directory entry: {e}")))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == ".git" {
            continue;
        }
        let metadata = entry.metadata().await.ok();
        let is_dir = metadata.as_ref().is_some_and(|m| m.is_dir());
        let size = metadata.map(|m| m.len()).unwrap_or(0);
        found.push((is_dir, name, size));
    }

    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.to_lowercase().cmp(&b.1.to_lowercase())));
    let total = found.len();

    let entries = found
        .into_iter()
        .take(limit)
        .map(|(is_dir, name, size)| {
            if is_dir {
                format!("{name}/")
            } else {
                format!("{name} ({})", format_size(size))
            }
        })
        .collect();

    Ok((entries, total))
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn handler(dir: &tempfile::TempDir) -> ListDirHandler {
        ListDirHandler::new(Arc::new(RepoSandbox::new(dir.path()).unwrap()))
    }

    #[tokio::test]
    async fn test_list_root() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "12345").unwrap();
        std::fs::write(dir.path().join("A.md"), "").unwrap();

        let result = handler(&dir).execute(serde_json::json!({})).await.unwrap();
        assert_eq!(result.content(), "src/\nA.md (0 B)\nb.txt (5 B)");
    }

    #[tokio::test]
    async fn test_list_limit() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}")), "").unwrap();
        }
        let result = handler(&dir)
            .execute(serde_json::json!({"path": ".", "limit": 2}))
            .await
            .unwrap();
        assert!(result.content().ends_with("... [3 more entries]"));
    }

    #[tokio::test]
    async fn test_list_file_is_invalid() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        let err = handler(&dir)
            .execute(serde_json::json!({"path": "a.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_list_outside_repo() {
        let dir = tempdir().unwrap();
        let err = handler(&dir)
            .execute(serde_json::json!({"path": ".."}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SecurityViolation(_)));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(10), "10 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
