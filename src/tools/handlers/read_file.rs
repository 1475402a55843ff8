// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `read_file`: read a file inside the repository, with optional offset and
//! limit, returning numbered lines.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use crate::error::ToolError;
use crate::tools::registry::{ToolHandler, ToolOutput};
use crate::tools::sandbox::RepoSandbox;
use crate::tools::{parse_arguments, truncate_text, DEFAULT_READ_LIMIT, MAX_LINE_LENGTH, MAX_OUTPUT_BYTES};
use crate::types::{InputSchema, ToolDefinition};

pub struct ReadFileHandler {
    sandbox: Arc<RepoSandbox>,
}

impl ReadFileHandler {
    pub fn new(sandbox: Arc<RepoSandbox>) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    /// Path relative to the repository root.
    path: String,

    /// 1-indexed line to start from.
    #[serde(default = "default_offset")]
    offset: usize,

    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_offset() -> usize {
    1
}

fn default_limit() -> usize {
    DEFAULT_READ_LIMIT
}

#[async_trait]
impl ToolHandler for ReadFileHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new("read_file", "Read a file in the repository")
            .with_schema(
                InputSchema::new()
                    .with_string("path", "Path relative to the repository root")
                    .with_property("offset", serde_json::json!({
                        "type": "integer",
                        "description": "1-indexed line number to start reading from (default: 1)"
                    }))
                    .with_property("limit", serde_json::json!({
                        "type": "integer",
                        "description": "Maximum number of lines to return (default: 2000)"
                    }))
                    .with_required(&["path"]),
            )
    }

    #[cfg_attr(feature = "telemetry", instrument(skip(self, input), fields(path, lines_read)))]
    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: ReadFileArgs = parse_arguments(&input)?;

        #[cfg(feature = "telemetry")]
        tracing::Span::current().record("path", args.path.as_str());

        if args.offset == 0 {
            return Err(ToolError::InvalidInput(
                "offset must be a 1-indexed line number".to_string(),
            ));
        }
        if args.limit == 0 {
            return Err(ToolError::InvalidInput(
                "limit must be greater than zero".to_string(),
            ));
        }

        let path = self.sandbox.resolve(&args.path)?;
        let lines = read_lines(&path, args.offset, args.limit).await?;

        #[cfg(feature = "telemetry")]
        {
            tracing::Span::current().record("lines_read", lines.len());
            debug!(path = %args.path, lines = lines.len(), "File read complete");
        }

        if lines.is_empty() {
            Ok(ToolOutput::success("[Empty file or no lines in range]"))
        } else {
            Ok(ToolOutput::success(truncate_text(&lines.join("\n"), MAX_OUTPUT_BYTES)))
        }
    }
}

async fn read_lines(path: &Path, offset: usize, limit: usize) -> Result<Vec<String>, ToolError> {
    let file = File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ToolError::FileNotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => ToolError::PermissionDenied(path.display().to_string()),
        _ => ToolError::IoError(format!("Failed to open file: {e}")),
    })?;

    let mut reader = BufReader::new(file);
    let mut collected = Vec::new();
    let mut line_number = 0usize;
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        let read = reader
            .read_until(b'\n', &mut buffer)
            .await
            .map_err(|e| ToolError::IoError(format!("Failed to read file: {e}")))?;
        if read == 0 {
            break;
        }

        if buffer.last() == Some(&b'\n') {
            buffer.pop();
            if buffer.last() == Some(&b'\r') {
                buffer.pop();
            }
        }

        line_number += 1;
        if line_number < offset {
            continue;
        }
        if collected.len() >= limit {
            break;
        }

        let decoded = String::from_utf8_lossy(&buffer);
        let line = if decoded.len() > MAX_LINE_LENGTH {
            truncate_text(&decoded, MAX_LINE_LENGTH)
        } else {
            decoded.into_owned()
        };
        collected.push(format!("L{line_number}: {line}"));
    }

    if line_number < offset && offset > 1 {
        return Err(ToolError::InvalidInput("offset exceeds file length".to_string()));
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, ReadFileHandler) {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "line1\nline2\r\nline3\n").unwrap();
        let sandbox = Arc::new(RepoSandbox::new(dir.path()).unwrap());
        (dir, ReadFileHandler::new(sandbox))
    }

    #[tokio::test]
    async fn test_read_file_basic() {
        let (_dir, handler) = setup();
        let result = handler
            .execute(serde_json::json!({"path": "notes.txt"}))
            .await
            .unwrap();

        assert_eq!(result.content(), "L1: line1\nL2: line2\nL3: line3");
    }

    #[tokio::test]
    async fn test_read_file_offset_and_limit() {
        let (_dir, handler) = setup();
        let result = handler
            .execute(serde_json::json!({"path": "notes.txt", "offset": 2, "limit": 1}))
            .await
            .unwrap();

        assert_eq!(result.content(), "L2: line2");
    }

    #[tokio::test]
    async fn test_read_file_offset_past_end() {
        let (_dir, handler) = setup();
        let err = handler
            .execute(serde_json::json!({"path": "notes.txt", "offset": 10}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_read_file_not_found() {
        let (_dir, handler) = setup();
        let err = handler
            .execute(serde_json::json!({"path": "missing.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_read_file_outside_repo() {
        let (_dir, handler) = setup();
        let err = handler
            .execute(serde_json::json!({"path": "../../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SecurityViolation(_)));
    }

    #[tokio::test]
    async fn test_read_empty_file() {
        let (dir, handler) = setup();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        let result = handler
            .execute(serde_json::json!({"path": "empty.txt"}))
            .await
            .unwrap();
        assert!(result.content().contains("Empty file"));
    }
}
