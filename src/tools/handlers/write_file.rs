// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `write_file`: write content to a file inside the repository, creating
//! parent directories as needed.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::fs;

#[cfg(feature = "telemetry")]
use tracing::{debug, instrument};

use crate::error::ToolError;
use crate::tools::parse_arguments;
use crate::tools::registry::{ToolHandler, ToolOutput};
use crate::tools::sandbox::RepoSandbox;
use crate::types::{InputSchema, ToolDefinition};

pub struct WriteFileHandler {
    sandbox: Arc<RepoSandbox>,
}

impl WriteFileHandler {
    pub fn new(sandbox: Arc<RepoSandbox>) -> Self {
        Self { sandbox }
    }
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[async_trait]
impl ToolHandler for WriteFileHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "write_file",
            "Write content to a file in the repository (creates it if missing)",
        )
        .with_schema(
            InputSchema::new()
                .with_string("path", "Path relative to the repository root")
                .with_string("content", "Full content to write")
                .with_required(&["path", "content"]),
        )
    }

    fn is_mutating(&self) -> bool {
        true
    }

    #[cfg_attr(feature = "telemetry", instrument(skip(self, input), fields(path, bytes, created)))]
    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let args: WriteFileArgs = parse_arguments(&input)?;

        #[cfg(feature = "telemetry")]
        {
            let span = tracing::Span::current();
            span.record("path", args.path.as_str());
            span.record("bytes", args.content.len());
        }

        let path = self.sandbox.resolve(&args.path)?;
        if path == self.sandbox.root() {
            return Err(ToolError::InvalidInput("path must name a file".to_string()));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::IoError(format!("Failed to create parent directories: {e}"))
            })?;
        }

        let existed = fs::try_exists(&path).await.unwrap_or(false);

        fs::write(&path, &args.content).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ToolError::PermissionDenied(args.path.clone())
            } else {
                ToolError::IoError(format!("Failed to write file: {e}"))
            }
        })?;

        let action = if existed { "Updated" } else { "Created" };
        let lines = args.content.lines().count();
        let bytes = args.content.len();

        #[cfg(feature = "telemetry")]
        {
            tracing::Span::current().record("created", !existed);
            debug!(path = %args.path, bytes, lines, created = !existed, "File write complete");
        }

        Ok(ToolOutput::success(format!(
            "{action} {} ({lines} lines, {bytes} bytes)",
            self.sandbox.display_path(&path)
        )))
    }
}
