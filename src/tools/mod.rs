// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sandboxed tools for the API backend.
//!
//! - [`ToolHandler`] trait - core abstraction for tool implementations
//! - [`ToolRegistry`] - maps tool names to handlers, dispatches calls
//! - [`RepoSandbox`] - path and command checks shared by every handler
//! - Individual handlers in the [`handlers`] module
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_fleet::tools::{RepoSandbox, ToolRegistry};
//!
//! let sandbox = Arc::new(RepoSandbox::new("/work/alpha")?);
//! let registry = ToolRegistry::sandboxed(sandbox);
//! let result = registry.dispatch("read_file", json!({"path": "README.md"})).await;
//! ```

pub mod handlers;
pub mod registry;
pub mod sandbox;

pub use handlers::*;
pub use registry::{DispatchResult, ToolHandler, ToolOutput, ToolRegistry, ToolRegistryBuilder};
pub use sandbox::{RepoSandbox, DEFAULT_ALLOWED_COMMANDS};

use serde::Deserialize;
use crate::error::ToolError;

/// Parse JSON arguments into a typed struct.
pub fn parse_arguments<T>(arguments: &serde_json::Value) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(arguments.clone())
        .map_err(|err| ToolError::InvalidInput(format!("Failed to parse arguments: {err}")))
}

/// Default number of lines returned by `read_file`.
pub const DEFAULT_READ_LIMIT: usize = 2000;

/// Maximum line length before truncation.
pub const MAX_LINE_LENGTH: usize = 2000;

/// Byte cap on any single tool result.
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Timeout for `run_command`.
pub const COMMAND_TIMEOUT_MS: u64 = 120_000;

/// Truncate text to a maximum byte length, respecting UTF-8 boundaries.
pub fn truncate_text(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }

    if end == 0 {
        return String::new();
    }

    format!("{}... [truncated]", &text[..end])
}

/// Truncate output by lines, keeping the head and tail.
pub fn truncate_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let total = lines.len();

    if total <= max_lines {
        return output.to_string();
    }

    let keep = max_lines / 2;
    let omitted = total - keep * 2;

    format!(
        "{}\n\n... [{omitted} lines omitted] ...\n\n{}",
        lines[..keep].join("\n"),
        lines[total - keep..].join("\n")
    )
}
