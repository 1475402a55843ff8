// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool registry and handler trait.
//!
//! - [`ToolHandler`] trait that every tool implements
//! - [`ToolRegistry`] for looking up and dispatching tool calls
//! - [`ToolOutput`] for returning results to the model

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "telemetry")]
use tracing::{debug, info_span, Instrument};

use super::handlers::{ListDirHandler, ReadFileHandler, RunCommandHandler, WriteFileHandler};
use super::sandbox::RepoSandbox;
use crate::error::ToolError;
use crate::types::ToolDefinition;

/// Output from executing a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub success: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: false,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

impl From<ToolError> for ToolOutput {
    fn from(err: ToolError) -> Self {
        Self::error(err.to_string())
    }
}

/// A tool the model can call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Name, description and input schema.
    fn definition(&self) -> ToolDefinition;

    /// Whether the tool may change the repository.
    fn is_mutating(&self) -> bool {
        false
    }

    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Registry of available tools, keyed by name.
pub struct ToolRegistry {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// The fixed catalog offered by the API backend, confined to `sandbox`.
    pub fn sandboxed(sandbox: Arc<RepoSandbox>) -> Self {
        let mut builder = ToolRegistryBuilder::new();
        builder
            .register(ReadFileHandler::new(sandbox.clone()))
            .register(WriteFileHandler::new(sandbox.clone()))
            .register(ListDirHandler::new(sandbox.clone()))
            .register(RunCommandHandler::new(sandbox));
        builder.build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Definitions in name order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers.values().map(|h| h.definition()).collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Run a tool call. Failures, including unknown tools, come back as an
    /// error output for the model rather than an `Err`.
    pub async fn dispatch(&self, tool_name: &str, input: serde_json::Value) -> DispatchResult {
        let start = Instant::now();

        let Some(handler) = self.get(tool_name) else {
            let err = ToolError::NotFound(format!(
                "{tool_name} (available: {})",
                self.tool_names().join(", ")
            ));
            return DispatchResult {
                tool_name: tool_name.to_string(),
                output: err.into(),
                duration: start.elapsed(),
                is_error: true,
                mutating: false,
            };
        };

        let mutating = handler.is_mutating();

        #[cfg(feature = "telemetry")]
        let result = handler
            .execute(input)
            .instrument(info_span!("tool_execute", tool = %tool_name))
            .await;

        #[cfg(not(feature = "telemetry"))]
        let result = handler.execute(input).await;

        let duration = start.elapsed();

        let (output, is_error) = match result {
            Ok(output) => {
                let failed = !output.is_success();
                (output, failed)
            }
            Err(err) => {
                #[cfg(feature = "telemetry")]
                debug!(tool = %tool_name, error = %err, "Tool execution failed");
                (ToolOutput::from(err), true)
            }
        };

        #[cfg(feature = "telemetry")]
        debug!(
            tool = %tool_name,
            duration_ms = duration.as_secs_f64() * 1000.0,
            is_error,
            mutating,
            "Tool dispatched"
        );

        DispatchResult {
            tool_name: tool_name.to_string(),
            output,
            duration,
            is_error,
            mutating,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of dispatching a tool call.
#[derive(Debug)]
pub struct DispatchResult {
    pub tool_name: String,
    pub output: ToolOutput,
    pub duration: Duration,
    pub is_error: bool,
    /// The tool may have changed the repository.
    pub mutating: bool,
}

/// Builder for constructing a [`ToolRegistry`].
pub struct ToolRegistryBuilder {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) -> &mut Self {
        let def = handler.definition();
        self.handlers.insert(def.name, Arc::new(handler));
        self
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            handlers: self.handlers,
        }
    }
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
