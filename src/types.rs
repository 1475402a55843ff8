// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conversation types shared by the hosted-model provider and the API backend.
//!
//! Content blocks serialize directly into the Messages API wire shape, so a
//! conversation can be sent without an intermediate representation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ProviderError;

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message sender. The system prompt travels separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A block of content within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// Message content - either a plain string or structured blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a user message with text content.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a message with content blocks.
    pub fn with_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(s) => Some(s),
            MessageContent::Blocks(_) => None,
        }
    }

    pub fn as_blocks(&self) -> Option<&[ContentBlock]> {
        match &self.content {
            MessageContent::Text(_) => None,
            MessageContent::Blocks(blocks) => Some(blocks),
        }
    }
}

// ============================================================================
// Tool Definitions
// ============================================================================

/// JSON Schema for tool input parameters.
///
/// Properties are kept ordered so the serialized catalog is stable between
/// turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// Add a string property with a description.
    pub fn with_string(self, name: impl Into<String>, description: &str) -> Self {
        self.with_property(
            name,
            serde_json::json!({ "type": "string", "description": description }),
        )
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: serde_json::Value) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn with_required(mut self, required: &[&str]) -> Self {
        self.required = required.iter().map(|s| s.to_string()).collect();
        self
    }
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Definition of a tool offered to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: InputSchema::new(),
        }
    }

    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.input_schema = schema;
        self
    }
}

/// A call to a tool made by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

// ============================================================================
// Token Usage & Provider Response
// ============================================================================

/// Token counts for one response or one whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens (input + output).
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Fold another usage record into this one. Saturates, since counts
    /// reported by an agent are untrusted.
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Reason why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

impl StopReason {
    /// Map the wire value, treating anything unknown as end of turn.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            _ => Self::EndTurn,
        }
    }
}

/// Response from a provider after one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
}

impl ProviderResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Assistant message echoing this response back into the conversation.
    pub fn to_assistant_message(&self) -> Message {
        let mut blocks = Vec::with_capacity(self.tool_calls.len() + 1);
        if !self.content.is_empty() {
            blocks.push(ContentBlock::text(self.content.clone()));
        }
        for call in &self.tool_calls {
            blocks.push(ContentBlock::tool_use(&call.id, &call.name, call.input.clone()));
        }
        Message::with_blocks(Role::Assistant, blocks)
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Events emitted while a response streams in.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ToolUseStart { id: String, name: String },
    ToolInputDelta(String),
    ToolUseEnd,
    Usage(TokenUsage),
    Done(StopReason),
    Error(String),
}

impl StreamEvent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::TextDelta(s) => Some(s),
            _ => None,
        }
    }
}

/// Callback receiving stream events as they arrive.
pub type StreamCallback = Box<dyn Fn(StreamEvent) + Send + Sync>;

// ============================================================================
// Provider Trait
// ============================================================================

/// A hosted chat interface with tool use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stream one turn, forwarding events to `on_event` as they arrive, and
    /// return the assembled response.
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
        on_event: StreamCallback,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Name for display purposes.
    fn name(&self) -> &str;

    /// Model identifier in use.
    fn model(&self) -> &str;
}

/// Arc-wrapped provider for shared ownership.
pub type SharedProvider = std::sync::Arc<dyn Provider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello, world!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.as_text(), Some("Hello, world!"));
        assert!(msg.as_blocks().is_none());
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let block = ContentBlock::tool_result("toolu_1", "denied", true);
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_result");
        assert_eq!(json["tool_use_id"], "toolu_1");
        assert_eq!(json["is_error"], true);

        let ok = serde_json::to_value(ContentBlock::tool_result("toolu_2", "fine", false)).unwrap();
        assert!(ok.get("is_error").is_none());
    }

    #[test]
    fn test_tool_definition_schema() {
        let tool = ToolDefinition::new("read_file", "Read a file").with_schema(
            InputSchema::new()
                .with_string("path", "File path")
                .with_required(&["path"]),
        );
        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["input_schema"]["type"], "object");
        assert_eq!(json["input_schema"]["properties"]["path"]["type"], "string");
        assert_eq!(json["input_schema"]["required"][0], "path");
    }

    #[test]
    fn test_token_usage_accumulates() {
        let mut usage = TokenUsage::new(100, 50);
        usage.add(TokenUsage::new(10, 5));
        assert_eq!(usage.input_tokens, 110);
        assert_eq!(usage.output_tokens, 55);
        assert_eq!(usage.total(), 165);
    }

    #[test]
    fn test_token_usage_saturates() {
        let half = u64::MAX / 2 + 1;
        let mut usage = TokenUsage::new(half, 1);
        usage.add(TokenUsage::new(half, u64::MAX));
        assert_eq!(usage, TokenUsage::new(u64::MAX, u64::MAX));
        assert_eq!(usage.total(), u64::MAX);
    }

    #[test]
    fn test_stop_reason_from_wire() {
        assert_eq!(StopReason::from_wire("tool_use"), StopReason::ToolUse);
        assert_eq!(StopReason::from_wire("max_tokens"), StopReason::MaxTokens);
        assert_eq!(StopReason::from_wire("refusal"), StopReason::EndTurn);
    }

    #[test]
    fn test_assistant_echo_includes_tool_calls() {
        let response = ProviderResponse {
            content: "Looking".to_string(),
            tool_calls: vec![ToolCall {
                id: "t1".to_string(),
                name: "list_dir".to_string(),
                input: serde_json::json!({"path": "."}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        };
        let msg = response.to_assistant_message();
        assert_eq!(msg.role, Role::Assistant);
        let blocks = msg.as_blocks().unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[1], ContentBlock::ToolUse { ref name, .. } if name == "list_dir"));
    }
}
