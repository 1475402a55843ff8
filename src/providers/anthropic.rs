// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Anthropic Messages API provider.
//!
//! Streams responses over Server-Sent Events and forwards each event to the
//! caller as it is decoded, so partial output reaches observers without
//! waiting for the turn to finish.
//!
//! See [Anthropic Messages API](https://docs.anthropic.com/en/api/messages).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::ProviderError;
use crate::types::{
    Message, Provider, ProviderResponse, StopReason, StreamCallback, StreamEvent, TokenUsage,
    ToolCall, ToolDefinition,
};

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Connection settings for [`AnthropicProvider`].
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Claude models via the Messages API.
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured("missing Anthropic API key".to_string()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn build_request<'a>(
        &'a self,
        messages: &'a [Message],
        tools: Option<&'a [ToolDefinition]>,
        system_prompt: Option<&'a str>,
    ) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages,
            system: system_prompt,
            tools: tools.filter(|t| !t.is_empty()),
            stream: true,
        }
    }

    /// Parse an SSE line into (field, value).
    fn parse_sse_event(line: &str) -> Option<(&str, &str)> {
        if let Some(data) = line.strip_prefix("event:") {
            Some(("event", data.trim()))
        } else if let Some(data) = line.strip_prefix("data:") {
            Some(("data", data.trim()))
        } else {
            None
        }
    }

    /// Handle an error response from the API.
    fn handle_error_response(status_code: u16, body: &str) -> ProviderError {
        if let Ok(error) = serde_json::from_str::<ApiError>(body) {
            let message = error.error.message;
            match error.error.error_type.as_str() {
                "authentication_error" => ProviderError::AuthError(message),
                "rate_limit_error" => ProviderError::RateLimited(message),
                "overloaded_error" => ProviderError::RateLimited("API overloaded".to_string()),
                "not_found_error" => ProviderError::ModelNotFound(message),
                _ => ProviderError::api(message, status_code),
            }
        } else {
            ProviderError::api(body.to_string(), status_code)
        }
    }

    /// Apply one decoded SSE data payload to the stream state.
    fn process_stream_data(
        event_type: &str,
        data: &str,
        state: &mut StreamState,
        on_event: &(dyn Fn(StreamEvent) + Send + Sync),
    ) -> Result<(), ProviderError> {
        let parse = |e: serde_json::Error| ProviderError::ParseError(format!("{event_type}: {e}"));

        match event_type {
            "message_start" => {
                let msg: MessageStartEvent = serde_json::from_str(data).map_err(parse)?;
                if let Some(usage) = msg.message.usage {
                    state.usage.input_tokens = usage.input_tokens;
                    state.usage.output_tokens = usage.output_tokens;
                }
            }
            "content_block_start" => {
                let block: ContentBlockStartEvent = serde_json::from_str(data).map_err(parse)?;
                if block.content_block.block_type == "tool_use" {
                    if let (Some(id), Some(name)) = (block.content_block.id, block.content_block.name) {
                        on_event(StreamEvent::ToolUseStart {
                            id: id.clone(),
                            name: name.clone(),
                        });
                        state.current_tool = Some((id, name));
                        state.current_tool_input.clear();
                    }
                }
            }
            "content_block_delta" => {
                let delta: ContentBlockDeltaEvent = serde_json::from_str(data).map_err(parse)?;
                match delta.delta.delta_type.as_str() {
                    "text_delta" => {
                        if let Some(text) = delta.delta.text {
                            state.text_content.push_str(&text);
                            on_event(StreamEvent::TextDelta(text));
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.delta.partial_json {
                            state.current_tool_input.push_str(&partial);
                            on_event(StreamEvent::ToolInputDelta(partial));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                if let Some((id, name)) = state.current_tool.take() {
                    let raw = std::mem::take(&mut state.current_tool_input);
                    let input = if raw.trim().is_empty() {
                        serde_json::Value::Object(Default::default())
                    } else {
                        serde_json::from_str(&raw).map_err(parse)?
                    };
                    state.tool_calls.push(ToolCall { id, name, input });
                    on_event(StreamEvent::ToolUseEnd);
                }
            }
            "message_delta" => {
                let delta: MessageDeltaEvent = serde_json::from_str(data).map_err(parse)?;
                if let Some(stop_reason) = delta.delta.stop_reason {
                    state.stop_reason = Some(StopReason::from_wire(&stop_reason));
                }
                if let Some(usage) = delta.usage {
                    state.usage.output_tokens = usage.output_tokens;
                }
            }
            "message_stop" => {
                on_event(StreamEvent::Usage(state.usage));
                on_event(StreamEvent::Done(state.stop_reason.unwrap_or(StopReason::EndTurn)));
                state.finished = true;
            }
            "error" => {
                let error: StreamErrorEvent = serde_json::from_str(data).map_err(parse)?;
                on_event(StreamEvent::Error(error.error.message.clone()));
                return Err(ProviderError::StreamError(error.error.message));
            }
            _ => {}
        }

        Ok(())
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
        on_event: StreamCallback,
    ) -> Result<ProviderResponse, ProviderError> {
        let request = self.build_request(messages, tools, system_prompt);

        debug!(model = %self.config.model, messages = messages.len(), "Sending streaming chat request");

        let mut response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.config.timeout.as_millis() as u64)
                } else {
                    ProviderError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::handle_error_response(status.as_u16(), &error_text));
        }

        let mut state = StreamState::default();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ProviderError::StreamError(e.to_string()))?
        {
            for (event_type, data) in decoder.feed(&chunk) {
                Self::process_stream_data(&event_type, &data, &mut state, &*on_event)?;
            }
        }
        for (event_type, data) in decoder.finish() {
            Self::process_stream_data(&event_type, &data, &mut state, &*on_event)?;
        }

        if !state.finished {
            debug!("Stream ended without message_stop");
        }

        Ok(state.into_response())
    }

    fn name(&self) -> &str {
        "Anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// SSE decoding
// ============================================================================

/// Incremental SSE decoder. Bytes arrive in arbitrary chunks; complete lines
/// are turned into `(event, data)` pairs.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    event_type: String,
}

impl SseDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Vec<(String, String)> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.take_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    fn finish(&mut self) -> Vec<(String, String)> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            self.take_line(line.trim_end_matches(['\n', '\r']), &mut events);
        }
        events
    }

    fn take_line(&mut self, line: &str, events: &mut Vec<(String, String)>) {
        if line.is_empty() {
            return;
        }
        match AnthropicProvider::parse_sse_event(line) {
            Some(("event", value)) => self.event_type = value.to_string(),
            Some(("data", value)) => events.push((self.event_type.clone(), value.to_string())),
            _ => {}
        }
    }
}

// ============================================================================
// Stream State
// ============================================================================

#[derive(Default)]
struct StreamState {
    text_content: String,
    tool_calls: Vec<ToolCall>,
    stop_reason: Option<StopReason>,
    usage: TokenUsage,
    current_tool: Option<(String, String)>,
    current_tool_input: String,
    finished: bool,
}

impl StreamState {
    fn into_response(self) -> ProviderResponse {
        let stop_reason = self.stop_reason.unwrap_or(if self.tool_calls.is_empty() {
            StopReason::EndTurn
        } else {
            StopReason::ToolUse
        });
        ProviderResponse {
            content: self.text_content,
            tool_calls: self.tool_calls,
            stop_reason,
            usage: self.usage,
        }
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct MessageStartEvent {
    message: MessageStartMessage,
}

#[derive(Debug, Deserialize)]
struct MessageStartMessage {
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStartEvent {
    content_block: ContentBlockStart,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDeltaEvent {
    delta: ContentBlockDelta,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDelta,
    #[serde(default)]
    usage: Option<MessageDeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaUsage {
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamErrorEvent {
    error: ApiErrorDetail,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collect() -> (Arc<Mutex<Vec<StreamEvent>>>, impl Fn(StreamEvent) + Send + Sync) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, move |e| sink.lock().unwrap().push(e))
    }

    fn run(stream: &str) -> (Result<ProviderResponse, ProviderError>, Vec<StreamEvent>) {
        let (events, on_event) = collect();
        let mut decoder = SseDecoder::default();
        let mut state = StreamState::default();
        let mut result = Ok(());
        // Feed in small pieces to exercise line reassembly.
        for piece in stream.as_bytes().chunks(7) {
            for (ev, data) in decoder.feed(piece) {
                if result.is_ok() {
                    result = AnthropicProvider::process_stream_data(&ev, &data, &mut state, &on_event);
                }
            }
        }
        let events = events.lock().unwrap().clone();
        (result.map(|_| state.into_response()), events)
    }

    #[test]
    fn test_provider_requires_key() {
        assert!(AnthropicProvider::new(AnthropicConfig::new("")).is_err());
        let provider = AnthropicProvider::new(AnthropicConfig::new("k").with_model("claude-x")).unwrap();
        assert_eq!(provider.name(), "Anthropic");
        assert_eq!(provider.model(), "claude-x");
    }

    #[test]
    fn test_sse_parsing() {
        assert_eq!(
            AnthropicProvider::parse_sse_event("event: message_start"),
            Some(("event", "message_start"))
        );
        assert_eq!(
            AnthropicProvider::parse_sse_event("data: {\"a\":1}"),
            Some(("data", "{\"a\":1}"))
        );
        assert_eq!(AnthropicProvider::parse_sse_event(": ping"), None);
    }

    #[test]
    fn test_text_and_tool_stream() {
        let stream = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":12,\"output_tokens\":1}}}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Let me look\"}}\n\n",
            "event: content_block_stop\n",
            "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: content_block_start\n",
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"list_dir\",\"input\":{}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"path\\\":\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\" \\\"src\\\"}\"}}\n\n",
            "event: content_block_stop\n",
            "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":30}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );

        let (response, events) = run(stream);
        let response = response.unwrap();
        assert_eq!(response.content, "Let me look");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage, TokenUsage::new(12, 30));
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "list_dir");
        assert_eq!(response.tool_calls[0].input, serde_json::json!({"path": "src"}));

        assert_eq!(events[0], StreamEvent::TextDelta("Let me look".to_string()));
        assert!(events.contains(&StreamEvent::ToolUseEnd));
        assert_eq!(events.last(), Some(&StreamEvent::Done(StopReason::ToolUse)));
    }

    #[test]
    fn test_stream_error_event() {
        let stream = concat!(
            "event: error\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        let (response, events) = run(stream);
        assert!(matches!(response, Err(ProviderError::StreamError(_))));
        assert_eq!(events, vec![StreamEvent::Error("Overloaded".to_string())]);
    }

    #[test]
    fn test_decoder_handles_crlf_and_trailing_line() {
        let mut decoder = SseDecoder::default();
        let mut events = decoder.feed(b"event: ping\r\ndata: {}\r\n\r\nevent: message_stop\ndata: {\"type\"");
        assert_eq!(events.len(), 1);
        events.extend(decoder.feed(b":\"message_stop\"}"));
        events.extend(decoder.finish());
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].0, "message_stop");
    }

    #[test]
    fn test_error_response_mapping() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert!(matches!(
            AnthropicProvider::handle_error_response(401, body),
            ProviderError::AuthError(_)
        ));

        let body = r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#;
        assert!(AnthropicProvider::handle_error_response(429, body).is_retryable());

        assert!(matches!(
            AnthropicProvider::handle_error_response(502, "bad gateway"),
            ProviderError::ApiError { status_code: Some(502), .. }
        ));
    }

    #[test]
    fn test_request_shape() {
        let provider = AnthropicProvider::new(AnthropicConfig::new("k")).unwrap();
        let messages = vec![Message::user("hi")];
        let tools = vec![ToolDefinition::new("list_dir", "List")];
        let request = provider.build_request(&messages, Some(tools.as_slice()), Some("be brief"));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["system"], "be brief");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert_eq!(json["tools"][0]["input_schema"]["type"], "object");

        let request = provider.build_request(&messages, Some(&[][..]), None);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("system").is_none());
    }
}
