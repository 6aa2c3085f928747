//! Anthropic `/v1/messages` adapter with faithful wire-format translation:
//! system-message collapsing, tool_use/tool_result block
//! handling, `x-api-key`/`anthropic-version` headers, dated model-alias resolution.
//!
//! The reference crate's own `clients/claude.rs` merely delegates to the OpenAI
//! client with a different base URL — not a faithful translation, so it is not
//! reused here. This adapter instead generalizes `clients/common.rs`'s hand-built
//! JSON + direct-reqwest-POST pattern to Anthropic's actual wire shape.

use super::http_pool::get_or_create_client;
use super::{retry_with_backoff, ChunkStream};
use super::ProviderAdapter;
use crate::error::GatewayError;
use crate::types::{ChatRequest, ChatResponse, Choice, FinishReason, Message, Role, ToolCall, Usage};
use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Value};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Dated model-name aliases that MUST be resolved before the API call.
fn resolve_model_alias(model: &str) -> String {
    match model {
        "claude-opus-4.5" => "claude-opus-4-5-20251101".to_string(),
        "claude-sonnet-4.5" => "claude-sonnet-4-5-20250929".to_string(),
        "claude-3-opus" => "claude-3-opus-20240229".to_string(),
        "claude-3-sonnet" => "claude-3-sonnet-20240229".to_string(),
        "claude-3-haiku" => "claude-3-haiku-20240307".to_string(),
        other => other.to_string(),
    }
}

/// Builds the Anthropic request body: system messages collapsed into the top-level
/// `system` field, tool_result user turns built as content blocks, tool_calls
/// translated from OpenAI's `function.arguments` string into Anthropic's `input`.
fn build_request_body(model: &str, req: &ChatRequest) -> Value {
    let system: String = req
        .messages
        .iter()
        .filter(|m| matches!(m.role, Role::System))
        .map(|m| m.content.clone())
        .collect::<Vec<_>>()
        .join("\n");

    let mut messages: Vec<Value> = Vec::new();
    for msg in req.messages.iter().filter(|m| !matches!(m.role, Role::System)) {
        match msg.role {
            Role::User => messages.push(json!({ "role": "user", "content": msg.content })),
            Role::Assistant => {
                if let Some(calls) = &msg.tool_calls {
                    if !calls.is_empty() {
                        let mut blocks: Vec<Value> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(json!({ "type": "text", "text": msg.content }));
                        }
                        for call in calls {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": call.arguments,
                            }));
                        }
                        messages.push(json!({ "role": "assistant", "content": blocks }));
                        continue;
                    }
                }
                messages.push(json!({ "role": "assistant", "content": msg.content }));
            }
            Role::Tool => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                });
                messages.push(json!({ "role": "user", "content": [block] }));
            }
            Role::System => unreachable!(),
        }
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": req.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
    });
    if !system.is_empty() {
        body.as_object_mut().unwrap().insert("system".to_string(), json!(system));
    }
    if let Some(tools) = &req.tools {
        let translated: Vec<Value> = tools
            .iter()
            .filter_map(|t| {
                let func = t.get("function")?;
                Some(json!({
                    "name": func.get("name")?,
                    "description": func.get("description").cloned().unwrap_or(json!("")),
                    "input_schema": func.get("parameters").cloned().unwrap_or(json!({"type":"object"})),
                }))
            })
            .collect();
        body.as_object_mut().unwrap().insert("tools".to_string(), json!(translated));
    }
    if let Some(t) = req.params.temperature {
        body.as_object_mut().unwrap().insert("temperature".to_string(), json!(t));
    }
    body
}

fn parse_response(requested_model: &str, resolved_model: &str, body: &Value) -> Result<ChatResponse, GatewayError> {
    let content_blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| GatewayError::Upstream("missing content[] in Anthropic response".to_string()))?;

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    for block in content_blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let name = block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let arguments = block.get("input").cloned().unwrap_or(json!({}));
                tool_calls.push(ToolCall { id, name, arguments });
            }
            _ => {}
        }
    }

    let finish_reason = match body.get("stop_reason").and_then(|v| v.as_str()) {
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        _ => FinishReason::Stop,
    };

    let usage = body.get("usage");
    let input_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let output_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    let message = Message {
        role: Role::Assistant,
        content: text,
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    };

    let mut resp = ChatResponse::new(requested_model.to_string(), vec![Choice { index: 0, message, finish_reason }], Usage::new(input_tokens, output_tokens));
    resp.model = resolved_model.to_string();
    Ok(resp)
}

fn map_http_error(status: reqwest::StatusCode, body_text: &str) -> GatewayError {
    if status.as_u16() == 401 || status.as_u16() == 403 {
        GatewayError::Auth(format!("upstream rejected credentials: {body_text}"))
    } else if status.as_u16() == 429 {
        GatewayError::Upstream(format!("upstream rate limited: {body_text}"))
    } else if status.as_u16() == 400 {
        GatewayError::InvalidRequest(format!("upstream rejected request: {body_text}"))
    } else if status.is_server_error() {
        GatewayError::Upstream(format!("upstream {status}: {body_text}"))
    } else {
        GatewayError::Upstream(format!("unexpected upstream status {status}: {body_text}"))
    }
}

pub struct AnthropicAdapter {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl AnthropicAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(api_key: String, timeout: Duration) -> Self {
        AnthropicAdapter { api_key, base_url: "https://api.anthropic.com".to_string(), timeout }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let resolved_model = resolve_model_alias(&req.model);
        let url = format!("{}/v1/messages", self.base_url);
        retry_with_backoff(MAX_ATTEMPTS, || {
            let url = url.clone();
            let resolved_model = resolved_model.clone();
            let body = build_request_body(&resolved_model, req);
            let requested_model = req.model.clone();
            async move {
                let client = get_or_create_client(&self.base_url);
                let response = client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
                    .timeout(self.timeout)
                    .send()
                    .await
                    .map_err(|e| if e.is_timeout() { GatewayError::Timeout(e.to_string()) } else { GatewayError::Upstream(e.to_string()) })?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(map_http_error(status, &text));
                }
                let parsed: Value = response.json().await.map_err(|e| GatewayError::Upstream(e.to_string()))?;
                parse_response(&requested_model, &resolved_model, &parsed)
            }
        })
        .await
    }

    async fn stream(&self, req: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        let resp = self.complete(req).await?;
        let choice = resp.choices.into_iter().next().ok_or_else(|| GatewayError::Upstream("empty content".to_string()))?;
        Ok(Box::pin(stream::once(async move { crate::streaming::chat_response_to_single_chunk(choice) })))
    }

    fn supports(&self, model: &str) -> bool {
        model.to_ascii_lowercase().starts_with("claude")
    }

    fn list_models(&self) -> Vec<String> {
        vec![
            "claude-3-opus-20240229".to_string(),
            "claude-3-sonnet-20240229".to_string(),
            "claude-3-haiku-20240307".to_string(),
        ]
    }
}
