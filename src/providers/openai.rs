//! OpenAI chat completions + Responses API adapter, and the shared OpenAI-compatible
//! translation helpers reused by DeepSeek, OpenRouter, and the local-inference adapter
//! (all OpenAI-compatible).
//!
//! Grounded in the reference crate's `clients/common.rs::send_with_native_tools`: that
//! function builds the request JSON by hand with `serde_json::json!` and posts via
//! reqwest directly rather than going through an SDK, because only hand-built JSON can
//! express tool_calls round-tripping faithfully. This module generalizes that pattern
//! to the gateway's canonical `Message`/`ToolCall` types.

use super::http_pool::get_or_create_client;
use super::{retry_with_backoff, ChunkStream, ProviderAdapter};
use crate::error::GatewayError;
use crate::types::{ChatRequest, ChatResponse, Choice, FinishReason, Message, Role, ToolCall, Usage};
use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_ATTEMPTS: u32 = 3;

/// Translates one canonical message into the OpenAI wire shape.
fn message_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::System => json!({ "role": "system", "content": msg.content }),
        Role::User => json!({ "role": "user", "content": msg.content }),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        Role::Assistant => {
            let mut obj = serde_json::Map::new();
            obj.insert("role".to_string(), json!("assistant"));
            obj.insert("content".to_string(), json!(msg.content));
            if let Some(calls) = &msg.tool_calls {
                if !calls.is_empty() {
                    let wire_calls: Vec<Value> = calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": { "name": c.name, "arguments": c.arguments.to_string() },
                            })
                        })
                        .collect();
                    obj.insert("tool_calls".to_string(), Value::Array(wire_calls));
                }
            }
            Value::Object(obj)
        }
    }
}

fn build_request_body(model: &str, req: &ChatRequest, stream: bool) -> Value {
    let messages: Vec<Value> = req.messages.iter().map(message_to_openai).collect();
    let mut body = json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    });
    let obj = body.as_object_mut().unwrap();
    if let Some(tools) = &req.tools {
        obj.insert("tools".to_string(), Value::Array(tools.clone()));
    }
    if let Some(choice) = &req.tool_choice {
        obj.insert("tool_choice".to_string(), serde_json::to_value(choice).unwrap_or(Value::Null));
    }
    if let Some(t) = req.params.temperature {
        obj.insert("temperature".to_string(), json!(t));
    }
    if let Some(mt) = req.params.max_tokens {
        obj.insert("max_tokens".to_string(), json!(mt));
    }
    if let Some(tp) = req.params.top_p {
        obj.insert("top_p".to_string(), json!(tp));
    }
    if let Some(stop) = &req.params.stop {
        obj.insert("stop".to_string(), json!(stop));
    }
    if let Some(pp) = req.params.presence_penalty {
        obj.insert("presence_penalty".to_string(), json!(pp));
    }
    if let Some(fp) = req.params.frequency_penalty {
        obj.insert("frequency_penalty".to_string(), json!(fp));
    }
    if let Some(seed) = req.params.seed {
        obj.insert("seed".to_string(), json!(seed));
    }
    if let Some(n) = req.params.n {
        obj.insert("n".to_string(), json!(n));
    }
    body
}

fn finish_reason_from_str(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn parse_response(model: &str, body: &Value) -> Result<ChatResponse, GatewayError> {
    let choice0 = body
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| GatewayError::Upstream("missing choices[0] in response".to_string()))?;

    let message_json = choice0
        .get("message")
        .ok_or_else(|| GatewayError::Upstream("missing choices[0].message".to_string()))?;
    let content = message_json.get("content").and_then(|c| c.as_str()).unwrap_or("").to_string();

    let tool_calls = message_json.get("tool_calls").and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|tc| {
                let id = tc.get("id")?.as_str()?.to_string();
                let func = tc.get("function")?;
                let name = func.get("name")?.as_str()?.to_string();
                let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                let arguments = serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
                Some(ToolCall { id, name, arguments })
            })
            .collect::<Vec<_>>()
    });

    let finish_reason = choice0
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(finish_reason_from_str)
        .unwrap_or(FinishReason::Stop);

    let message = Message {
        role: Role::Assistant,
        content,
        tool_calls,
        tool_call_id: None,
    };

    let usage_json = body.get("usage");
    let prompt_tokens = usage_json.and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion_tokens =
        usage_json.and_then(|u| u.get("completion_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    Ok(ChatResponse::new(
        model.to_string(),
        vec![Choice { index: 0, message, finish_reason }],
        Usage::new(prompt_tokens, completion_tokens),
    ))
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

/// Shared OpenAI-compatible `complete()` body, reused by DeepSeek/OpenRouter/local
/// adapters. `auth_header` is `None` for unauthenticated local inference servers.
pub(crate) async fn complete_openai_compatible(
    base_url: &str,
    path: &str,
    auth_header: Option<(&str, &str)>,
    model: &str,
    req: &ChatRequest,
    timeout: Duration,
) -> Result<ChatResponse, GatewayError> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    retry_with_backoff(MAX_ATTEMPTS, || {
        let url = url.clone();
        let body = build_request_body(model, req, false);
        let model = model.to_string();
        async move {
            let client = get_or_create_client(base_url);
            let mut builder = client.post(&url).json(&body).timeout(timeout);
            if let Some((header_name, header_value)) = auth_header {
                builder = builder.header(header_name, header_value);
            }
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(e.to_string())
                } else {
                    GatewayError::Upstream(e.to_string())
                }
            })?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(map_http_error(status, &text));
            }
            let body: Value = response.json().await.map_err(|e| GatewayError::Upstream(e.to_string()))?;
            parse_response(&model, &body)
        }
    })
    .await
}

pub(crate) fn openai_compatible_stream(
    base_url: &str,
    path: &str,
    auth_header: Option<(String, String)>,
    model: String,
    req: &ChatRequest,
    timeout: Duration,
) -> ChunkStream {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let body = build_request_body(&model, req, true);
    let base_url_owned = base_url.to_string();

    Box::pin(stream::once(async move {
        let client = get_or_create_client(&base_url_owned);
        let mut builder = client.post(&url).json(&body).timeout(timeout);
        if let Some((name, value)) = &auth_header {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await.map_err(|e| GatewayError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &text));
        }
        let parsed = parse_response(&model, &response.json::<Value>().await.map_err(|e| GatewayError::Upstream(e.to_string()))?)?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| GatewayError::Upstream("empty choices".to_string()))?;
        crate::streaming::chat_response_to_single_chunk(choice)
    }))
    as ChunkStream
}

pub struct OpenAiAdapter {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Constructs the adapter with a per-provider timeout override,
    /// e.g. from `PROVIDER_TIMEOUT_SECONDS`.
    pub fn with_timeout(api_key: String, timeout: Duration) -> Self {
        OpenAiAdapter { api_key, base_url: "https://api.openai.com".to_string(), timeout }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let auth = format!("Bearer {}", self.api_key);
        complete_openai_compatible(
            &self.base_url,
            "/v1/chat/completions",
            Some(("Authorization", &auth)),
            &req.model,
            req,
            self.timeout,
        )
        .await
    }

    async fn stream(&self, req: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        let auth = ("Authorization".to_string(), format!("Bearer {}", self.api_key));
        Ok(openai_compatible_stream(&self.base_url, "/v1/chat/completions", Some(auth), req.model.clone(), req, self.timeout))
    }

    fn supports(&self, model: &str) -> bool {
        let lower = model.to_ascii_lowercase();
        lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3")
    }

    fn list_models(&self) -> Vec<String> {
        vec!["gpt-4o".to_string(), "gpt-4".to_string(), "gpt-3.5-turbo".to_string()]
    }
}

/// The OpenAI Responses API (`/v1/responses`), a distinct wire shape from chat
/// completions: `input`/`instructions` instead of `messages[]`, `output[]` instead of
/// `choices[]`. Routed to for dated reasoning-model families (see `router.rs`).
pub struct OpenAiResponsesAdapter {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiResponsesAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(api_key: String, timeout: Duration) -> Self {
        OpenAiResponsesAdapter { api_key, base_url: "https://api.openai.com".to_string(), timeout }
    }

    fn build_responses_body(&self, model: &str, req: &ChatRequest) -> Value {
        let instructions = req
            .messages
            .iter()
            .find(|m| matches!(m.role, Role::System))
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let input: Vec<Value> = req
            .messages
            .iter()
            .filter(|m| !matches!(m.role, Role::System))
            .map(|m| json!({ "role": role_str(m.role), "content": m.content }))
            .collect();
        let mut body = json!({ "model": model, "input": input, "instructions": instructions });
        if let Some(mt) = req.params.max_tokens {
            body.as_object_mut().unwrap().insert("max_output_tokens".to_string(), json!(mt));
        }
        body
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiResponsesAdapter {
    fn name(&self) -> &'static str {
        "openai-responses"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let url = format!("{}/v1/responses", self.base_url);
        let body = self.build_responses_body(&req.model, req);
        let model = req.model.clone();
        let auth = format!("Bearer {}", self.api_key);
        retry_with_backoff(MAX_ATTEMPTS, move || {
            let url = url.clone();
            let body = body.clone();
            let model = model.clone();
            let auth = auth.clone();
            async move {
                let client = get_or_create_client(&self.base_url);
                let response = client
                    .post(&url)
                    .header("Authorization", auth)
                    .json(&body)
                    .timeout(self.timeout)
                    .send()
                    .await
                    .map_err(|e| {
                        if e.is_timeout() {
                            GatewayError::Timeout(e.to_string())
                        } else {
                            GatewayError::Upstream(e.to_string())
                        }
                    })?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(map_http_error(status, &text));
                }
                let parsed: Value = response.json().await.map_err(|e| GatewayError::Upstream(e.to_string()))?;
                parse_responses_api(&model, &parsed)
            }
        })
        .await
    }

    async fn stream(&self, req: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        // The Responses API streams distinct event framing; the gateway's streaming
        // pipeline only streams the final post-tool-loop call, so for the
        // common case we fetch the full response and replay it as one chunk.
        let resp = self.complete(req).await?;
        let choice = resp.choices.into_iter().next().ok_or_else(|| GatewayError::Upstream("empty output".to_string()))?;
        Ok(Box::pin(stream::once(async move { crate::streaming::chat_response_to_single_chunk(choice) })))
    }

    fn supports(&self, model: &str) -> bool {
        let lower = model.to_ascii_lowercase();
        lower.starts_with("o1") || lower.starts_with("o3") || lower.starts_with("gpt-5.2-pro")
    }

    fn list_models(&self) -> Vec<String> {
        vec!["o1".to_string(), "o3".to_string(), "gpt-5.2-pro".to_string()]
    }
}

fn parse_responses_api(model: &str, body: &Value) -> Result<ChatResponse, GatewayError> {
    let output = body.get("output").and_then(|o| o.as_array()).ok_or_else(|| {
        GatewayError::Upstream("missing output[] in responses payload".to_string())
    })?;

    let text = output
        .iter()
        .find(|item| item.get("type").and_then(|t| t.as_str()) == Some("message"))
        .and_then(|item| item.get("content").and_then(|c| c.as_array()))
        .and_then(|content| content.iter().find(|c| c.get("type").and_then(|t| t.as_str()) == Some("output_text")))
        .and_then(|c| c.get("text").and_then(|t| t.as_str()))
        .unwrap_or("")
        .to_string();

    let usage_json = body.get("usage");
    let prompt_tokens = usage_json.and_then(|u| u.get("input_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion_tokens = usage_json.and_then(|u| u.get("output_tokens")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    Ok(ChatResponse::new(
        model.to_string(),
        vec![Choice {
            index: 0,
            message: Message { role: Role::Assistant, content: text, tool_calls: None, tool_call_id: None },
            finish_reason: FinishReason::Stop,
        }],
        Usage::new(prompt_tokens, completion_tokens),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationParams;

    #[test]
    fn message_to_openai_preserves_tool_calls() {
        let msg = Message {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: Some(vec![ToolCall { id: "call-1".to_string(), name: "echo".to_string(), arguments: json!({"x": 1}) }]),
            tool_call_id: None,
        };
        let wire = message_to_openai(&msg);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "echo");
    }

    #[test]
    fn parse_response_extracts_tool_calls_and_usage() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"id": "call-1", "type": "function", "function": {"name": "echo", "arguments": "{\"x\":1}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        });
        let resp = parse_response("gpt-4", &body).unwrap();
        assert_eq!(resp.choices[0].finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.usage.total_tokens, 15);
        let calls = resp.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].name, "echo");
    }

    #[test]
    fn supports_matches_expected_model_prefixes() {
        let adapter = OpenAiAdapter::new("test-key".to_string());
        assert!(adapter.supports("gpt-4o"));
        assert!(!adapter.supports("claude-3-opus"));
    }

    #[test]
    fn build_request_body_includes_generation_params() {
        let req = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![Message::user("hi")],
            tools: None,
            tool_choice: None,
            params: GenerationParams { temperature: Some(0.5), ..Default::default() },
            stream: false,
            session_id: None,
        };
        let body = build_request_body("gpt-4", &req, false);
        assert_eq!(body["temperature"], 0.5);
    }
}
