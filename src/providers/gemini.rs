//! Google Gemini `generateContent` adapter. `x-goog-api-key` header,
//! `contents[]`/`generationConfig` request shape, `candidates[].content.parts[].text`
//! response shape. No direct teacher precedent (the reference crate has no Gemini
//! client); built directly using the same hand-built-JSON +
//! direct-reqwest pattern as the other adapters.

use super::http_pool::get_or_create_client;
use super::{retry_with_backoff, ChunkStream, ProviderAdapter};
use crate::error::GatewayError;
use crate::types::{ChatRequest, ChatResponse, Choice, FinishReason, Message, Role, Usage};
use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_ATTEMPTS: u32 = 3;

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User | Role::Tool => "user",
        Role::Assistant => "model",
        Role::System => "user",
    }
}

fn build_request_body(req: &ChatRequest) -> Value {
    let contents: Vec<Value> = req
        .messages
        .iter()
        .filter(|m| !matches!(m.role, Role::System))
        .map(|m| json!({ "role": gemini_role(m.role), "parts": [{ "text": m.content }] }))
        .collect();

    let mut generation_config = serde_json::Map::new();
    if let Some(t) = req.params.temperature {
        generation_config.insert("temperature".to_string(), json!(t));
    }
    if let Some(mt) = req.params.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(mt));
    }
    if let Some(tp) = req.params.top_p {
        generation_config.insert("topP".to_string(), json!(tp));
    }

    let mut body = json!({ "contents": contents });
    if !generation_config.is_empty() {
        body.as_object_mut().unwrap().insert("generationConfig".to_string(), Value::Object(generation_config));
    }

    let system: String =
        req.messages.iter().filter(|m| matches!(m.role, Role::System)).map(|m| m.content.clone()).collect::<Vec<_>>().join("\n");
    if !system.is_empty() {
        body.as_object_mut()
            .unwrap()
            .insert("systemInstruction".to_string(), json!({ "parts": [{ "text": system }] }));
    }
    body
}

fn parse_response(model: &str, body: &Value) -> Result<ChatResponse, GatewayError> {
    let candidate = body
        .get("candidates")
        .and_then(|c| c.get(0))
        .ok_or_else(|| GatewayError::Upstream("missing candidates[0] in Gemini response".to_string()))?;

    let text = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = match candidate.get("finishReason").and_then(|v| v.as_str()) {
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    };

    let usage = body.get("usageMetadata");
    let prompt_tokens = usage.and_then(|u| u.get("promptTokenCount")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion_tokens = usage.and_then(|u| u.get("candidatesTokenCount")).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    let message = Message { role: Role::Assistant, content: text, tool_calls: None, tool_call_id: None };
    Ok(ChatResponse::new(model.to_string(), vec![Choice { index: 0, message, finish_reason }], Usage::new(prompt_tokens, completion_tokens)))
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

pub struct GeminiAdapter {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(api_key: String, timeout: Duration) -> Self {
        GeminiAdapter { api_key, base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(), timeout }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, req.model);
        let model = req.model.clone();
        retry_with_backoff(MAX_ATTEMPTS, || {
            let url = url.clone();
            let body = build_request_body(req);
            let model = model.clone();
            async move {
                let client = get_or_create_client(&self.base_url);
                let response = client
                    .post(&url)
                    .header("x-goog-api-key", &self.api_key)
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
                parse_response(&model, &parsed)
            }
        })
        .await
    }

    async fn stream(&self, req: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        let resp = self.complete(req).await?;
        let choice = resp.choices.into_iter().next().ok_or_else(|| GatewayError::Upstream("empty candidates".to_string()))?;
        Ok(Box::pin(stream::once(async move { crate::streaming::chat_response_to_single_chunk(choice) })))
    }

    fn supports(&self, model: &str) -> bool {
        model.to_ascii_lowercase().starts_with("gemini")
    }

    fn list_models(&self) -> Vec<String> {
        vec!["gemini-1.5-pro".to_string(), "gemini-1.5-flash".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationParams;

    #[test]
    fn system_messages_become_system_instruction() {
        let req = ChatRequest {
            model: "gemini-1.5-pro".to_string(),
            messages: vec![
                Message { role: Role::System, content: "be terse".to_string(), tool_calls: None, tool_call_id: None },
                Message::user("hi"),
            ],
            tools: None,
            tool_choice: None,
            params: GenerationParams::default(),
            stream: false,
            session_id: None,
        };
        let body = build_request_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn parse_response_extracts_text_and_usage() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "hello"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
        });
        let resp = parse_response("gemini-1.5-pro", &body).unwrap();
        assert_eq!(resp.choices[0].message.content, "hello");
        assert_eq!(resp.usage.total_tokens, 6);
    }
}
