//! Endpoint handlers. Each returns `Result<_, GatewayError>` so `?` surfaces the
//! taxonomy's status-code mapping automatically via `GatewayError`'s `IntoResponse`.

use super::AppState;
use crate::error::{FieldError, GatewayError};
use crate::observability::GatewayEvent;
use crate::streaming::chunks_to_sse;
use crate::types::{ChatRequest, GenerationParams, Message, Role, ToolCall};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "version": env!("CARGO_PKG_VERSION") }))
}

/// Readiness: pings the session store, the one dependency the gateway cannot
/// degrade without. Reports 503 when that check fails; upstream providers are not
/// probed here since the fallback chain already tolerates any one of them being down.
pub async fn health_ready(State(state): State<Arc<AppState>>) -> Response {
    let in_flight = state.backpressure.in_flight();
    match state.session_store.ping().await {
        Ok(()) => Json(json!({
            "status": "ready",
            "in_flight": in_flight,
            "checks": { "session_store": "ok" },
        }))
        .into_response(),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "in_flight": in_flight,
                "checks": { "session_store": format!("error: {e}") },
            })),
        )
            .into_response(),
    }
}

pub async fn metrics() -> Response {
    match crate::observability::render_prometheus_text() {
        Ok(body) => (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => GatewayError::Internal(format!("failed to render metrics: {e}")).into_response(),
    }
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut models: Vec<(String, &'static str)> =
        state.adapters.values().flat_map(|a| a.list_models().into_iter().map(|m| (m, a.name()))).collect();
    models.sort_by(|a, b| a.0.cmp(&b.0));
    models.dedup_by(|a, b| a.0 == b.0);
    let data: Vec<Value> = models
        .into_iter()
        .map(|(id, owned_by)| json!({ "id": id, "object": "model", "owned_by": owned_by }))
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

fn validate_chat_request(req: &ChatRequest) -> Result<(), GatewayError> {
    if req.messages.is_empty() {
        return Err(GatewayError::ValidationFields(vec![FieldError {
            loc: vec!["body".to_string(), "messages".to_string()],
            msg: "messages must not be empty".to_string(),
            kind: "value_error".to_string(),
        }]));
    }
    Ok(())
}

pub async fn chat_completions(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Response {
    if let Err(e) = validate_chat_request(&req) {
        return e.into_response();
    }
    state.events.handle(GatewayEvent::RequestReceived { path: "/v1/chat/completions" });

    if req.stream {
        match state.orchestrator.orchestrate_stream(&req).await {
            Ok(chunks) => chunks_to_sse(chunks).into_response(),
            Err(e) => e.into_response(),
        }
    } else {
        match state.orchestrator.orchestrate(&req).await {
            Ok(resp) => Json(resp).into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// One entry of the OpenAI Responses API's `input[]` list.
#[derive(Deserialize)]
pub struct ResponsesInputItem {
    pub role: String,
    pub content: String,
}

/// `/v1/responses` request body per §6: `input`/`instructions` instead of
/// `messages[]`. Translated into the canonical `ChatRequest` at the boundary; the
/// model-specific Responses-API wire translation for the actual upstream call still
/// happens inside `OpenAiResponsesAdapter`, selected transparently by the router.
#[derive(Deserialize)]
pub struct ResponsesRequestBody {
    pub model: String,
    #[serde(default)]
    pub input: Vec<ResponsesInputItem>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<crate::types::ToolChoice>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

fn responses_role(role: &str) -> Role {
    match role {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

impl ResponsesRequestBody {
    fn into_chat_request(self) -> ChatRequest {
        let mut messages = Vec::with_capacity(self.input.len() + 1);
        if let Some(instructions) = self.instructions {
            if !instructions.is_empty() {
                messages.push(Message { role: Role::System, content: instructions, tool_calls: None, tool_call_id: None });
            }
        }
        for item in self.input {
            messages.push(Message { role: responses_role(&item.role), content: item.content, tool_calls: None, tool_call_id: None });
        }
        ChatRequest {
            model: self.model,
            messages,
            tools: self.tools,
            tool_choice: self.tool_choice,
            params: GenerationParams { max_tokens: self.max_output_tokens, ..Default::default() },
            stream: self.stream,
            session_id: self.session_id,
        }
    }
}

/// `/v1/responses`: accepts the OpenAI Responses API's `input`/`instructions` body
/// shape per §6 and translates it into the canonical `ChatRequest` before handing off
/// to the same orchestration path as `/v1/chat/completions`.
pub async fn responses(state: State<Arc<AppState>>, Json(body): Json<ResponsesRequestBody>) -> Response {
    chat_completions(state, Json(body.into_chat_request())).await
}

#[derive(Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub context: Option<Value>,
}

pub async fn create_session(State(state): State<Arc<AppState>>, Json(body): Json<CreateSessionBody>) -> Response {
    let ttl = body.ttl_seconds.map(Duration::from_secs).unwrap_or(state.session_ttl);
    let context = body.context.unwrap_or_else(|| json!({}));
    match state.session_store.create(ttl, context).await {
        Ok(session) => (axum::http::StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => GatewayError::Internal(format!("failed to create session: {e}")).into_response(),
    }
}

pub async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.session_store.get(&id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => GatewayError::NotFound(format!("session {id} not found or expired")).into_response(),
        Err(e) => GatewayError::Internal(format!("session store error: {e}")).into_response(),
    }
}

pub async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.session_store.exists(&id).await {
        Ok(true) => match state.session_store.delete(&id).await {
            Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
            Err(e) => GatewayError::Internal(format!("session store error: {e}")).into_response(),
        },
        Ok(false) => GatewayError::NotFound(format!("session {id} not found or expired")).into_response(),
        Err(e) => GatewayError::Internal(format!("session store error: {e}")).into_response(),
    }
}

pub async fn list_tools(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tools: Vec<Value> = state.tool_registry.list().iter().map(|t| t.to_openai_tool()).collect();
    Json(json!({ "tools": tools }))
}

#[derive(Deserialize)]
pub struct ExecuteToolBody {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Serialize)]
pub struct ExecuteToolResponse {
    pub name: String,
    pub result: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

pub async fn execute_tool(State(state): State<Arc<AppState>>, Json(body): Json<ExecuteToolBody>) -> Response {
    if state.tool_registry.get(&body.name).is_none() {
        return GatewayError::NotFound(format!("unknown tool: {}", body.name)).into_response();
    }
    if let Err(violation) = state.tool_executor.check_args(&body.name, &body.arguments) {
        return GatewayError::ValidationFields(vec![FieldError {
            loc: vec!["body".to_string(), "arguments".to_string()],
            msg: violation,
            kind: "value_error".to_string(),
        }])
        .into_response();
    }
    let call = ToolCall { id: uuid::Uuid::new_v4().to_string(), name: body.name.clone(), arguments: body.arguments };
    let result = state.tool_executor.execute(&call).await;
    state.events.handle(GatewayEvent::ToolCallCompleted { name: &body.name, is_error: result.is_error });

    let response = if result.is_error {
        ExecuteToolResponse { name: body.name, result: None, success: false, error: Some(result.content) }
    } else {
        ExecuteToolResponse { name: body.name, result: Some(result.content), success: true, error: None }
    };
    Json(response).into_response()
}
