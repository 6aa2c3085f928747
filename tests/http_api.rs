//! End-to-end HTTP-surface tests: drive the real axum `Router` through
//! `tower::ServiceExt::oneshot` instead of calling handlers directly, so auth,
//! rate-limiting, and backpressure middleware are exercised exactly as in production.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use llmgateway::backpressure::BackpressureGate;
use llmgateway::circuit_breaker::CircuitBreakerRegistry;
use llmgateway::error::GatewayError;
use llmgateway::http::{build_router, AppState};
use llmgateway::observability::NoopEventHandler;
use llmgateway::orchestrator::{FallbackChain, Orchestrator};
use llmgateway::providers::{ChunkStream, ProviderAdapter};
use llmgateway::rate_limiter::RateLimiter;
use llmgateway::router::{ProviderKind, ProviderRouter};
use llmgateway::session::InMemorySessionStore;
use llmgateway::tools::{ToolExecutor, ToolRegistry};
use llmgateway::types::{ChatRequest, ChatResponse, Choice, FinishReason, Message, Usage};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct StubAdapter;

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn complete(&self, _req: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        Ok(ChatResponse::new(
            "local-model",
            vec![Choice { index: 0, message: Message::assistant("hello from the stub"), finish_reason: FinishReason::Stop }],
            Usage::new(3, 4),
        ))
    }

    async fn stream(&self, _req: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        Err(GatewayError::Internal("streaming not exercised in these tests".to_string()))
    }

    fn supports(&self, _model: &str) -> bool {
        true
    }

    fn list_models(&self) -> Vec<String> {
        vec!["local-model".to_string()]
    }
}

fn test_state(shared_secret: Option<String>) -> Arc<AppState> {
    let mut adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();
    adapters.insert(ProviderKind::Local, Arc::new(StubAdapter));

    let router = ProviderRouter::new(Some(ProviderKind::Local), None);
    let breakers = CircuitBreakerRegistry::new(5, Duration::from_secs(30));
    let tool_registry = Arc::new(ToolRegistry::with_builtins(None, None));
    let tool_executor = Arc::new(ToolExecutor::new(tool_registry.clone(), Duration::from_secs(5)));
    let session_store = Arc::new(InMemorySessionStore::new());
    let fallback_chain = FallbackChain::new(vec![ProviderKind::Local]);

    let orchestrator = Arc::new(
        Orchestrator::new(
            router,
            adapters.clone(),
            breakers,
            tool_executor.clone(),
            session_store.clone(),
            fallback_chain,
            Duration::from_secs(3600),
        )
        .with_events(Arc::new(NoopEventHandler)),
    );

    Arc::new(AppState {
        orchestrator,
        rate_limiter: Arc::new(RateLimiter::new(100.0, 6000.0)),
        backpressure: Arc::new(BackpressureGate::new(64, 1024.0)),
        shared_secret,
        tool_registry,
        tool_executor,
        session_store,
        session_ttl: Duration::from_secs(3600),
        adapters,
        events: Arc::new(NoopEventHandler),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_healthy_without_auth() {
    let app = build_router(test_state(Some("secret".to_string())));
    let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn health_ready_checks_session_store() {
    let app = build_router(test_state(None));
    let response = app.oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["checks"]["session_store"], "ok");
}

#[tokio::test]
async fn protected_route_without_bearer_token_is_rejected() {
    let app = build_router(test_state(Some("secret".to_string())));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"model": "local-model", "messages": [{"role": "user", "content": "hi"}]}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    // GatewayError::Auth maps to 400 per spec §7 (no distinct 401 client-auth
    // variant is called for); see src/error.rs.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_completions_round_trips_with_valid_bearer_token() {
    let app = build_router(test_state(Some("secret".to_string())));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, "Bearer secret")
        .body(Body::from(json!({"model": "local-model", "messages": [{"role": "user", "content": "hi"}]}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["choices"][0]["message"]["content"], "hello from the stub");
}

#[tokio::test]
async fn chat_completions_rejects_empty_message_list() {
    let app = build_router(test_state(None));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"model": "local-model", "messages": []}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn list_models_returns_openai_shaped_model_objects() {
    let app = build_router(test_state(None));
    let response = app.oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["object"], "list");
    assert_eq!(body["data"][0]["id"], "local-model");
    assert_eq!(body["data"][0]["object"], "model");
}

#[tokio::test]
async fn session_lifecycle_create_get_delete() {
    let app = build_router(test_state(None));

    let create_request = Request::builder()
        .method("POST")
        .uri("/v1/sessions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({}).to_string()))
        .unwrap();
    let create_response = app.clone().oneshot(create_request).await.unwrap();
    assert_eq!(create_response.status(), StatusCode::CREATED);
    let created = body_json(create_response).await;
    let session_id = created["id"].as_str().unwrap().to_string();

    let get_response = app
        .clone()
        .oneshot(Request::builder().uri(format!("/v1/sessions/{session_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::OK);

    let delete_response = app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri(format!("/v1/sessions/{session_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(delete_response.status(), StatusCode::NO_CONTENT);

    let missing_response = app
        .oneshot(Request::builder().uri(format!("/v1/sessions/{session_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing_response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn execute_tool_rejects_arguments_missing_required_field() {
    let app = build_router(test_state(None));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/tools/execute")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"name": "echo", "arguments": {}}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn execute_tool_runs_echo_with_valid_arguments() {
    let app = build_router(test_state(None));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/tools/execute")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"name": "echo", "arguments": {"text": "hi"}}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = build_router(test_state(None));
    let response = app.oneshot(Request::builder().uri("/not-a-real-route").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
