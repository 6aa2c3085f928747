//! The HTTP surface: axum `Router` assembly, shared `AppState`, and the
//! auth/rate-limit/backpressure middleware stack. Handlers live in `handlers.rs`.

pub mod handlers;

use crate::backpressure::BackpressureGate;
use crate::observability::GatewayEventHandler;
use crate::orchestrator::Orchestrator;
use crate::rate_limiter::RateLimiter;
use crate::router::ProviderKind;
use crate::session::SessionStore;
use crate::tools::ToolRegistry;
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub backpressure: Arc<BackpressureGate>,
    pub shared_secret: Option<String>,
    pub tool_registry: Arc<ToolRegistry>,
    pub tool_executor: Arc<crate::tools::ToolExecutor>,
    pub session_store: Arc<dyn SessionStore>,
    pub session_ttl: Duration,
    pub adapters: HashMap<ProviderKind, Arc<dyn crate::providers::ProviderAdapter>>,
    pub events: Arc<dyn GatewayEventHandler>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1/sessions", post(handlers::create_session))
        .route("/v1/sessions/{id}", get(handlers::get_session))
        .route("/v1/sessions/{id}", delete(handlers::delete_session))
        .route("/v1/tools", get(handlers::list_tools))
        .route("/v1/tools/execute", post(handlers::execute_tool))
        .layer(middleware::from_fn_with_state(state.clone(), backpressure_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::health_ready))
        .route("/metrics", get(handlers::metrics))
        .merge(protected)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_middleware(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let Some(secret) = state.shared_secret.as_deref() else {
        return next.run(request).await;
    };
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if crate::auth::validate_bearer(header, secret) {
        next.run(request).await
    } else {
        crate::error::GatewayError::Auth("missing or invalid bearer token".to_string()).into_response()
    }
}

async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let client_key = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| connect_info.map(|c| c.0.to_string()).unwrap_or_else(|| "unknown".to_string()));

    let admission = state.rate_limiter.check(&client_key);
    if !admission.admitted {
        let mut response = crate::error::GatewayError::RateLimited { retry_after_seconds: admission.retry_after_seconds }
            .into_response();
        set_rate_limit_headers(&mut response, &admission);
        return response;
    }

    let mut response = next.run(request).await;
    set_rate_limit_headers(&mut response, &admission);
    response
}

fn set_rate_limit_headers(response: &mut Response, admission: &crate::rate_limiter::AdmissionResult) {
    let headers = response.headers_mut();
    if let Ok(v) = axum::http::HeaderValue::from_str(&admission.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = axum::http::HeaderValue::from_str(&admission.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = axum::http::HeaderValue::from_str(&admission.retry_after_seconds.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

async fn backpressure_middleware(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let (admission, guard) = state.backpressure.try_admit();
    if !admission.admitted {
        return crate::error::GatewayError::Overloaded { retry_after_seconds: admission.retry_after_seconds }
            .into_response();
    }
    let response = next.run(request).await;
    drop(guard);
    response
}
