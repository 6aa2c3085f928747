//! Error taxonomy. One enum, hand-rolled `Display`/`Error` impls — no `thiserror` —
//! matching the reference crate's `ToolError`/`CalculatorError` style. `IntoResponse`
//! performs the user-visible status-code mapping and stamps a `request_id`.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone)]
pub enum GatewayError {
    Validation(String),
    ValidationFields(Vec<FieldError>),
    NotFound(String),
    RateLimited { retry_after_seconds: u64 },
    Overloaded { retry_after_seconds: u64 },
    Auth(String),
    InvalidRequest(String),
    Upstream(String),
    Timeout(String),
    CircuitOpen(String),
    ToolExecution(String),
    Internal(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Validation(msg) => write!(f, "validation error: {msg}"),
            GatewayError::ValidationFields(_) => write!(f, "validation error"),
            GatewayError::NotFound(msg) => write!(f, "not found: {msg}"),
            GatewayError::RateLimited { retry_after_seconds } => {
                write!(f, "rate limited, retry after {retry_after_seconds}s")
            }
            GatewayError::Overloaded { retry_after_seconds } => {
                write!(f, "overloaded, retry after {retry_after_seconds}s")
            }
            GatewayError::Auth(msg) => write!(f, "auth error: {msg}"),
            GatewayError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            GatewayError::Upstream(msg) => write!(f, "upstream error: {msg}"),
            GatewayError::Timeout(msg) => write!(f, "timeout: {msg}"),
            GatewayError::CircuitOpen(provider) => write!(f, "circuit open for {provider}"),
            GatewayError::ToolExecution(msg) => write!(f, "tool execution error: {msg}"),
            GatewayError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// Whether a provider call failing with this error should trigger the fallback
    /// chain: only CircuitOpen, Upstream, and Timeout qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Upstream(_) | GatewayError::Timeout(_))
    }

    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            GatewayError::CircuitOpen(_) | GatewayError::Upstream(_) | GatewayError::Timeout(_)
        )
    }

    fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) | GatewayError::ValidationFields(_) => "validation_error",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Overloaded { .. } => "overloaded",
            GatewayError::Auth(_) => "auth_error",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::Upstream(_) => "upstream_error",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::CircuitOpen(_) => "circuit_open",
            GatewayError::ToolExecution(_) => "tool_execution_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) | GatewayError::ValidationFields(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Auth(_) | GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) | GatewayError::CircuitOpen(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ToolExecution(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: DetailBody,
    error_code: String,
    request_id: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum DetailBody {
    Message(String),
    Fields(Vec<FieldError>),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.error_code().to_string();
        let request_id = uuid::Uuid::new_v4().to_string();
        let detail = match &self {
            GatewayError::ValidationFields(fields) => DetailBody::Fields(fields.clone()),
            other => DetailBody::Message(other.to_string()),
        };
        let body = ErrorBody { detail, error_code, request_id };
        let mut response = (status, Json(body)).into_response();

        if let GatewayError::RateLimited { retry_after_seconds } = &self {
            if let Ok(v) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert("Retry-After", v);
            }
        }
        if let GatewayError::Overloaded { retry_after_seconds } = &self {
            if let Ok(v) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                response.headers_mut().insert("Retry-After", v);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_match_fallback_legitimacy() {
        assert!(GatewayError::Upstream("boom".into()).triggers_fallback());
        assert!(GatewayError::Timeout("boom".into()).triggers_fallback());
        assert!(GatewayError::CircuitOpen("openai".into()).triggers_fallback());
        assert!(!GatewayError::Auth("bad key".into()).triggers_fallback());
        assert!(!GatewayError::InvalidRequest("bad shape".into()).triggers_fallback());
    }

    #[test]
    fn status_codes_match_mapping_table() {
        assert_eq!(GatewayError::Validation("x".into()).status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(GatewayError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::RateLimited { retry_after_seconds: 1 }.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(GatewayError::Overloaded { retry_after_seconds: 1 }.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(GatewayError::Auth("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(GatewayError::Upstream("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(GatewayError::Timeout("x".into()).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(GatewayError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
