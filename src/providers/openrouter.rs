//! OpenRouter adapter: OpenAI-compatible wire format reached via `openrouter/<model>`
//! model-string prefixes. Thin wrapper over the shared OpenAI-compatible
//! helpers, same pattern as `deepseek.rs`.

use super::openai::{complete_openai_compatible, openai_compatible_stream};
use super::{ChunkStream, ProviderAdapter};
use crate::error::GatewayError;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct OpenRouterAdapter {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl OpenRouterAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(api_key: String, timeout: Duration) -> Self {
        OpenRouterAdapter { api_key, base_url: "https://openrouter.ai/api".to_string(), timeout }
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn name(&self) -> &'static str {
        "openrouter"
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

    fn supports(&self, _model: &str) -> bool {
        // OpenRouter is reached via the explicit `openrouter/…` prefix,
        // stripped by the router before resolution; it advertises no bare-model
        // ownership of its own.
        false
    }

    fn list_models(&self) -> Vec<String> {
        Vec::new()
    }
}
