//! DeepSeek adapter: OpenAI-compatible wire format, so it's a thin
//! wrapper over the shared helpers in `openai.rs` with DeepSeek's base URL and
//! `Authorization: Bearer` header.

use super::openai::{complete_openai_compatible, openai_compatible_stream};
use super::{ChunkStream, ProviderAdapter};
use crate::error::GatewayError;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct DeepSeekAdapter {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl DeepSeekAdapter {
    pub fn new(api_key: String) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(api_key: String, timeout: Duration) -> Self {
        DeepSeekAdapter { api_key, base_url: "https://api.deepseek.com".to_string(), timeout }
    }
}

#[async_trait]
impl ProviderAdapter for DeepSeekAdapter {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let auth = format!("Bearer {}", self.api_key);
        complete_openai_compatible(
            &self.base_url,
            "/chat/completions",
            Some(("Authorization", &auth)),
            &req.model,
            req,
            self.timeout,
        )
        .await
    }

    async fn stream(&self, req: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        let auth = ("Authorization".to_string(), format!("Bearer {}", self.api_key));
        Ok(openai_compatible_stream(&self.base_url, "/chat/completions", Some(auth), req.model.clone(), req, self.timeout))
    }

    fn supports(&self, model: &str) -> bool {
        model.to_ascii_lowercase().starts_with("deepseek")
    }

    fn list_models(&self) -> Vec<String> {
        vec!["deepseek-chat".to_string(), "deepseek-reasoner".to_string()]
    }
}
