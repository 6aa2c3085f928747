//! Local inference adapter: a configured base URL, no auth, OpenAI-compatible
//! wire format (the common denominator for llama.cpp/vLLM/Ollama-style servers).
//! The default-of-last-resort in the router's resolution order.

use super::openai::{complete_openai_compatible, openai_compatible_stream};
use super::{ChunkStream, ProviderAdapter};
use crate::error::GatewayError;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct LocalInferenceAdapter {
    base_url: String,
    timeout: Duration,
}

impl LocalInferenceAdapter {
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        LocalInferenceAdapter { base_url, timeout }
    }
}

#[async_trait]
impl ProviderAdapter for LocalInferenceAdapter {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        complete_openai_compatible(&self.base_url, "/v1/chat/completions", None, &req.model, req, self.timeout).await
    }

    async fn stream(&self, req: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        Ok(openai_compatible_stream(&self.base_url, "/v1/chat/completions", None, req.model.clone(), req, self.timeout))
    }

    fn supports(&self, _model: &str) -> bool {
        // The local adapter is the configured default-of-last-resort;
        // it doesn't own specific model names.
        true
    }

    fn list_models(&self) -> Vec<String> {
        Vec::new()
    }
}
