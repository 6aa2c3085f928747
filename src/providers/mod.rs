//! The provider adapter set. Each adapter translates a canonical `ChatRequest`
//! to its upstream's wire format, calls it, and translates the response back. The
//! `ProviderAdapter` trait generalizes the reference crate's `ClientWrapper` trait
//! (`send_message`/`send_message_stream`/`model_name`) to the gateway's canonical
//! types and adds `supports`/`list_models` for capability discovery.

pub mod anthropic;
pub mod deepseek;
pub mod gemini;
pub mod http_pool;
pub mod local;
pub mod openai;
pub mod openrouter;

use crate::error::GatewayError;
use crate::types::{ChatChunk, ChatRequest, ChatResponse};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rand::Rng;
use std::time::Duration;

pub type ChunkStream = BoxStream<'static, Result<ChatChunk, GatewayError>>;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider name used as the circuit-breaker/fallback-chain key and in
    /// observability labels (e.g. "openai", "anthropic").
    fn name(&self) -> &'static str;

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, GatewayError>;

    async fn stream(&self, req: &ChatRequest) -> Result<ChunkStream, GatewayError>;

    fn supports(&self, model: &str) -> bool;

    fn list_models(&self) -> Vec<String>;
}

/// Exponential backoff with jitter for retryable error classes, capped at a
/// small bounded number of attempts. Non-retryable errors are expected to be returned
/// directly by the caller without going through this helper.
pub async fn retry_with_backoff<F, Fut>(max_attempts: u32, mut attempt: F) -> Result<ChatResponse, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<ChatResponse, GatewayError>>,
{
    let mut last_err = GatewayError::Internal("no attempts made".to_string());
    for attempt_index in 0..max_attempts {
        match attempt().await {
            Ok(resp) => return Ok(resp),
            Err(err) if err.is_retryable() && attempt_index + 1 < max_attempts => {
                let base_ms = 100u64 * 2u64.pow(attempt_index);
                let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 2 + 1);
                tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
                last_err = err;
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_with_backoff_stops_at_max_attempts_for_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<ChatResponse, _>(GatewayError::Upstream("boom".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_with_backoff_does_not_retry_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<ChatResponse, _>(GatewayError::Auth("bad key".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
