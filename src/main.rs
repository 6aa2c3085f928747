//! Process entrypoint: reads configuration from the environment, wires up every
//! registry and adapter, assembles the axum router, and serves it.

use llmgateway::backpressure::{spawn_memory_sampler, BackpressureGate};
use llmgateway::circuit_breaker::CircuitBreakerRegistry;
use llmgateway::config::GatewayConfig;
use llmgateway::http::{build_router, AppState};
use llmgateway::observability::{GatewayEventHandler, MetricsEventHandler};
use llmgateway::orchestrator::{FallbackChain, Orchestrator};
use llmgateway::providers::anthropic::AnthropicAdapter;
use llmgateway::providers::deepseek::DeepSeekAdapter;
use llmgateway::providers::gemini::GeminiAdapter;
use llmgateway::providers::local::LocalInferenceAdapter;
use llmgateway::providers::openai::{OpenAiAdapter, OpenAiResponsesAdapter};
use llmgateway::providers::openrouter::OpenRouterAdapter;
use llmgateway::providers::ProviderAdapter;
use llmgateway::rate_limiter::RateLimiter;
use llmgateway::router::{ProviderKind, ProviderRouter};
use llmgateway::session::{InMemorySessionStore, RedisSessionStore, SessionStore};
use llmgateway::tools::{ToolExecutor, ToolRegistry};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env()?;
    env_logger::Builder::new().parse_filters(&config.log_level).init();

    log::info!("starting llmgateway in {} mode on port {}", config.env, config.port);

    let provider_timeout = Duration::from_secs(config.provider_timeout_seconds);

    let mut adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();
    if let Some(key) = config.openai_api_key.clone() {
        adapters.insert(ProviderKind::OpenAi, Arc::new(OpenAiAdapter::with_timeout(key.clone(), provider_timeout)));
        adapters.insert(
            ProviderKind::OpenAiResponses,
            Arc::new(OpenAiResponsesAdapter::with_timeout(key, provider_timeout)),
        );
    }
    if let Some(key) = config.anthropic_api_key.clone() {
        adapters.insert(ProviderKind::Anthropic, Arc::new(AnthropicAdapter::with_timeout(key, provider_timeout)));
    }
    if let Some(key) = config.deepseek_api_key.clone() {
        adapters.insert(ProviderKind::DeepSeek, Arc::new(DeepSeekAdapter::with_timeout(key, provider_timeout)));
    }
    if let Some(key) = config.google_api_key.clone() {
        adapters.insert(ProviderKind::Gemini, Arc::new(GeminiAdapter::with_timeout(key, provider_timeout)));
    }
    if let Some(key) = config.openrouter_api_key.clone() {
        adapters.insert(ProviderKind::OpenRouter, Arc::new(OpenRouterAdapter::with_timeout(key, provider_timeout)));
    }
    if let Some(base_url) = config.inference_service_url.clone() {
        adapters.insert(ProviderKind::Local, Arc::new(LocalInferenceAdapter::with_timeout(base_url, provider_timeout)));
    }

    let default_provider = config.default_provider.as_deref().and_then(parse_provider_kind);
    let provider_router = ProviderRouter::new(default_provider, config.default_model.clone());

    let breakers = CircuitBreakerRegistry::new(
        config.circuit_breaker_failure_threshold,
        config.circuit_breaker_recovery_timeout,
    );

    let tool_registry = Arc::new(ToolRegistry::with_builtins(
        config.semantic_search_url.as_deref(),
        config.ai_agents_url.as_deref(),
    ));
    let tool_executor = Arc::new(ToolExecutor::new(
        tool_registry.clone(),
        Duration::from_secs(config.tool_timeout_seconds),
    ));

    let session_store: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisSessionStore::connect(url).await?),
        None => {
            log::warn!("REDIS_URL not set; using in-memory session store (not suitable for multi-instance deployments)");
            Arc::new(InMemorySessionStore::new())
        }
    };
    let session_ttl = Duration::from_secs(config.session_ttl_seconds);

    let fallback_order = vec![
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::DeepSeek,
        ProviderKind::OpenRouter,
        ProviderKind::Local,
    ];
    let fallback_chain = FallbackChain::new(fallback_order);

    let events: Arc<dyn GatewayEventHandler> = Arc::new(MetricsEventHandler);

    let orchestrator = Arc::new(
        Orchestrator::new(
            provider_router,
            adapters.clone(),
            breakers,
            tool_executor.clone(),
            session_store.clone(),
            fallback_chain,
            session_ttl,
        )
        .with_events(events.clone()),
    );

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_burst, config.rate_limit_rpm));

    let backpressure = Arc::new(BackpressureGate::new(config.max_concurrent_requests, config.memory_soft_limit_mb()));
    spawn_memory_sampler(backpressure.clone(), Duration::from_secs(5));

    let state = Arc::new(AppState {
        orchestrator,
        rate_limiter,
        backpressure,
        shared_secret: config.gateway_shared_secret.clone(),
        tool_registry,
        tool_executor,
        session_store,
        session_ttl,
        adapters,
        events,
    });

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

fn parse_provider_kind(raw: &str) -> Option<ProviderKind> {
    match raw.to_ascii_lowercase().as_str() {
        "openai" => Some(ProviderKind::OpenAi),
        "anthropic" | "claude" => Some(ProviderKind::Anthropic),
        "gemini" | "google" => Some(ProviderKind::Gemini),
        "deepseek" => Some(ProviderKind::DeepSeek),
        "openrouter" => Some(ProviderKind::OpenRouter),
        "local" => Some(ProviderKind::Local),
        _ => None,
    }
}
