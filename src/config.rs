//! Boot-time configuration, read once from the environment at process start.
//!
//! Following the reference crate's `CloudLLMConfig`: no TOML/YAML/config-file crate is
//! introduced, just `std::env::var` reads with explicit defaults, gathered into one
//! struct and handed around as an `Arc`. Unlike `CloudLLMConfig`, this one has a lot
//! more fields, because the gateway's external interface is entirely env-driven.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub env: String,
    pub log_level: String,

    pub redis_url: Option<String>,

    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub inference_service_url: Option<String>,

    pub semantic_search_url: Option<String>,
    pub ai_agents_url: Option<String>,

    pub default_provider: Option<String>,
    pub default_model: Option<String>,

    pub rate_limit_rpm: f64,
    pub rate_limit_burst: f64,

    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_recovery_timeout: Duration,

    pub session_ttl_seconds: u64,

    pub memory_threshold_mb: f64,
    pub memory_soft_limit_percent: f64,
    pub max_concurrent_requests: usize,

    pub gateway_shared_secret: Option<String>,

    pub provider_timeout_seconds: u64,
    pub tool_timeout_seconds: u64,
}

/// Raised when an environment value is present but cannot be parsed into its expected
/// type. The gateway fails fast at startup rather than silently falling back.
#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError(format!("{key}={raw:?} is not a valid value"))),
        Err(_) => Ok(default),
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            port: parse_env("PORT", 8080)?,
            env: env::var("ENV").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            redis_url: env::var("REDIS_URL").ok(),

            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            deepseek_api_key: env::var("DEEPSEEK_API_KEY").ok(),
            google_api_key: env::var("GOOGLE_API_KEY").ok(),
            openrouter_api_key: env::var("OPENROUTER_API_KEY").ok(),
            inference_service_url: env::var("INFERENCE_SERVICE_URL").ok(),

            semantic_search_url: env::var("SEMANTIC_SEARCH_URL").ok(),
            ai_agents_url: env::var("AI_AGENTS_URL").ok(),

            default_provider: env::var("DEFAULT_PROVIDER").ok(),
            default_model: env::var("DEFAULT_MODEL").ok(),

            rate_limit_rpm: parse_env("RATE_LIMIT_RPM", 60.0)?,
            rate_limit_burst: parse_env("RATE_LIMIT_BURST", 10.0)?,

            circuit_breaker_failure_threshold: parse_env("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
            circuit_breaker_recovery_timeout: Duration::from_secs(parse_env(
                "CIRCUIT_BREAKER_RECOVERY_TIMEOUT",
                30u64,
            )?),

            session_ttl_seconds: parse_env("SESSION_TTL_SECONDS", 3600u64)?,

            memory_threshold_mb: parse_env("MEMORY_THRESHOLD_MB", 1024.0)?,
            memory_soft_limit_percent: parse_env("MEMORY_SOFT_LIMIT_PERCENT", 0.8)?,
            max_concurrent_requests: parse_env("MAX_CONCURRENT_REQUESTS", 50usize)?,

            gateway_shared_secret: env::var("GATEWAY_SHARED_SECRET").ok(),

            provider_timeout_seconds: parse_env("PROVIDER_TIMEOUT_SECONDS", 30u64)?,
            tool_timeout_seconds: parse_env("TOOL_TIMEOUT_SECONDS", 60u64)?,
        })
    }

    pub fn memory_soft_limit_mb(&self) -> f64 {
        self.memory_threshold_mb * self.memory_soft_limit_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_to_default_when_unset() {
        env::remove_var("LLMGATEWAY_TEST_KEY_UNSET");
        let v: u32 = parse_env("LLMGATEWAY_TEST_KEY_UNSET", 42).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn parse_env_rejects_unparseable_values() {
        env::set_var("LLMGATEWAY_TEST_KEY_BAD", "not-a-number");
        let result: Result<u32, _> = parse_env("LLMGATEWAY_TEST_KEY_BAD", 42);
        assert!(result.is_err());
        env::remove_var("LLMGATEWAY_TEST_KEY_BAD");
    }

    #[test]
    fn memory_soft_limit_mb_multiplies_threshold_by_percent() {
        let mut cfg = GatewayConfig::from_env().unwrap();
        cfg.memory_threshold_mb = 1000.0;
        cfg.memory_soft_limit_percent = 0.8;
        assert_eq!(cfg.memory_soft_limit_mb(), 800.0);
    }
}
