//! Model-name → adapter resolution. Pure and deterministic: no I/O. Also owns
//! the single consolidated per-model context-limit table (DESIGN.md Open Question 4)
//! so adapters never duplicate it.

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    OpenAiResponses,
    Anthropic,
    Gemini,
    DeepSeek,
    OpenRouter,
    Local,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub provider: ProviderKind,
    pub model: String,
}

pub struct ProviderRouter {
    default_provider: Option<ProviderKind>,
    default_model: Option<String>,
}

/// OpenAI model families that must be routed through the Responses API rather
/// than chat completions.
const RESPONSES_API_PREFIXES: &[&str] = &["gpt-5.2-pro", "o3", "o1"];

impl ProviderRouter {
    pub fn new(default_provider: Option<ProviderKind>, default_model: Option<String>) -> Self {
        ProviderRouter { default_provider, default_model }
    }

    /// Resolves a model string to exactly one adapter, following a fixed priority
    /// order. Pure: repeated calls with the same input return the same resolution.
    pub fn resolve(&self, model: &str) -> Result<Resolution, GatewayError> {
        let lower = model.to_ascii_lowercase();

        // 1. Explicit provider alias.
        if let Some(provider) = match lower.as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "claude" | "anthropic" => Some(ProviderKind::Anthropic),
            "deepseek" => Some(ProviderKind::DeepSeek),
            "google" => Some(ProviderKind::Gemini),
            _ => None,
        } {
            let resolved_model = self.default_model.clone().unwrap_or_else(|| model.to_string());
            return Ok(self.finalize(provider, resolved_model));
        }

        // 2. Explicit prefix.
        if let Some(rest) = lower.strip_prefix("openrouter/") {
            return Ok(self.finalize(ProviderKind::OpenRouter, rest.to_string()));
        }
        if let Some(rest) = lower.strip_prefix("ollama/") {
            return Ok(self.finalize(ProviderKind::Local, rest.to_string()));
        }
        if let Some(rest) = lower.strip_prefix("deepseek-api/") {
            return Ok(self.finalize(ProviderKind::DeepSeek, rest.to_string()));
        }

        // 3 & 4. Substring/prefix heuristic (also covers exact known-model matches,
        // since every known model for these providers shares these prefixes).
        if lower.starts_with("claude") {
            return Ok(self.finalize(ProviderKind::Anthropic, model.to_string()));
        }
        if lower.starts_with("gpt") || lower.starts_with("o1") || lower.starts_with("o3") {
            return Ok(self.finalize(ProviderKind::OpenAi, model.to_string()));
        }
        if lower.starts_with("gemini") {
            return Ok(self.finalize(ProviderKind::Gemini, model.to_string()));
        }
        if lower.starts_with("deepseek") {
            return Ok(self.finalize(ProviderKind::DeepSeek, model.to_string()));
        }

        // 5. Default.
        if let Some(provider) = self.default_provider {
            return Ok(self.finalize(provider, model.to_string()));
        }

        Err(GatewayError::NotFound(format!(
            "no provider configured for model {model:?} and no default provider set"
        )))
    }

    fn finalize(&self, provider: ProviderKind, model: String) -> Resolution {
        let lower = model.to_ascii_lowercase();
        let provider = if provider == ProviderKind::OpenAi
            && RESPONSES_API_PREFIXES.iter().any(|p| lower.starts_with(p))
        {
            ProviderKind::OpenAiResponses
        } else {
            provider
        };
        Resolution { provider, model }
    }
}

/// Consolidated per-model context window lookup (tokens). Unknown models fall back to
/// a conservative default rather than failing resolution.
pub fn model_context_window(model: &str) -> u32 {
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("gpt-4o") || lower.starts_with("gpt-4.1") {
        128_000
    } else if lower.starts_with("gpt-5") || lower.starts_with("o3") || lower.starts_with("o1") {
        200_000
    } else if lower.starts_with("gpt-4") {
        8_192
    } else if lower.starts_with("gpt-3.5") {
        16_385
    } else if lower.starts_with("claude-3-opus") || lower.starts_with("claude-3-sonnet") {
        200_000
    } else if lower.starts_with("claude") {
        200_000
    } else if lower.starts_with("gemini-1.5") || lower.starts_with("gemini-2") {
        1_000_000
    } else if lower.starts_with("gemini") {
        32_760
    } else if lower.starts_with("deepseek") {
        64_000
    } else {
        32_768
    }
}
