//! Tool Registry & Executor. The registry holds `name → ToolDefinition`
//! (builtin local handlers plus HTTP-proxy externals); the executor validates
//! arguments against each tool's JSON schema, dispatches with bounded concurrency and
//! per-call timeout, and never lets a tool mutate the session directly — it only
//! returns data for the orchestrator to splice in.

pub mod calculator;
pub mod http_proxy;

use crate::types::{ToolCall, ToolDefinition, ToolHandlerRef, ToolResult};
use calculator::Calculator;
use dashmap::DashMap;
use jsonschema::JSONSchema;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const DEFAULT_CONCURRENCY: usize = 8;

pub struct ToolRegistry {
    definitions: DashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry { definitions: DashMap::new() }
    }

    /// Populates the built-in entries required at process start: five HTTP
    /// proxy tools against the semantic-search/agent microservices, plus the two
    /// trivial local tools `echo` and `calculator`.
    pub fn with_builtins(semantic_search_url: Option<&str>, ai_agents_url: Option<&str>) -> Self {
        let registry = ToolRegistry::new();

        registry.register(ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes back the provided text verbatim.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
            handler: ToolHandlerRef::Local,
        });

        registry.register(ToolDefinition {
            name: "calculator".to_string(),
            description: "Evaluates an arithmetic or statistical expression.".to_string(),
            parameters_schema: json!({
                "type": "object",
                "properties": { "expression": { "type": "string" } },
                "required": ["expression"]
            }),
            handler: ToolHandlerRef::Local,
        });

        if let Some(base_url) = semantic_search_url {
            registry.register(ToolDefinition {
                name: "semantic_search".to_string(),
                description: "Searches the indexed corpus for passages relevant to a query.".to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": { "query": { "type": "string" }, "top_k": { "type": "integer" } },
                    "required": ["query"]
                }),
                handler: ToolHandlerRef::Proxy { base_url: base_url.to_string(), method: "POST".to_string(), path: "/search".to_string() },
            });
            registry.register(ToolDefinition {
                name: "get_chunk".to_string(),
                description: "Fetches a single indexed chunk by id.".to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": { "chunk_id": { "type": "string" } },
                    "required": ["chunk_id"]
                }),
                handler: ToolHandlerRef::Proxy { base_url: base_url.to_string(), method: "GET".to_string(), path: "/chunk".to_string() },
            });
        }

        if let Some(base_url) = ai_agents_url {
            registry.register(ToolDefinition {
                name: "review_code".to_string(),
                description: "Requests an automated code review of the given diff or file.".to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" }, "diff": { "type": "string" } },
                    "required": ["path"]
                }),
                handler: ToolHandlerRef::Proxy { base_url: base_url.to_string(), method: "POST".to_string(), path: "/review".to_string() },
            });
            registry.register(ToolDefinition {
                name: "analyze_architecture".to_string(),
                description: "Requests an architectural analysis of the given repository or module.".to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": { "target": { "type": "string" } },
                    "required": ["target"]
                }),
                handler: ToolHandlerRef::Proxy { base_url: base_url.to_string(), method: "POST".to_string(), path: "/analyze".to_string() },
            });
            registry.register(ToolDefinition {
                name: "generate_documentation".to_string(),
                description: "Requests generated documentation for the given target.".to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": { "target": { "type": "string" } },
                    "required": ["target"]
                }),
                handler: ToolHandlerRef::Proxy { base_url: base_url.to_string(), method: "POST".to_string(), path: "/docs".to_string() },
            });
        }

        registry
    }

    pub fn register(&self, definition: ToolDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.definitions.get(name).map(|entry| entry.clone())
    }

    pub fn list(&self) -> Vec<ToolDefinition> {
        self.definitions.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    breakers: crate::circuit_breaker::CircuitBreakerRegistry,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        ToolExecutor {
            registry,
            semaphore: Arc::new(Semaphore::new(DEFAULT_CONCURRENCY)),
            timeout,
            breakers: crate::circuit_breaker::CircuitBreakerRegistry::new(5, Duration::from_secs(30)),
        }
    }

    /// Schema-checks `arguments` against the named tool without invoking it. Used by
    /// `POST /v1/tools/execute` to surface a 422 instead of a 200-wrapped `is_error`
    /// result, since that endpoint (unlike the orchestrator's tool-use loop) reports
    /// argument validation failures as a request error rather than a tool outcome.
    pub fn check_args(&self, name: &str, arguments: &Value) -> Result<(), String> {
        let definition = self.registry.get(name).ok_or_else(|| format!("unknown tool: {name}"))?;
        validate_args(&definition.parameters_schema, arguments)
    }

    /// Looks up, validates arguments against schema, invokes, and wraps the outcome.
    /// Validation failure never invokes the handler.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let definition = match self.registry.get(&call.name) {
            Some(def) => def,
            None => return ToolResult::error(&call.id, format!("unknown tool: {}", call.name)),
        };

        if let Err(violation) = validate_args(&definition.parameters_schema, &call.arguments) {
            return ToolResult::error(&call.id, format!("schema violation: {violation}"));
        }

        match &definition.handler {
            ToolHandlerRef::Local => self.execute_local(call).await,
            ToolHandlerRef::Proxy { base_url, method, path } => {
                self.execute_proxy(call, base_url, method, path).await
            }
        }
    }

    async fn execute_local(&self, call: &ToolCall) -> ToolResult {
        match call.name.as_str() {
            "echo" => {
                let text = call.arguments.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                ToolResult::ok(&call.id, text)
            }
            "calculator" => {
                let expr = call.arguments.get("expression").and_then(|v| v.as_str()).unwrap_or_default();
                match Calculator::new().evaluate(expr).await {
                    Ok(value) => ToolResult::ok(&call.id, value.to_string()),
                    Err(e) => ToolResult::error(&call.id, e.to_string()),
                }
            }
            other => ToolResult::error(&call.id, format!("no local handler registered for {other}")),
        }
    }

    async fn execute_proxy(&self, call: &ToolCall, base_url: &str, method: &str, path: &str) -> ToolResult {
        let breaker = self.breakers.breaker_for(base_url);
        if breaker.try_acquire() == crate::circuit_breaker::Admission::Rejected {
            return ToolResult::error(&call.id, format!("circuit open for tool proxy {base_url}"));
        }

        let outcome = tokio::time::timeout(
            self.timeout,
            http_proxy::invoke(base_url, method, path, &call.arguments, self.timeout),
        )
        .await;

        match outcome {
            Ok(Ok(body)) => {
                breaker.record_success();
                ToolResult::ok(&call.id, body)
            }
            Ok(Err(e)) => {
                breaker.record_failure();
                ToolResult::error(&call.id, e.to_string())
            }
            Err(_) => {
                breaker.record_failure();
                ToolResult::error(&call.id, format!("tool {} timed out after {:?}", call.name, self.timeout))
            }
        }
    }

    /// Runs calls concurrently (bounded parallelism), preserving input order in the
    /// result list, never short-circuiting on an individual failure.
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let futures = calls.iter().map(|call| {
            let semaphore = self.semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.execute(call).await
            }
        });
        futures_util::future::join_all(futures).await
    }
}

fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let compiled = JSONSchema::compile(schema).map_err(|e| e.to_string())?;
    let result = compiled.validate(args);
    if let Err(errors) = result {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(messages.join("; "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    fn registry_with_echo() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::with_builtins(None, None))
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_result() {
        let executor = ToolExecutor::new(registry_with_echo(), Duration::from_secs(5));
        let call = ToolCall { id: "call-1".to_string(), name: "nonexistent".to_string(), arguments: json!({}) };
        let result = executor.execute(&call).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn schema_violation_never_invokes_handler() {
        let executor = ToolExecutor::new(registry_with_echo(), Duration::from_secs(5));
        let call = ToolCall { id: "call-1".to_string(), name: "echo".to_string(), arguments: json!({}) };
        let result = executor.execute(&call).await;
        assert!(result.is_error);
        assert!(result.content.contains("schema violation"));
    }

    #[tokio::test]
    async fn echo_tool_returns_input_text() {
        let executor = ToolExecutor::new(registry_with_echo(), Duration::from_secs(5));
        let call = ToolCall { id: "call-1".to_string(), name: "echo".to_string(), arguments: json!({"text": "hi"}) };
        let result = executor.execute(&call).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "hi");
    }

    #[tokio::test]
    async fn calculator_tool_evaluates_expression() {
        let executor = ToolExecutor::new(registry_with_echo(), Duration::from_secs(5));
        let call = ToolCall { id: "call-1".to_string(), name: "calculator".to_string(), arguments: json!({"expression": "2+2"}) };
        let result = executor.execute(&call).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "4");
    }

    #[tokio::test]
    async fn execute_batch_preserves_order_and_does_not_short_circuit() {
        let executor = ToolExecutor::new(registry_with_echo(), Duration::from_secs(5));
        let calls = vec![
            ToolCall { id: "call-1".to_string(), name: "echo".to_string(), arguments: json!({"text": "a"}) },
            ToolCall { id: "call-2".to_string(), name: "nonexistent".to_string(), arguments: json!({}) },
            ToolCall { id: "call-3".to_string(), name: "echo".to_string(), arguments: json!({"text": "c"}) },
        ];
        let results = executor.execute_batch(&calls).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].tool_call_id, "call-1");
        assert!(!results[0].is_error);
        assert_eq!(results[1].tool_call_id, "call-2");
        assert!(results[1].is_error);
        assert_eq!(results[2].tool_call_id, "call-3");
        assert!(!results[2].is_error);
    }
}
