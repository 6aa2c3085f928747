//! The chat orchestrator: the single algorithm tying router, breakers,
//! adapters, tool executor, and session store together. `orchestrate` drives the
//! tool-use loop to completion for unary requests; `orchestrate_stream` runs the same
//! loop non-streamed and only streams the final provider call.

use crate::circuit_breaker::{Admission, CircuitBreakerRegistry, CircuitState};
use crate::error::GatewayError;
use crate::observability::{GatewayEvent, GatewayEventHandler, NoopEventHandler};
use crate::providers::{ChunkStream, ProviderAdapter};
use crate::router::{ProviderKind, ProviderRouter};
use crate::session::SessionStore;
use crate::types::{ChatRequest, ChatResponse, Choice, FinishReason, Message};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 8;

/// An ordered fallback list, consulted only for the generic-chat capability.
/// Providers already attempted are skipped; authentication and invalid-request
/// failures never reach this chain (the orchestrator returns them directly).
pub struct FallbackChain {
    order: Vec<ProviderKind>,
}

impl FallbackChain {
    pub fn new(order: Vec<ProviderKind>) -> Self {
        FallbackChain { order }
    }

    fn candidates_after(&self, primary: ProviderKind) -> Vec<ProviderKind> {
        self.order.iter().copied().filter(|p| *p != primary).collect()
    }
}

pub struct Orchestrator {
    router: ProviderRouter,
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
    breakers: CircuitBreakerRegistry,
    tool_executor: Arc<crate::tools::ToolExecutor>,
    session_store: Arc<dyn SessionStore>,
    fallback_chain: FallbackChain,
    max_tool_iterations: u32,
    session_ttl: Duration,
    events: Arc<dyn GatewayEventHandler>,
}

fn circuit_state_label(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}

fn breaker_key(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::OpenAi => "openai",
        ProviderKind::OpenAiResponses => "openai-responses",
        ProviderKind::Anthropic => "anthropic",
        ProviderKind::Gemini => "gemini",
        ProviderKind::DeepSeek => "deepseek",
        ProviderKind::OpenRouter => "openrouter",
        ProviderKind::Local => "local",
    }
}

impl Orchestrator {
    pub fn new(
        router: ProviderRouter,
        adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
        breakers: CircuitBreakerRegistry,
        tool_executor: Arc<crate::tools::ToolExecutor>,
        session_store: Arc<dyn SessionStore>,
        fallback_chain: FallbackChain,
        session_ttl: Duration,
    ) -> Self {
        Orchestrator {
            router,
            adapters,
            breakers,
            tool_executor,
            session_store,
            fallback_chain,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            session_ttl,
            events: Arc::new(NoopEventHandler),
        }
    }

    /// Attaches the lifecycle-event handler that records provider calls,
    /// circuit-breaker transitions, and fallback decisions. Constructed separately
    /// from `new()` so tests can omit it entirely via the no-op default.
    pub fn with_events(mut self, events: Arc<dyn GatewayEventHandler>) -> Self {
        self.events = events;
        self
    }

    fn adapter_for(&self, provider: ProviderKind) -> Result<&Arc<dyn ProviderAdapter>, GatewayError> {
        self.adapters
            .get(&provider)
            .ok_or_else(|| GatewayError::Internal(format!("no adapter configured for {provider:?}")))
    }

    /// Calls `provider.complete()` guarded by its circuit breaker, recording the
    /// outcome. Returns `Err(GatewayError::CircuitOpen(..))` without calling the
    /// adapter at all when the breaker refuses admission.
    async fn call_guarded(
        &self,
        provider: ProviderKind,
        req: &ChatRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let name = breaker_key(provider);
        let breaker = self.breakers.breaker_for(name);
        let state_before = breaker.state();
        if breaker.try_acquire() == Admission::Rejected {
            return Err(GatewayError::CircuitOpen(format!("{provider:?} circuit is open")));
        }
        self.emit_circuit_transition(name, state_before, breaker.state());

        let adapter = self.adapter_for(provider)?;
        self.events.handle(GatewayEvent::ProviderCallStarted { provider: name });
        let started_at = Instant::now();
        let outcome = adapter.complete(req).await;
        let duration_ms = started_at.elapsed().as_millis() as u64;

        let state_before = breaker.state();
        match outcome {
            Ok(resp) => {
                breaker.record_success();
                self.emit_circuit_transition(name, state_before, breaker.state());
                self.events.handle(GatewayEvent::ProviderCallCompleted {
                    provider: name,
                    tokens_used: resp.usage.total_tokens,
                    duration_ms,
                });
                Ok(resp)
            }
            Err(err) => {
                breaker.record_failure();
                self.emit_circuit_transition(name, state_before, breaker.state());
                Err(err)
            }
        }
    }

    fn emit_circuit_transition(&self, provider: &str, before: CircuitState, after: CircuitState) {
        if before == after {
            return;
        }
        self.events.handle(GatewayEvent::CircuitStateChanged {
            provider,
            from: circuit_state_label(before),
            to: circuit_state_label(after),
        });
    }

    /// Calls the resolved provider, falling back through the chain on
    /// `CircuitOpen`/`Upstream`/`Timeout`. Returns the first success, or the
    /// primary's error if every fallback was also exhausted.
    async fn call_with_fallback(
        &self,
        primary: ProviderKind,
        req: &ChatRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let primary_err = match self.call_guarded(primary, req).await {
            Ok(resp) => return Ok(resp),
            Err(err) => err,
        };
        if !primary_err.triggers_fallback() {
            return Err(primary_err);
        }

        for candidate in self.fallback_chain.candidates_after(primary) {
            if !self.adapters.contains_key(&candidate) {
                continue;
            }
            self.events.handle(GatewayEvent::FallbackTriggered {
                from: breaker_key(primary),
                to: breaker_key(candidate),
                reason: &primary_err.to_string(),
            });
            match self.call_guarded(candidate, req).await {
                Ok(resp) => return Ok(resp),
                Err(err) if err.triggers_fallback() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(primary_err)
    }

    /// Dispatches a round of tool calls, emitting `ToolCallDispatched`/`ToolCallCompleted`
    /// around the batch so observers see tool activity even outside `/v1/tools/execute`.
    async fn dispatch_tools(&self, calls: &[crate::types::ToolCall]) -> Vec<crate::types::ToolResult> {
        for call in calls {
            self.events.handle(GatewayEvent::ToolCallDispatched { name: &call.name });
        }
        let results = self.tool_executor.execute_batch(calls).await;
        for (call, result) in calls.iter().zip(results.iter()) {
            self.events.handle(GatewayEvent::ToolCallCompleted { name: &call.name, is_error: result.is_error });
        }
        results
    }

    /// Drives the tool-use loop to completion and returns the final response. If
    /// `req.session_id` is set, loads/creates the session, and persists the full
    /// working transcript (replace, not append) on completion.
    pub async fn orchestrate(&self, req: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let mut session = self.load_or_create_session(req).await?;
        let mut working: Vec<Message> = session.as_ref().map(|s| s.messages.clone()).unwrap_or_default();
        working.extend(req.messages.clone());

        let resolution = self.router.resolve(&req.model)?;
        let mut last_response: Option<ChatResponse> = None;
        let mut iterations = 0u32;

        loop {
            if iterations >= self.max_tool_iterations {
                break;
            }
            let call_req = req.with_messages(working.clone());
            let resp = self.call_with_fallback(resolution.provider, &call_req).await?;

            let finish_reason = resp.choices.first().map(|c| c.finish_reason);
            let msg = resp
                .choices
                .first()
                .map(|c| c.message.clone())
                .ok_or_else(|| GatewayError::Internal("provider returned no choices".to_string()))?;
            working.push(msg.clone());
            last_response = Some(resp);

            if !msg.has_pending_tool_calls() || finish_reason != Some(FinishReason::ToolCalls) {
                break;
            }

            let tool_calls = msg.tool_calls.clone().unwrap_or_default();
            let tool_results = self.dispatch_tools(&tool_calls).await;
            for result in tool_results {
                working.push(Message::tool(result.tool_call_id, result.content));
            }
            iterations += 1;
        }

        let mut response = last_response
            .ok_or_else(|| GatewayError::Internal("orchestration produced no response".to_string()))?;
        if iterations >= self.max_tool_iterations {
            if let Some(choice) = response.choices.get_mut(0) {
                choice.finish_reason = FinishReason::Length;
            }
        }

        if let Some(session) = session.as_mut() {
            session.messages = working;
            self.session_store.save(session.clone(), self.session_ttl).await.map_err(|e| {
                GatewayError::Internal(format!("failed to persist session: {e}"))
            })?;
        }

        Ok(response)
    }

    /// Same tool-use loop as `orchestrate`, but the final round (the one that does not
    /// produce further tool calls) is streamed to the caller instead of awaited whole.
    /// Intermediate rounds that yield tool_calls are always consumed eagerly so tools
    /// can be dispatched before the next round.
    pub async fn orchestrate_stream(&self, req: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        let mut session = self.load_or_create_session(req).await?;
        let mut working: Vec<Message> = session.as_ref().map(|s| s.messages.clone()).unwrap_or_default();
        working.extend(req.messages.clone());

        let resolution = self.router.resolve(&req.model)?;
        let mut iterations = 0u32;

        loop {
            if iterations >= self.max_tool_iterations {
                break;
            }
            let call_req = req.with_messages(working.clone());
            let resp = self.call_with_fallback(resolution.provider, &call_req).await?;
            let finish_reason = resp.choices.first().map(|c| c.finish_reason);
            let msg = resp
                .choices
                .first()
                .map(|c| c.message.clone())
                .ok_or_else(|| GatewayError::Internal("provider returned no choices".to_string()))?;

            if !msg.has_pending_tool_calls() || finish_reason != Some(FinishReason::ToolCalls) {
                working.push(msg);
                break;
            }

            working.push(msg.clone());
            let tool_calls = msg.tool_calls.clone().unwrap_or_default();
            let tool_results = self.dispatch_tools(&tool_calls).await;
            for result in tool_results {
                working.push(Message::tool(result.tool_call_id, result.content));
            }
            iterations += 1;
        }

        if let Some(session) = session.as_mut() {
            session.messages = working.clone();
            self.session_store.save(session.clone(), self.session_ttl).await.map_err(|e| {
                GatewayError::Internal(format!("failed to persist session: {e}"))
            })?;
        }

        let adapter = self.adapter_for(resolution.provider)?;
        adapter.stream(&req.with_messages(working)).await
    }

    async fn load_or_create_session(
        &self,
        req: &ChatRequest,
    ) -> Result<Option<crate::types::Session>, GatewayError> {
        let Some(session_id) = req.session_id.as_deref() else {
            return Ok(None);
        };
        match self.session_store.get(session_id).await {
            Ok(Some(session)) => Ok(Some(session)),
            Ok(None) => Err(GatewayError::NotFound(format!("session {session_id} not found or expired"))),
            Err(e) => Err(GatewayError::Internal(format!("session store error: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;
    use crate::tools::ToolRegistry;
    use crate::types::{ChatRequest, FinishReason, Message, Usage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubAdapter {
        name: &'static str,
        calls: AtomicU32,
        responses: Vec<ChatResponse>,
    }

    impl StubAdapter {
        fn new(name: &'static str, responses: Vec<ChatResponse>) -> Self {
            StubAdapter { name, calls: AtomicU32::new(0), responses }
        }
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn complete(&self, _req: &ChatRequest) -> Result<ChatResponse, GatewayError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.responses
                .get(idx.min(self.responses.len() - 1))
                .cloned()
                .ok_or_else(|| GatewayError::Internal("stub exhausted".to_string()))
        }

        async fn stream(&self, _req: &ChatRequest) -> Result<ChunkStream, GatewayError> {
            Err(GatewayError::Internal("not used in these tests".to_string()))
        }

        fn supports(&self, _model: &str) -> bool {
            true
        }

        fn list_models(&self) -> Vec<String> {
            vec![]
        }
    }

    fn text_response(content: &str) -> ChatResponse {
        ChatResponse::new(
            "local-model",
            vec![Choice { index: 0, message: Message::assistant(content), finish_reason: FinishReason::Stop }],
            Usage::new(10, 5),
        )
    }

    fn tool_call_response() -> ChatResponse {
        let mut msg = Message::assistant("");
        msg.tool_calls = Some(vec![crate::types::ToolCall {
            id: "call-1".to_string(),
            name: "echo".to_string(),
            arguments: serde_json::json!({"text": "hi"}),
        }]);
        ChatResponse::new(
            "local-model",
            vec![Choice { index: 0, message: msg, finish_reason: FinishReason::ToolCalls }],
            Usage::new(10, 5),
        )
    }

    fn build_orchestrator(adapter: Arc<dyn ProviderAdapter>) -> Orchestrator {
        let mut adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(ProviderKind::Local, adapter);
        let router = ProviderRouter::new(Some(ProviderKind::Local), None);
        let breakers = CircuitBreakerRegistry::new(5, Duration::from_secs(30));
        let tool_executor =
            Arc::new(crate::tools::ToolExecutor::new(Arc::new(ToolRegistry::with_builtins(None, None)), Duration::from_secs(5)));
        let session_store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let fallback_chain = FallbackChain::new(vec![ProviderKind::Local]);
        Orchestrator::new(router, adapters, breakers, tool_executor, session_store, fallback_chain, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn single_turn_without_tool_calls_returns_immediately() {
        let adapter = Arc::new(StubAdapter::new("local", vec![text_response("hello")]));
        let orchestrator = build_orchestrator(adapter);
        let req = ChatRequest {
            model: "local-model".to_string(),
            messages: vec![Message::user("hi")],
            tools: None,
            tool_choice: None,
            params: Default::default(),
            stream: false,
            session_id: None,
        };
        let resp = orchestrator.orchestrate(&req).await.unwrap();
        assert_eq!(resp.choices[0].message.content, "hello");
        assert_eq!(resp.choices[0].finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn tool_call_round_dispatches_and_continues() {
        let adapter = Arc::new(StubAdapter::new("local", vec![tool_call_response(), text_response("done")]));
        let orchestrator = build_orchestrator(adapter);
        let req = ChatRequest {
            model: "local-model".to_string(),
            messages: vec![Message::user("use the echo tool")],
            tools: None,
            tool_choice: None,
            params: Default::default(),
            stream: false,
            session_id: None,
        };
        let resp = orchestrator.orchestrate(&req).await.unwrap();
        assert_eq!(resp.choices[0].message.content, "done");
    }

    #[tokio::test]
    async fn max_iterations_reached_surfaces_length_finish_reason() {
        let responses: Vec<ChatResponse> = (0..DEFAULT_MAX_TOOL_ITERATIONS + 1).map(|_| tool_call_response()).collect();
        let adapter = Arc::new(StubAdapter::new("local", responses));
        let orchestrator = build_orchestrator(adapter);
        let req = ChatRequest {
            model: "local-model".to_string(),
            messages: vec![Message::user("loop forever")],
            tools: None,
            tool_choice: None,
            params: Default::default(),
            stream: false,
            session_id: None,
        };
        let resp = orchestrator.orchestrate(&req).await.unwrap();
        assert_eq!(resp.choices[0].finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn session_transcript_is_replaced_not_appended_on_next_turn() {
        let adapter = Arc::new(StubAdapter::new("local", vec![text_response("first"), text_response("second")]));
        let orchestrator = build_orchestrator(adapter);

        let session = orchestrator
            .session_store
            .create(Duration::from_secs(3600), serde_json::json!({}))
            .await
            .unwrap();

        let req = ChatRequest {
            model: "local-model".to_string(),
            messages: vec![Message::user("first turn")],
            tools: None,
            tool_choice: None,
            params: Default::default(),
            stream: false,
            session_id: Some(session.id.clone()),
        };
        orchestrator.orchestrate(&req).await.unwrap();

        let req2 = ChatRequest { session_id: Some(session.id.clone()), messages: vec![Message::user("second turn")], ..req };
        orchestrator.orchestrate(&req2).await.unwrap();

        let stored = orchestrator.session_store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 4);
        assert_eq!(stored.messages[0].content, "first turn");
        assert_eq!(stored.messages[2].content, "second turn");
    }

    #[tokio::test]
    async fn unknown_session_id_surfaces_not_found() {
        let adapter = Arc::new(StubAdapter::new("local", vec![text_response("hi")]));
        let orchestrator = build_orchestrator(adapter);
        let req = ChatRequest {
            model: "local-model".to_string(),
            messages: vec![Message::user("hi")],
            tools: None,
            tool_choice: None,
            params: Default::default(),
            stream: false,
            session_id: Some("does-not-exist".to_string()),
        };
        let result = orchestrator.orchestrate(&req).await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }
}
