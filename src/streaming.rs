//! SSE fan-out for streamed completions. The orchestrator's tool-loop
//! completes non-streamed; only the final provider call is streamed to the client.
//! Grounded in the reference crate's `clients/openai.rs::send_message_stream` (which
//! collects chunks then wraps them in a stream) and `clients/common.rs::chunks_to_stream`.

use crate::error::GatewayError;
use crate::types::{ChatChunk, Choice};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use std::convert::Infallible;

/// Wraps a single completed choice as a one-shot chunk stream, used by adapters whose
/// upstream streaming framing isn't implemented yet or whose Responses-API variant
/// has no incremental framing to decode.
pub fn chat_response_to_single_chunk(choice: Choice) -> Result<ChatChunk, GatewayError> {
    Ok(ChatChunk {
        delta_content: Some(choice.message.content),
        delta_tool_call: choice.message.tool_calls.and_then(|mut v| if v.is_empty() { None } else { Some(v.remove(0)) }),
        finish_reason: Some(choice.finish_reason),
    })
}

/// Renders a `ChunkStream` as an axum SSE response: `data: <json>\n\n` per chunk,
/// terminated by the literal `data: [DONE]\n\n` sentinel.
pub fn chunks_to_sse(chunks: BoxStream<'static, Result<ChatChunk, GatewayError>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = chunks
        .map(|result| match result {
            Ok(chunk) => {
                let json = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
                Ok(Event::default().data(json))
            }
            Err(err) => {
                let json = serde_json::json!({ "error": err.to_string() }).to_string();
                Ok(Event::default().data(json))
            }
        })
        .chain(stream::once(async { Ok(Event::default().data("[DONE]")) }));

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FinishReason, Message, Role};

    #[test]
    fn single_chunk_carries_content_and_finish_reason() {
        let choice = Choice {
            index: 0,
            message: Message { role: Role::Assistant, content: "hi".to_string(), tool_calls: None, tool_call_id: None },
            finish_reason: FinishReason::Stop,
        };
        let chunk = chat_response_to_single_chunk(choice).unwrap();
        assert_eq!(chunk.delta_content.as_deref(), Some("hi"));
        assert_eq!(chunk.finish_reason, Some(FinishReason::Stop));
    }
}
