use std::collections::HashMap;

use serde_json::Value;

use crate::error::LLMError;
use crate::provider::stream::{FrameError, FrameReconciler, StreamState};
use crate::stream::SseFrame;

use super::response::{convert_finish_reason, convert_usage};
use super::types::{AnthropicStreamEvent, AnthropicUsage};

/// Folds Anthropic Messages SSE events into a [`StreamState`].
///
/// Content blocks are addressed by `index`; tool_use blocks announce their id and name
/// in `content_block_start` and stream their input as `input_json_delta` fragments.
#[derive(Default)]
pub(crate) struct AnthropicReconciler {
    tool_blocks: HashMap<usize, String>,
    usage: AnthropicUsage,
}

impl AnthropicReconciler {
    fn merge_usage(&mut self, usage: AnthropicUsage, state: &mut StreamState) {
        if usage.input_tokens.is_some() {
            self.usage.input_tokens = usage.input_tokens;
        }
        if usage.output_tokens.is_some() {
            self.usage.output_tokens = usage.output_tokens;
        }
        if usage.cache_creation_input_tokens.is_some() {
            self.usage.cache_creation_input_tokens = usage.cache_creation_input_tokens;
        }
        if usage.cache_read_input_tokens.is_some() {
            self.usage.cache_read_input_tokens = usage.cache_read_input_tokens;
        }
        state.usage = convert_usage(self.usage.clone());
    }
}

impl FrameReconciler for AnthropicReconciler {
    fn apply(&mut self, frame: &SseFrame, state: &mut StreamState) -> Result<(), FrameError> {
        let event: AnthropicStreamEvent = serde_json::from_str(&frame.data)?;
        match event.kind.as_str() {
            "message_start" => {
                if let Some(message) = event.message {
                    if message.model.is_some() {
                        state.model = message.model;
                    }
                    if state.request_id.is_none() {
                        state.request_id = message.id;
                    }
                    if let Some(usage) = message.usage {
                        self.merge_usage(usage, state);
                    }
                }
            }
            "content_block_start" => {
                let index = event.index.unwrap_or_default();
                if let Some(block) = event.content_block {
                    match block.kind.as_str() {
                        "tool_use" => {
                            let id = block.id.unwrap_or_else(|| format!("call_{index}"));
                            let partial = state.tool_call_mut(&id);
                            partial.name = block.name.unwrap_or_default();
                            self.tool_blocks.insert(index, id);
                        }
                        "text" => {
                            if let Some(text) = block.text {
                                state.push_text(&text);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "content_block_delta" => {
                let index = event.index.unwrap_or_default();
                let Some(delta) = event.delta else {
                    return Err(FrameError::Malformed(
                        "content_block_delta without delta".to_string(),
                    ));
                };
                match delta.kind.as_deref() {
                    Some("text_delta") => {
                        if let Some(text) = delta.text {
                            state.push_text(&text);
                        }
                    }
                    Some("input_json_delta") => {
                        let Some(id) = self.tool_blocks.get(&index) else {
                            return Err(FrameError::Malformed(format!(
                                "input_json_delta for unknown block {index}"
                            )));
                        };
                        if let Some(fragment) = delta.partial_json {
                            state.tool_call_mut(id).arguments.push_str(&fragment);
                        }
                    }
                    // thinking_delta and signature_delta are not surfaced.
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = event.delta.and_then(|delta| delta.stop_reason) {
                    state.finish_reason = Some(convert_finish_reason(&reason));
                }
                if let Some(usage) = event.usage {
                    self.merge_usage(usage, state);
                }
            }
            "message_stop" => state.finished = true,
            "error" => {
                let error = event.error.unwrap_or(Value::Null);
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(FrameError::Backend(LLMError::provider(
                    "anthropic_messages",
                    message,
                )));
            }
            // ping, content_block_stop
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};
    use serde_json::json;

    use super::*;
    use crate::provider::stream::ChatStream;
    use crate::types::FinishReason;

    fn chat_stream(events: &[(&str, &str)]) -> ChatStream {
        let body = events
            .iter()
            .map(|(event, data)| Ok(format!("event: {event}\ndata: {data}\n\n").into_bytes()))
            .collect::<Vec<_>>();
        ChatStream::new(
            Box::pin(stream::iter(body)),
            Box::new(AnthropicReconciler::default()),
            None,
            "anthropic_messages",
            "mock://messages".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn text_stream_with_usage() {
        let mut stream = chat_stream(&[
            (
                "message_start",
                r#"{"type":"message_start","message":{"id":"msg_1","model":"claude-sonnet-4-5","content":[],"usage":{"input_tokens":12,"output_tokens":1}}}"#,
            ),
            (
                "content_block_start",
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            ),
            ("ping", r#"{"type":"ping"}"#),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            ),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there"}}"#,
            ),
            ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
            (
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":6}}"#,
            ),
            ("message_stop", r#"{"type":"message_stop"}"#),
        ]);
        let mut deltas = Vec::new();
        while let Some(delta) = stream.next().await {
            deltas.push(delta.expect("delta"));
        }
        assert_eq!(deltas, vec!["Hi", " there"]);

        let response = stream.complete().await.expect("complete");
        assert_eq!(response.text(), Some("Hi there"));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.usage.output_tokens, 6);
        assert_eq!(response.usage.total_tokens, 18);
        assert_eq!(response.provider.request_id.as_deref(), Some("msg_1"));
    }

    #[tokio::test]
    async fn tool_input_fragments_are_joined_per_block() {
        let stream = chat_stream(&[
            (
                "content_block_start",
                r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_7","name":"search","input":{}}}"#,
            ),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"query\": \"ru"}}"#,
            ),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"st\"}"}}"#,
            ),
            (
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"}}"#,
            ),
            ("message_stop", r#"{"type":"message_stop"}"#),
        ]);
        let response = stream.complete().await.expect("complete");
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "toolu_7");
        assert_eq!(response.tool_calls[0].name, "search");
        assert_eq!(response.tool_calls[0].arguments, json!({ "query": "rust" }));
    }

    #[tokio::test]
    async fn error_event_fails_the_stream() {
        let stream = chat_stream(&[(
            "error",
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )]);
        match stream.complete().await {
            Err(LLMError::Provider { message, .. }) => assert_eq!(message, "Overloaded"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
