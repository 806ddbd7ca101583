use serde_json::Value;

use crate::error::LLMError;
use crate::provider::stream::{FrameError, FrameReconciler, StreamState};
use crate::stream::SseFrame;
use crate::types::{FinishReason, ToolCall};

use super::response::{collect_parts, convert_finish_reason, convert_usage};
use super::types::GeminiGenerateContentResponse;

/// Applies `streamGenerateContent?alt=sse` chunks.
///
/// Every chunk is a complete GenerateContentResponse carrying only the new parts, and
/// function calls always arrive whole. There is no terminal event: the stream ends
/// with the body.
#[derive(Default)]
pub(crate) struct GeminiReconciler {
    calls_seen: usize,
}

impl FrameReconciler for GeminiReconciler {
    fn apply(&mut self, frame: &SseFrame, state: &mut StreamState) -> Result<(), FrameError> {
        let chunk: GeminiGenerateContentResponse = serde_json::from_str(&frame.data)?;
        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(FrameError::Backend(LLMError::provider("google_gemini", message)));
        }
        if chunk.model_version.is_some() {
            state.model = chunk.model_version;
        }
        if state.request_id.is_none() {
            state.request_id = chunk.response_id;
        }
        if let Some(usage) = chunk.usage_metadata {
            state.usage = convert_usage(usage);
        }
        if let Some(reason) = chunk.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            state
                .extras
                .insert("block_reason".to_string(), Value::String(reason));
            state.finish_reason = Some(FinishReason::ContentFilter);
        }

        let Some(candidate) = chunk
            .candidates
            .into_iter()
            .min_by_key(|candidate| candidate.index.unwrap_or_default())
        else {
            return Ok(());
        };
        if let Some(content) = candidate.content {
            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            collect_parts(content.parts, self.calls_seen, &mut text, &mut calls);
            state.push_text(&text);
            self.calls_seen += calls.len();
            for call in calls {
                let partial = state.tool_call_mut(&call.id);
                partial.name = call.name;
                partial.arguments = call.arguments.to_string();
            }
        }
        if let Some(reason) = candidate.finish_reason {
            state.finish_reason = Some(convert_finish_reason(&reason));
        }
        Ok(())
    }

    fn end_of_body(&mut self, state: &mut StreamState) -> Result<(), LLMError> {
        state.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};
    use serde_json::json;

    use super::*;
    use crate::provider::stream::ChatStream;

    fn chat_stream(frames: &[&str]) -> ChatStream {
        let body = frames
            .iter()
            .map(|frame| Ok(format!("data: {frame}\r\n\r\n").into_bytes()))
            .collect::<Vec<_>>();
        ChatStream::new(
            Box::pin(stream::iter(body)),
            Box::new(GeminiReconciler::default()),
            None,
            "google_gemini",
            "mock://gemini".to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn chunks_stream_text_until_body_ends() {
        let mut stream = chat_stream(&[
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]},"index":0}],"modelVersion":"gemini-2.5-flash"}"#,
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"lo"}]},"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":4,"candidatesTokenCount":2,"totalTokenCount":6}}"#,
        ]);
        let mut deltas = Vec::new();
        while let Some(delta) = stream.next().await {
            deltas.push(delta.expect("delta"));
        }
        assert_eq!(deltas, vec!["Hel", "lo"]);

        let response = stream.complete().await.expect("complete");
        assert_eq!(response.text(), Some("Hello"));
        assert_eq!(response.finish_reason, Some(FinishReason::Stop));
        assert_eq!(response.usage.total_tokens, 6);
        assert_eq!(response.model.as_deref(), Some("gemini-2.5-flash"));
    }

    #[tokio::test]
    async fn function_calls_across_chunks_keep_distinct_ids() {
        let stream = chat_stream(&[
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"get_weather","args":{"city":"Oslo"}}}]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"get_weather","args":{"city":"Rome"}}}]},"finishReason":"STOP"}]}"#,
        ]);
        let response = stream.complete().await.expect("complete");
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "call_0");
        assert_eq!(response.tool_calls[1].id, "call_1");
        assert_eq!(response.tool_calls[1].arguments, json!({ "city": "Rome" }));
    }

    #[tokio::test]
    async fn body_end_without_finish_reason_is_accepted() {
        let stream = chat_stream(&[r#"{"candidates":[{"content":{"parts":[{"text":"partial"}]}}]}"#]);
        let response = stream.complete().await.expect("complete");
        assert_eq!(response.text(), Some("partial"));
        assert_eq!(response.finish_reason, None);
    }
}
