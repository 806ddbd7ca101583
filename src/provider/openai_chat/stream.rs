use std::collections::HashMap;

use crate::error::LLMError;
use crate::provider::stream::{FrameError, FrameReconciler, StreamState};
use crate::stream::SseFrame;

use super::response::{convert_finish_reason, convert_usage};
use super::types::OpenAiStreamChunk;

const DONE_MARKER: &str = "[DONE]";

/// 增量解析 Chat Completions SSE
///
/// 工具调用增量仅首帧携带 id 后续帧只有 index 因此维护 index 到 id 的映射
#[derive(Default)]
pub(crate) struct OpenAiReconciler {
    ids: HashMap<usize, String>,
}

impl FrameReconciler for OpenAiReconciler {
    fn apply(&mut self, frame: &SseFrame, state: &mut StreamState) -> Result<(), FrameError> {
        if frame.data.trim() == DONE_MARKER {
            state.finished = true;
            return Ok(());
        }

        let chunk: OpenAiStreamChunk = serde_json::from_str(&frame.data)?;
        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(FrameError::Backend(LLMError::provider("openai_chat", message)));
        }
        if let Some(model) = chunk.model {
            state.model = Some(model);
        }
        if let Some(usage) = chunk.usage {
            state.usage = convert_usage(usage);
        }

        for choice in chunk.choices.into_iter().filter(|choice| choice.index == 0) {
            if let Some(delta) = choice.delta {
                if let Some(text) = delta.content {
                    state.push_text(&text);
                }
                for call in delta.tool_calls.unwrap_or_default() {
                    let id = match call.id {
                        Some(id) => {
                            self.ids.insert(call.index, id.clone());
                            id
                        }
                        None => self
                            .ids
                            .get(&call.index)
                            .cloned()
                            .unwrap_or_else(|| format!("call_{}", call.index)),
                    };
                    let partial = state.tool_call_mut(&id);
                    if let Some(function) = call.function {
                        if let Some(name) = function.name {
                            partial.name.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            partial.arguments.push_str(&arguments);
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                state.finish_reason = Some(convert_finish_reason(&reason));
            }
        }
        Ok(())
    }
}
