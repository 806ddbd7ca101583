//! Backend-independent half of streaming: the frame accumulator and the public
//! [`ChatStream`].

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::Value;

use crate::error::LLMError;
use crate::http::HttpBodyStream;
use crate::stream::{SseDecoder, SseFrame};
use crate::types::{ChatResponse, Content, FinishReason, ProviderMetadata, TokenUsage, ToolCall};

use super::structured::{StructuredPlan, extract_structured};

/// Lifecycle of a [`ChatStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Response headers accepted, no frame processed yet.
    AwaitingHeader,
    Streaming,
    /// Terminal signal seen; only buffered deltas remain.
    Terminating,
    /// A transport or backend error was surfaced.
    Error,
}

/// Tool call whose arguments are still arriving as JSON fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Mutable accumulator owned by one stream.
#[derive(Debug, Default)]
pub struct StreamState {
    pub text: String,
    /// Text deltas not yet handed to the consumer.
    pub deltas: VecDeque<String>,
    pub tool_calls: Vec<PartialToolCall>,
    pub usage: TokenUsage,
    pub finish_reason: Option<FinishReason>,
    pub model: Option<String>,
    pub request_id: Option<String>,
    pub extras: BTreeMap<String, Value>,
    /// Set by a reconciler when the backend's terminal signal arrives.
    pub finished: bool,
    emit_text: bool,
}

impl StreamState {
    pub(crate) fn new(emit_text: bool) -> Self {
        Self {
            emit_text,
            ..Self::default()
        }
    }

    /// Appends a text fragment; it is queued for the consumer only for free-text streams.
    pub fn push_text(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.text.push_str(delta);
        if self.emit_text {
            self.deltas.push_back(delta.to_string());
        }
    }

    /// Returns the buffer for call `id`, creating it on first sight.
    pub fn tool_call_mut(&mut self, id: &str) -> &mut PartialToolCall {
        let idx = match self.tool_calls.iter().position(|call| call.id == id) {
            Some(idx) => idx,
            None => {
                self.tool_calls.push(PartialToolCall {
                    id: id.to_string(),
                    ..PartialToolCall::default()
                });
                self.tool_calls.len() - 1
            }
        };
        &mut self.tool_calls[idx]
    }

    fn finish_tool_calls(&mut self, provider: &'static str) -> Vec<ToolCall> {
        self.tool_calls
            .drain(..)
            .map(|partial| {
                let arguments = if partial.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&partial.arguments).unwrap_or_else(|err| {
                        tracing::warn!(provider, tool = %partial.name, error = %err, "tool arguments are not valid JSON");
                        Value::String(partial.arguments.clone())
                    })
                };
                ToolCall {
                    id: partial.id,
                    name: partial.name,
                    arguments,
                }
            })
            .collect()
    }
}

/// Failure while applying one frame.
#[derive(Debug)]
pub enum FrameError {
    /// The frame could not be interpreted; it is skipped.
    Malformed(String),
    /// The backend reported an error inside the stream; the stream fails.
    Backend(LLMError),
}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Per-backend incremental parser folding frames into a [`StreamState`].
pub(crate) trait FrameReconciler: Send {
    fn apply(&mut self, frame: &SseFrame, state: &mut StreamState) -> Result<(), FrameError>;

    /// Called when the body ends. Accepts the stream when a terminal signal or a finish
    /// reason was seen.
    fn end_of_body(&mut self, state: &mut StreamState) -> Result<(), LLMError> {
        if state.finished || state.finish_reason.is_some() {
            Ok(())
        } else {
            Err(LLMError::StreamClosed {
                message: "stream ended before the terminal event".to_string(),
            })
        }
    }
}

/// Streaming chat response.
///
/// As a [`Stream`] it yields text deltas in arrival order; schema-constrained streams
/// yield nothing because partial JSON cannot be validated. The sequence cannot be
/// restarted. [`ChatStream::complete`] drains what is left and returns the aggregate.
pub struct ChatStream {
    frames: SseDecoder,
    reconciler: Box<dyn FrameReconciler>,
    state: StreamState,
    phase: StreamPhase,
    plan: Option<StructuredPlan>,
    provider: &'static str,
    endpoint: String,
    failure: Option<String>,
}

impl ChatStream {
    pub(crate) fn new(
        body: HttpBodyStream,
        reconciler: Box<dyn FrameReconciler>,
        plan: Option<StructuredPlan>,
        provider: &'static str,
        endpoint: String,
        request_id: Option<String>,
    ) -> Self {
        let mut state = StreamState::new(plan.is_none());
        state.request_id = request_id;
        Self {
            frames: SseDecoder::new(body, provider),
            reconciler,
            state,
            phase: StreamPhase::AwaitingHeader,
            plan,
            provider,
            endpoint,
            failure: None,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Drains the stream and builds the final response, applying the same structured
    /// extraction and text fallback as non-streaming calls.
    ///
    /// # Errors
    ///
    /// Returns the transport or backend error that ended the stream, or
    /// [`LLMError::StreamClosed`] when that error was already consumed.
    pub async fn complete(mut self) -> Result<ChatResponse, LLMError> {
        if let Some(message) = self.failure.take() {
            return Err(LLMError::StreamClosed { message });
        }
        while let Some(item) = self.next().await {
            item?;
        }

        let mut state = self.state;
        let mut tool_calls = state.finish_tool_calls(self.provider);
        let content = match &self.plan {
            Some(plan) => extract_structured(plan, &state.text, &mut tool_calls),
            None => Content::Text(std::mem::take(&mut state.text)),
        };
        Ok(ChatResponse {
            content,
            usage: state.usage,
            model: state.model,
            finish_reason: state.finish_reason,
            tool_calls,
            provider: ProviderMetadata {
                provider: self.provider.to_string(),
                request_id: state.request_id,
                endpoint: Some(self.endpoint),
                raw: None,
                extras: state.extras,
            },
        })
    }

    fn fail(&mut self, err: LLMError) -> Poll<Option<Result<String, LLMError>>> {
        self.phase = StreamPhase::Error;
        self.failure = Some(format!("stream already failed: {err}"));
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for ChatStream {
    type Item = Result<String, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(delta) = this.state.deltas.pop_front() {
                return Poll::Ready(Some(Ok(delta)));
            }
            match this.phase {
                StreamPhase::Terminating | StreamPhase::Error => return Poll::Ready(None),
                StreamPhase::AwaitingHeader | StreamPhase::Streaming => {}
            }

            match this.frames.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    this.phase = StreamPhase::Streaming;
                    match this.reconciler.apply(&frame, &mut this.state) {
                        Ok(()) => {}
                        Err(FrameError::Malformed(reason)) => {
                            tracing::warn!(provider = this.provider, %reason, "skipping malformed stream frame");
                        }
                        Err(FrameError::Backend(err)) => return this.fail(err),
                    }
                    if this.state.finished {
                        this.phase = StreamPhase::Terminating;
                    }
                }
                Poll::Ready(Some(Err(err))) => return this.fail(err),
                Poll::Ready(None) => match this.reconciler.end_of_body(&mut this.state) {
                    Ok(()) => this.phase = StreamPhase::Terminating,
                    Err(err) => return this.fail(err),
                },
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
