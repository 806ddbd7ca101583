use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;

use crate::error::LLMError;
use crate::http::HttpBodyStream;

/// One Server-Sent Events frame: the optional `event:` name and the joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Splits a provider byte stream into [`SseFrame`] values.
///
/// Bytes are buffered across read boundaries until a full line is available. `id:`,
/// `retry:` and comment lines are ignored; frames that are not valid UTF-8 are dropped.
/// Only transport failures are surfaced as errors.
pub struct SseDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<SseFrame>,
    provider: &'static str,
    body_closed: bool,
}

impl SseDecoder {
    /// Wraps a raw HTTP body stream and prepares it for SSE decoding.
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            event: None,
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
            body_closed: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if line.is_empty() {
            self.flush_frame();
        } else if let Some(rest) = line.strip_prefix(b"data:") {
            self.data_lines.push(strip_leading_space(rest).to_vec());
        } else if let Some(rest) = line.strip_prefix(b"event:") {
            self.event = Some(String::from_utf8_lossy(strip_leading_space(rest)).into_owned());
        }
    }

    fn flush_frame(&mut self) {
        let event = self.event.take();
        if self.data_lines.is_empty() {
            return;
        }
        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        match String::from_utf8(joined) {
            Ok(data) if data.trim().is_empty() => {}
            Ok(data) => self.pending.push_back(SseFrame { event, data }),
            Err(err) => {
                tracing::warn!(provider = self.provider, error = %err, "dropping non UTF-8 stream frame");
            }
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

fn strip_leading_space(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b" ").unwrap_or(bytes)
}

impl Stream for SseDecoder {
    type Item = Result<SseFrame, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(frame)));
            }
            if this.body_closed {
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        this.handle_line(line);
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.body_closed = true;
                    if !this.buffer.is_empty() {
                        let line = std::mem::take(&mut this.buffer);
                        this.handle_line(line);
                    }
                    this.flush_frame();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Reads a whole streaming body into a string, used for error payloads of failed
/// stream requests. Invalid UTF-8 is replaced rather than rejected.
pub(crate) async fn collect_stream_text(mut body: HttpBodyStream) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
