#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream;
use serde_json::Value;
use tessera_llm::error::LLMError;
use tessera_llm::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

/// 预设的一次响应
pub enum Scripted {
    Json {
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    },
    Stream {
        status: u16,
        chunks: Vec<String>,
    },
    Fail(String),
}

impl Scripted {
    pub fn ok(body: Value) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: Value) -> Self {
        Self::raw(status, body.to_string().into_bytes())
    }

    /// 原样返回的响应体 不要求是合法 UTF-8
    pub fn raw(status: u16, body: Vec<u8>) -> Self {
        Self::Json {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn with_header(self, name: &str, value: &str) -> Self {
        match self {
            Self::Json {
                status,
                mut headers,
                body,
            } => {
                headers.insert(name.to_string(), value.to_string());
                Self::Json {
                    status,
                    headers,
                    body,
                }
            }
            other => other,
        }
    }

    /// 每个元素是一个 data 帧的 JSON 文本
    pub fn sse(frames: &[&str]) -> Self {
        Self::Stream {
            status: 200,
            chunks: frames
                .iter()
                .map(|frame| format!("data: {frame}\n\n"))
                .collect(),
        }
    }
}

/// 按顺序回放预设响应并记录所有请求的内存传输层
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    /// 第 idx 个请求体解析为 JSON
    pub fn body(&self, idx: usize) -> Value {
        let requests = self.requests.lock().expect("requests lock");
        let body = requests[idx].body.as_ref().expect("request body");
        serde_json::from_slice(body).expect("json body")
    }

    fn next(&self, request: HttpRequest) -> Scripted {
        self.requests.lock().expect("requests lock").push(request);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Scripted::Fail("script exhausted".to_string()))
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        match self.next(request) {
            Scripted::Json {
                status,
                headers,
                body,
            } => Ok(HttpResponse {
                status,
                headers,
                body,
            }),
            Scripted::Stream { .. } => panic!("expected a buffered request"),
            Scripted::Fail(message) => Err(LLMError::transport(message)),
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        match self.next(request) {
            Scripted::Stream { status, chunks } => Ok(HttpStreamResponse {
                status,
                headers: HashMap::new(),
                body: Box::pin(stream::iter(
                    chunks
                        .into_iter()
                        .map(|chunk| Ok::<_, LLMError>(chunk.into_bytes())),
                )),
            }),
            Scripted::Json {
                status,
                headers,
                body,
            } => Ok(HttpStreamResponse {
                status,
                headers,
                body: Box::pin(stream::iter(vec![Ok::<_, LLMError>(body)])),
            }),
            Scripted::Fail(message) => Err(LLMError::transport(message)),
        }
    }
}
