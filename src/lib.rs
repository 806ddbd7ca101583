//! LLM 多后端统一调用库
//!
//! 以同一套请求与响应类型调用 OpenAI Chat、Anthropic Messages 与 Google Gemini，
//! 支持结构化输出校验、流式增量、工具调用与重试。

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod schema;
pub mod stream;
pub mod tools;
pub mod types;

pub use client::LLMClient;
pub use error::LLMError;
pub use provider::retry::{RetryConfig, RetryPolicy};
pub use provider::{ChatStream, LLMProvider};
pub use schema::{Dialect, Schema};
pub use tools::{BoxError, ExecutableTool, ToolExecution, ToolExecutor, ToolRegistry};
pub use types::*;
