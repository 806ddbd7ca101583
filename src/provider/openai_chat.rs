//! OpenAI Chat Completions 后端 使用 strict JSON-Schema 方言

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::OpenAiChatProvider;
