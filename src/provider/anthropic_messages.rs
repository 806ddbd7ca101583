//! Anthropic Messages 后端 工具参数使用 tool-input 方言

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::AnthropicMessagesProvider;
