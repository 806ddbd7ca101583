//! Google Gemini GenerateContent backend, using the native schema dialect.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::GoogleGeminiProvider;
