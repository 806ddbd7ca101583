use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::LLMError;
use crate::schema::Dialect;
use crate::types::{ChatRequest, ChatResponse, ModelInfo};

pub mod anthropic_messages;
pub mod google_gemini;
pub mod openai_chat;
pub mod retry;
pub mod stream;
pub mod structured;

pub use stream::ChatStream;
pub use structured::StructuredPlan;

/// 已完成转换、可直接发送的请求
///
/// 由 [`LLMProvider::prepare`] 生成 schema 编译错误在此阶段同步抛出 不会进入重试循环
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    /// 线格式请求体
    pub body: Value,
    pub model: String,
    /// 结构化输出约定 无 schema 时为 None
    pub plan: Option<StructuredPlan>,
    pub stream: bool,
}

/// 统一的 Provider Trait 所有供应商实现该接口即可接入
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// 纯函数 将标准请求转换为线格式请求体
    fn prepare(&self, request: &ChatRequest, stream: bool) -> Result<PreparedRequest, LLMError>;

    /// 发送已转换的请求并解析完整响应
    async fn send(&self, prepared: &PreparedRequest) -> Result<ChatResponse, LLMError>;

    /// 发送已转换的请求并返回流式响应
    async fn send_stream(&self, prepared: &PreparedRequest) -> Result<ChatStream, LLMError>;

    /// 列出后端可用模型
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError>;

    /// 供应商名称
    fn name(&self) -> &'static str;

    /// 工具参数与结构化输出使用的 JSON-Schema 方言
    fn dialect(&self) -> Dialect;

    /// 提交完整请求并等待完整响应 不含重试
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let prepared = self.prepare(&request, false)?;
        self.send(&prepared).await
    }

    /// 以流式方式返回增量文本 不含重试
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let prepared = self.prepare(&request, true)?;
        self.send_stream(&prepared).await
    }
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn LLMProvider>;

/// 将 features 合并到请求体顶层 同名字段以调用方为准
pub(crate) fn merge_features(body: &mut Map<String, Value>, request: &ChatRequest) {
    for (key, value) in &request.features {
        body.insert(key.clone(), value.clone());
    }
}

/// 递归合并 JSON 对象 非对象值直接覆盖
pub(crate) fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// 从响应头读取请求 ID
pub(crate) fn request_id_from_headers(
    headers: &std::collections::HashMap<String, String>,
    names: &[&str],
) -> Option<String> {
    headers
        .iter()
        .find(|(name, _)| names.iter().any(|candidate| name.eq_ignore_ascii_case(candidate)))
        .map(|(_, value)| value.clone())
}
