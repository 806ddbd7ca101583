use std::sync::Arc;

use crate::error::LLMError;
use crate::provider::retry::{RetryConfig, RetryPolicy};
use crate::provider::{ChatStream, DynProvider};
use crate::schema::Schema;
use crate::tools::{ExecutableTool, ToolExecution, ToolExecutor, ToolRegistry};
use crate::types::{ChatRequest, ChatResponse, ModelInfo, ToolCall, ToolDefinition};

/// LLM 调用入口 绑定一个 Provider 默认重试策略与工具注册表
///
/// Client 本身不可变 可在多个任务间共享 每次调用拥有独立的重试计数与流状态
pub struct LLMClient {
    provider: DynProvider,
    retry: RetryConfig,
    tools: Arc<ToolRegistry>,
}

impl LLMClient {
    /// 使用默认重试策略创建 Client
    pub fn new(provider: DynProvider) -> Self {
        Self {
            provider,
            retry: RetryConfig::default(),
            tools: Arc::new(ToolRegistry::new()),
        }
    }

    /// 替换默认重试策略 单次请求仍可通过 `ChatRequest::with_retry` 覆盖
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 与其它 Client 共享同一个工具注册表
    pub fn with_tool_registry(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// 发送聊天请求 失败时按重试策略重发
    ///
    /// schema 编译错误在首次发送前同步返回 不会重试
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError> {
        let prepared = self.provider.prepare(&request, false)?;
        let policy = self.policy_for(&request);
        policy.run(|| self.provider.send(&prepared)).await
    }

    /// 发起流式聊天请求 仅建立连接阶段参与重试 已开始的流不会重放
    pub async fn stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError> {
        let prepared = self.provider.prepare(&request, true)?;
        let policy = self.policy_for(&request);
        policy.run(|| self.provider.send_stream(&prepared)).await
    }

    /// 定义并注册工具 同名工具以最后一次注册为准
    pub fn define_tool<E>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Schema,
        executor: E,
    ) -> ExecutableTool
    where
        E: ToolExecutor + 'static,
    {
        let tool = ExecutableTool::new(name, description, parameters, executor);
        self.tools.register(tool.clone());
        tool
    }

    /// 已注册工具的定义 可直接传给 `ChatRequest::with_tools`
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    /// 并发执行工具调用 结果顺序与输入一致 单个失败不影响其它调用
    pub async fn execute_tools(&self, calls: &[ToolCall]) -> Vec<ToolExecution> {
        self.tools.execute_all(calls, self.provider.dialect()).await
    }

    /// 列出后端可用模型 使用默认重试策略
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
        RetryPolicy::new(self.retry.clone())
            .run(|| self.provider.list_models())
            .await
    }

    fn policy_for(&self, request: &ChatRequest) -> RetryPolicy {
        RetryPolicy::new(request.retry.clone().unwrap_or_else(|| self.retry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::provider::{LLMProvider, PreparedRequest};
    use crate::schema::Dialect;
    use crate::tools::BoxError;
    use crate::types::{Content, Message, ProviderMetadata, TokenUsage};

    /// 按脚本依次返回结果的 Provider 统计 send 调用次数
    struct ScriptedProvider {
        script: Mutex<Vec<Result<ChatResponse, LLMError>>>,
        sends: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(mut script: Vec<Result<ChatResponse, LLMError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                sends: AtomicU32::new(0),
            }
        }
    }

    fn reply(text: &str) -> ChatResponse {
        ChatResponse {
            content: Content::Text(text.to_string()),
            usage: TokenUsage::default(),
            model: None,
            finish_reason: None,
            tool_calls: Vec::new(),
            provider: ProviderMetadata::default(),
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        fn prepare(&self, request: &ChatRequest, stream: bool) -> Result<PreparedRequest, LLMError> {
            request.ensure_messages()?;
            Ok(PreparedRequest {
                body: json!({}),
                model: "scripted".to_string(),
                plan: None,
                stream,
            })
        }

        async fn send(&self, _prepared: &PreparedRequest) -> Result<ChatResponse, LLMError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .expect("script lock")
                .pop()
                .unwrap_or_else(|| Err(LLMError::provider("scripted", "script exhausted")))
        }

        async fn send_stream(&self, _prepared: &PreparedRequest) -> Result<ChatStream, LLMError> {
            Err(LLMError::provider("scripted", "streaming not scripted"))
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>, LLMError> {
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "scripted"
        }

        fn dialect(&self) -> Dialect {
            Dialect::ToolInput
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::default()
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(LLMError::backend("scripted", 503, "unavailable", None)),
            Ok(reply("done")),
        ]));
        let client = LLMClient::new(provider.clone()).with_retry(fast_retry());
        let response = client
            .chat(ChatRequest::new(vec![Message::user("hi")]))
            .await
            .expect("chat");
        assert_eq!(response.text(), Some("done"));
        assert_eq!(provider.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn validation_errors_never_reach_the_backend() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let client = LLMClient::new(provider.clone());
        let err = client
            .chat(ChatRequest::new(Vec::new()))
            .await
            .expect_err("empty request");
        assert!(matches!(err, LLMError::Validation { .. }));
        assert_eq!(provider.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn define_tool_registers_for_execution() {
        let client = LLMClient::new(Arc::new(ScriptedProvider::new(Vec::new())));
        client.define_tool(
            "double",
            "Doubles a number",
            Schema::number(),
            |args: Value| async move { Ok::<Value, BoxError>(json!(args.as_f64().unwrap_or(0.0) * 2.0)) },
        );
        assert_eq!(client.tool_definitions().len(), 1);

        let results = client
            .execute_tools(&[ToolCall {
                id: "c1".to_string(),
                name: "double".to_string(),
                arguments: json!({ "value": 21 }),
            }])
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome.as_ref().ok(), Some(&json!(42.0)));
    }
}
