use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::merge_features;
use crate::provider::structured::{SYNTHETIC_TOOL_NAME, StructuredPlan};
use crate::schema::{CompileTarget, SchemaCompiler, ToolInputCompiler};
use crate::types::{
    ChatRequest, ContentPart, ImageSource, Message, MessageContent, Role, ToolChoice,
    ToolDefinition,
};

/// Anthropic 要求显式 max_tokens 未指定时使用该值
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

const STRUCTURED_TOOL_DESCRIPTION: &str = "Return the final answer using this schema.";

/// 构建 Anthropic Messages 请求体 同时返回结构化输出约定
///
/// schema 总是编译为隐式工具 仅在没有用户工具时强制调用
pub(crate) fn build_anthropic_body(
    request: &ChatRequest,
    model: &str,
    default_max_tokens: u32,
    stream: bool,
) -> Result<(Value, Option<StructuredPlan>), LLMError> {
    request.ensure_messages()?;

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));

    // 1. system 折叠为顶层 system 其余进入 messages
    let mut system_texts = Vec::new();
    let mut messages = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System => system_texts.push(message.plain_text()),
            Role::User | Role::Assistant => messages.push(convert_message(message)),
        }
    }
    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "Anthropic Messages request requires at least one user/assistant message"
                .to_string(),
        });
    }
    body.insert("messages".to_string(), Value::Array(messages));
    if !system_texts.is_empty() {
        body.insert("system".to_string(), Value::String(system_texts.join("\n\n")));
    }

    // 2. 采样与生成控制参数
    body.insert(
        "max_tokens".to_string(),
        Value::from(request.options.max_tokens.unwrap_or(default_max_tokens)),
    );
    if let Some(temperature) = request.options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = request.options.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }

    // 3. tools 与 tool_choice
    let mut tools = convert_tools(&request.tools)?;
    let mut tool_choice = request.tool_choice.as_ref().map(convert_tool_choice);
    let mut plan = None;
    if let Some(schema) = &request.schema {
        let compiled = ToolInputCompiler.compile_schema(schema, CompileTarget::ToolInput)?;
        tools.push(tool_entry(
            SYNTHETIC_TOOL_NAME,
            STRUCTURED_TOOL_DESCRIPTION,
            compiled.schema.clone(),
        ));
        if request.tools.is_empty() {
            tool_choice = Some(json!({ "type": "tool", "name": SYNTHETIC_TOOL_NAME }));
        }
        plan = Some(StructuredPlan::tool_call(&compiled));
    }
    if !tools.is_empty() {
        body.insert("tools".to_string(), Value::Array(tools));
    }
    if let Some(choice) = tool_choice {
        body.insert("tool_choice".to_string(), choice);
    }

    // 4. features 直接透传
    merge_features(&mut body, request);

    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }
    Ok((Value::Object(body), plan))
}

fn convert_message(message: &Message) -> Value {
    let role = match message.role {
        Role::Assistant => "assistant",
        Role::System | Role::User => "user",
    };
    let content = match &message.content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Parts(parts) => {
            Value::Array(parts.iter().map(convert_content_part).collect())
        }
    };
    json!({ "role": role, "content": content })
}

fn convert_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
        ContentPart::Image(ImageSource::Url { url }) => json!({
            "type": "image",
            "source": { "type": "url", "url": url }
        }),
        ContentPart::Image(ImageSource::Base64 { data, mime_type }) => json!({
            "type": "image",
            "source": { "type": "base64", "media_type": mime_type, "data": data }
        }),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Result<Vec<Value>, LLMError> {
    tools
        .iter()
        .map(|tool| -> Result<Value, LLMError> {
            let compiled =
                ToolInputCompiler.compile_schema(&tool.parameters, CompileTarget::ToolInput)?;
            Ok(tool_entry(&tool.name, &tool.description, compiled.schema))
        })
        .collect()
}

fn tool_entry(name: &str, description: &str, input_schema: Value) -> Value {
    json!({
        "name": name,
        "description": description,
        "input_schema": input_schema
    })
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({ "type": "auto" }),
        ToolChoice::Required => json!({ "type": "any" }),
        ToolChoice::None => json!({ "type": "none" }),
        ToolChoice::Tool { name } => json!({ "type": "tool", "name": name }),
    }
}
