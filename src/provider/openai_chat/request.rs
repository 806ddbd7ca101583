use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::merge_features;
use crate::provider::structured::{SYNTHETIC_TOOL_NAME, StructuredPlan};
use crate::schema::{CompileTarget, SchemaCompiler, StrictCompiler};
use crate::types::{
    ChatRequest, ContentPart, ImageSource, Message, MessageContent, Role, ToolChoice,
    ToolDefinition,
};

const STRUCTURED_TOOL_DESCRIPTION: &str = "Return the final answer using this schema.";

/// 构建 OpenAI Chat Completions 请求体 同时返回结构化输出约定
///
/// 无用户工具时 schema 编译为隐式 strict 工具并强制调用
/// 有用户工具时改用 `response_format: json_schema` 以免与用户工具冲突
pub(crate) fn build_openai_body(
    request: &ChatRequest,
    model: &str,
    stream: bool,
) -> Result<(Value, Option<StructuredPlan>), LLMError> {
    request.ensure_messages()?;

    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        Value::Array(request.messages.iter().map(convert_message).collect()),
    );
    if let Some(temperature) = request.options.temperature {
        body.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = request.options.top_p {
        body.insert("top_p".to_string(), Value::from(top_p));
    }
    if let Some(max_tokens) = request.options.max_tokens {
        body.insert("max_completion_tokens".to_string(), Value::from(max_tokens));
    }

    let mut tools = convert_tools(&request.tools)?;
    let mut tool_choice = request.tool_choice.as_ref().map(convert_tool_choice);
    let mut plan = None;

    if let Some(schema) = &request.schema {
        if request.tools.is_empty() {
            let compiled = StrictCompiler.compile_schema(schema, CompileTarget::ToolInput)?;
            tools.push(function_tool(
                SYNTHETIC_TOOL_NAME,
                STRUCTURED_TOOL_DESCRIPTION,
                compiled.schema.clone(),
            ));
            tool_choice = Some(forced_function(SYNTHETIC_TOOL_NAME));
            plan = Some(StructuredPlan::tool_call(&compiled));
        } else {
            let compiled = StrictCompiler.compile_schema(schema, CompileTarget::ResponseSchema)?;
            body.insert(
                "response_format".to_string(),
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": SYNTHETIC_TOOL_NAME,
                        "strict": true,
                        "schema": compiled.schema
                    }
                }),
            );
            plan = Some(StructuredPlan::message_text(&compiled));
        }
    }

    if !tools.is_empty() {
        body.insert("tools".to_string(), Value::Array(tools));
    }
    if let Some(choice) = tool_choice {
        body.insert("tool_choice".to_string(), choice);
    }

    merge_features(&mut body, request);

    body.insert("stream".to_string(), Value::Bool(stream));
    if stream {
        body.insert("stream_options".to_string(), json!({ "include_usage": true }));
    }
    Ok((Value::Object(body), plan))
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn convert_message(message: &Message) -> Value {
    let content = match &message.content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Parts(parts) => Value::Array(parts.iter().map(convert_content_part).collect()),
    };
    json!({ "role": role_name(message.role), "content": content })
}

fn convert_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
        ContentPart::Image(ImageSource::Url { url }) => json!({
            "type": "image_url",
            "image_url": { "url": url }
        }),
        ContentPart::Image(ImageSource::Base64 { data, mime_type }) => json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{mime_type};base64,{data}") }
        }),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Result<Vec<Value>, LLMError> {
    tools
        .iter()
        .map(|tool| -> Result<Value, LLMError> {
            let compiled = StrictCompiler.compile_schema(&tool.parameters, CompileTarget::ToolInput)?;
            Ok(function_tool(&tool.name, &tool.description, compiled.schema))
        })
        .collect()
}

fn function_tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
            "strict": true
        }
    })
}

fn forced_function(name: &str) -> Value {
    json!({ "type": "function", "function": { "name": name } })
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::String("auto".to_string()),
        ToolChoice::Required => Value::String("required".to_string()),
        ToolChoice::None => Value::String("none".to_string()),
        ToolChoice::Tool { name } => forced_function(name),
    }
}
