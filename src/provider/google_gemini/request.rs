use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::deep_merge;
use crate::provider::structured::StructuredPlan;
use crate::schema::{CompileTarget, NativeCompiler, SchemaCompiler};
use crate::types::{
    ChatRequest, ContentPart, ImageSource, Message, MessageContent, Role, ToolChoice,
    ToolDefinition,
};

/// features 中的该键会递归合并进 generationConfig 而不是覆盖
const GENERATION_CONFIG: &str = "generationConfig";

/// 构建 Google Gemini GenerateContent 请求体
///
/// 与 OpenAI Chat 不同，Gemini 使用路径参数携带模型名称：
/// `POST /v1beta/models/{model}:generateContent`。
/// 流式与否同样由端点决定，因此 body 中既没有 model 也没有 stream 字段。
pub(crate) fn build_gemini_body(
    request: &ChatRequest,
) -> Result<(Value, Option<StructuredPlan>), LLMError> {
    request.ensure_messages()?;

    let mut body = Map::new();

    // 1. system 折叠为 systemInstruction，其余进入 contents
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    for message in &request.messages {
        match message.role {
            Role::System => system_texts.push(message.plain_text()),
            Role::User | Role::Assistant => contents.push(convert_message(message)),
        }
    }
    if contents.is_empty() {
        return Err(LLMError::Validation {
            message: "Gemini GenerateContent request requires at least one content message"
                .to_string(),
        });
    }
    body.insert("contents".to_string(), Value::Array(contents));
    if !system_texts.is_empty() {
        body.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [ { "text": system_texts.join("\n\n") } ] }),
        );
    }

    // 2. 采样与生成配置 -> generationConfig
    let mut generation = Map::new();
    if let Some(temperature) = request.options.temperature {
        generation.insert("temperature".to_string(), Value::from(temperature));
    }
    if let Some(top_p) = request.options.top_p {
        generation.insert("topP".to_string(), Value::from(top_p));
    }
    if let Some(max_tokens) = request.options.max_tokens {
        generation.insert("maxOutputTokens".to_string(), Value::from(max_tokens));
    }
    let mut plan = None;
    if let Some(schema) = &request.schema {
        let compiled = NativeCompiler.compile_schema(schema, CompileTarget::ResponseSchema)?;
        generation.insert(
            "responseMimeType".to_string(),
            Value::String("application/json".to_string()),
        );
        generation.insert("responseSchema".to_string(), compiled.schema.clone());
        plan = Some(StructuredPlan::message_text(&compiled));
    }

    // 3. 工具与 toolConfig
    if !request.tools.is_empty() {
        body.insert("tools".to_string(), convert_tools(&request.tools)?);
    }
    if let Some(choice) = &request.tool_choice {
        body.insert("toolConfig".to_string(), convert_tool_choice(choice));
    }

    // 4. features 透传 generationConfig 递归合并
    let mut generation = Value::Object(generation);
    for (key, value) in &request.features {
        if key == GENERATION_CONFIG {
            deep_merge(&mut generation, value);
        } else {
            body.insert(key.clone(), value.clone());
        }
    }
    if generation.as_object().is_some_and(|map| !map.is_empty()) {
        body.insert(GENERATION_CONFIG.to_string(), generation);
    }

    Ok((Value::Object(body), plan))
}

/// 将 Message 转换为 Gemini Content assistant 对应 model
fn convert_message(message: &Message) -> Value {
    let role = match message.role {
        Role::Assistant => "model",
        Role::System | Role::User => "user",
    };
    let parts = match &message.content {
        MessageContent::Text(text) => vec![json!({ "text": text })],
        MessageContent::Parts(parts) => parts.iter().map(convert_content_part).collect(),
    };
    json!({ "role": role, "parts": parts })
}

fn convert_content_part(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({ "text": text }),
        ContentPart::Image(ImageSource::Url { url }) => json!({
            "fileData": {
                "mimeType": guess_image_mime(url),
                "fileUri": url,
            }
        }),
        ContentPart::Image(ImageSource::Base64 { data, mime_type }) => json!({
            "inlineData": {
                "mimeType": mime_type,
                "data": data,
            }
        }),
    }
}

fn guess_image_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".heic") {
        "image/heic"
    } else {
        "image/jpeg"
    }
}

/// 所有函数声明合并进单个 Tool 条目 `[{ "functionDeclarations": [...] }]`
fn convert_tools(tools: &[ToolDefinition]) -> Result<Value, LLMError> {
    let declarations = tools
        .iter()
        .map(|tool| -> Result<Value, LLMError> {
            let compiled =
                NativeCompiler.compile_schema(&tool.parameters, CompileTarget::ToolInput)?;
            Ok(json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": compiled.schema,
            }))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!([{ "functionDeclarations": declarations }]))
}

/// ToolChoice -> toolConfig.functionCallingConfig
fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({ "functionCallingConfig": { "mode": "AUTO" } }),
        ToolChoice::Required => json!({ "functionCallingConfig": { "mode": "ANY" } }),
        ToolChoice::None => json!({ "functionCallingConfig": { "mode": "NONE" } }),
        ToolChoice::Tool { name } => json!({
            "functionCallingConfig": {
                "mode": "ANY",
                "allowedFunctionNames": [name],
            }
        }),
    }
}
