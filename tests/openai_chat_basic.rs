mod common;

use std::env;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use common::{MockTransport, Scripted};
use dotenvy::dotenv;
use futures_util::StreamExt;
use serde_json::json;
use tessera_llm::http::HttpMethod;
use tessera_llm::http::reqwest::ReqwestTransport;
use tessera_llm::provider::openai_chat::OpenAiChatProvider;
use tessera_llm::schema::Schema;
use tessera_llm::types::{
    ChatRequest, Content, ContentPart, FinishReason, ImageSource, Message, ToolChoice,
    ToolDefinition,
};
use tessera_llm::{LLMClient, LLMError, LLMProvider};

fn provider(transport: Arc<MockTransport>) -> OpenAiChatProvider {
    OpenAiChatProvider::new(transport, "sk-test", "gpt-4o-mini").with_base_url("http://mock/v1")
}

fn tree_schema() -> Schema {
    Schema::named(
        "Node",
        Schema::object([
            ("label", Schema::string()),
            ("children", Schema::array(Schema::lazy("Node"))),
        ]),
    )
}

#[tokio::test]
async fn text_dialog_maps_usage_and_request_id() {
    let transport = MockTransport::new(vec![
        Scripted::ok(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "我很好，谢谢！" },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 5,
                "prompt_tokens_details": { "cached_tokens": 4 }
            }
        }))
        .with_header("x-request-id", "req_abc"),
    ]);
    let response = provider(transport.clone())
        .chat(ChatRequest::new(vec![
            Message::system("你是一个有帮助的助手。"),
            Message::user("你好！"),
        ]))
        .await
        .expect("chat");

    assert_eq!(response.text(), Some("我很好，谢谢！"));
    assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    assert_eq!(response.usage.input_tokens, 12);
    assert_eq!(response.usage.total_tokens, 17);
    assert_eq!(response.provider.request_id.as_deref(), Some("req_abc"));
    assert_eq!(
        response.provider.endpoint.as_deref(),
        Some("http://mock/v1/chat/completions")
    );

    let request = &transport.requests()[0];
    assert_eq!(request.url, "http://mock/v1/chat/completions");
    assert_eq!(
        request.headers.get("Authorization").map(String::as_str),
        Some("Bearer sk-test")
    );
    let body = transport.body(0);
    assert_eq!(body["model"], json!("gpt-4o-mini"));
    assert_eq!(body["messages"][0]["role"], json!("system"));
    assert_eq!(body["stream"], json!(false));
}

#[tokio::test]
async fn inline_images_become_data_urls() {
    let transport = MockTransport::new(vec![Scripted::ok(json!({
        "choices": [{ "index": 0, "message": { "content": "草地" }, "finish_reason": "stop" }]
    }))]);
    let encoded = general_purpose::STANDARD.encode([0x89u8, b'P', b'N', b'G']);
    let request = ChatRequest::new(vec![Message::user_parts(vec![
        ContentPart::text("这张图片里有什么？"),
        ContentPart::Image(ImageSource::Base64 {
            data: encoded.clone(),
            mime_type: "image/png".to_string(),
        }),
    ])]);
    provider(transport.clone()).chat(request).await.expect("chat");

    let body = transport.body(0);
    assert_eq!(
        body["messages"][0]["content"][1],
        json!({
            "type": "image_url",
            "image_url": { "url": format!("data:image/png;base64,{encoded}") }
        })
    );
}

#[tokio::test]
async fn tool_calls_are_returned_with_parsed_arguments() {
    let transport = MockTransport::new(vec![Scripted::ok(json!({
        "choices": [{
            "index": 0,
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_w1",
                    "type": "function",
                    "function": {
                        "name": "get_current_weather",
                        "arguments": "{\"location\":\"Boston, MA\",\"unit\":null}"
                    }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    }))]);
    let request = ChatRequest::new(vec![Message::user("波士顿今天的天气怎么样？")])
        .with_tools(vec![ToolDefinition::new(
            "get_current_weather",
            "获取指定位置的当前天气",
            Schema::object([
                ("location", Schema::string()),
                ("unit", Schema::enumeration(["celsius", "fahrenheit"]).optional()),
            ]),
        )])
        .with_tool_choice(ToolChoice::Tool {
            name: "get_current_weather".to_string(),
        });
    let response = provider(transport.clone()).chat(request).await.expect("chat");

    assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].id, "call_w1");
    assert_eq!(response.tool_calls[0].arguments["location"], json!("Boston, MA"));

    let body = transport.body(0);
    let parameters = &body["tools"][0]["function"]["parameters"];
    assert_eq!(parameters["additionalProperties"], json!(false));
    assert_eq!(parameters["required"], json!(["location", "unit"]));
}

#[tokio::test]
async fn recursive_structured_output_round_trips() {
    let payload = json!({
        "label": "root",
        "children": [{
            "label": "a",
            "children": [{
                "label": "a.1",
                "children": [{ "label": "a.1.x", "children": [] }]
            }]
        }]
    });
    let transport = MockTransport::new(vec![Scripted::ok(json!({
        "choices": [{
            "index": 0,
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_s",
                    "type": "function",
                    "function": { "name": "structured_output", "arguments": payload.to_string() }
                }]
            },
            "finish_reason": "stop"
        }]
    }))]);
    let response = provider(transport.clone())
        .chat(ChatRequest::new(vec![Message::user("build a tree")]).with_schema(tree_schema()))
        .await
        .expect("chat");

    assert_eq!(response.structured(), Some(&payload));
    assert!(response.tool_calls.is_empty());
    let body = transport.body(0);
    assert_eq!(
        body["tool_choice"],
        json!({ "type": "function", "function": { "name": "structured_output" } })
    );
}

#[tokio::test]
async fn invalid_structured_payload_degrades_to_text() {
    let transport = MockTransport::new(vec![Scripted::ok(json!({
        "choices": [{
            "index": 0,
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_s",
                    "function": { "name": "structured_output", "arguments": "{\"answer\":42}" }
                }]
            },
            "finish_reason": "stop"
        }]
    }))]);
    let response = provider(transport)
        .chat(
            ChatRequest::new(vec![Message::user("?")])
                .with_schema(Schema::object([("answer", Schema::string())])),
        )
        .await
        .expect("chat");
    assert_eq!(response.content, Content::Text("{\"answer\":42}".to_string()));
}

#[tokio::test]
async fn stream_yields_deltas_and_aggregates() {
    let transport = MockTransport::new(vec![Scripted::sse(&[
        r#"{"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
        "[DONE]",
    ])]);
    let client = LLMClient::new(Arc::new(provider(transport.clone())));
    let mut stream = client
        .stream(ChatRequest::new(vec![Message::user("say hello")]))
        .await
        .expect("stream");

    let mut deltas = Vec::new();
    while let Some(delta) = stream.next().await {
        deltas.push(delta.expect("delta"));
    }
    assert_eq!(deltas, vec!["Hel".to_string(), "lo".to_string()]);

    let response = stream.complete().await.expect("complete");
    assert_eq!(response.text(), Some("Hello"));
    assert_eq!(response.finish_reason, Some(FinishReason::Stop));
    assert_eq!(response.usage.total_tokens, 5);

    let body = transport.body(0);
    assert_eq!(body["stream"], json!(true));
    assert_eq!(body["stream_options"], json!({ "include_usage": true }));
}

#[tokio::test]
async fn stream_tool_call_fragments_are_reassembled() {
    let transport = MockTransport::new(vec![Scripted::sse(&[
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"lookup","arguments":""}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":"}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"rust\"}"}}]}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        "[DONE]",
    ])]);
    let response = provider(transport)
        .stream_chat(ChatRequest::new(vec![Message::user("search")]))
        .await
        .expect("stream")
        .complete()
        .await
        .expect("complete");
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].name, "lookup");
    assert_eq!(response.tool_calls[0].arguments, json!({ "q": "rust" }));
    assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
}

#[tokio::test]
async fn error_status_is_mapped_before_streaming() {
    let transport = MockTransport::new(vec![Scripted::status(
        401,
        json!({ "error": { "message": "Incorrect API key", "type": "invalid_request_error" } }),
    )]);
    let err = match provider(transport)
        .stream_chat(ChatRequest::new(vec![Message::user("hi")]))
        .await
    {
        Ok(_) => panic!("expected backend error"),
        Err(err) => err,
    };
    assert_eq!(err.status(), Some(401));
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("Incorrect API key"), "{err}");
}

#[tokio::test]
async fn list_models_reads_the_models_endpoint() {
    let transport = MockTransport::new(vec![Scripted::ok(json!({
        "object": "list",
        "data": [
            { "id": "gpt-4o", "owned_by": "openai" },
            { "id": "gpt-4o-mini", "owned_by": "openai" }
        ]
    }))]);
    let models = provider(transport.clone()).list_models().await.expect("models");
    assert_eq!(models.len(), 2);
    assert_eq!(models[1].id, "gpt-4o-mini");

    let request = &transport.requests()[0];
    assert_eq!(request.method, HttpMethod::Get);
    assert_eq!(request.url, "http://mock/v1/models");
}

#[tokio::test]
async fn strict_dialect_rejects_unions_before_sending() {
    let transport = MockTransport::new(Vec::new());
    let err = provider(transport.clone())
        .chat(
            ChatRequest::new(vec![Message::user("?")])
                .with_schema(Schema::union([Schema::string(), Schema::integer()])),
        )
        .await
        .expect_err("schema error");
    assert!(matches!(err, LLMError::Schema(_)), "{err:?}");
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
#[ignore = "requires valid OpenAI-compatible endpoint"]
async fn openai_chat_live_sync_and_stream() {
    dotenv().ok();
    let Some(provider) = build_provider_from_env() else {
        return;
    };
    let client = LLMClient::new(Arc::new(provider));
    let request = ChatRequest::new(vec![
        Message::system("You are a helpful assistant."),
        Message::user("Please introduce Rust language in one sentence."),
    ]);

    let response = client.chat(request.clone()).await.expect("chat request should succeed");
    assert!(
        response.text().is_some_and(|text| !text.is_empty()),
        "chat response should contain text"
    );

    let mut stream = client.stream(request).await.expect("streaming chat should start");
    let mut saw_delta = false;
    while let Some(delta) = stream.next().await {
        delta.expect("stream delta should be valid");
        saw_delta = true;
    }
    assert!(saw_delta, "stream should yield at least one delta");
}

fn build_provider_from_env() -> Option<OpenAiChatProvider> {
    let Some(endpoint) = load_env_var("OPENAI_CHAT_ENDPOINT") else {
        eprintln!("skip live test: OPENAI_CHAT_ENDPOINT missing");
        return None;
    };
    let Some(api_key) = load_env_var("OPENAI_CHAT_KEY") else {
        eprintln!("skip live test: OPENAI_CHAT_KEY missing");
        return None;
    };
    let Some(model) = load_env_var("OPENAI_CHAT_MODEL") else {
        eprintln!("skip live test: OPENAI_CHAT_MODEL missing");
        return None;
    };
    let transport = Arc::new(ReqwestTransport::default());
    Some(OpenAiChatProvider::new(transport, api_key, model).with_base_url(endpoint))
}

fn load_env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}
