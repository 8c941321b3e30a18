//! Adapter tests against mock vendor endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use switchboard_gateway::config::ProviderSettings;
use switchboard_gateway::providers::{
    AnthropicProvider, OllamaProvider, OpenAiProvider, Provider,
};
use switchboard_gateway::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimitConfig, RateLimiter, RetryConfig,
};
use switchboard_gateway::{GatewayError, Manager, RoleModels, RoutingConfig, StreamAccumulator};
use switchboard_models::{ChatRequest, FinishReason, Message};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        initial_interval_ms: 1,
        max_interval_ms: 5,
        backoff_multiplier: 1.0,
    }
}

fn resilience(
    max_failures: u32,
) -> (Arc<CircuitBreaker>, Arc<RateLimiter>, RetryConfig) {
    (
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            max_failures,
            reset_timeout_ms: 60_000,
        })),
        Arc::new(RateLimiter::new(RateLimitConfig {
            requests_per_second: 10_000.0,
            burst: 1_000,
        })),
        fast_retry(),
    )
}

fn openai_provider(server: &MockServer, max_failures: u32) -> OpenAiProvider {
    let settings = ProviderSettings {
        enabled: true,
        api_key: Some("sk-test".to_string()),
        base_url: Some(server.uri()),
        ..Default::default()
    };
    let (breaker, limiter, retry) = resilience(max_failures);
    OpenAiProvider::new(&settings, reqwest::Client::new(), breaker, limiter, retry).unwrap()
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
    })
}

#[tokio::test]
async fn openai_chat_normalizes_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello there")))
        .mount(&server)
        .await;

    let provider = openai_provider(&server, 5);
    let response = provider
        .chat(ChatRequest::new(
            "openai/gpt-4o",
            vec![Message::user("hi")],
        ))
        .await
        .unwrap();

    assert_eq!(response.model, "openai/gpt-4o");
    assert_eq!(response.text(), "hello there");
    assert_eq!(response.usage.unwrap().total_tokens, 12);
    assert_eq!(
        response.choices[0].finish_reason,
        Some(FinishReason::Stop)
    );
}

#[tokio::test]
async fn openai_chat_retries_transient_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
        .mount(&server)
        .await;

    let provider = openai_provider(&server, 5);
    let response = provider
        .chat(ChatRequest::new("gpt-4o", vec![Message::user("hi")]))
        .await
        .unwrap();

    assert_eq!(response.text(), "recovered");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn openai_chat_rate_limit_retries_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .set_body_json(json!({"error": {"message": "slow down", "type": "rate_limit_error"}})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("after limit")))
        .mount(&server)
        .await;

    let provider = openai_provider(&server, 5);
    let response = provider
        .chat(ChatRequest::new("gpt-4o", vec![Message::user("hi")]))
        .await
        .unwrap();
    assert_eq!(response.text(), "after limit");
}

#[tokio::test]
async fn openai_chat_client_errors_fail_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "bad key", "type": "auth_error"}})),
        )
        .mount(&server)
        .await;

    let provider = openai_provider(&server, 5);
    let err = provider
        .chat(ChatRequest::new("gpt-4o", vec![Message::user("hi")]))
        .await
        .unwrap_err();

    match err {
        GatewayError::Api {
            status,
            message,
            code,
            ..
        } => {
            assert_eq!(status, 401);
            assert_eq!(message, "bad key");
            assert_eq!(code.as_deref(), Some("auth_error"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn circuit_opens_after_consecutive_call_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let settings = ProviderSettings {
        enabled: true,
        api_key: Some("sk-test".to_string()),
        base_url: Some(server.uri()),
        ..Default::default()
    };
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        max_failures: 2,
        reset_timeout_ms: 60_000,
    }));
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        requests_per_second: 10_000.0,
        burst: 1_000,
    }));
    // No transparent retries: each logical call is one HTTP attempt.
    let retry = RetryConfig {
        max_retries: 0,
        initial_interval_ms: 1,
        max_interval_ms: 1,
        backoff_multiplier: 1.0,
    };
    let provider = OpenAiProvider::new(
        &settings,
        reqwest::Client::new(),
        breaker,
        limiter,
        retry,
    )
    .unwrap();

    let request = ChatRequest::new("gpt-4o", vec![Message::user("hi")]);
    assert!(provider.chat(request.clone()).await.is_err());
    assert!(provider.chat(request.clone()).await.is_err());

    // Third call is rejected by the breaker without reaching the wire.
    let err = provider.chat(request).await.unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn exhausted_retries_count_as_one_breaker_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let settings = ProviderSettings {
        enabled: true,
        api_key: Some("sk-test".to_string()),
        base_url: Some(server.uri()),
        ..Default::default()
    };
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
        max_failures: 2,
        reset_timeout_ms: 60_000,
    }));
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        requests_per_second: 10_000.0,
        burst: 1_000,
    }));
    let provider = OpenAiProvider::new(
        &settings,
        reqwest::Client::new(),
        breaker,
        limiter,
        fast_retry(),
    )
    .unwrap();

    // One logical call, three HTTP attempts: the breaker sees one failure
    // and stays closed.
    let request = ChatRequest::new("gpt-4o", vec![Message::user("hi")]);
    assert!(provider.chat(request.clone()).await.is_err());
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    // The second logical failure opens it.
    assert!(provider.chat(request.clone()).await.is_err());
    let err = provider.chat(request).await.unwrap_err();
    assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 6);
}

#[tokio::test]
async fn openai_stream_parses_sse_until_done() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"id\":\"chatcmpl-1\",\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hello\"}}]}\n\n",
        ": keep-alive comment\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" world\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"!\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":3,\"total_tokens\":8}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = openai_provider(&server, 5);
    let mut stream = provider.chat_stream(
        ChatRequest::new("openai/gpt-4o", vec![Message::user("hi")]).streaming(),
    );

    let mut acc = StreamAccumulator::new();
    while let Some(chunk) = stream.next().await {
        acc.add(&chunk.unwrap());
    }

    assert_eq!(acc.content(), "Hello world!");
    assert_eq!(acc.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(acc.usage().unwrap().total_tokens, 8);
    let response = acc.finalize_response();
    assert_eq!(response.id, "chatcmpl-1");
    assert_eq!(response.model, "openai/gpt-4o");
}

#[tokio::test]
async fn openai_stream_accumulates_fragmented_tool_calls() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"tool_calls\":[{\"index\":0,\"id\":\"call_\",\"function\":{\"name\":\"get_\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"abc123\",\"function\":{\"name\":\"weather\",\"arguments\":\"{\\\"city\\\":\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"Beijing\\\"}\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = openai_provider(&server, 5);
    let mut stream = provider.chat_stream(
        ChatRequest::new("gpt-4o", vec![Message::user("weather?")]).streaming(),
    );

    let mut acc = StreamAccumulator::new();
    while let Some(chunk) = stream.next().await {
        acc.add(&chunk.unwrap());
    }

    let calls = acc.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_abc123");
    assert_eq!(calls[0].function.name, "get_weather");
    assert_eq!(calls[0].function.arguments, "{\"city\":\"Beijing\"}");
    assert_eq!(acc.finish_reason(), Some(FinishReason::ToolCalls));
}

#[tokio::test]
async fn openai_stream_malformed_chunk_is_a_hard_error() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"ok\"}}]}\n\n",
        "data: {this is not json}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = openai_provider(&server, 5);
    let mut stream =
        provider.chat_stream(ChatRequest::new("gpt-4o", vec![Message::user("hi")]).streaming());

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(
        first.choices[0].delta.content.as_deref(),
        Some("ok")
    );
    let second = stream.next().await.unwrap();
    assert!(matches!(second, Err(GatewayError::StreamParse(_))));
    // The parse error terminates the stream.
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn openai_catalog_normalizes_pricing_per_million() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {
                    "id": "gpt-4o",
                    "context_length": 128000,
                    "pricing": {"prompt": "0.0000025", "completion": "0.00001"},
                    "architecture": {"modality": "text+image->text"},
                    "supported_parameters": ["tools", "temperature"]
                },
                {"id": "gpt-4o-mini"}
            ]
        })))
        .mount(&server)
        .await;

    let provider = openai_provider(&server, 5);
    let catalog = provider.fetch_catalog().await.unwrap();
    assert_eq!(catalog.len(), 2);

    let info = catalog.get("openai/gpt-4o").unwrap();
    let pricing = info.pricing.unwrap();
    assert!((pricing.prompt_per_million - 2.5).abs() < 1e-9);
    assert!((pricing.completion_per_million - 10.0).abs() < 1e-9);
    assert!(info.supports_vision());
    assert!(info.supports_tools());

    // Second fetch is served from the TTL cache.
    provider.fetch_catalog().await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn anthropic_stream_synthesizes_uniform_chunks() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-sonnet-4\",\"usage\":{\"input_tokens\":11}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi \"}}\n\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"there\"}}\n\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":4}}\n\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let settings = ProviderSettings {
        enabled: true,
        api_key: Some("sk-ant-test".to_string()),
        base_url: Some(server.uri()),
        models: vec!["claude-sonnet-4".to_string()],
        ..Default::default()
    };
    let (breaker, limiter, retry) = resilience(5);
    let provider =
        AnthropicProvider::new(&settings, reqwest::Client::new(), breaker, limiter, retry)
            .unwrap();

    let mut stream = provider.chat_stream(
        ChatRequest::new("anthropic/claude-sonnet-4", vec![Message::user("hi")]).streaming(),
    );
    let mut acc = StreamAccumulator::new();
    while let Some(chunk) = stream.next().await {
        acc.add(&chunk.unwrap());
    }

    assert_eq!(acc.content(), "Hi there");
    assert_eq!(acc.finish_reason(), Some(FinishReason::Stop));
    let usage = acc.usage().unwrap();
    assert_eq!(usage.prompt_tokens, 11);
    assert_eq!(usage.completion_tokens, 4);
    let response = acc.finalize_response();
    assert_eq!(response.id, "msg_1");
    assert_eq!(response.model, "anthropic/claude-sonnet-4");
}

#[tokio::test]
async fn ollama_stream_parses_newline_delimited_json() {
    let server = MockServer::start().await;
    let body = concat!(
        "{\"model\":\"llama3:8b\",\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
        "{\"model\":\"llama3:8b\",\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
        "{\"model\":\"llama3:8b\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\",\"prompt_eval_count\":6,\"eval_count\":2}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&server)
        .await;

    let settings = ProviderSettings {
        enabled: true,
        base_url: Some(server.uri()),
        ..Default::default()
    };
    let (breaker, limiter, retry) = resilience(5);
    let provider = OllamaProvider::new(&settings, reqwest::Client::new(), breaker, limiter, retry);

    let mut stream = provider.chat_stream(
        ChatRequest::new("ollama/llama3:8b", vec![Message::user("hi")]).streaming(),
    );
    let mut acc = StreamAccumulator::new();
    while let Some(chunk) = stream.next().await {
        acc.add(&chunk.unwrap());
    }

    assert_eq!(acc.content(), "Hello");
    assert_eq!(acc.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(acc.usage().unwrap().total_tokens, 8);
}

#[tokio::test]
async fn ollama_chat_converts_native_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3:8b", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3:8b",
            "message": {"role": "assistant", "content": "4"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 10,
            "eval_count": 1
        })))
        .mount(&server)
        .await;

    let settings = ProviderSettings {
        enabled: true,
        base_url: Some(server.uri()),
        ..Default::default()
    };
    let (breaker, limiter, retry) = resilience(5);
    let provider = OllamaProvider::new(&settings, reqwest::Client::new(), breaker, limiter, retry);

    let response = provider
        .chat(ChatRequest::new(
            "ollama/llama3:8b",
            vec![Message::user("2+2?")],
        ))
        .await
        .unwrap();

    assert_eq!(response.model, "ollama/llama3:8b");
    assert_eq!(response.text(), "4");
    assert_eq!(response.usage.unwrap().prompt_tokens, 10);
}

#[tokio::test]
async fn manager_routes_through_real_adapter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "gpt-4o"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("routed")))
        .mount(&server)
        .await;

    let provider = openai_provider(&server, 5);
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert("openai".to_string(), Arc::new(provider));
    let manager = Manager::new(providers, RoutingConfig::default(), RoleModels::default());
    manager.initialize().await.unwrap();

    // Empty role slots were repaired to the only available model.
    assert_eq!(manager.role_models().execution, "openai/gpt-4o");

    let response = manager
        .chat_completion(ChatRequest::new(
            "openai/gpt-4o",
            vec![Message::user("hi")],
        ))
        .await
        .unwrap();
    assert_eq!(response.text(), "routed");
}
