//! Shared plumbing for OpenAI-compatible endpoints.
//!
//! The uniform request/response types already follow this wire shape, so
//! the native OpenAI, aggregator and LiteLLM adapters differ only in base
//! URL, headers and catalog handling.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use switchboard_models::{
    ChatRequest, ChatResponse, Message, ModelArchitecture, ModelInfo, ModelPricing, StreamChunk,
    ToolDefinition, per_token_price,
};

use crate::error::{GatewayError, Result};
use crate::http::{CATALOG_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::providers::{ChunkStream, qualified_model_id};
use crate::resilience::{
    CircuitBreaker, RateLimiter, RetryConfig, api_error_from_response, send_idempotent,
    with_retries,
};
use crate::stream::SseFramer;

/// One OpenAI-compatible endpoint with its resilience stack.
#[derive(Clone)]
pub(crate) struct CompatEndpoint {
    pub provider: String,
    pub client: Client,
    pub base_url: String,
    pub api_key: Option<String>,
    pub extra_headers: Vec<(String, String)>,
    pub breaker: Arc<CircuitBreaker>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryConfig,
}

#[derive(Debug, Serialize)]
struct WireChatBody {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

impl WireChatBody {
    fn new(model: &str, request: &ChatRequest, stream: bool) -> Self {
        Self {
            model: model.to_string(),
            messages: request.messages.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            tools: request.tools.clone(),
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

/// `GET /models` entry; the aggregator reports rich metadata, plain
/// OpenAI-compatible endpoints only an ID.
#[derive(Debug, Deserialize)]
pub(crate) struct WireModel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub pricing: Option<WirePricing>,
    #[serde(default)]
    pub architecture: Option<ModelArchitecture>,
    #[serde(default)]
    pub supported_parameters: Vec<String>,
}

/// Per-token prices as the vendor quotes them (numbers or strings).
#[derive(Debug, Deserialize)]
pub(crate) struct WirePricing {
    #[serde(default, deserialize_with = "per_token_price")]
    pub prompt: f64,
    #[serde(default, deserialize_with = "per_token_price")]
    pub completion: f64,
}

#[derive(Debug, Deserialize)]
struct WireModelList {
    data: Vec<WireModel>,
}

impl WireModel {
    pub(crate) fn into_model_info(self, provider_id: &str) -> ModelInfo {
        ModelInfo {
            id: qualified_model_id(provider_id, &self.id),
            name: self.name,
            context_length: self.context_length,
            pricing: self
                .pricing
                .map(|p| ModelPricing::new(p.prompt, p.completion)),
            architecture: self.architecture,
            supported_parameters: self.supported_parameters,
        }
    }
}

impl CompatEndpoint {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        for (name, value) in &self.extra_headers {
            builder = builder.header(name, value);
        }
        builder
    }

    /// Non-streaming completion with the full resilience stack: the breaker
    /// wraps the whole retry loop, and the rate limiter gates each attempt.
    pub(crate) async fn chat(&self, request: &ChatRequest, model: &str) -> Result<ChatResponse> {
        let body = WireChatBody::new(model, request, false);
        let mut response = self
            .breaker
            .call(|| async {
                with_retries(&self.retry, &self.provider, || async {
                    self.limiter.wait().await;
                    self.send_chat(&body).await
                })
                .await
            })
            .await?;

        response.model = if response.model.is_empty() {
            qualified_model_id(&self.provider, model)
        } else {
            qualified_model_id(&self.provider, &response.model)
        };
        Ok(response)
    }

    async fn send_chat(&self, body: &WireChatBody) -> Result<ChatResponse> {
        let response = self
            .request(Method::POST, "chat/completions")
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error_from_response(response, &self.provider).await);
        }
        Ok(response.json::<ChatResponse>().await?)
    }

    /// Streaming completion over SSE framing. A literal `data: [DONE]`
    /// terminates the stream; malformed JSON is a hard parse error.
    pub(crate) fn chat_stream(&self, request: &ChatRequest, model: &str) -> ChunkStream {
        let endpoint = self.clone();
        let body = WireChatBody::new(model, request, true);

        Box::pin(stream! {
            endpoint.limiter.wait().await;
            let subscribe = endpoint.breaker.call(|| async {
                let response = endpoint
                    .request(Method::POST, "chat/completions")
                    .json(&body)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(api_error_from_response(response, &endpoint.provider).await);
                }
                Ok(response)
            });
            let response = match subscribe.await {
                Ok(response) => response,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            let mut bytes = response.bytes_stream();
            let mut framer = SseFramer::new();
            let mut done = false;

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(GatewayError::Http(err));
                        return;
                    }
                };
                framer.push(&chunk);
                while let Some(data) = framer.next_data() {
                    if data.trim() == "[DONE]" {
                        done = true;
                        break;
                    }
                    match decode_chunk(&data, &endpoint.provider) {
                        Ok(chunk) => yield Ok(chunk),
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
                if done {
                    break;
                }
            }

            // Recover a trailing event that arrived without its newline.
            if !done {
                if let Some(data) = framer.finish() {
                    if data.trim() != "[DONE]" {
                        match decode_chunk(&data, &endpoint.provider) {
                            Ok(chunk) => yield Ok(chunk),
                            Err(err) => yield Err(err),
                        }
                    }
                }
            }
        })
    }

    /// `GET /models`, retried transparently (idempotent) with the shorter
    /// catalog deadline.
    pub(crate) async fn list_models(&self) -> Result<Vec<WireModel>> {
        self.limiter.wait().await;
        let request = self.request(Method::GET, "models").timeout(CATALOG_TIMEOUT);
        let response = send_idempotent(&self.retry, &self.provider, request).await?;
        let list = response.json::<WireModelList>().await?;
        Ok(list.data)
    }
}

fn decode_chunk(data: &str, provider: &str) -> Result<StreamChunk> {
    let mut chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|err| GatewayError::StreamParse(format!("{provider}: malformed chunk: {err}")))?;
    if let Some(model) = chunk.model.take() {
        chunk.model = Some(qualified_model_id(provider, &model));
    }
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_models::MessageContent;

    #[test]
    fn chat_body_omits_unset_fields() {
        let request = ChatRequest::new("gpt-4o", vec![Message::user("hi")]);
        let body = WireChatBody::new("gpt-4o", &request, false);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert!(json.get("temperature").is_none());
        assert!(json.get("stream").is_none());
        assert!(json.get("stream_options").is_none());
    }

    #[test]
    fn streaming_body_requests_usage() {
        let request = ChatRequest::new("gpt-4o", vec![Message::user("hi")]);
        let body = WireChatBody::new("gpt-4o", &request, true);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["stream_options"]["include_usage"], true);
    }

    #[test]
    fn wire_model_maps_to_prefixed_info() {
        let wire: WireModel = serde_json::from_str(
            r#"{
                "id": "gpt-4o",
                "context_length": 128000,
                "pricing": {"prompt": "0.0000025", "completion": "0.00001"},
                "supported_parameters": ["tools"]
            }"#,
        )
        .unwrap();
        let info = wire.into_model_info("openai");
        assert_eq!(info.id, "openai/gpt-4o");
        assert_eq!(info.context_length, Some(128000));
        let pricing = info.pricing.unwrap();
        assert!((pricing.prompt_per_million - 2.5).abs() < 1e-9);
        assert!((pricing.completion_per_million - 10.0).abs() < 1e-9);
        assert!(info.supports_tools());
    }

    #[test]
    fn aggregator_ids_keep_their_vendor_prefix() {
        let wire: WireModel = serde_json::from_str(r#"{"id": "openai/gpt-4o"}"#).unwrap();
        assert_eq!(wire.into_model_info("openrouter").id, "openai/gpt-4o");
    }

    #[test]
    fn decode_chunk_rejects_malformed_json() {
        let err = decode_chunk("{not json", "openai").unwrap_err();
        assert!(matches!(err, GatewayError::StreamParse(_)));
    }

    #[test]
    fn decode_chunk_prefixes_model() {
        let chunk = decode_chunk(r#"{"model":"gpt-4o","choices":[]}"#, "openai").unwrap();
        assert_eq!(chunk.model.as_deref(), Some("openai/gpt-4o"));
    }

    #[test]
    fn request_messages_serialize_in_wire_shape() {
        let request = ChatRequest::new(
            "gpt-4o",
            vec![Message::tool_result("call_1", "42")],
        );
        let body = WireChatBody::new("gpt-4o", &request, false);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "tool");
        assert_eq!(json["messages"][0]["tool_call_id"], "call_1");
        assert!(matches!(
            request.messages[0].content,
            MessageContent::Text(_)
        ));
    }
}
