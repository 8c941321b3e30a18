//! Anthropic Messages API adapter.
//!
//! Text-only: tool calling and tool-result turns are rejected up front.
//! There is no discovery endpoint, so the catalog comes from the configured
//! static model list.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use switchboard_models::{
    ChatRequest, ChatResponse, Choice, FinishReason, Message, ModelCatalog, ModelInfo, Role,
    StreamChunk, Usage,
};

use crate::config::ProviderSettings;
use crate::error::{GatewayError, Result};
use crate::http::DEFAULT_REQUEST_TIMEOUT;
use crate::providers::{
    ChunkStream, Provider, qualified_model_id, reject_tool_features, require_api_key,
    strip_provider_prefix,
};
use crate::resilience::{
    CircuitBreaker, RateLimiter, RetryConfig, api_error_from_response, with_retries,
};
use crate::stream::SseFramer;

const PROVIDER_ID: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
}

impl AnthropicProvider {
    pub fn new(
        settings: &ProviderSettings,
        client: Client,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
    ) -> Result<Self> {
        Ok(Self {
            client,
            api_key: require_api_key(settings, PROVIDER_ID)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            models: settings.models.clone(),
            breaker,
            limiter,
            retry,
        })
    }

    fn build_body(&self, request: &ChatRequest, model: &str, stream: bool) -> AnthropicRequest {
        let cache_system = request.cache.is_some_and(|hint| hint.system_prefix);
        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| {
                let text = m.text();
                if cache_system {
                    SystemField::Blocks(vec![SystemBlock {
                        kind: "text",
                        text,
                        cache_control: Some(CacheControl { kind: "ephemeral" }),
                    }])
                } else {
                    SystemField::Text(text)
                }
            });

        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                },
                content: m.text(),
            })
            .collect();

        AnthropicRequest {
            model: model.to_string(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            temperature: request.temperature,
            stream,
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body);
        // Streams read their body for as long as generation runs; only
        // non-streaming calls get the overall deadline.
        if !body.stream {
            request = request.timeout(DEFAULT_REQUEST_TIMEOUT);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(api_error_from_response(response, PROVIDER_ID).await);
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<SystemField>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SystemField {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// Streaming event types

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: MessageStartPayload,
    },
    ContentBlockStart {
        #[allow(dead_code)]
        index: usize,
        content_block: ContentBlockStartPayload,
    },
    ContentBlockDelta {
        #[allow(dead_code)]
        index: usize,
        delta: ContentBlockDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaPayload,
        usage: Option<OutputUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorPayload,
    },
}

#[derive(Debug, Deserialize)]
struct MessageStartPayload {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    usage: Option<InputUsage>,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockStartPayload {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        #[allow(dead_code)]
        id: String,
        #[allow(dead_code)]
        name: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(clippy::enum_variant_names)]
enum ContentBlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

fn map_stop_reason(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        None => FinishReason::Stop,
        _ => FinishReason::Other,
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn fetch_catalog(&self) -> Result<ModelCatalog> {
        Ok(ModelCatalog::new(
            self.models
                .iter()
                .map(|model| ModelInfo::bare(qualified_model_id(PROVIDER_ID, model)))
                .collect(),
        ))
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        reject_tool_features(PROVIDER_ID, &request)?;
        let model = strip_provider_prefix(PROVIDER_ID, &request.model);
        let body = self.build_body(&request, model, false);

        let data: AnthropicResponse = self
            .breaker
            .call(|| async {
                with_retries(&self.retry, PROVIDER_ID, || async {
                    self.limiter.wait().await;
                    let response = self.send(&body).await?;
                    Ok(response.json::<AnthropicResponse>().await?)
                })
                .await
            })
            .await?;

        let mut content = String::new();
        let mut reasoning = String::new();
        for block in &data.content {
            match block.kind.as_str() {
                "text" => {
                    if let Some(text) = &block.text {
                        content.push_str(text);
                    }
                }
                "thinking" => {
                    if let Some(thinking) = &block.thinking {
                        reasoning.push_str(thinking);
                    }
                }
                _ => {}
            }
        }

        let mut message = Message::assistant(content);
        if !reasoning.is_empty() {
            message.reasoning = Some(reasoning);
        }

        Ok(ChatResponse {
            id: data.id,
            model: qualified_model_id(PROVIDER_ID, &data.model),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some(map_stop_reason(data.stop_reason.as_deref())),
            }],
            usage: Some(Usage::new(
                data.usage.input_tokens,
                data.usage.output_tokens,
            )),
        })
    }

    fn chat_stream(&self, request: ChatRequest) -> ChunkStream {
        let this = self.clone();

        Box::pin(stream! {
            if let Err(err) = reject_tool_features(PROVIDER_ID, &request) {
                yield Err(err);
                return;
            }
            let model = strip_provider_prefix(PROVIDER_ID, &request.model).to_string();
            let body = this.build_body(&request, &model, true);

            this.limiter.wait().await;
            let response = match this.breaker.call(|| this.send(&body)).await {
                Ok(response) => response,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            let mut bytes = response.bytes_stream();
            let mut framer = SseFramer::new();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;

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
                    let event: AnthropicStreamEvent = match serde_json::from_str(&data) {
                        Ok(event) => event,
                        Err(err) => {
                            yield Err(GatewayError::StreamParse(format!(
                                "{PROVIDER_ID}: malformed event: {err}"
                            )));
                            return;
                        }
                    };

                    match event {
                        AnthropicStreamEvent::MessageStart { message } => {
                            if let Some(usage) = message.usage {
                                input_tokens = usage.input_tokens;
                            }
                            let mut chunk = StreamChunk::role(Role::Assistant);
                            chunk.id = Some(message.id);
                            chunk.model = Some(qualified_model_id(PROVIDER_ID, &message.model));
                            yield Ok(chunk);
                        }
                        AnthropicStreamEvent::ContentBlockStart { content_block, .. } => {
                            match content_block {
                                ContentBlockStartPayload::Text { text } => {
                                    if !text.is_empty() {
                                        yield Ok(StreamChunk::text(text));
                                    }
                                }
                                ContentBlockStartPayload::Thinking { thinking } => {
                                    if !thinking.is_empty() {
                                        yield Ok(StreamChunk::reasoning(thinking));
                                    }
                                }
                                // Tool requests were rejected before dispatch.
                                ContentBlockStartPayload::ToolUse { .. } => {}
                            }
                        }
                        AnthropicStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                            ContentBlockDelta::TextDelta { text } => {
                                yield Ok(StreamChunk::text(text));
                            }
                            ContentBlockDelta::ThinkingDelta { thinking } => {
                                yield Ok(StreamChunk::reasoning(thinking));
                            }
                            ContentBlockDelta::InputJsonDelta { .. } => {}
                        },
                        AnthropicStreamEvent::ContentBlockStop { .. } => {}
                        AnthropicStreamEvent::MessageDelta { delta, usage } => {
                            if let Some(usage) = usage {
                                output_tokens = usage.output_tokens;
                            }
                            if let Some(stop_reason) = delta.stop_reason {
                                yield Ok(StreamChunk::finish(
                                    map_stop_reason(Some(&stop_reason)),
                                    Some(Usage::new(input_tokens, output_tokens)),
                                ));
                            }
                        }
                        AnthropicStreamEvent::MessageStop => return,
                        AnthropicStreamEvent::Ping => {}
                        AnthropicStreamEvent::Error { error } => {
                            yield Err(GatewayError::Api {
                                provider: PROVIDER_ID.to_string(),
                                status: 500,
                                message: error.message,
                                code: Some("stream_error".to_string()),
                                retry_after: None,
                            });
                            return;
                        }
                    }
                }
            }
        })
    }
}
