//! Local Ollama adapter.
//!
//! Speaks Ollama's native API: `/api/tags` for discovery and `/api/chat`
//! for completions, which streams newline-delimited JSON rather than SSE.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchboard_models::{
    ChatRequest, ChatResponse, Choice, FinishReason, Message, ModelCatalog, ModelInfo, Role,
    StreamChunk, ToolCall, ToolDefinition, Usage,
};

use crate::config::ProviderSettings;
use crate::error::{GatewayError, Result};
use crate::http::{CATALOG_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use crate::providers::{
    CATALOG_TTL, CatalogCache, ChunkStream, Provider, qualified_model_id, strip_provider_prefix,
};
use crate::resilience::{
    CircuitBreaker, RateLimiter, RetryConfig, api_error_from_response, send_idempotent,
    with_retries,
};

const PROVIDER_ID: &str = "ollama";
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    catalog: Arc<CatalogCache>,
}

impl OllamaProvider {
    pub fn new(
        settings: &ProviderSettings,
        client: Client,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            breaker,
            limiter,
            retry,
            catalog: Arc::new(CatalogCache::new(CATALOG_TTL)),
        }
    }

    fn build_body(&self, request: &ChatRequest, model: &str, stream: bool) -> OllamaRequest {
        let options = (request.temperature.is_some() || request.max_tokens.is_some()).then(|| {
            OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            }
        });

        OllamaRequest {
            model: model.to_string(),
            messages: request.messages.iter().map(OllamaMessage::from).collect(),
            stream,
            tools: request.tools.clone(),
            options,
        }
    }

    async fn send(&self, body: &OllamaRequest) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(body);
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
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

impl From<&Message> for OllamaMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            },
            content: message.text(),
            tool_calls: message.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|call| OllamaToolCall {
                        function: OllamaFunctionCall {
                            name: call.function.name.clone(),
                            arguments: call.parsed_arguments(),
                        },
                    })
                    .collect()
            }),
        }
    }
}

/// Ollama passes function arguments as a JSON object, not a string.
#[derive(Debug, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OllamaChatPiece {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

fn convert_tool_calls(calls: Vec<OllamaToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .map(|(index, call)| {
            // Ollama assigns no call IDs; synthesize stable ones.
            ToolCall::function(
                format!("call_{index}"),
                call.function.name,
                call.function.arguments.to_string(),
            )
        })
        .collect()
}

fn map_done_reason(reason: Option<&str>, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        return FinishReason::ToolCalls;
    }
    match reason {
        Some("stop") | None => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

fn piece_usage(piece: &OllamaChatPiece) -> Usage {
    Usage::new(
        piece.prompt_eval_count.unwrap_or(0),
        piece.eval_count.unwrap_or(0),
    )
}

#[derive(Debug, Deserialize)]
struct OllamaTagList {
    #[serde(default)]
    models: Vec<OllamaTag>,
}

#[derive(Debug, Deserialize)]
struct OllamaTag {
    name: String,
}

#[async_trait]
impl Provider for OllamaProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn fetch_catalog(&self) -> Result<ModelCatalog> {
        if let Some(cached) = self.catalog.get() {
            return Ok(cached);
        }
        self.limiter.wait().await;
        let request = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(CATALOG_TIMEOUT);
        let response = send_idempotent(&self.retry, PROVIDER_ID, request).await?;
        let tags = response.json::<OllamaTagList>().await?;
        let catalog = ModelCatalog::new(
            tags.models
                .into_iter()
                .map(|tag| ModelInfo::bare(qualified_model_id(PROVIDER_ID, &tag.name)))
                .collect(),
        );
        self.catalog.store(catalog.clone());
        Ok(catalog)
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let model = strip_provider_prefix(PROVIDER_ID, &request.model).to_string();
        let body = self.build_body(&request, &model, false);

        let piece: OllamaChatPiece = self
            .breaker
            .call(|| async {
                with_retries(&self.retry, PROVIDER_ID, || async {
                    self.limiter.wait().await;
                    let response = self.send(&body).await?;
                    Ok(response.json::<OllamaChatPiece>().await?)
                })
                .await
            })
            .await?;

        let usage = piece_usage(&piece);
        let message = piece
            .message
            .ok_or_else(|| GatewayError::api(PROVIDER_ID, 502, "response carried no message"))?;
        let tool_calls = message.tool_calls.map(convert_tool_calls);
        let finish_reason = map_done_reason(
            piece.done_reason.as_deref(),
            tool_calls.as_ref().is_some_and(|calls| !calls.is_empty()),
        );

        let mut assistant = Message::assistant(message.content);
        assistant.tool_calls = tool_calls;

        Ok(ChatResponse {
            id: String::new(),
            model: qualified_model_id(
                PROVIDER_ID,
                piece.model.as_deref().unwrap_or(model.as_str()),
            ),
            choices: vec![Choice {
                index: 0,
                message: assistant,
                finish_reason: Some(finish_reason),
            }],
            usage: Some(usage),
        })
    }

    fn chat_stream(&self, request: ChatRequest) -> ChunkStream {
        let this = self.clone();

        Box::pin(stream! {
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

            yield Ok(StreamChunk::role(Role::Assistant));

            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(GatewayError::Http(err));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Newline-delimited JSON: one object per line.
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let piece: OllamaChatPiece = match serde_json::from_str(line) {
                        Ok(piece) => piece,
                        Err(err) => {
                            yield Err(GatewayError::StreamParse(format!(
                                "{PROVIDER_ID}: malformed line: {err}"
                            )));
                            return;
                        }
                    };

                    let mut had_tool_calls = false;
                    if let Some(message) = &piece.message {
                        if !message.content.is_empty() {
                            yield Ok(StreamChunk::text(&message.content));
                        }
                        if let Some(calls) = &message.tool_calls {
                            for (index, call) in calls.iter().enumerate() {
                                had_tool_calls = true;
                                yield Ok(StreamChunk::tool_delta(
                                    index,
                                    Some(format!("call_{index}")),
                                    Some(call.function.name.clone()),
                                    Some(call.function.arguments.to_string()),
                                ));
                            }
                        }
                    }

                    if piece.done {
                        yield Ok(StreamChunk::finish(
                            map_done_reason(piece.done_reason.as_deref(), had_tool_calls),
                            Some(piece_usage(&piece)),
                        ));
                        return;
                    }
                }
            }
        })
    }
}
