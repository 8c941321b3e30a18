//! Google Generative Language API adapter.
//!
//! Text-only, like the Anthropic adapter: tool features are rejected up
//! front and the catalog comes from the configured static model list.

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

const PROVIDER_ID: &str = "google";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
}

impl GoogleProvider {
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

    fn build_body(&self, request: &ChatRequest) -> GenerateContentRequest {
        let system_instruction = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| GoogleContent {
                role: None,
                parts: vec![GooglePart { text: m.text() }],
            });

        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| GoogleContent {
                role: Some(
                    match m.role {
                        Role::Assistant => "model",
                        _ => "user",
                    }
                    .to_string(),
                ),
                parts: vec![GooglePart { text: m.text() }],
            })
            .collect();

        let generation_config = (request.temperature.is_some() || request.max_tokens.is_some())
            .then(|| GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            });

        GenerateContentRequest {
            system_instruction,
            contents,
            generation_config,
        }
    }

    async fn send(
        &self,
        model: &str,
        action: &str,
        body: &GenerateContentRequest,
        streaming: bool,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}/models/{}:{}", self.base_url, model, action))
            .header("x-goog-api-key", &self.api_key)
            .json(body);
        if !streaming {
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
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GoogleContent>,
    contents: Vec<GoogleContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GoogleContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GooglePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<GoogleContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("STOP") | None => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

fn candidate_text(candidate: &Candidate) -> String {
    candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .map(|part| part.text.as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Provider for GoogleProvider {
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
        let model = strip_provider_prefix(PROVIDER_ID, &request.model).to_string();
        let body = self.build_body(&request);

        let data: GenerateContentResponse = self
            .breaker
            .call(|| async {
                with_retries(&self.retry, PROVIDER_ID, || async {
                    self.limiter.wait().await;
                    let response = self.send(&model, "generateContent", &body, false).await?;
                    Ok(response.json::<GenerateContentResponse>().await?)
                })
                .await
            })
            .await?;

        let candidate = data
            .candidates
            .first()
            .ok_or_else(|| GatewayError::api(PROVIDER_ID, 502, "response carried no candidates"))?;

        Ok(ChatResponse {
            id: String::new(),
            model: qualified_model_id(PROVIDER_ID, &model),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(candidate_text(candidate)),
                finish_reason: Some(map_finish_reason(candidate.finish_reason.as_deref())),
            }],
            usage: data
                .usage_metadata
                .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count)),
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
            let body = this.build_body(&request);

            this.limiter.wait().await;
            let response = match this
                .breaker
                .call(|| this.send(&model, "streamGenerateContent?alt=sse", &body, true))
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            yield Ok(StreamChunk::role(Role::Assistant));

            let mut bytes = response.bytes_stream();
            let mut framer = SseFramer::new();
            let mut usage = None;

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
                    let piece: GenerateContentResponse = match serde_json::from_str(&data) {
                        Ok(piece) => piece,
                        Err(err) => {
                            yield Err(GatewayError::StreamParse(format!(
                                "{PROVIDER_ID}: malformed chunk: {err}"
                            )));
                            return;
                        }
                    };

                    if let Some(meta) = piece.usage_metadata {
                        usage = Some(Usage::new(
                            meta.prompt_token_count,
                            meta.candidates_token_count,
                        ));
                    }
                    if let Some(candidate) = piece.candidates.first() {
                        let text = candidate_text(candidate);
                        if !text.is_empty() {
                            yield Ok(StreamChunk::text(text));
                        }
                        if let Some(reason) = &candidate.finish_reason {
                            yield Ok(StreamChunk::finish(
                                map_finish_reason(Some(reason)),
                                usage.take(),
                            ));
                        }
                    }
                }
            }
        })
    }
}
