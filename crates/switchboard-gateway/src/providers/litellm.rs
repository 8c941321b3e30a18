//! LiteLLM proxy adapter.
//!
//! A self-hosted OpenAI-compatible proxy; authentication is optional and
//! the catalog reports bare model IDs.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use switchboard_models::{ChatRequest, ChatResponse, ModelCatalog};

use crate::config::ProviderSettings;
use crate::error::Result;
use crate::providers::openai_wire::CompatEndpoint;
use crate::providers::{CATALOG_TTL, CatalogCache, ChunkStream, Provider, strip_provider_prefix};
use crate::resilience::{CircuitBreaker, RateLimiter, RetryConfig};

const PROVIDER_ID: &str = "litellm";
const DEFAULT_BASE_URL: &str = "http://localhost:4000/v1";

pub struct LiteLlmProvider {
    endpoint: CompatEndpoint,
    catalog: CatalogCache,
}

impl LiteLlmProvider {
    pub fn new(
        settings: &ProviderSettings,
        client: Client,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            endpoint: CompatEndpoint {
                provider: PROVIDER_ID.to_string(),
                client,
                base_url: settings
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                api_key: settings.api_key.clone().filter(|key| !key.is_empty()),
                extra_headers: Vec::new(),
                breaker,
                limiter,
                retry,
            },
            catalog: CatalogCache::new(CATALOG_TTL),
        }
    }
}

#[async_trait]
impl Provider for LiteLlmProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    async fn fetch_catalog(&self) -> Result<ModelCatalog> {
        if let Some(cached) = self.catalog.get() {
            return Ok(cached);
        }
        let models = self.endpoint.list_models().await?;
        let catalog = ModelCatalog::new(
            models
                .into_iter()
                .map(|model| model.into_model_info(PROVIDER_ID))
                .collect(),
        );
        self.catalog.store(catalog.clone());
        Ok(catalog)
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let model = strip_provider_prefix(PROVIDER_ID, &request.model).to_string();
        self.endpoint.chat(&request, &model).await
    }

    fn chat_stream(&self, request: ChatRequest) -> ChunkStream {
        let model = strip_provider_prefix(PROVIDER_ID, &request.model).to_string();
        self.endpoint.chat_stream(&request, &model)
    }
}
